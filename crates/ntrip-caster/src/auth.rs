//! Authentication is an external collaborator: the caster calls
//! out to whatever credential store the deployment wires in, rather than
//! owning one itself.

/// Per-request identity offered by a connecting source or client.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user: Option<String>,
    pub password: Option<String>,
}

/// Seam the caster calls into during source login and (optionally) client
/// admission. Kept minimal and synchronous — the source
/// login path blocks on it the same way it blocks on any other
/// credential-store lookup.
pub trait Authenticator: Send + Sync {
    fn authenticate_source(&self, mount: &str, creds: &Credentials) -> bool;

    /// Most deployments leave client mountpoints open; the default accepts
    /// everyone, matching the behavior of a deployment with no password
    /// file configured.
    fn authenticate_client(&self, _mount: &str, _creds: &Credentials) -> bool {
        true
    }
}

/// In-memory authenticator good enough for tests and small deployments: a
/// fixed table of `(mount, user, password)` triples.
#[derive(Debug, Default)]
pub struct StaticAuthenticator {
    sources: Vec<(String, String, String)>,
}

impl StaticAuthenticator {
    pub fn new() -> Self {
        Self { sources: Vec::new() }
    }

    pub fn allow_source(mut self, mount: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.sources.push((mount.into(), user.into(), password.into()));
        self
    }
}

impl Authenticator for StaticAuthenticator {
    fn authenticate_source(&self, mount: &str, creds: &Credentials) -> bool {
        let (Some(user), Some(password)) = (&creds.user, &creds.password) else {
            return false;
        };
        self.sources
            .iter()
            .any(|(m, u, p)| m == mount && u == user && p == password)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_authenticator_checks_mount_and_credentials() {
        let auth = StaticAuthenticator::new().allow_source("/RTCM3", "alice", "hunter2");
        let good = Credentials {
            user: Some("alice".into()),
            password: Some("hunter2".into()),
        };
        let bad = Credentials {
            user: Some("alice".into()),
            password: Some("wrong".into()),
        };
        assert!(auth.authenticate_source("/RTCM3", &good));
        assert!(!auth.authenticate_source("/RTCM3", &bad));
        assert!(!auth.authenticate_source("/OTHER", &good));
    }
}
