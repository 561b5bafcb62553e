//! Source and client admission sequences. Each returns the
//! first applicable rejection; callers turn a `LoginError` into the wire
//! response (403/401/400/409/503) appropriate to their protocol.

use std::sync::Arc;

use crate::auth::Credentials;
use crate::client::{Client, ClientId};
use crate::context::CasterContext;
use crate::error::LoginError;
use crate::mount::MountRequest;
use crate::source::{Source, SourceKind};
use crate::transport::{Framing, OutputFraming};

/// Everything the login sequence needs to know about an inbound source
/// connection, gathered by the protocol-specific request parser upstream
/// of this crate.
pub struct SourceLoginRequest {
    pub mount: String,
    pub user_agent: String,
    pub credentials: Credentials,
    pub kind: SourceKind,
    pub framing: Framing,
}

/// Runs the source login sequence against an already-parsed request.
/// `acl_allowed` stands in for a TCP-wrappers/ACL check,
/// performed by the accept loop before the request is even parsed.
pub fn login_source(
    ctx: &CasterContext,
    acl_allowed: bool,
    req: SourceLoginRequest,
) -> Result<Arc<Source>, LoginError> {
    if !acl_allowed {
        return Err(LoginError::Forbidden);
    }
    if !req.user_agent.to_ascii_lowercase().starts_with("ntrip") {
        return Err(LoginError::NotNtrip);
    }
    if !ctx.authenticator().authenticate_source(&req.mount, &req.credentials) {
        return Err(LoginError::Unauthorized);
    }
    if req.mount.trim().is_empty() {
        return Err(LoginError::EmptyRequest);
    }

    ctx.register_source(&req.mount, req.kind, req.framing)
}

/// Everything the login sequence needs about an inbound client request.
pub struct ClientLoginRequest {
    pub path: String,
    pub host: String,
    pub port: u16,
    pub credentials: Credentials,
    pub output: OutputFraming,
    pub is_udp: bool,
}

/// Runs the client admission sequence: resolve the
/// mountpoint (following at most one alias hop), authenticate, check
/// global client capacity, then hand back a freshly allocated `Client`
/// the caller still has to enqueue onto the resolved source's pool.
pub fn login_client(
    ctx: &CasterContext,
    req: ClientLoginRequest,
) -> Result<(Arc<Source>, Client), LoginError> {
    let mount_req = MountRequest::new(req.path, req.host, req.port);
    let source = ctx
        .find_mount_with_req(&mount_req)
        .ok_or(LoginError::Unauthorized)?;

    if !ctx
        .authenticator()
        .authenticate_client(&mount_req.path, &req.credentials)
    {
        return Err(LoginError::Unauthorized);
    }

    ctx.try_admit_client()?;

    let id: ClientId = ctx.next_client_id();
    let client = Client::new(id, req.output, req.is_udp);
    Ok((source, client))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticAuthenticator;
    use crate::config::Config;
    use crate::sourcetable::NullSourcetableSink;

    fn test_context() -> CasterContext {
        CasterContext::new(
            Config::default(),
            vec!["localhost".into()],
            Arc::new(StaticAuthenticator::new().allow_source("/RTCM3", "alice", "hunter2")),
            Arc::new(NullSourcetableSink),
        )
    }

    fn creds(user: &str, pass: &str) -> Credentials {
        Credentials {
            user: Some(user.to_string()),
            password: Some(pass.to_string()),
        }
    }

    #[test]
    fn rejects_non_ntrip_user_agent() {
        let ctx = test_context();
        let req = SourceLoginRequest {
            mount: "/RTCM3".into(),
            user_agent: "curl/8.0".into(),
            credentials: creds("alice", "hunter2"),
            kind: SourceKind::Http,
            framing: Framing::PlainTcp,
        };
        assert_eq!(login_source(&ctx, true, req).unwrap_err(), LoginError::NotNtrip);
    }

    #[test]
    fn rejects_bad_credentials() {
        let ctx = test_context();
        let req = SourceLoginRequest {
            mount: "/RTCM3".into(),
            user_agent: "NTRIP SourceClient/1.0".into(),
            credentials: creds("alice", "wrong"),
            kind: SourceKind::Http,
            framing: Framing::PlainTcp,
        };
        assert_eq!(login_source(&ctx, true, req).unwrap_err(), LoginError::Unauthorized);
    }

    #[test]
    fn accepts_well_formed_login_then_conflicts_on_retry() {
        let ctx = test_context();
        let req = || SourceLoginRequest {
            mount: "/RTCM3".into(),
            user_agent: "NTRIP SourceClient/1.0".into(),
            credentials: creds("alice", "hunter2"),
            kind: SourceKind::Http,
            framing: Framing::PlainTcp,
        };
        assert!(login_source(&ctx, true, req()).is_ok());
        assert_eq!(login_source(&ctx, true, req()).unwrap_err(), LoginError::MountConflict);
    }

    #[test]
    fn client_login_fails_without_a_matching_source() {
        let ctx = test_context();
        let req = ClientLoginRequest {
            path: "/RTCM3".into(),
            host: "localhost".into(),
            port: 2101,
            credentials: creds("bob", "anything"),
            output: OutputFraming::PlainTcp,
            is_udp: false,
        };
        assert!(login_client(&ctx, req).is_err());
    }

    #[test]
    fn client_login_succeeds_once_source_is_connected() {
        let ctx = test_context();
        login_source(
            &ctx,
            true,
            SourceLoginRequest {
                mount: "/RTCM3".into(),
                user_agent: "NTRIP SourceClient/1.0".into(),
                credentials: creds("alice", "hunter2"),
                kind: SourceKind::Http,
                framing: Framing::PlainTcp,
            },
        )
        .unwrap();

        let req = ClientLoginRequest {
            path: "/RTCM3".into(),
            host: "localhost".into(),
            port: 2101,
            credentials: creds("bob", "anything"),
            output: OutputFraming::PlainTcp,
            is_udp: false,
        };
        let (source, _client) = login_client(&ctx, req).unwrap();
        assert_eq!(source.mount, "/RTCM3");
    }
}
