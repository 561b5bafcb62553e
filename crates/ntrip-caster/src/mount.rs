use std::sync::{Arc, RwLock};

use crate::ordmap::OrderedMap;
use crate::source::{Source, SourceState};

/// A resolved `(path, host, port)` triple, as seen either in an incoming
/// client request or as the parsed form of a registered mountpoint
/// string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRequest {
    pub path: String,
    pub host: String,
    pub port: u16,
}

impl MountRequest {
    pub fn new(path: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        let mut path = path.into();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        Self {
            path,
            host: host.into(),
            port,
        }
    }
}

/// The parsed form of a source's registered mount string, cached once at
/// source registration rather than re-parsed on every lookup.
///
/// A mount string is either a plain path (`/RTCM3`, or `RTCM3` without
/// the leading slash — both are accepted) or a full `host:port/path` URL
/// used for virtual-host relays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMount {
    pub raw: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: String,
}

impl ParsedMount {
    pub fn parse(raw: &str) -> Self {
        if let Some(rest) = raw.strip_prefix('/') {
            return Self {
                raw: raw.to_string(),
                host: None,
                port: None,
                path: format!("/{rest}"),
            };
        }

        if let Some(idx) = raw.find('/') {
            let hostport = &raw[..idx];
            let path = &raw[idx..];
            if let Some((host, port_str)) = hostport.rsplit_once(':') {
                if let Ok(port) = port_str.parse::<u16>() {
                    return Self {
                        raw: raw.to_string(),
                        host: Some(host.to_string()),
                        port: Some(port),
                        path: path.to_string(),
                    };
                }
            }
        }

        Self {
            raw: raw.to_string(),
            host: None,
            port: None,
            path: format!("/{raw}"),
        }
    }

    pub fn is_url(&self) -> bool {
        self.host.is_some()
    }
}

/// A rewrite rule from a virtual mountpoint to a real one.
/// A lookup follows at most one alias hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    pub virt: MountRequest,
    pub real: MountRequest,
}

/// Ordered set of live sources, searchable by `(path, host, port)` with
/// leading-slash normalization and alias redirection.
pub struct MountRegistry {
    sources: OrderedMap<String, Arc<Source>>,
    aliases: RwLock<Vec<Alias>>,
    local_hostnames: Vec<String>,
}

impl MountRegistry {
    pub fn new(local_hostnames: Vec<String>) -> Self {
        Self {
            sources: OrderedMap::new(),
            aliases: RwLock::new(Vec::new()),
            local_hostnames,
        }
    }

    fn hostname_local(&self, host: &str) -> bool {
        self.local_hostnames
            .iter()
            .any(|h| h.eq_ignore_ascii_case(host))
    }

    pub fn add_alias(&self, alias: Alias) {
        self.aliases.write().expect("alias lock poisoned").push(alias);
    }

    pub fn mount_exists(&self, mount: &str) -> bool {
        self.sources.contains_key(&mount.to_string())
    }

    pub fn num_sources(&self) -> usize {
        self.sources.len()
    }

    /// Registers a new source under its mount string. Returns `false`
    /// (refusing the insert) if the mount is already taken — the caller
    /// (source login) turns that into a 409.
    pub fn insert(&mut self, source: Arc<Source>) -> bool {
        let key = source.parsed_mount.raw.clone();
        self.sources.insert_new(key, source)
    }

    pub fn remove(&mut self, mount: &str) -> Option<Arc<Source>> {
        self.sources.remove(&mount.to_string())
    }

    fn alias_for(&self, req: &MountRequest) -> Option<Alias> {
        self.aliases
            .read()
            .expect("alias lock poisoned")
            .iter()
            .find(|a| &a.virt == req)
            .cloned()
    }

    /// `find_mount_with_req`. Callers must already hold
    /// whatever serializes registry mutation (`source_mutex`/`double_mutex`
    /// terms — here that's simply a `&CasterContext`
    /// holding this registry behind its own lock.
    pub fn find_mount_with_req(&self, req: &MountRequest) -> Option<Arc<Source>> {
        self.find_mount_with_req_hops(req, 1)
    }

    fn find_mount_with_req_hops(&self, req: &MountRequest, hops_left: u8) -> Option<Arc<Source>> {
        if req.path.is_empty() || req.host.is_empty() {
            return None;
        }

        if hops_left > 0 {
            if let Some(alias) = self.alias_for(req) {
                if self.hostname_local(&req.host) && self.hostname_local(&alias.real.host) {
                    return self.find_mount_with_req_hops(&alias.real, hops_left - 1);
                }
            }
        }

        let pathlen = req.path.len();

        for source in self.sources.values() {
            let parsed = &source.parsed_mount;
            let mlen = parsed.raw.len();

            // Shortcut: mount must end with the request path.
            if mlen < pathlen || !parsed.raw.ends_with(req.path.as_str()) {
                continue;
            }

            let matched = if parsed.is_url() {
                parsed.path == req.path
                    && parsed.host.as_deref().unwrap_or_default().eq_ignore_ascii_case(&req.host)
                    && parsed.port == Some(req.port)
            } else if parsed.raw.starts_with('/') {
                self.hostname_local(&req.host) && parsed.raw == req.path
            } else {
                self.hostname_local(&req.host) && parsed.raw == req.path[1..]
            };

            if matched {
                return if source.state() == SourceState::Connected {
                    Some(Arc::clone(source))
                } else {
                    None
                };
            }
        }

        None
    }

    /// Simple path-only lookup (no host/port/alias-hop bookkeeping),
    /// for NTRIP1 plain requests that carry no `Host:` header.
    pub fn find_mount(&self, path: &str) -> Option<Arc<Source>> {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        for source in self.sources.values() {
            let parsed = &source.parsed_mount;
            let matches = if parsed.raw.starts_with('/') {
                parsed.raw == path
            } else {
                parsed.raw == path[1..]
            };
            if matches {
                return Some(Arc::clone(source));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::source::SourceKind;
    use crate::transport::Framing;

    fn make_source(mount: &str) -> Arc<Source> {
        let cfg = Config::default();
        let source = Source::new(mount, SourceKind::Http, Framing::PlainTcp, &cfg);
        source.set_state(SourceState::Connected);
        Arc::new(source)
    }

    #[test]
    fn mount_conflict_refuses_second_insert() {
        let mut reg = MountRegistry::new(vec!["localhost".into()]);
        assert!(reg.insert(make_source("/RTCM3")));
        assert!(!reg.insert(make_source("/RTCM3")));
        assert_eq!(reg.num_sources(), 1);
    }

    #[test]
    fn alias_hop_redirects_once() {
        let mut reg = MountRegistry::new(vec!["localhost".into()]);
        reg.insert(make_source("/NEW"));
        reg.add_alias(Alias {
            virt: MountRequest::new("/OLD", "localhost", 2101),
            real: MountRequest::new("/NEW", "localhost", 2101),
        });

        let req = MountRequest::new("/OLD", "localhost", 2101);
        let found = reg.find_mount_with_req(&req);
        assert!(found.is_some());
        assert_eq!(found.unwrap().mount, "/NEW");
    }

    #[test]
    fn disconnecting_source_is_not_found_even_if_mount_matches() {
        let mut reg = MountRegistry::new(vec!["localhost".into()]);
        let source = make_source("/RTCM3");
        source.set_state(SourceState::Killed);
        reg.insert(source);

        let req = MountRequest::new("/RTCM3", "localhost", 2101);
        assert!(reg.find_mount_with_req(&req).is_none());
    }

    #[test]
    fn prefix_shortcut_skips_shorter_mounts() {
        let mut reg = MountRegistry::new(vec!["localhost".into()]);
        reg.insert(make_source("/R"));
        let req = MountRequest::new("/RTCM3", "localhost", 2101);
        assert!(reg.find_mount_with_req(&req).is_none());
    }
}
