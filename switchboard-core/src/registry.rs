//! In-memory hostname → upstream routing table.
//!
//! Single writer (the `ControlServer` accept loop), many concurrent
//! readers (the `ProxyServer`), backed by a sharded-lock map rather than
//! one global mutex sitting between the proxy's hot path and the control
//! plane.

use dashmap::DashMap;
use uuid::Uuid;

/// Identifies a single open `ControlConnection`. Stable for the lifetime of
/// the connection; never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Who owns a `RegisteredApp`'s liveness. The switchboard owner's own app
/// has no backing connection to watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlChannel {
    /// Self-registration by the process that owns the switchboard.
    Owner,
    /// A peer app registered over a live `ControlConnection`.
    Peer(ConnectionId),
}

/// A single registered application.
#[derive(Debug, Clone)]
pub struct RegisteredApp {
    pub origin: String,
    pub upstream_host: String,
    pub upstream_port: u16,
    pub control_channel: ControlChannel,
}

impl RegisteredApp {
    pub fn hostname_key(&self) -> Option<String> {
        hostname_key_of(&self.origin)
    }
}

/// Strip a trailing `:port` from a bare host/authority string. Handles
/// bracketed IPv6 literals (`[::1]:8080` → `::1`).
pub fn strip_port(authority: &str) -> &str {
    if let Some(rest) = authority.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    authority.split_once(':').map(|(h, _)| h).unwrap_or(authority)
}

/// Lowercase a bare `Host` header value into a routing key.
pub fn hostname_key_from_host_header(host_header: &str) -> Option<String> {
    let host = strip_port(host_header);
    if host.is_empty() {
        None
    } else {
        Some(host.to_ascii_lowercase())
    }
}

/// Extract and lowercase the hostname portion of a URL-shaped origin string.
pub fn hostname_key_of(origin: &str) -> Option<String> {
    let without_scheme = origin.split_once("://").map(|(_, rest)| rest).unwrap_or(origin);
    let authority = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or(without_scheme);
    let authority = authority.rsplit_once('@').map(|(_, h)| h).unwrap_or(authority);
    hostname_key_from_host_header(authority)
}

/// Result of an `insert` attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Conflict,
    /// `app.origin` has no parseable, non-empty hostname portion. Distinct
    /// from `Conflict`: this is a validation failure, not a contested key.
    InvalidOrigin,
}

/// The hostname → upstream routing table.
///
/// `DashMap` gives us sharded-lock concurrent reads without a single global
/// mutex sitting between the proxy's hot path and the control plane.
#[derive(Default)]
pub struct RegistryTable {
    apps: DashMap<String, RegisteredApp>,
}

impl RegistryTable {
    pub fn new() -> Self {
        Self {
            apps: DashMap::new(),
        }
    }

    /// Insert a record keyed by `app.hostname_key()`. Never overwrites an
    /// existing record — the caller decides how to report the conflict.
    pub fn insert(&self, app: RegisteredApp) -> InsertOutcome {
        let Some(key) = app.hostname_key() else {
            return InsertOutcome::InvalidOrigin;
        };
        match self.apps.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => InsertOutcome::Conflict,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(app);
                InsertOutcome::Inserted
            }
        }
    }

    /// Remove a record by hostname key. Idempotent.
    pub fn remove(&self, hostname_key: &str) -> bool {
        self.apps.remove(hostname_key).is_some()
    }

    /// Remove every record whose `control_channel` is `Peer(conn)`. Skips
    /// `Owner` records, which have no backing connection to watch.
    pub fn remove_by_connection(&self, conn: ConnectionId) -> Vec<String> {
        let victims: Vec<String> = self
            .apps
            .iter()
            .filter(|entry| entry.value().control_channel == ControlChannel::Peer(conn))
            .map(|entry| entry.key().clone())
            .collect();
        for key in &victims {
            self.apps.remove(key);
        }
        victims
    }

    /// Side-effect-free lookup.
    pub fn lookup(&self, hostname_key: &str) -> Option<RegisteredApp> {
        self.apps.get(hostname_key).map(|entry| entry.value().clone())
    }

    /// Snapshot all live records for diagnostics (the status query).
    pub fn snapshot(&self) -> Vec<(String, RegisteredApp)> {
        self.apps
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(origin: &str, channel: ControlChannel) -> RegisteredApp {
        RegisteredApp {
            origin: origin.to_string(),
            upstream_host: "127.0.0.1".to_string(),
            upstream_port: 4000,
            control_channel: channel,
        }
    }

    #[test]
    fn hostname_key_strips_scheme_port_and_path() {
        assert_eq!(
            hostname_key_of("https://App-A.localhost:8443/foo"),
            Some("app-a.localhost".to_string())
        );
        assert_eq!(hostname_key_of("http://b.localhost"), Some("b.localhost".to_string()));
    }

    #[test]
    fn insert_rejects_duplicate_hostname() {
        let table = RegistryTable::new();
        let conn_a = ConnectionId::new();
        let conn_b = ConnectionId::new();
        assert_eq!(
            table.insert(app("https://a.localhost", ControlChannel::Peer(conn_a))),
            InsertOutcome::Inserted
        );
        assert_eq!(
            table.insert(app("https://a.localhost", ControlChannel::Peer(conn_b))),
            InsertOutcome::Conflict
        );
        let got = table.lookup("a.localhost").unwrap();
        assert_eq!(got.control_channel, ControlChannel::Peer(conn_a));
    }

    #[test]
    fn remove_by_connection_only_removes_matching_peer_records() {
        let table = RegistryTable::new();
        let conn = ConnectionId::new();
        table.insert(app("https://a.localhost", ControlChannel::Peer(conn)));
        table.insert(app("https://owner.localhost", ControlChannel::Owner));

        let removed = table.remove_by_connection(conn);
        assert_eq!(removed, vec!["a.localhost".to_string()]);
        assert!(table.lookup("a.localhost").is_none());
        assert!(table.lookup("owner.localhost").is_some());
    }

    #[test]
    fn remove_is_idempotent() {
        let table = RegistryTable::new();
        assert!(!table.remove("nope.localhost"));
        table.insert(app("https://a.localhost", ControlChannel::Owner));
        assert!(table.remove("a.localhost"));
        assert!(!table.remove("a.localhost"));
    }

    #[test]
    fn insert_rejects_unparseable_origin_distinctly_from_conflict() {
        let table = RegistryTable::new();
        assert_eq!(
            table.insert(app("http://", ControlChannel::Owner)),
            InsertOutcome::InvalidOrigin
        );
        assert!(table.snapshot().is_empty());
    }
}
