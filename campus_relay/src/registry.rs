// Session registry: who is connected, and how to reach them.
//
// `Registry` is the only mutable state shared between the relay's threads.
// It keeps two indices behind one mutex:
// - `sessions`: campus name -> `Session` (primary; sorted for listing).
// - `connections`: `ConnectionId` -> campus name, 1:1 with `sessions`, used
//   by a session thread at teardown to find out whether it is still the
//   registered owner of its campus.
//
// Every public method takes the lock once and performs its whole
// read-modify-write inside it, so no caller can observe one index updated
// without the other. Methods never do network I/O while holding the lock:
// lookups hand out a cloned `Session` whose `Arc<SessionStream>` the caller
// writes through after the lock is released.
//
// A campus authenticating again replaces its previous entry. `register`
// returns the superseded `Session` so the caller can close its stream; the
// old session thread then finds its `ConnectionId` gone from `connections`
// and its teardown leaves the new entry alone.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Local};

use crate::stream::{ConnectionId, SessionStream};

/// One authenticated, currently connected campus.
#[derive(Clone, Debug)]
pub struct Session {
    pub campus: String,
    pub department: String,
    pub stream: Arc<SessionStream>,
    /// Where broadcasts go; learned from the first heartbeat.
    pub datagram: Option<SocketAddr>,
    pub last_seen: DateTime<Local>,
}

impl Session {
    pub fn new(campus: String, department: String, stream: Arc<SessionStream>) -> Self {
        Self {
            campus,
            department,
            stream,
            datagram: None,
            last_seen: Local::now(),
        }
    }

    pub fn connection(&self) -> ConnectionId {
        self.stream.id()
    }

    pub fn has_datagram(&self) -> bool {
        self.datagram.is_some()
    }
}

/// Read-only view of a session for status listings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionInfo {
    pub campus: String,
    pub department: String,
    pub last_seen: DateTime<Local>,
    pub datagram: Option<SocketAddr>,
}

impl SessionInfo {
    pub fn has_datagram(&self) -> bool {
        self.datagram.is_some()
    }
}

impl From<&Session> for SessionInfo {
    fn from(session: &Session) -> Self {
        Self {
            campus: session.campus.clone(),
            department: session.department.clone(),
            last_seen: session.last_seen,
            datagram: session.datagram,
        }
    }
}

#[derive(Default)]
struct Inner {
    sessions: BTreeMap<String, Session>,
    connections: HashMap<ConnectionId, String>,
}

#[derive(Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every critical section leaves both indices consistent, so state
        // behind a poisoned lock is still valid.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install `session` under its campus name. Returns the entry it
    /// replaced, if any; closing that entry's stream is the caller's job.
    pub fn register(&self, session: Session) -> Option<Session> {
        let mut inner = self.lock();
        let connection = session.connection();
        let campus = session.campus.clone();
        let previous = inner.sessions.insert(campus.clone(), session);
        if let Some(old) = previous.as_ref().filter(|old| old.connection() != connection) {
            inner.connections.remove(&old.connection());
        }
        inner.connections.insert(connection, campus);
        previous
    }

    /// Remove `campus`. No-op if it is not registered.
    pub fn deregister(&self, campus: &str) -> Option<Session> {
        let mut inner = self.lock();
        let session = inner.sessions.remove(campus)?;
        inner.connections.remove(&session.connection());
        Some(session)
    }

    /// Remove whichever campus is registered on `connection`. No-op if the
    /// connection never registered or has been superseded.
    pub fn deregister_connection(&self, connection: ConnectionId) -> Option<Session> {
        let mut inner = self.lock();
        let campus = inner.connections.remove(&connection)?;
        inner.sessions.remove(&campus)
    }

    pub fn lookup(&self, campus: &str) -> Option<Session> {
        self.lock().sessions.get(campus).cloned()
    }

    /// Campus currently registered on `connection`.
    #[cfg(test)]
    pub fn campus_of(&self, connection: ConnectionId) -> Option<String> {
        self.lock().connections.get(&connection).cloned()
    }

    /// Record a heartbeat: store the datagram endpoint and refresh
    /// `last_seen`. Returns false (and changes nothing) if `campus` is not
    /// registered.
    pub fn update_liveness(&self, campus: &str, endpoint: SocketAddr, at: DateTime<Local>) -> bool {
        let mut inner = self.lock();
        match inner.sessions.get_mut(campus) {
            Some(session) => {
                session.datagram = Some(endpoint);
                session.last_seen = at;
                true
            }
            None => false,
        }
    }

    /// All sessions, ordered by campus name.
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        self.lock().sessions.values().map(SessionInfo::from).collect()
    }

    /// `(campus, endpoint)` for every session that has sent a heartbeat.
    pub fn datagram_endpoints(&self) -> Vec<(String, SocketAddr)> {
        self.lock()
            .sessions
            .values()
            .filter_map(|s| s.datagram.map(|addr| (s.campus.clone(), addr)))
            .collect()
    }

    /// Remove and return every session, leaving the registry empty.
    pub fn drain(&self) -> Vec<Session> {
        let mut inner = self.lock();
        inner.connections.clear();
        std::mem::take(&mut inner.sessions).into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().sessions.is_empty()
    }

    /// True if both indices describe exactly the same set of sessions.
    #[cfg(test)]
    fn is_consistent(&self) -> bool {
        let inner = self.lock();
        inner.sessions.len() == inner.connections.len()
            && inner.sessions.iter().all(|(campus, session)| {
                session.campus == *campus
                    && inner.connections.get(&session.connection()) == Some(campus)
            })
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::stream::tests::{session_stream, tcp_pair};

    fn session(campus: &str) -> Session {
        let (_client, stream) = session_stream();
        Session::new(campus.into(), "General".into(), stream)
    }

    fn endpoint(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn register_then_lookup() {
        let registry = Registry::new();
        let s = session("Lahore");
        let conn = s.connection();
        assert!(registry.register(s).is_none());

        let found = registry.lookup("Lahore").unwrap();
        assert_eq!(found.connection(), conn);
        assert_eq!(registry.campus_of(conn).as_deref(), Some("Lahore"));
        assert!(registry.lookup("Karachi").is_none());
        assert!(registry.is_consistent());
    }

    #[test]
    fn reregistering_replaces_previous_entry() {
        let registry = Registry::new();
        let first = session("Lahore");
        let first_conn = first.connection();
        registry.register(first);

        let second = session("Lahore");
        let second_conn = second.connection();
        let replaced = registry.register(second).unwrap();

        assert_eq!(replaced.connection(), first_conn);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("Lahore").unwrap().connection(), second_conn);
        assert_eq!(registry.campus_of(first_conn), None);
        assert!(registry.is_consistent());
    }

    #[test]
    fn superseded_connection_teardown_keeps_new_entry() {
        let registry = Registry::new();
        let first = session("Karachi");
        let first_conn = first.connection();
        registry.register(first);
        registry.register(session("Karachi"));

        assert!(registry.deregister_connection(first_conn).is_none());
        assert!(registry.lookup("Karachi").is_some());
        assert!(registry.is_consistent());
    }

    #[test]
    fn deregister_absent_is_noop() {
        let registry = Registry::new();
        registry.register(session("CFD"));
        assert!(registry.deregister("Multan").is_none());
        assert!(registry.deregister_connection(ConnectionId(u64::MAX)).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn deregister_removes_both_indices() {
        let registry = Registry::new();
        let s = session("CFD");
        let conn = s.connection();
        registry.register(s);

        assert!(registry.deregister("CFD").is_some());
        assert!(registry.lookup("CFD").is_none());
        assert_eq!(registry.campus_of(conn), None);
        assert!(registry.is_empty());
        assert!(registry.is_consistent());
    }

    #[test]
    fn update_liveness_only_touches_registered() {
        let registry = Registry::new();
        registry.register(session("Peshawar"));
        let before = registry.snapshot();

        assert!(!registry.update_liveness("Quetta", endpoint(9000), Local::now()));
        assert_eq!(registry.snapshot(), before);
        assert_eq!(registry.len(), 1);

        let at = Local::now();
        assert!(registry.update_liveness("Peshawar", endpoint(9001), at));
        let info = &registry.snapshot()[0];
        assert_eq!(info.datagram, Some(endpoint(9001)));
        assert_eq!(info.last_seen, at);
        assert!(info.has_datagram());
    }

    #[test]
    fn snapshot_is_sorted_by_campus() {
        let registry = Registry::new();
        for campus in ["Peshawar", "CFD", "Lahore"] {
            registry.register(session(campus));
        }
        let names: Vec<_> = registry.snapshot().into_iter().map(|s| s.campus).collect();
        assert_eq!(names, ["CFD", "Lahore", "Peshawar"]);
    }

    #[test]
    fn datagram_endpoints_skip_silent_sessions() {
        let registry = Registry::new();
        registry.register(session("Lahore"));
        registry.register(session("Karachi"));
        registry.update_liveness("Karachi", endpoint(9100), Local::now());

        assert_eq!(
            registry.datagram_endpoints(),
            vec![("Karachi".to_string(), endpoint(9100))]
        );
    }

    #[test]
    fn drain_empties_both_indices() {
        let registry = Registry::new();
        registry.register(session("Lahore"));
        registry.register(session("Multan"));

        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert!(registry.is_empty());
        assert!(registry.snapshot().is_empty());
        assert!(registry.is_consistent());
    }

    #[test]
    fn concurrent_churn_keeps_indices_paired() {
        let registry = Arc::new(Registry::new());
        let campuses = ["Lahore", "Karachi", "Peshawar", "CFD", "Multan"];

        let workers: Vec<_> = (0..8)
            .map(|worker| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let (_client, server) = tcp_pair();
                    for round in 0..200 {
                        let campus = campuses[(worker + round) % campuses.len()];
                        match round % 4 {
                            0 | 1 => {
                                let stream = SessionStream::new(
                                    ConnectionId::next(),
                                    server.try_clone().unwrap(),
                                    Duration::from_secs(1),
                                )
                                .unwrap();
                                registry.register(Session::new(
                                    campus.into(),
                                    "General".into(),
                                    Arc::new(stream),
                                ));
                            }
                            2 => {
                                if let Some(found) = registry.lookup(campus) {
                                    assert_eq!(found.campus, campus);
                                }
                            }
                            _ => {
                                registry.deregister(campus);
                            }
                        }
                        assert!(registry.is_consistent());
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        assert!(registry.is_consistent());
        assert!(registry.len() <= campuses.len());
    }
}
