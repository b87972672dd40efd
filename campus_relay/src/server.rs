// Listeners, shared relay state, and shutdown.
//
// Architecture: thread-per-connection around one shared `Relay`.
//
// - **Accept thread**: polls a non-blocking `TcpListener` and spawns one
//   session thread per accepted connection (see `session.rs`). It keeps the
//   session threads' join handles and joins them all when it exits, so
//   joining the accept thread waits for every session.
// - **Session threads** (one per connection): authenticate, register, read
//   and route frames, deregister. Each owns its connection's read half.
// - **Datagram thread**: receives heartbeats on the UDP socket
//   (`liveness.rs`).
// - **Caller's thread**: typically runs the admin console, which lists,
//   broadcasts and shuts down through the `Relay` methods.
//
// Threads share nothing but the `Relay`: the registry (one mutex) and the
// `running` flag. Every loop blocks for at most one poll interval before
// re-checking the flag, so `shutdown` is observed promptly everywhere.
//
// Shutdown: `Relay::shutdown` clears the flag, drains the registry and shuts
// down every registered stream, which wakes the owning session threads
// immediately. It does not wait; `RelayHandle::join` does.

use std::io;
use std::net::{SocketAddr, TcpListener, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::broadcast;
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::identity::IdentityStore;
use crate::liveness::datagram_loop;
use crate::registry::{Registry, Session, SessionInfo};
use crate::session::run_session;

/// Longest the accept loop sleeps between polls of an idle listener.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// State shared by every relay thread.
pub struct Relay {
    config: RelayConfig,
    registry: Registry,
    datagram: UdpSocket,
    running: AtomicBool,
}

impl Relay {
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn identities(&self) -> &IdentityStore {
        &self.config.campuses
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Registered sessions, ordered by campus name.
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        self.registry.snapshot()
    }

    /// Send `text` to every campus with a known datagram endpoint.
    pub fn broadcast(&self, text: &str) -> Result<usize> {
        broadcast::broadcast(&self.registry, &self.datagram, text)
    }

    /// Register an authenticated session and return the session it
    /// replaced, if any. Fails once the relay is shutting down, and then
    /// `session` is not left registered.
    pub(crate) fn install(&self, session: Session) -> Result<Option<Session>> {
        let connection = session.connection();
        let replaced = self.registry.register(session);
        // `shutdown` clears the flag before draining, so a registration that
        // raced past the drain is caught here.
        if !self.is_running() {
            self.registry.deregister_connection(connection);
            return Err(RelayError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "relay is shutting down",
            )));
        }
        Ok(replaced)
    }

    /// Stop accepting, close every registered session and empty the
    /// registry. Idempotent. Returns how many sessions were closed by this
    /// call; loops exit on their own within one poll interval.
    pub fn shutdown(&self) -> usize {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        let sessions = self.registry.drain();
        for session in &sessions {
            session.stream.close();
        }
        if was_running {
            info!("Server shutdown initiated, closed {} sessions", sessions.len());
        }
        sessions.len()
    }
}

/// Handle returned by `start_relay` to inspect and stop the running relay.
pub struct RelayHandle {
    relay: Arc<Relay>,
    tcp_addr: SocketAddr,
    udp_addr: SocketAddr,
    threads: Vec<JoinHandle<()>>,
}

impl RelayHandle {
    pub fn relay(&self) -> &Arc<Relay> {
        &self.relay
    }

    /// Bound TCP address (useful when port 0 was requested).
    pub fn tcp_addr(&self) -> SocketAddr {
        self.tcp_addr
    }

    /// Bound UDP address.
    pub fn udp_addr(&self) -> SocketAddr {
        self.udp_addr
    }

    pub fn shutdown(&self) -> usize {
        self.relay.shutdown()
    }

    /// Wait for the accept, datagram and session threads to exit. Only
    /// returns after `shutdown` has been called.
    pub fn join(self) {
        for thread in self.threads {
            if thread.join().is_err() {
                error!("Relay thread panicked");
            }
        }
    }

    /// Shut down and wait for every thread.
    pub fn stop(self) {
        self.shutdown();
        self.join();
    }
}

/// Bind both sockets and start the accept and datagram threads.
///
/// Bind failures are returned as `RelayError::Bind`; nothing is left
/// running in that case.
pub fn start_relay(config: RelayConfig) -> Result<RelayHandle> {
    let listener = TcpListener::bind(config.tcp_addr()).map_err(|e| RelayError::Bind {
        what: "TCP",
        addr: config.tcp_addr(),
        source: e,
    })?;
    let datagram = UdpSocket::bind(config.udp_addr()).map_err(|e| RelayError::Bind {
        what: "UDP",
        addr: config.udp_addr(),
        source: e,
    })?;
    let tcp_addr = listener.local_addr()?;
    let udp_addr = datagram.local_addr()?;

    // Both sockets must wake up periodically to observe `running`.
    listener.set_nonblocking(true)?;
    datagram.set_read_timeout(Some(config.poll_interval()))?;

    info!("TCP server listening on {tcp_addr}");
    info!("UDP server listening on {udp_addr}");

    let relay = Arc::new(Relay {
        config,
        registry: Registry::new(),
        datagram,
        running: AtomicBool::new(true),
    });

    let accept_thread = {
        let relay = Arc::clone(&relay);
        thread::Builder::new()
            .name("relay-accept".into())
            .spawn(move || accept_loop(&relay, listener))?
    };
    let datagram_thread = {
        let datagram_relay = Arc::clone(&relay);
        let spawned = thread::Builder::new()
            .name("relay-datagram".into())
            .spawn(move || {
                datagram_loop(
                    &datagram_relay.datagram,
                    &datagram_relay.registry,
                    &datagram_relay.running,
                )
            });
        match spawned {
            Ok(handle) => handle,
            Err(e) => {
                relay.shutdown();
                let _ = accept_thread.join();
                return Err(e.into());
            }
        }
    };

    Ok(RelayHandle {
        relay,
        tcp_addr,
        udp_addr,
        threads: vec![accept_thread, datagram_thread],
    })
}

/// Accept connections until the relay stops, then join every session
/// thread it started.
fn accept_loop(relay: &Arc<Relay>, listener: TcpListener) {
    let idle_sleep = relay.config.poll_interval().min(ACCEPT_BACKOFF);
    let mut sessions: Vec<JoinHandle<()>> = Vec::new();

    while relay.is_running() {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!("Accepted connection from {peer}");
                let relay = Arc::clone(relay);
                let spawned = thread::Builder::new()
                    .name(format!("relay-session-{peer}"))
                    .spawn(move || run_session(&relay, stream));
                match spawned {
                    Ok(handle) => sessions.push(handle),
                    Err(e) => error!("Could not start session thread for {peer}: {e}"),
                }
                sessions.retain(|handle| !handle.is_finished());
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(idle_sleep);
            }
            Err(ref e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
                ) => {}
            Err(e) => {
                error!("Accept failed, no longer accepting connections: {e}");
                break;
            }
        }
    }

    debug!("Accept loop stopped, waiting for {} sessions", sessions.len());
    for handle in sessions {
        if handle.join().is_err() {
            warn!("Session thread panicked");
        }
    }
}
