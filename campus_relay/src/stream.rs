// Shared write side of a campus's reliable stream.
//
// The session thread that accepted a connection owns its read half and is the
// only code that closes it. `SessionStream` is the handle everyone else gets:
// the registry stores an `Arc<SessionStream>`, the router clones that `Arc`
// out of a lookup and writes through it.
//
// Writes go through a per-stream mutex so each routed frame is written whole
// and in the order the router accepted it, even when several source sessions
// route to the same target at once. The socket's write timeout is the send
// deadline, so a stalled peer delays only deliveries to itself.
//
// `close` shuts the socket down in both directions through a separate
// handle, so it never waits behind a writer blocked on the mutex and it
// unblocks the owning session's pending read immediately.

use std::fmt;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use campus_protocol::framing::write_frame;
use campus_protocol::message::ServerMessage;

/// True for the errors a socket read timeout produces (`WouldBlock` on
/// Unix, `TimedOut` on Windows).
pub fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Relay-assigned identifier of one accepted TCP connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Allocate a process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

pub struct SessionStream {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    writer: Mutex<TcpStream>,
    control: TcpStream,
}

impl SessionStream {
    /// Wrap the write side of an accepted connection. `send_timeout` becomes
    /// the socket's write timeout.
    pub fn new(id: ConnectionId, stream: TcpStream, send_timeout: Duration) -> io::Result<Self> {
        stream.set_write_timeout(Some(send_timeout))?;
        let control = stream.try_clone()?;
        Ok(Self {
            id,
            peer: stream.peer_addr().ok(),
            writer: Mutex::new(stream),
            control,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Encode and write one frame under the stream's send lock.
    pub fn send(&self, msg: &ServerMessage) -> io::Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        write_frame(&mut *writer, &msg.encode())
    }

    /// Shut the connection down in both directions. Safe to call more than
    /// once; errors from an already-closed socket are ignored.
    pub fn close(&self) {
        let _ = self.control.shutdown(Shutdown::Both);
    }
}

impl fmt::Debug for SessionStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStream")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}
