// Lifecycle of one campus connection, run on its own thread.
//
//   Connecting -> Authenticating -> Active -> Closing -> Closed
//   Authenticating -> Closed   (rejected, timed out, or peer left)
//
// The first frame must be an auth frame. A rejected connection gets one
// `AUTH_FAIL` line and is closed without ever touching the registry. An
// accepted one is registered before `AUTH_OK` is sent, so a campus that has
// seen `AUTH_OK` is already routable.
//
// While Active, each frame is parsed as `SEND:` and routed with this
// session's own campus and department as the source. Anything else is
// dropped. Reads use the poll interval as their timeout so the thread sees
// `running` go false promptly; a partial line survives the timeout inside
// `FrameReader`.
//
// Teardown runs once, at the end of `run_session`, whatever ended the
// session: peer EOF, a read error, or shutdown closing the socket. It
// deregisters by connection id, which is a no-op when a newer connection has
// taken over the campus or shutdown already drained the registry.

use std::io;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Instant;

use campus_protocol::framing::FrameReader;
use campus_protocol::message::{ClientMessage, ServerMessage};
use log::{debug, error, info, trace, warn};

use crate::auth::{Credentials, authenticate};
use crate::error::RelayError;
use crate::registry::Session;
use crate::router;
use crate::server::Relay;
use crate::stream::{ConnectionId, SessionStream, is_timeout};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Authenticating,
    Active,
    Closing,
    Closed,
}

struct Connection<'a> {
    relay: &'a Relay,
    stream: Arc<SessionStream>,
    reader: FrameReader<TcpStream>,
    phase: Phase,
}

impl Connection<'_> {
    fn id(&self) -> ConnectionId {
        self.stream.id()
    }

    fn enter(&mut self, phase: Phase) {
        trace!("{} {:?} -> {:?}", self.id(), self.phase, phase);
        self.phase = phase;
    }

    /// Wait for the auth frame, up to the handshake timeout. `None` if the
    /// peer left, stalled, or the relay stopped first.
    fn read_auth_frame(&mut self) -> Option<String> {
        let deadline = Instant::now() + self.relay.config().handshake_timeout();
        loop {
            if !self.relay.is_running() {
                return None;
            }
            match self.reader.read_frame() {
                Ok(Some(frame)) => return Some(frame),
                Ok(None) => {
                    debug!("{} closed before authenticating", self.id());
                    return None;
                }
                Err(ref e) if is_timeout(e) => {
                    if Instant::now() >= deadline {
                        warn!("{} did not authenticate in time", self.id());
                        return None;
                    }
                }
                Err(e) => {
                    debug!("{} read failed during handshake: {e}", self.id());
                    return None;
                }
            }
        }
    }

    /// Validate the auth frame and install the session. Returns the
    /// credentials once `AUTH_OK` has been sent.
    fn handshake(&mut self) -> Option<Credentials> {
        self.enter(Phase::Authenticating);
        let frame = self.read_auth_frame()?;

        let creds = match authenticate(self.relay.identities(), &frame) {
            Ok(creds) => creds,
            Err(e) => {
                warn!("Authentication failed from {:?}: {e}", self.stream.peer());
                let reply = ServerMessage::AuthFail {
                    reason: e.to_string(),
                };
                if let Err(e) = self.stream.send(&reply) {
                    debug!("{} could not send AUTH_FAIL: {e}", self.id());
                }
                return None;
            }
        };

        let session = Session::new(
            creds.campus.clone(),
            creds.department.clone(),
            Arc::clone(&self.stream),
        );
        match self.relay.install(session) {
            Ok(Some(superseded)) => {
                warn!(
                    "Campus {} reconnected, closing previous connection {}",
                    creds.campus,
                    superseded.connection()
                );
                superseded.stream.close();
            }
            Ok(None) => {}
            Err(e) => {
                debug!("{} not registered: {e}", self.id());
                return None;
            }
        }

        let reply = ServerMessage::AuthOk {
            campus: creds.campus.clone(),
        };
        if let Err(e) = self.stream.send(&reply) {
            warn!("Could not confirm authentication to {}: {e}", creds.campus);
            // Registered already; teardown removes it.
            self.enter(Phase::Active);
            return None;
        }

        info!(
            "Campus authenticated: {} (Dept: {})",
            creds.campus, creds.department
        );
        self.enter(Phase::Active);
        Some(creds)
    }

    fn serve(&mut self, creds: &Credentials) {
        while self.relay.is_running() {
            match self.reader.read_frame() {
                Ok(Some(frame)) => self.handle_frame(creds, &frame),
                Ok(None) => {
                    debug!("{} ({}) closed by peer", self.id(), creds.campus);
                    break;
                }
                Err(ref e) if is_timeout(e) => {}
                Err(e) => {
                    debug!("{} ({}) read failed: {e}", self.id(), creds.campus);
                    break;
                }
            }
        }
    }

    fn handle_frame(&self, creds: &Credentials, frame: &str) {
        let Some(ClientMessage::Send { target, text, .. }) = ClientMessage::parse(frame) else {
            trace!("{} sent an unrecognised frame, ignoring", self.id());
            return;
        };
        match router::route(
            self.relay.registry(),
            &creds.campus,
            &creds.department,
            &target,
            &text,
        ) {
            Ok(()) => {}
            Err(e @ RelayError::UnknownTarget(_)) => warn!("{e}"),
            Err(e @ RelayError::MessageTooLarge { .. }) => {
                warn!("Dropped message from {}: {e}", creds.campus)
            }
            Err(e) => error!("{e}"),
        }
    }

    fn teardown(&mut self) {
        self.enter(Phase::Closing);
        if let Some(session) = self.relay.registry().deregister_connection(self.id()) {
            info!("Campus disconnected: {}", session.campus);
        }
        self.stream.close();
        self.enter(Phase::Closed);
    }
}

/// Split an accepted socket into the shared write side and the owned read
/// side.
fn prepare(
    relay: &Relay,
    id: ConnectionId,
    stream: TcpStream,
) -> io::Result<(Arc<SessionStream>, FrameReader<TcpStream>)> {
    // Accepted sockets may inherit the listener's non-blocking mode.
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(relay.config().poll_interval()))?;
    let writer = SessionStream::new(id, stream.try_clone()?, relay.config().send_timeout())?;
    Ok((Arc::new(writer), FrameReader::new(stream)))
}

/// Drive one accepted connection from handshake to close.
pub(crate) fn run_session(relay: &Relay, stream: TcpStream) {
    let id = ConnectionId::next();
    let (writer, reader) = match prepare(relay, id, stream) {
        Ok(parts) => parts,
        Err(e) => {
            warn!("{id} could not be set up: {e}");
            return;
        }
    };

    let mut conn = Connection {
        relay,
        stream: writer,
        reader,
        phase: Phase::Connecting,
    };
    debug!("{} connected from {:?}", conn.id(), conn.stream.peer());

    if let Some(creds) = conn.handshake() {
        conn.serve(&creds);
    }
    conn.teardown();
}
