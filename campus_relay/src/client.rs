// Campus-side client for the relay.
//
// Architecture:
// - `connect()` opens the TCP connection, sends the auth frame and waits
//   for `AUTH_OK`/`AUTH_FAIL` on the calling thread, then binds an
//   ephemeral UDP socket and spawns three background threads.
// - The TCP reader thread turns incoming lines into `Inbound` values and
//   pushes them into an `mpsc` channel. EOF becomes `Inbound::Disconnected`.
// - The UDP thread receives broadcasts on the ephemeral socket.
// - The heartbeat thread sends `HEARTBEAT:<campus>` from that same socket,
//   once right away and then every interval, so the relay learns where
//   broadcasts should go.
// - `poll()` drains the channel without blocking.
//
// Background threads block for at most `POLL_SLICE` at a time, so
// `disconnect()` returns within about a second whatever the heartbeat
// interval.

use std::net::{Shutdown, SocketAddr, TcpStream, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use campus_protocol::framing::{FrameReader, MAX_FRAME_SIZE, write_frame};
use campus_protocol::message::{
    AuthRequest, ClientMessage, DEFAULT_DEPARTMENT, Datagram, ServerMessage,
};
use log::{debug, warn};

use crate::error::{RelayError, Result};
use crate::stream::is_timeout;

const POLL_SLICE: Duration = Duration::from_secs(1);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the relay listens and how often to heartbeat.
#[derive(Clone, Debug)]
pub struct ClientOptions {
    pub relay_tcp: SocketAddr,
    pub relay_udp: SocketAddr,
    pub heartbeat_interval: Duration,
}

/// Something that arrived from the relay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    Message {
        source: String,
        department: String,
        text: String,
    },
    /// A line on the TCP stream that is not a `FROM:` frame.
    Notice(String),
    /// An administrative broadcast received over UDP.
    Broadcast(String),
    /// The relay closed the TCP connection.
    Disconnected,
}

pub struct CampusClient {
    campus: String,
    department: String,
    writer: TcpStream,
    udp_addr: SocketAddr,
    inbox: Receiver<Inbound>,
    stop: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl CampusClient {
    /// Authenticate as `campus` and start the background threads.
    pub fn connect(
        options: &ClientOptions,
        campus: &str,
        department: &str,
        password: &str,
    ) -> Result<Self> {
        let stream = TcpStream::connect(options.relay_tcp)?;
        stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
        let mut writer = stream.try_clone()?;

        let auth = AuthRequest {
            campus: campus.to_string(),
            password: password.to_string(),
            department: department.to_string(),
        };
        write_frame(&mut writer, &auth.encode())?;

        let mut reader = FrameReader::new(stream);
        let reply = reader
            .read_frame()?
            .ok_or_else(|| RelayError::UnexpectedReply("connection closed".into()))?;
        let campus = match ServerMessage::parse(&reply) {
            Some(ServerMessage::AuthOk { campus }) => campus,
            Some(ServerMessage::AuthFail { reason }) => return Err(RelayError::Rejected(reason)),
            _ => return Err(RelayError::UnexpectedReply(reply)),
        };
        reader.get_ref().set_read_timeout(Some(POLL_SLICE))?;

        let udp = UdpSocket::bind(("0.0.0.0", 0))?;
        udp.set_read_timeout(Some(POLL_SLICE))?;
        let udp_addr = udp.local_addr()?;

        let (tx, rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let mut client = Self {
            campus,
            department: if department.is_empty() {
                DEFAULT_DEPARTMENT.to_string()
            } else {
                department.to_string()
            },
            writer,
            udp_addr,
            inbox: rx,
            stop,
            threads: Vec::new(),
        };

        let heartbeat_socket = udp.try_clone()?;
        let heartbeat = Datagram::Heartbeat {
            campus: client.campus.clone(),
        }
        .encode();
        let relay_udp = options.relay_udp;
        let interval = options.heartbeat_interval;

        let reader_stop = Arc::clone(&client.stop);
        let reader_tx = tx.clone();
        client.spawn("campus-tcp-reader", move || {
            tcp_reader_loop(reader, reader_tx, &reader_stop)
        })?;
        let udp_stop = Arc::clone(&client.stop);
        client.spawn("campus-udp-receiver", move || broadcast_loop(udp, tx, &udp_stop))?;
        let heartbeat_stop = Arc::clone(&client.stop);
        client.spawn("campus-heartbeat", move || {
            heartbeat_loop(heartbeat_socket, relay_udp, heartbeat, interval, &heartbeat_stop)
        })?;

        Ok(client)
    }

    fn spawn(&mut self, name: &str, f: impl FnOnce() + Send + 'static) -> Result<()> {
        match thread::Builder::new().name(name.to_string()).spawn(f) {
            Ok(handle) => {
                self.threads.push(handle);
                Ok(())
            }
            Err(e) => {
                self.disconnect();
                Err(e.into())
            }
        }
    }

    /// Campus name as confirmed by the relay.
    pub fn campus(&self) -> &str {
        &self.campus
    }

    pub fn department(&self) -> &str {
        &self.department
    }

    /// Local address of the socket heartbeats are sent from and
    /// broadcasts arrive on.
    pub fn udp_addr(&self) -> SocketAddr {
        self.udp_addr
    }

    pub fn is_connected(&self) -> bool {
        !self.stop.load(Ordering::SeqCst)
    }

    /// Send `text` to `target`. All three fields must be non-empty, and the
    /// message must fit in one frame both as sent and as the relay forwards
    /// it (`FROM:` with this campus and department).
    pub fn send_message(&mut self, target: &str, department: &str, text: &str) -> Result<()> {
        if target.is_empty() {
            return Err(RelayError::InvalidInput("target campus cannot be empty"));
        }
        if department.is_empty() {
            return Err(RelayError::InvalidInput("target department cannot be empty"));
        }
        if text.is_empty() {
            return Err(RelayError::InvalidInput("message cannot be empty"));
        }
        let msg = ClientMessage::Send {
            target: target.to_string(),
            target_department: department.to_string(),
            text: text.to_string(),
        };
        let frame = msg.encode();
        let forwarded = ServerMessage::From {
            source: self.campus.clone(),
            department: self.department.clone(),
            text: text.to_string(),
        };
        if frame.len() > MAX_FRAME_SIZE || forwarded.encode().len() > MAX_FRAME_SIZE {
            return Err(RelayError::InvalidInput("message too long"));
        }
        write_frame(&mut self.writer, &frame)?;
        Ok(())
    }

    /// Drain everything received so far (non-blocking).
    pub fn poll(&self) -> Vec<Inbound> {
        self.inbox.try_iter().collect()
    }

    /// Block up to `timeout` for the next inbound item.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Inbound> {
        self.inbox.recv_timeout(timeout).ok()
    }

    /// Close the connection and wait for the background threads.
    /// Idempotent.
    pub fn disconnect(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.writer.shutdown(Shutdown::Both);
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("Client thread panicked");
            }
        }
    }
}

impl Drop for CampusClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn tcp_reader_loop(mut reader: FrameReader<TcpStream>, tx: Sender<Inbound>, stop: &AtomicBool) {
    while !stop.load(Ordering::SeqCst) {
        let frame = match reader.read_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(ref e) if is_timeout(e) => continue,
            Err(e) => {
                debug!("Relay connection read failed: {e}");
                break;
            }
        };
        let inbound = match ServerMessage::parse(&frame) {
            Some(ServerMessage::From {
                source,
                department,
                text,
            }) => Inbound::Message {
                source,
                department,
                text,
            },
            _ => Inbound::Notice(frame),
        };
        if tx.send(inbound).is_err() {
            return;
        }
    }
    if !stop.load(Ordering::SeqCst) {
        let _ = tx.send(Inbound::Disconnected);
    }
}

fn broadcast_loop(socket: UdpSocket, tx: Sender<Inbound>, stop: &AtomicBool) {
    let mut buf = vec![0u8; MAX_FRAME_SIZE];
    while !stop.load(Ordering::SeqCst) {
        match socket.recv_from(&mut buf) {
            Ok((len, _)) => {
                let text = String::from_utf8_lossy(&buf[..len]).into_owned();
                if tx.send(Inbound::Broadcast(text)).is_err() {
                    return;
                }
            }
            Err(ref e) if is_timeout(e) => {}
            Err(e) => debug!("Broadcast receive failed: {e}"),
        }
    }
}

fn heartbeat_loop(
    socket: UdpSocket,
    relay: SocketAddr,
    payload: String,
    interval: Duration,
    stop: &AtomicBool,
) {
    while !stop.load(Ordering::SeqCst) {
        if let Err(e) = socket.send_to(payload.as_bytes(), relay) {
            warn!("Heartbeat to {relay} failed: {e}");
        }
        let next = Instant::now() + interval;
        loop {
            if stop.load(Ordering::SeqCst) {
                return;
            }
            let now = Instant::now();
            if now >= next {
                break;
            }
            thread::sleep((next - now).min(POLL_SLICE));
        }
    }
}
