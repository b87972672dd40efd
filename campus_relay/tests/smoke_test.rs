// Integration smoke test for the campus relay.
//
// Starts a relay on localhost with OS-assigned ports and drives it the way
// campuses do: authentication, routed messages, reconnection, heartbeats,
// broadcasts and shutdown. Most tests use plain sockets and the protocol
// crate's framing so the wire format itself is under test; the last ones go
// through `CampusClient`.

use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

use campus_protocol::framing::{FrameReader, write_frame};
use campus_protocol::message::{ClientMessage, ServerMessage};
use campus_relay::{
    CampusClient, ClientOptions, Inbound, RelayConfig, RelayError, RelayHandle, start_relay,
};

/// A campus speaking the raw protocol.
struct RawCampus {
    reader: FrameReader<TcpStream>,
    writer: TcpStream,
}

impl RawCampus {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let writer = stream.try_clone().unwrap();
        Self {
            reader: FrameReader::new(stream),
            writer,
        }
    }

    /// Connect and authenticate; panics unless the relay answers `AUTH_OK`.
    fn login(addr: SocketAddr, campus: &str, pass: &str, dept: &str) -> Self {
        let mut campus_conn = Self::connect(addr);
        campus_conn.send_line(&format!("Campus:{campus},Pass:{pass},Dept:{dept}"));
        assert_eq!(
            campus_conn.recv(),
            Some(ServerMessage::AuthOk {
                campus: campus.into()
            })
        );
        campus_conn
    }

    fn send_line(&mut self, line: &str) {
        write_frame(&mut self.writer, line).unwrap();
    }

    fn send_to(&mut self, target: &str, dept: &str, text: &str) {
        let msg = ClientMessage::Send {
            target: target.into(),
            target_department: dept.into(),
            text: text.into(),
        };
        self.send_line(&msg.encode());
    }

    /// Next frame parsed as a server message; `None` on EOF.
    fn recv(&mut self) -> Option<ServerMessage> {
        let frame = self.reader.read_frame().unwrap()?;
        Some(ServerMessage::parse(&frame).unwrap_or_else(|| panic!("bad frame {frame:?}")))
    }
}

fn relay() -> RelayHandle {
    start_relay(RelayConfig::ephemeral()).unwrap()
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn authenticate_route_and_disconnect() {
    let handle = relay();
    let addr = handle.tcp_addr();

    let mut lahore = RawCampus::login(addr, "Lahore", "NU-LHR-123", "Admissions");
    let mut karachi = RawCampus::login(addr, "Karachi", "NU-KHI-123", "Academics");

    let names: Vec<_> = handle
        .relay()
        .snapshot()
        .into_iter()
        .map(|s| (s.campus, s.department))
        .collect();
    assert_eq!(
        names,
        [
            ("Karachi".to_string(), "Academics".to_string()),
            ("Lahore".to_string(), "Admissions".to_string()),
        ]
    );

    // Text may contain colons; the target department is not used for routing.
    lahore.send_to("Karachi", "Whatever", "meeting at 10:30, room 4");
    assert_eq!(
        karachi.recv(),
        Some(ServerMessage::From {
            source: "Lahore".into(),
            department: "Admissions".into(),
            text: "meeting at 10:30, room 4".into(),
        })
    );

    // Unknown target: nothing delivered, sender stays connected.
    lahore.send_to("Islamabad", "General", "anyone?");
    karachi.send_to("Lahore", "Admissions", "ack");
    assert_eq!(
        lahore.recv(),
        Some(ServerMessage::From {
            source: "Karachi".into(),
            department: "Academics".into(),
            text: "ack".into(),
        })
    );

    drop(karachi);
    wait_until("Karachi to deregister", || {
        handle.relay().registry().lookup("Karachi").is_none()
    });
    assert_eq!(handle.relay().registry().len(), 1);

    handle.stop();
}

#[test]
fn failed_authentication_leaves_no_trace() {
    let handle = relay();
    let addr = handle.tcp_addr();

    for (auth, reason) in [
        ("Campus:Lahore,Pass:NU-KHI-123", "Invalid credentials"),
        ("Campus:Quetta,Pass:NU-QTA-123", "Invalid credentials"),
        ("Campus:Lahore,Dept:IT", "Missing credentials"),
    ] {
        let mut campus = RawCampus::connect(addr);
        campus.send_line(auth);
        assert_eq!(
            campus.recv(),
            Some(ServerMessage::AuthFail {
                reason: reason.into()
            })
        );
        assert_eq!(campus.recv(), None);
    }

    assert!(handle.relay().snapshot().is_empty());

    // A registered campus cannot reach the rejected names.
    let mut multan = RawCampus::login(addr, "Multan", "NU-MLT-123", "IT");
    multan.send_to("Lahore", "IT", "hello?");
    multan.send_to("Multan", "IT", "echo");
    assert_eq!(
        multan.recv(),
        Some(ServerMessage::From {
            source: "Multan".into(),
            department: "IT".into(),
            text: "echo".into(),
        })
    );

    handle.stop();
}

#[test]
fn reconnect_takes_over_the_campus() {
    let handle = relay();
    let addr = handle.tcp_addr();

    let mut old = RawCampus::login(addr, "Peshawar", "NU-PEW-123", "IT");
    let mut new = RawCampus::login(addr, "Peshawar", "NU-PEW-123", "Library");
    let mut cfd = RawCampus::login(addr, "CFD", "NU-CFD-123", "Sports");

    assert_eq!(old.recv(), None);

    cfd.send_to("Peshawar", "Library", "books returned");
    assert_eq!(
        new.recv(),
        Some(ServerMessage::From {
            source: "CFD".into(),
            department: "Sports".into(),
            text: "books returned".into(),
        })
    );
    let peshawar = handle.relay().registry().lookup("Peshawar").unwrap();
    assert_eq!(peshawar.department, "Library");
    assert_eq!(handle.relay().registry().len(), 2);

    handle.stop();
}

#[test]
fn heartbeats_enable_broadcasts() {
    let handle = relay();
    let addr = handle.tcp_addr();

    let _lahore = RawCampus::login(addr, "Lahore", "NU-LHR-123", "General");
    let _karachi = RawCampus::login(addr, "Karachi", "NU-KHI-123", "General");

    let lahore_udp = UdpSocket::bind("127.0.0.1:0").unwrap();
    lahore_udp
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    lahore_udp
        .send_to(b"HEARTBEAT:Lahore", handle.udp_addr())
        .unwrap();

    // A heartbeat from an unknown campus is ignored.
    let stranger = UdpSocket::bind("127.0.0.1:0").unwrap();
    stranger
        .send_to(b"HEARTBEAT:Quetta", handle.udp_addr())
        .unwrap();

    wait_until("Lahore heartbeat", || {
        handle
            .relay()
            .snapshot()
            .iter()
            .any(|s| s.campus == "Lahore" && s.has_datagram())
    });
    assert_eq!(handle.relay().snapshot().len(), 2);

    assert!(matches!(
        handle.relay().broadcast(""),
        Err(RelayError::EmptyBroadcast)
    ));
    assert_eq!(handle.relay().broadcast("campus closed friday").unwrap(), 1);

    let mut buf = [0u8; 64];
    let (len, from) = lahore_udp.recv_from(&mut buf).unwrap();
    assert_eq!(&buf[..len], b"campus closed friday");
    assert_eq!(from.port(), handle.udp_addr().port());

    handle.stop();
}

#[test]
fn shutdown_disconnects_everyone() {
    let handle = relay();
    let addr = handle.tcp_addr();

    let mut campuses: Vec<_> = [
        ("Lahore", "NU-LHR-123"),
        ("Karachi", "NU-KHI-123"),
        ("CFD", "NU-CFD-123"),
    ]
    .into_iter()
    .map(|(name, pass)| RawCampus::login(addr, name, pass, "General"))
    .collect();

    let relay = handle.relay().clone();
    let started = Instant::now();
    handle.stop();
    assert!(started.elapsed() < Duration::from_secs(3));

    assert!(relay.snapshot().is_empty());
    for campus in &mut campuses {
        assert_eq!(campus.recv(), None);
    }
    assert!(TcpStream::connect(addr).is_err());
}

#[test]
fn campus_clients_exchange_messages_and_broadcasts() {
    let handle = relay();
    let options = ClientOptions {
        relay_tcp: handle.tcp_addr(),
        relay_udp: handle.udp_addr(),
        heartbeat_interval: Duration::from_millis(100),
    };

    let mut lahore = CampusClient::connect(&options, "Lahore", "Admissions", "NU-LHR-123").unwrap();
    let karachi = CampusClient::connect(&options, "Karachi", "", "NU-KHI-123").unwrap();
    assert_eq!(karachi.campus(), "Karachi");

    // The first heartbeat goes out as soon as the client connects.
    wait_until("both heartbeats", || {
        handle
            .relay()
            .snapshot()
            .iter()
            .filter(|s| s.has_datagram())
            .count()
            == 2
    });

    lahore
        .send_message("Karachi", "General", "results are out")
        .unwrap();
    assert_eq!(
        karachi.recv_timeout(Duration::from_secs(5)),
        Some(Inbound::Message {
            source: "Lahore".into(),
            department: "Admissions".into(),
            text: "results are out".into(),
        })
    );

    assert_eq!(handle.relay().broadcast("holiday monday").unwrap(), 2);
    assert_eq!(
        karachi.recv_timeout(Duration::from_secs(5)),
        Some(Inbound::Broadcast("holiday monday".into()))
    );
    assert_eq!(
        lahore.recv_timeout(Duration::from_secs(5)),
        Some(Inbound::Broadcast("holiday monday".into()))
    );

    lahore.disconnect();
    wait_until("Lahore to leave", || {
        handle.relay().registry().lookup("Lahore").is_none()
    });

    handle.stop();
    assert_eq!(
        karachi.recv_timeout(Duration::from_secs(5)),
        Some(Inbound::Disconnected)
    );
}
