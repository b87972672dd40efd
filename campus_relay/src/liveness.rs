// Heartbeat intake on the relay's UDP socket.
//
// Campuses send `HEARTBEAT:<name>` datagrams periodically. Each one refreshes
// the sender's `last_seen` and records the datagram's source address as the
// endpoint broadcasts are sent to. A heartbeat for a campus that is not
// registered is ignored: heartbeats never create sessions.
//
// There is no expiry: a session is removed only when its TCP connection
// ends or the relay shuts down, however long ago its last heartbeat was.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};

use campus_protocol::framing::MAX_FRAME_SIZE;
use campus_protocol::message::Datagram;
use chrono::Local;
use log::{debug, trace, warn};

use crate::registry::Registry;
use crate::stream::is_timeout;

/// Apply one heartbeat. Returns true if `campus` was registered.
pub fn on_heartbeat(registry: &Registry, campus: &str, endpoint: SocketAddr) -> bool {
    if registry.update_liveness(campus, endpoint, Local::now()) {
        debug!("Heartbeat from {campus} ({endpoint})");
        true
    } else {
        debug!("Ignoring heartbeat from unregistered campus {campus} ({endpoint})");
        false
    }
}

/// Receive datagrams until `running` goes false. `socket` must have a read
/// timeout so the flag is re-checked at least once per poll interval.
pub fn datagram_loop(socket: &UdpSocket, registry: &Registry, running: &AtomicBool) {
    let mut buf = vec![0u8; MAX_FRAME_SIZE];
    while running.load(Ordering::SeqCst) {
        match socket.recv_from(&mut buf) {
            Ok((len, from)) => {
                let payload = String::from_utf8_lossy(&buf[..len]);
                match Datagram::parse(&payload) {
                    Some(Datagram::Heartbeat { campus }) => {
                        on_heartbeat(registry, &campus, from);
                    }
                    None => trace!("Ignoring {len}-byte datagram from {from}"),
                }
            }
            Err(ref e) if is_timeout(e) => {}
            Err(e) => {
                // Stale ICMP errors surface here on some platforms; the
                // socket itself is still usable.
                warn!("Datagram receive failed: {e}");
            }
        }
    }
    debug!("Datagram loop stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::registry::Session;
    use crate::stream::tests::session_stream;

    fn registry_with(campus: &str) -> Registry {
        let registry = Registry::new();
        let (_client, stream) = session_stream();
        registry.register(Session::new(campus.into(), "General".into(), stream));
        registry
    }

    #[test]
    fn heartbeat_records_endpoint() {
        let registry = registry_with("Lahore");
        let endpoint = SocketAddr::from(([127, 0, 0, 1], 40000));
        assert!(on_heartbeat(&registry, "Lahore", endpoint));

        let info = &registry.snapshot()[0];
        assert_eq!(info.datagram, Some(endpoint));
    }

    #[test]
    fn heartbeat_from_unregistered_campus_is_ignored() {
        let registry = registry_with("Lahore");
        let before = registry.snapshot();
        let endpoint = SocketAddr::from(([127, 0, 0, 1], 40001));

        assert!(!on_heartbeat(&registry, "Karachi", endpoint));
        assert_eq!(registry.snapshot(), before);
        assert!(registry.lookup("Karachi").is_none());
    }

    #[test]
    fn loop_applies_heartbeats_and_stops_on_flag() {
        let registry = Arc::new(registry_with("Multan"));
        let running = Arc::new(AtomicBool::new(true));
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        let relay_addr = socket.local_addr().unwrap();

        let worker = {
            let registry = Arc::clone(&registry);
            let running = Arc::clone(&running);
            thread::spawn(move || datagram_loop(&socket, &registry, &running))
        };

        let campus = UdpSocket::bind("127.0.0.1:0").unwrap();
        campus.send_to(b"garbage", relay_addr).unwrap();
        campus.send_to(b"HEARTBEAT:Multan", relay_addr).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !registry.snapshot()[0].has_datagram() {
            assert!(Instant::now() < deadline, "heartbeat never applied");
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(
            registry.snapshot()[0].datagram,
            Some(campus.local_addr().unwrap())
        );

        running.store(false, Ordering::SeqCst);
        worker.join().unwrap();
    }
}
