// Administrative broadcast over UDP.
//
// The notice goes, verbatim and unframed, to the datagram endpoint of every
// session that has sent at least one heartbeat. Sessions that have not are
// skipped silently. Sending is fire-and-forget: a failed `send_to` is logged
// and still counts as attempted, and nothing is retried.

use std::net::UdpSocket;

use log::{info, warn};

use crate::error::{RelayError, Result};
use crate::registry::Registry;

/// Send `text` to every known datagram endpoint. Returns how many sends
/// were attempted.
pub fn broadcast(registry: &Registry, socket: &UdpSocket, text: &str) -> Result<usize> {
    if text.is_empty() {
        return Err(RelayError::EmptyBroadcast);
    }

    // Endpoints are copied out so no send happens under the registry lock.
    let targets = registry.datagram_endpoints();
    for (campus, endpoint) in &targets {
        if let Err(e) = socket.send_to(text.as_bytes(), endpoint) {
            warn!("Broadcast to {campus} at {endpoint} failed: {e}");
        }
    }

    info!("Broadcast sent to {} campuses: {text}", targets.len());
    Ok(targets.len())
}
