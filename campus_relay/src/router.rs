// Campus-to-campus message routing.
//
// The registry lock is held only for the lookup; the write to the target's
// stream happens afterwards under that stream's own send lock, so a slow
// peer stalls deliveries to itself but never blocks registry operations.
// Routing never mutates the registry: an unknown target, an oversized
// message or a failed write is reported to the caller, which logs it and
// carries on.
//
// The `FROM:` header names the source rather than the target, so a `SEND:`
// frame that fit on the way in can be too long on the way out. That case is
// caught before the lookup and reported as `MessageTooLarge`.

use campus_protocol::framing::MAX_FRAME_SIZE;
use campus_protocol::message::ServerMessage;
use log::info;

use crate::error::{RelayError, Result};
use crate::registry::Registry;

/// Deliver `FROM:<source>:<source_department>:<text>` to `target`'s stream.
pub fn route(
    registry: &Registry,
    source: &str,
    source_department: &str,
    target: &str,
    text: &str,
) -> Result<()> {
    let msg = ServerMessage::From {
        source: source.to_string(),
        department: source_department.to_string(),
        text: text.to_string(),
    };
    let len = msg.encode().len();
    if len > MAX_FRAME_SIZE {
        return Err(RelayError::MessageTooLarge {
            target: target.to_string(),
            len,
        });
    }

    let session = registry
        .lookup(target)
        .ok_or_else(|| RelayError::UnknownTarget(target.to_string()))?;

    session
        .stream
        .send(&msg)
        .map_err(|e| RelayError::DeliveryFailed {
            target: target.to_string(),
            source: e,
        })?;

    info!("Message routed from {source} to {target}");
    Ok(())
}
