// campus_protocol: wire protocol for the campus relay.
//
// This crate defines the frames exchanged between campus clients and the
// relay coordinator (`campus_relay`), plus the newline framing used on the
// reliable stream. It is shared by both sides and has no dependency on the
// relay crate.
//
// Module overview:
// - `message.rs`:  `AuthRequest`, `ClientMessage`, `ServerMessage` and
//                  `Datagram`, each with `parse`/`encode` for its text form.
// - `framing.rs`:  Newline-delimited framing over any `Read`/`Write` stream,
//                  with a reader that tolerates socket read timeouts.
//
// Design decisions:
// - **Plain text frames.** Existing campus clients speak
//   `KEY:value` lines, so the vocabulary is parsed by hand rather than
//   through a serialization format.
// - **No async runtime.** Framing uses `std::io::Read`/`Write`, matching the
//   relay's thread-per-connection architecture.

pub mod framing;
pub mod message;

pub use framing::{FrameReader, MAX_FRAME_SIZE, strip_line_terminators, write_frame};
pub use message::{AuthRequest, ClientMessage, DEFAULT_DEPARTMENT, Datagram, ServerMessage};
