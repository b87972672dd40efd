// Newline-delimited text framing over TCP.
//
// Every frame on the reliable stream is one UTF-8 line terminated by `\n`
// (a preceding `\r` is tolerated and stripped). `write_frame` emits a whole
// frame with a single `write_all` so a frame is never split across writes
// by this layer; `FrameReader` reassembles lines from arbitrary read
// boundaries.
//
// `FrameReader` is designed for sockets with a read timeout: when the inner
// read fails with `WouldBlock`/`TimedOut`, any partial line already read is
// kept in the reader and completed by the next `read_frame` call. This lets
// the relay's session loops poll a shutdown flag between reads without
// losing bytes.
//
// `MAX_FRAME_SIZE` (8 KiB, excluding the terminator) bounds the buffered
// partial line so a peer that never sends a newline cannot grow memory
// without limit.

use std::io::{self, BufRead, BufReader, Read, Write};

/// Maximum frame length in bytes, not counting the line terminator.
pub const MAX_FRAME_SIZE: usize = 8192;

/// Write one frame followed by `\n` and flush.
///
/// Fails with `InvalidInput` if the frame contains a newline or exceeds
/// `MAX_FRAME_SIZE`.
pub fn write_frame<W: Write>(writer: &mut W, frame: &str) -> io::Result<()> {
    if frame.contains('\n') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "frame must not contain a newline",
        ));
    }
    if frame.len() > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "frame too large: {} bytes (max {MAX_FRAME_SIZE})",
                frame.len()
            ),
        ));
    }
    let mut line = Vec::with_capacity(frame.len() + 1);
    line.extend_from_slice(frame.as_bytes());
    line.push(b'\n');
    writer.write_all(&line)?;
    writer.flush()
}

/// Strip trailing `\r` / `\n` characters from a received line or datagram.
pub fn strip_line_terminators(text: &str) -> &str {
    text.trim_end_matches(['\r', '\n'])
}

/// Buffered line reader that survives read timeouts.
pub struct FrameReader<R> {
    inner: BufReader<R>,
    pending: Vec<u8>,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            pending: Vec::new(),
        }
    }

    /// Access the underlying reader (e.g. to adjust a socket timeout).
    pub fn get_ref(&self) -> &R {
        self.inner.get_ref()
    }

    /// Read the next frame with its terminator stripped.
    ///
    /// Returns `Ok(None)` once the peer has closed the stream and every
    /// buffered byte has been delivered. An unterminated final line is
    /// delivered as a frame before `None`. Invalid UTF-8 is replaced
    /// lossily rather than treated as an error.
    ///
    /// Timeout errors from the inner reader are returned unchanged and the
    /// partial line is retained for the next call. A line longer than
    /// `MAX_FRAME_SIZE` yields `InvalidData`.
    pub fn read_frame(&mut self) -> io::Result<Option<String>> {
        loop {
            // Longest legal line: payload plus a `\r\n` terminator.
            let room = (MAX_FRAME_SIZE + 2).saturating_sub(self.pending.len());
            if room == 0 {
                return Err(self.reject_oversized());
            }

            let mut limited = (&mut self.inner).take(room as u64);
            let read = limited.read_until(b'\n', &mut self.pending)?;

            let complete = self.pending.last() == Some(&b'\n');
            // At EOF (the take limit was not reached) an unterminated line is
            // still a frame.
            if complete || (read == 0 && !self.pending.is_empty()) {
                if self.payload_len() > MAX_FRAME_SIZE {
                    return Err(self.reject_oversized());
                }
                return Ok(Some(self.take_pending()));
            }
            if read == 0 {
                return Ok(None);
            }
        }
    }

    /// Length of the buffered line without its trailing terminator bytes.
    fn payload_len(&self) -> usize {
        self.pending
            .iter()
            .rposition(|b| !matches!(b, b'\r' | b'\n'))
            .map_or(0, |i| i + 1)
    }

    fn reject_oversized(&mut self) -> io::Error {
        self.pending.clear();
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame exceeds {MAX_FRAME_SIZE} bytes"),
        )
    }

    fn take_pending(&mut self) -> String {
        let bytes = std::mem::take(&mut self.pending);
        let text = String::from_utf8_lossy(&bytes);
        strip_line_terminators(&text).to_string()
    }
}
