// Operator console for a running relay.
//
// Reads one command per line from any `BufRead` and writes its replies to
// any `Write`, so the binary runs it on stdin/stdout and tests run it on
// in-memory buffers:
//
//   list               connected campuses, department, last heartbeat
//   broadcast:<text>   UDP notice to every campus with a known endpoint
//   quit               shut the relay down and leave the console
//   help               command summary
//
// The console stops at EOF, on `quit`, or once the relay is no longer
// running. It never joins relay threads; the caller does that.

use std::io::{self, BufRead, Write};

use campus_protocol::framing::strip_line_terminators;
use chrono::{DateTime, Local};

use crate::registry::SessionInfo;
use crate::server::Relay;

/// ctime(3)-style timestamp, e.g. `Tue Mar  4 09:15:02 2025`.
const LAST_SEEN_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdminCommand {
    List,
    Broadcast(String),
    Quit,
    Help,
    Empty,
    Unknown(String),
}

impl AdminCommand {
    pub fn parse(line: &str) -> Self {
        // Broadcast text is sent as typed, surrounding spaces included.
        let line = strip_line_terminators(line);
        if let Some(text) = line.strip_prefix("broadcast:") {
            return Self::Broadcast(text.to_string());
        }
        match line.trim() {
            "" => Self::Empty,
            "list" => Self::List,
            "quit" => Self::Quit,
            "help" => Self::Help,
            other => Self::Unknown(other.to_string()),
        }
    }
}

fn format_last_seen(at: &DateTime<Local>) -> String {
    at.format(LAST_SEEN_FORMAT).to_string()
}

/// Write the `list` table for `sessions`.
pub fn render_sessions<W: Write>(out: &mut W, sessions: &[SessionInfo]) -> io::Result<()> {
    writeln!(out, "=== Connected Campuses ===")?;
    for info in sessions {
        write!(
            out,
            "Campus: {} (Dept: {}) - Last seen: {}",
            info.campus,
            info.department,
            format_last_seen(&info.last_seen)
        )?;
        if info.has_datagram() {
            write!(out, " [UDP Active]")?;
        }
        writeln!(out)?;
    }
    writeln!(out, "Total: {} campuses", sessions.len())
}

fn render_help<W: Write>(out: &mut W) -> io::Result<()> {
    writeln!(out, "Commands:")?;
    writeln!(out, "  list               show connected campuses")?;
    writeln!(out, "  broadcast:<text>   send a notice to all campuses")?;
    writeln!(out, "  quit               shut down the server")?;
    writeln!(out, "  help               show this list")
}

/// Run one command. Returns false when the console should stop.
pub fn execute<W: Write>(relay: &Relay, command: AdminCommand, out: &mut W) -> io::Result<bool> {
    match command {
        AdminCommand::Empty => {}
        AdminCommand::List => render_sessions(out, &relay.snapshot())?,
        AdminCommand::Broadcast(text) => match relay.broadcast(&text) {
            Ok(count) => writeln!(out, "Broadcast sent to {count} campuses")?,
            Err(e) => writeln!(out, "Error: {e}")?,
        },
        AdminCommand::Help => render_help(out)?,
        AdminCommand::Quit => {
            writeln!(out, "Shutting down server...")?;
            relay.shutdown();
            return Ok(false);
        }
        AdminCommand::Unknown(cmd) => {
            writeln!(out, "Unknown command '{cmd}'. Type 'help' for commands.")?;
        }
    }
    Ok(true)
}

/// Read and execute commands until EOF, `quit`, or relay shutdown.
pub fn run_admin_console<R: BufRead, W: Write>(
    relay: &Relay,
    mut input: R,
    mut output: W,
) -> io::Result<()> {
    writeln!(output, "Server commands: list, broadcast:<message>, quit, help")?;
    let mut line = String::new();
    while relay.is_running() {
        write!(output, "> ")?;
        output.flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            break;
        }
        if !execute(relay, AdminCommand::parse(&line), &mut output)? {
            break;
        }
    }
    output.flush()
}
