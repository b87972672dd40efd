// Protocol vocabulary for campus-relay communication.
//
// The protocol is line-oriented text, so each type here has a `parse`
// function taking one frame (terminator already stripped) and an `encode`
// function producing one frame (without terminator; `framing.rs` adds it).
//
// - `AuthRequest`: the first frame a campus sends on the reliable stream,
//   `Campus:<name>,Pass:<secret>,Dept:<dept>`, fields in any order.
// - `ClientMessage`: frames a campus sends after authenticating.
// - `ServerMessage`: frames the relay sends on the reliable stream.
// - `Datagram`: heartbeat datagrams sent to the relay's UDP socket.
//   Broadcasts from the relay are raw text and have no type.
//
// Parsing never fails loudly: a frame that does not match returns `None` and
// the caller ignores it. Message text is everything after the last structural
// colon, so it may itself contain colons.

/// Department recorded for a campus that did not supply one.
pub const DEFAULT_DEPARTMENT: &str = "General";

const SEND_PREFIX: &str = "SEND:";
const FROM_PREFIX: &str = "FROM:";
const AUTH_OK_PREFIX: &str = "AUTH_OK:";
const AUTH_FAIL_PREFIX: &str = "AUTH_FAIL:";
const HEARTBEAT_PREFIX: &str = "HEARTBEAT:";

/// Credentials presented on a freshly opened connection.
///
/// Missing fields parse as empty strings; validation (including the
/// department default) is the relay's job.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthRequest {
    pub campus: String,
    pub password: String,
    pub department: String,
}

impl AuthRequest {
    /// Parse comma-separated `key:value` fields. Recognized keys are
    /// `Campus`, `Pass` and `Dept`; anything else, including tokens with no
    /// colon, is skipped. A repeated key keeps its last value.
    pub fn parse(frame: &str) -> Self {
        let mut request = Self::default();
        for token in frame.split(',') {
            let Some((key, value)) = token.split_once(':') else {
                continue;
            };
            match key {
                "Campus" => request.campus = value.to_string(),
                "Pass" => request.password = value.to_string(),
                "Dept" => request.department = value.to_string(),
                _ => {}
            }
        }
        request
    }

    pub fn encode(&self) -> String {
        format!(
            "Campus:{},Pass:{},Dept:{}",
            self.campus, self.password, self.department
        )
    }
}

/// Frames sent by an authenticated campus to the relay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientMessage {
    /// Route `text` to the campus named `target`. `target_department` is
    /// carried on the wire but the relay routes by campus name only.
    Send {
        target: String,
        target_department: String,
        text: String,
    },
}

impl ClientMessage {
    /// Parse `SEND:<target>:<dept>:<text>`. Requires both separators after
    /// the target and a non-empty target.
    pub fn parse(frame: &str) -> Option<Self> {
        let payload = frame.strip_prefix(SEND_PREFIX)?;
        let mut parts = payload.splitn(3, ':');
        let target = parts.next()?;
        let target_department = parts.next()?;
        let text = parts.next()?;
        if target.is_empty() {
            return None;
        }
        Some(Self::Send {
            target: target.to_string(),
            target_department: target_department.to_string(),
            text: text.to_string(),
        })
    }

    pub fn encode(&self) -> String {
        match self {
            Self::Send {
                target,
                target_department,
                text,
            } => format!("{SEND_PREFIX}{target}:{target_department}:{text}"),
        }
    }
}

/// Frames sent by the relay on a campus's reliable stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerMessage {
    /// Authentication accepted.
    AuthOk { campus: String },
    /// Authentication rejected; the relay closes the connection after this.
    AuthFail { reason: String },
    /// A message routed from another campus.
    From {
        source: String,
        department: String,
        text: String,
    },
}

impl ServerMessage {
    pub fn parse(frame: &str) -> Option<Self> {
        if let Some(campus) = frame.strip_prefix(AUTH_OK_PREFIX) {
            return Some(Self::AuthOk {
                campus: campus.to_string(),
            });
        }
        if let Some(reason) = frame.strip_prefix(AUTH_FAIL_PREFIX) {
            return Some(Self::AuthFail {
                reason: reason.to_string(),
            });
        }
        let payload = frame.strip_prefix(FROM_PREFIX)?;
        let mut parts = payload.splitn(3, ':');
        let source = parts.next()?;
        let department = parts.next()?;
        let text = parts.next()?;
        Some(Self::From {
            source: source.to_string(),
            department: department.to_string(),
            text: text.to_string(),
        })
    }

    pub fn encode(&self) -> String {
        match self {
            Self::AuthOk { campus } => format!("{AUTH_OK_PREFIX}{campus}"),
            Self::AuthFail { reason } => format!("{AUTH_FAIL_PREFIX}{reason}"),
            Self::From {
                source,
                department,
                text,
            } => format!("{FROM_PREFIX}{source}:{department}:{text}"),
        }
    }
}

/// Datagrams sent by a campus to the relay's UDP socket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Datagram {
    /// Liveness ping; also tells the relay where to send broadcasts.
    Heartbeat { campus: String },
}

impl Datagram {
    /// Parse `HEARTBEAT:<name>`, ignoring a trailing line terminator.
    pub fn parse(payload: &str) -> Option<Self> {
        let campus = crate::framing::strip_line_terminators(payload)
            .strip_prefix(HEARTBEAT_PREFIX)?;
        if campus.is_empty() {
            return None;
        }
        Some(Self::Heartbeat {
            campus: campus.to_string(),
        })
    }

    pub fn encode(&self) -> String {
        match self {
            Self::Heartbeat { campus } => format!("{HEARTBEAT_PREFIX}{campus}"),
        }
    }
}
