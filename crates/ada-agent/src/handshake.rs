//! Agent init handshake.
//!
//! The loader hands the agent a payload string naming the session to join:
//! `"host_pid=<decimal>;session_id=<hex-or-decimal>"`. Key/value pairs may
//! be separated by `;`, `,`, or any of `\n`, `\r`, `\t`; `pid` and `sid` are
//! accepted as key aliases. Values missing or malformed in the payload fall
//! back to `ADA_SHM_HOST_PID` and `ADA_SHM_SESSION_ID` (hex). With neither
//! source usable the agent declines to initialize.

use ada_trace::FabricError;

/// Resolved session identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub host_pid: u32,
    pub session_id: u64,
}

/// Environment fallback for the host pid.
pub const ENV_HOST_PID: &str = "ADA_SHM_HOST_PID";

/// Environment fallback for the session id (hex).
pub const ENV_SESSION_ID: &str = "ADA_SHM_SESSION_ID";

fn parse_session_id(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).ok();
    }
    // Decimal first; anything with hex digits beyond 0-9 parses as hex.
    raw.parse::<u64>()
        .ok()
        .or_else(|| u64::from_str_radix(raw, 16).ok())
}

fn parse_payload(payload: &str) -> (Option<u32>, Option<u64>) {
    let mut pid = None;
    let mut sid = None;
    for token in payload.split([';', ',', '\n', '\r', '\t']) {
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        match key.trim() {
            "host_pid" | "pid" => pid = pid.or_else(|| value.trim().parse::<u32>().ok()),
            "session_id" | "sid" => sid = sid.or_else(|| parse_session_id(value)),
            _ => {}
        }
    }
    (pid, sid)
}

/// Resolves the session identity from the payload, then the environment.
pub fn resolve(payload: Option<&str>) -> Result<Handshake, FabricError> {
    let (mut pid, mut sid) = payload.map_or((None, None), parse_payload);

    if pid.is_none() {
        pid = std::env::var(ENV_HOST_PID)
            .ok()
            .and_then(|v| v.trim().parse::<u32>().ok());
    }
    if sid.is_none() {
        sid = std::env::var(ENV_SESSION_ID)
            .ok()
            .and_then(|v| u64::from_str_radix(v.trim(), 16).ok());
    }

    match (pid, sid) {
        (Some(host_pid), Some(session_id)) => Ok(Handshake {
            host_pid,
            session_id,
        }),
        (None, _) => Err(FabricError::InvalidHandshake("no host pid")),
        (_, None) => Err(FabricError::InvalidHandshake("no session id")),
    }
}
