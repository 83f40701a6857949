//! Native IPC framing: `opcode (u32 LE) | length (u32 LE) | JSON payload`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{self, Read, Write};

pub const HEADER_LEN: usize = 8;
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024;
pub const PROTOCOL_VERSION: u32 = 1;

pub const READY_EVENT: &str = "READY";
pub const ERROR_EVENT: &str = "ERROR";

pub mod commands {
    pub const DISPATCH: &str = "DISPATCH";
    pub const AUTHORIZE: &str = "AUTHORIZE";
    pub const AUTHENTICATE: &str = "AUTHENTICATE";
    pub const GET_VOICE_SETTINGS: &str = "GET_VOICE_SETTINGS";
    pub const SET_VOICE_SETTINGS: &str = "SET_VOICE_SETTINGS";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Opcode {
    Handshake = 0,
    Message = 1,
    Close = 2,
    Ping = 3,
    Pong = 4,
}

impl TryFrom<u32> for Opcode {
    type Error = FrameError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Opcode::Handshake),
            1 => Ok(Opcode::Message),
            2 => Ok(Opcode::Close),
            3 => Ok(Opcode::Ping),
            4 => Ok(Opcode::Pong),
            other => Err(FrameError::UnknownOpcode(other)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("unknown opcode {0}")]
    UnknownOpcode(u32),
    #[error("payload of {0} bytes exceeds frame limit")]
    TooLarge(usize),
    #[error("frame truncated")]
    Truncated,
    #[error("invalid json payload: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(opcode: Opcode, payload: Vec<u8>) -> Self {
        Self { opcode, payload }
    }

    pub fn json<T: Serialize>(opcode: Opcode, body: &T) -> Result<Self, FrameError> {
        let payload = serde_json::to_vec(body)?;
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(FrameError::TooLarge(payload.len()));
        }
        Ok(Self { opcode, payload })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.extend_from_slice(&(self.opcode as u32).to_le_bytes());
        out.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Decodes one frame from the front of `buf`, returning it with the number of bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(Frame, usize), FrameError> {
        if buf.len() < HEADER_LEN {
            return Err(FrameError::Truncated);
        }
        let (opcode, len) = parse_header(&buf[..HEADER_LEN])?;
        let end = HEADER_LEN + len;
        if buf.len() < end {
            return Err(FrameError::Truncated);
        }
        Ok((Frame::new(opcode, buf[HEADER_LEN..end].to_vec()), end))
    }

    pub fn write_to<W: Write + ?Sized>(&self, w: &mut W) -> Result<(), FrameError> {
        w.write_all(&self.encode())?;
        w.flush()?;
        Ok(())
    }

    pub fn read_from<R: Read + ?Sized>(r: &mut R) -> Result<Frame, FrameError> {
        let mut header = [0u8; HEADER_LEN];
        read_exact_or_truncated(r, &mut header)?;
        let (opcode, len) = parse_header(&header)?;
        let mut payload = vec![0u8; len];
        read_exact_or_truncated(r, &mut payload)?;
        Ok(Frame::new(opcode, payload))
    }

    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, FrameError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

fn parse_header(header: &[u8]) -> Result<(Opcode, usize), FrameError> {
    let mut op = [0u8; 4];
    let mut len = [0u8; 4];
    op.copy_from_slice(&header[0..4]);
    len.copy_from_slice(&header[4..8]);
    let opcode = Opcode::try_from(u32::from_le_bytes(op))?;
    let len = u32::from_le_bytes(len) as usize;
    if len > MAX_PAYLOAD_LEN {
        return Err(FrameError::TooLarge(len));
    }
    Ok((opcode, len))
}

fn read_exact_or_truncated<R: Read + ?Sized>(r: &mut R, buf: &mut [u8]) -> Result<(), FrameError> {
    match r.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(FrameError::Truncated),
        Err(e) => Err(FrameError::Io(e)),
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub v: u32,
    pub client_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct IpcCommand {
    pub cmd: String,
    pub args: Value,
    pub nonce: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct IpcResponse {
    #[serde(default)]
    pub cmd: Option<String>,
    #[serde(default)]
    pub evt: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub nonce: Option<String>,
}

impl IpcResponse {
    pub fn is_error(&self) -> bool {
        self.evt.as_deref() == Some(ERROR_EVENT)
    }

    pub fn is_ready(&self) -> bool {
        self.evt.as_deref() == Some(READY_EVENT)
    }

    pub fn peer_error(&self) -> Option<PeerError> {
        if !self.is_error() {
            return None;
        }
        let data = self.data.clone().unwrap_or(Value::Null);
        Some(serde_json::from_value(data).unwrap_or_default())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AuthorizeData {
    pub code: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VoiceSettings {
    pub mute: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    #[test]
    fn frame_round_trip_preserves_opcode_and_payload() {
        let cmd = IpcCommand {
            cmd: commands::SET_VOICE_SETTINGS.to_string(),
            args: json!({ "mute": true }),
            nonce: "n-1".to_string(),
        };
        let frame = Frame::json(Opcode::Message, &cmd).unwrap();
        let bytes = frame.encode();

        assert_eq!(&bytes[0..4], &1u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &(frame.payload.len() as u32).to_le_bytes());

        let (decoded, used) = Frame::decode(&bytes).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(decoded.opcode, Opcode::Message);
        assert_eq!(decoded.payload, frame.payload);
        assert_eq!(decoded.parse::<IpcCommand>().unwrap(), cmd);

        let streamed = Frame::read_from(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(streamed, frame);
    }

    #[test]
    fn rejects_unknown_opcode_and_oversized_length() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&9u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        assert!(matches!(Frame::decode(&bytes), Err(FrameError::UnknownOpcode(9))));

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&((MAX_PAYLOAD_LEN as u32) + 1).to_le_bytes());
        assert!(matches!(Frame::decode(&bytes), Err(FrameError::TooLarge(_))));
    }

    #[test]
    fn short_reads_are_truncated() {
        let frame = Frame::new(Opcode::Ping, b"{}".to_vec());
        let bytes = frame.encode();
        assert!(matches!(Frame::decode(&bytes[..5]), Err(FrameError::Truncated)));
        assert!(matches!(
            Frame::read_from(&mut Cursor::new(&bytes[..9])),
            Err(FrameError::Truncated)
        ));
    }

    #[test]
    fn error_event_carries_peer_error() {
        let resp: IpcResponse = serde_json::from_value(json!({
            "cmd": "AUTHENTICATE",
            "evt": "ERROR",
            "data": { "code": 4009, "message": "Invalid access token" },
            "nonce": "abc"
        }))
        .unwrap();
        assert!(resp.is_error());
        let err = resp.peer_error().unwrap();
        assert_eq!(err.code, 4009);
        assert_eq!(err.message, "Invalid access token");
    }
}
