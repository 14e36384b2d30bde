//! Wire protocol: length-prefixed frames whose first varint is a kind tag.
//!
//! | Tag | Kind | Payload |
//! |---|---|---|
//! | 0 | sync-step-1 | remote state vector |
//! | 1 | sync-step-2 / update | CRDT update bytes |
//! | 2 | awareness | awareness update bytes |
//! | 3 | auth-request | token (server->client, optional) |
//! | 4 | auth-reply | token (client->server) |
//!
//! Server-originated composite frames may pack multiple kinds back to back;
//! `decode_frames` reads every frame in the buffer. Failure to parse any
//! frame closes the session with code 1003 (`spec.md` §4.1).

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    SyncStep1 = 0,
    Update = 1,
    Awareness = 2,
    AuthRequest = 3,
    AuthReply = 4,
}

impl MessageKind {
    fn from_tag(tag: u64) -> Option<Self> {
        match tag {
            0 => Some(Self::SyncStep1),
            1 => Some(Self::Update),
            2 => Some(Self::Awareness),
            3 => Some(Self::AuthRequest),
            4 => Some(Self::AuthReply),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: MessageKind,
    pub payload: Vec<u8>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("truncated frame")]
    Truncated,
    #[error("unknown message kind tag {0}")]
    UnknownMessageKind(u64),
    #[error("varint overflow")]
    VarintOverflow,
}

fn read_varint(buf: &[u8], pos: &mut usize) -> Result<u64, ProtocolError> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    loop {
        let byte = *buf.get(*pos).ok_or(ProtocolError::Truncated)?;
        *pos += 1;
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift >= 64 {
            return Err(ProtocolError::VarintOverflow);
        }
    }
}

fn write_varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

/// Decodes every frame packed into `buf`, in order. A buffer containing a
/// single frame with no length prefix on the payload is supported by
/// treating the remainder of the buffer (after the kind tag and its own
/// varint length) as the payload.
pub fn decode_frames(buf: &[u8]) -> Result<Vec<Frame>, ProtocolError> {
    let mut frames = Vec::new();
    let mut pos = 0;
    while pos < buf.len() {
        let tag = read_varint(buf, &mut pos)?;
        let kind = MessageKind::from_tag(tag).ok_or(ProtocolError::UnknownMessageKind(tag))?;
        let len = read_varint(buf, &mut pos)? as usize;
        let end = pos
            .checked_add(len)
            .filter(|&e| e <= buf.len())
            .ok_or(ProtocolError::Truncated)?;
        let payload = buf[pos..end].to_vec();
        pos = end;
        frames.push(Frame { kind, payload });
    }
    Ok(frames)
}

pub fn decode_frame(buf: &[u8]) -> Result<Frame, ProtocolError> {
    let frames = decode_frames(buf)?;
    frames.into_iter().next().ok_or(ProtocolError::Truncated)
}

pub fn encode_frame(kind: MessageKind, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 10);
    write_varint(kind as u64, &mut out);
    write_varint(payload.len() as u64, &mut out);
    out.extend_from_slice(payload);
    out
}

pub fn encode_frames(frames: &[(MessageKind, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    for (kind, payload) in frames {
        out.extend(encode_frame(*kind, payload));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_single_update_frame() {
        let frame = encode_frame(MessageKind::Update, b"hello");
        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded.kind, MessageKind::Update);
        assert_eq!(decoded.payload, b"hello");
    }

    #[test]
    fn round_trips_a_composite_frame() {
        let packed = encode_frames(&[
            (MessageKind::SyncStep1, b"sv".as_slice()),
            (MessageKind::Awareness, b"aw".as_slice()),
        ]);
        let frames = decode_frames(&packed).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].kind, MessageKind::SyncStep1);
        assert_eq!(frames[0].payload, b"sv");
        assert_eq!(frames[1].kind, MessageKind::Awareness);
        assert_eq!(frames[1].payload, b"aw");
    }

    #[test]
    fn rejects_unknown_kind_tag() {
        let mut buf = Vec::new();
        write_varint(9, &mut buf);
        write_varint(0, &mut buf);
        assert_eq!(decode_frame(&buf), Err(ProtocolError::UnknownMessageKind(9)));
    }

    #[test]
    fn rejects_truncated_payload() {
        let mut buf = Vec::new();
        write_varint(MessageKind::Update as u64, &mut buf);
        write_varint(5, &mut buf);
        buf.extend_from_slice(b"ab");
        assert_eq!(decode_frame(&buf), Err(ProtocolError::Truncated));
    }

    #[test]
    fn large_varint_round_trips() {
        let payload = vec![7u8; 1000];
        let frame = encode_frame(MessageKind::Update, &payload);
        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded.payload, payload);
    }
}
