// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The binary extension slot: `msgType(1 byte) + agentName(UTF-8) + 0x00
//! + payload` (§6.1). Used for the file-upload passthrough forwarded to
//! the cross-boundary prompter; this crate only owns the framing, not
//! the payload's meaning.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("binary frame too short to contain a msgType byte")]
    Empty,
    #[error("binary frame missing NUL terminator after agent name")]
    MissingTerminator,
    #[error("agent name is not valid UTF-8: {0}")]
    InvalidAgentName(#[from] std::str::Utf8Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryFrame {
    pub msg_type: u8,
    pub agent_name: String,
    pub payload: Vec<u8>,
}

pub fn encode_binary_frame(frame: &BinaryFrame) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + frame.agent_name.len() + 1 + frame.payload.len());
    out.push(frame.msg_type);
    out.extend_from_slice(frame.agent_name.as_bytes());
    out.push(0u8);
    out.extend_from_slice(&frame.payload);
    out
}

pub fn decode_binary_frame(bytes: &[u8]) -> Result<BinaryFrame, WireError> {
    let (&msg_type, rest) = bytes.split_first().ok_or(WireError::Empty)?;
    let nul_pos = rest.iter().position(|b| *b == 0).ok_or(WireError::MissingTerminator)?;
    let agent_name = std::str::from_utf8(&rest[..nul_pos])?.to_string();
    let payload = rest[nul_pos + 1..].to_vec();
    Ok(BinaryFrame { msg_type, agent_name, payload })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_frame() {
        let frame = BinaryFrame { msg_type: 7, agent_name: "agent-a".into(), payload: vec![1, 2, 3] };
        let bytes = encode_binary_frame(&frame);
        let decoded = decode_binary_frame(&bytes).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn empty_frame_is_rejected() {
        assert!(matches!(decode_binary_frame(&[]), Err(WireError::Empty)));
    }

    #[test]
    fn missing_terminator_is_rejected() {
        let bytes = vec![1, b'a', b'g', b'e', b'n', b't'];
        assert!(matches!(decode_binary_frame(&bytes), Err(WireError::MissingTerminator)));
    }

    #[test]
    fn empty_agent_name_and_payload_round_trip() {
        let frame = BinaryFrame { msg_type: 0, agent_name: String::new(), payload: vec![] };
        let bytes = encode_binary_frame(&frame);
        assert_eq!(bytes, vec![0u8, 0u8]);
        assert_eq!(decode_binary_frame(&bytes).unwrap(), frame);
    }
}
