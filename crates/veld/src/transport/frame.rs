// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 veld contributors

//! Frame codec: fixed 29-byte header, big-endian, one frame per datagram.
//!
//! Header layout:
//!
//! ```text
//! offset  size  field
//!   0     8    connectionId       u64   nonzero
//!   8     8    dataId             u64   nonzero
//!  16     4    total              i32   > 0
//!  20     1    frameType          u8
//!  21     4    sequence           i32   0 <= sequence < total
//!  25     4    frameTotalLength   i32   >= 29, == header + payload
//!  29     *    payload
//! ```
//!
//! Decoding validates every integer constraint before touching the
//! payload; a malformed datagram yields [`FrameError`] and no partial
//! state. The remote address is out-of-band: inbound frames travel as
//! `(Frame, SocketAddr)` pairs from the reader, outbound frames are
//! addressed by the sending connection.

use std::fmt;

use crate::config::FRAME_HEADER_LEN;

// ============================================================================
// Frame types
// ============================================================================

/// Wire tag for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Payload fragment for (connectionId, dataId, sequence).
    Data = 0x01,
    /// Single-sequence acknowledgement; body is [`AckBody`].
    Ack = 0x02,
    /// Keep-alive probe; PONG expected within the ping timeout.
    Ping = 0x03,
    /// Echo of a PING's dataId.
    Pong = 0x04,
    /// Peer-initiated disconnect.
    Off = 0x05,
    /// Peer-initiated announce.
    Online = 0x06,
    /// Receiver demands retransmit of (dataId, sequence); body is
    /// [`ImmediateRequestBody`].
    ImmediateRequest = 0x07,
    /// Reserved: acks many sequences in one frame. Decoded and applied
    /// like [`FrameType::Ack`]; never emitted.
    BatchAck = 0x08,
    /// Establish a connection id with a peer; empty body.
    ConnectRequest = 0x09,
    /// Response to [`FrameType::ConnectRequest`]; empty body.
    ConnectResponse = 0x0A,
}

impl FrameType {
    /// Parse a wire tag.
    pub fn from_u8(byte: u8) -> Result<Self, FrameError> {
        match byte {
            0x01 => Ok(Self::Data),
            0x02 => Ok(Self::Ack),
            0x03 => Ok(Self::Ping),
            0x04 => Ok(Self::Pong),
            0x05 => Ok(Self::Off),
            0x06 => Ok(Self::Online),
            0x07 => Ok(Self::ImmediateRequest),
            0x08 => Ok(Self::BatchAck),
            0x09 => Ok(Self::ConnectRequest),
            0x0A => Ok(Self::ConnectResponse),
            other => Err(FrameError::UnknownType(other)),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Codec failure. Malformed input is dropped by callers; decoding never
/// panics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Buffer shorter than the fixed header or declared length.
    Truncated { needed: usize, got: usize },
    /// `frameTotalLength` disagrees with the datagram size.
    LengthMismatch { declared: i32, actual: usize },
    /// A header integer violates its range constraint.
    InvalidField(&'static str),
    /// Unrecognized frame type tag.
    UnknownType(u8),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Truncated { needed, got } => {
                write!(f, "malformed frame: need {} bytes, got {}", needed, got)
            }
            FrameError::LengthMismatch { declared, actual } => {
                write!(
                    f,
                    "malformed frame: declared length {} but datagram is {}",
                    declared, actual
                )
            }
            FrameError::InvalidField(field) => {
                write!(f, "malformed frame: invalid {}", field)
            }
            FrameError::UnknownType(t) => write!(f, "malformed frame: unknown type {:#04x}", t),
        }
    }
}

impl std::error::Error for FrameError {}

// ============================================================================
// Frame
// ============================================================================

/// One wire frame. Owns its payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Local connection id of the sending side's flow.
    pub connection_id: u64,
    /// Application payload this frame belongs to.
    pub data_id: u64,
    /// Number of frames constituting the payload.
    pub total: i32,
    /// Frame tag.
    pub frame_type: FrameType,
    /// Fragment index, `0..total`.
    pub sequence: i32,
    /// Fragment bytes (empty for control frames).
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build a DATA frame for one fragment.
    #[must_use]
    pub fn data(connection_id: u64, data_id: u64, total: i32, sequence: i32, payload: Vec<u8>) -> Self {
        Self {
            connection_id,
            data_id,
            total,
            frame_type: FrameType::Data,
            sequence,
            payload,
        }
    }

    /// Build a control frame (PING/PONG/OFF/ONLINE/CONNECT_*): single
    /// frame, sequence 0, optional body.
    #[must_use]
    pub fn control(connection_id: u64, data_id: u64, frame_type: FrameType, payload: Vec<u8>) -> Self {
        Self {
            connection_id,
            data_id,
            total: 1,
            frame_type,
            sequence: 0,
            payload,
        }
    }

    /// Total on-wire size.
    #[must_use]
    pub fn wire_len(&self) -> usize {
        FRAME_HEADER_LEN + self.payload.len()
    }

    /// Encode into a fresh buffer, single pass, big-endian.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.wire_len());
        buf.extend_from_slice(&self.connection_id.to_be_bytes());
        buf.extend_from_slice(&self.data_id.to_be_bytes());
        buf.extend_from_slice(&self.total.to_be_bytes());
        buf.push(self.frame_type as u8);
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.extend_from_slice(&(self.wire_len() as i32).to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decode and validate one datagram.
    ///
    /// The payload is copied into fresh owned storage; the input buffer
    /// is only borrowed.
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < FRAME_HEADER_LEN {
            return Err(FrameError::Truncated {
                needed: FRAME_HEADER_LEN,
                got: buf.len(),
            });
        }

        let connection_id = u64::from_be_bytes(buf[0..8].try_into().unwrap_or_default());
        let data_id = u64::from_be_bytes(buf[8..16].try_into().unwrap_or_default());
        let total = i32::from_be_bytes(buf[16..20].try_into().unwrap_or_default());
        let frame_type = FrameType::from_u8(buf[20])?;
        let sequence = i32::from_be_bytes(buf[21..25].try_into().unwrap_or_default());
        let declared = i32::from_be_bytes(buf[25..29].try_into().unwrap_or_default());

        if connection_id == 0 {
            return Err(FrameError::InvalidField("connectionId"));
        }
        if data_id == 0 {
            return Err(FrameError::InvalidField("dataId"));
        }
        if total <= 0 {
            return Err(FrameError::InvalidField("total"));
        }
        if sequence < 0 || sequence >= total {
            return Err(FrameError::InvalidField("sequence"));
        }
        if declared < FRAME_HEADER_LEN as i32 {
            return Err(FrameError::InvalidField("frameTotalLength"));
        }
        if declared as usize != buf.len() {
            return Err(FrameError::LengthMismatch {
                declared,
                actual: buf.len(),
            });
        }

        Ok(Self {
            connection_id,
            data_id,
            total,
            frame_type,
            sequence,
            payload: buf[FRAME_HEADER_LEN..].to_vec(),
        })
    }
}

// ============================================================================
// ACK body
// ============================================================================

/// ACK frame body.
///
/// `dataId:u64 | sequence:i32 | received:u8 | receivedCount:i32 |
/// batchCount:i32 | batchSeq[batchCount]:i32` - big-endian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckBody {
    /// Payload being acknowledged.
    pub data_id: u64,
    /// Sequence being acknowledged.
    pub sequence: i32,
    /// True when the receiver holds this sequence (also set for
    /// duplicate-suppression acks).
    pub received: bool,
    /// Receiver's current received-frame count for the payload.
    pub received_count: i32,
    /// Optional batch confirmation of other already-received sequences.
    pub batch: Vec<i32>,
}

impl AckBody {
    const FIXED_LEN: usize = 8 + 4 + 1 + 4 + 4;

    /// Encode to bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::FIXED_LEN + self.batch.len() * 4);
        buf.extend_from_slice(&self.data_id.to_be_bytes());
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.push(u8::from(self.received));
        buf.extend_from_slice(&self.received_count.to_be_bytes());
        buf.extend_from_slice(&(self.batch.len() as i32).to_be_bytes());
        for seq in &self.batch {
            buf.extend_from_slice(&seq.to_be_bytes());
        }
        buf
    }

    /// Decode from an ACK frame payload.
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < Self::FIXED_LEN {
            return Err(FrameError::Truncated {
                needed: Self::FIXED_LEN,
                got: buf.len(),
            });
        }

        let data_id = u64::from_be_bytes(buf[0..8].try_into().unwrap_or_default());
        let sequence = i32::from_be_bytes(buf[8..12].try_into().unwrap_or_default());
        let received = match buf[12] {
            0 => false,
            1 => true,
            _ => return Err(FrameError::InvalidField("received")),
        };
        let received_count = i32::from_be_bytes(buf[13..17].try_into().unwrap_or_default());
        let batch_count = i32::from_be_bytes(buf[17..21].try_into().unwrap_or_default());

        if batch_count < 0 {
            return Err(FrameError::InvalidField("batchCount"));
        }
        let batch_count = batch_count as usize;
        let needed = Self::FIXED_LEN + batch_count * 4;
        if buf.len() != needed {
            return Err(FrameError::Truncated {
                needed,
                got: buf.len(),
            });
        }

        let mut batch = Vec::with_capacity(batch_count);
        for i in 0..batch_count {
            let off = Self::FIXED_LEN + i * 4;
            batch.push(i32::from_be_bytes(
                buf[off..off + 4].try_into().unwrap_or_default(),
            ));
        }

        Ok(Self {
            data_id,
            sequence,
            received,
            received_count,
            batch,
        })
    }
}

// ============================================================================
// IMMEDIATE_REQUEST body
// ============================================================================

/// IMMEDIATE_REQUEST frame body.
///
/// `dataId:u64 | sequence:i32 | requestCount:i32` - big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImmediateRequestBody {
    /// Payload the receiver is reassembling.
    pub data_id: u64,
    /// Missing sequence being demanded.
    pub sequence: i32,
    /// How many times the receiver has asked so far (1-based).
    pub request_count: i32,
}

impl ImmediateRequestBody {
    const LEN: usize = 8 + 4 + 4;

    /// Encode to bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::LEN);
        buf.extend_from_slice(&self.data_id.to_be_bytes());
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.extend_from_slice(&self.request_count.to_be_bytes());
        buf
    }

    /// Decode from an IMMEDIATE_REQUEST frame payload.
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() != Self::LEN {
            return Err(FrameError::Truncated {
                needed: Self::LEN,
                got: buf.len(),
            });
        }
        Ok(Self {
            data_id: u64::from_be_bytes(buf[0..8].try_into().unwrap_or_default()),
            sequence: i32::from_be_bytes(buf[8..12].try_into().unwrap_or_default()),
            request_count: i32::from_be_bytes(buf[12..16].try_into().unwrap_or_default()),
        })
    }
}
