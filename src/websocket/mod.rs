//! WebSocket frame parsing and serialisation (RFC 6455 §5.2).
//!
//! Mongrel2 terminates the HTTP upgrade itself and forwards each frame to
//! the handler verbatim, so only the frame layer lives here: no handshake,
//! no fragmentation reassembly. Inbound frames are client-to-server and
//! therefore masked; outbound frames are server-to-client and sent
//! unmasked.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Close status: normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close status: endpoint is going away.
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Close status: protocol error.
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;
/// Close status: unacceptable data type.
pub const CLOSE_UNSUPPORTED_DATA: u16 = 1003;
/// Close status: message violates the endpoint's policy.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Close status: message too big to process.
pub const CLOSE_MESSAGE_TOO_BIG: u16 = 1009;
/// Close status: unexpected internal error.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Frame opcode, the low nibble of the first frame byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpCode {
    /// Continuation of a fragmented message.
    Continuation,
    /// UTF-8 text payload.
    Text,
    /// Binary payload.
    Binary,
    /// Connection close.
    Close,
    /// Ping.
    Ping,
    /// Pong.
    Pong,
    /// A value RFC 6455 reserves for future use.
    Reserved(u8),
}

impl OpCode {
    /// Decode the low nibble of a first frame byte.
    #[must_use]
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x0F {
            0x0 => Self::Continuation,
            0x1 => Self::Text,
            0x2 => Self::Binary,
            0x8 => Self::Close,
            0x9 => Self::Ping,
            0xA => Self::Pong,
            other => Self::Reserved(other),
        }
    }

    /// The nibble this opcode encodes to.
    #[must_use]
    pub fn bits(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
            Self::Reserved(bits) => bits & 0x0F,
        }
    }

    /// Whether this is a control opcode (close, ping, pong, or a reserved
    /// control value).
    #[must_use]
    pub fn is_control(self) -> bool { self.bits() & 0x8 != 0 }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continuation => f.write_str("continuation"),
            Self::Text => f.write_str("text"),
            Self::Binary => f.write_str("binary"),
            Self::Close => f.write_str("close"),
            Self::Ping => f.write_str("ping"),
            Self::Pong => f.write_str("pong"),
            Self::Reserved(bits) => write!(f, "reserved({bits:#x})"),
        }
    }
}

/// Errors raised while parsing a frame.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The input ends before the frame does.
    #[error("truncated frame: need {need} bytes, have {have}")]
    Truncated {
        /// Bytes the frame header claims.
        need: usize,
        /// Bytes available.
        have: usize,
    },

    /// A 64-bit extended length does not fit in memory on this platform.
    #[error("frame payload of {len} bytes exceeds addressable size")]
    PayloadTooLarge {
        /// The declared payload length.
        len: u64,
    },
}

/// One WebSocket frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    fin: bool,
    rsv: u8,
    opcode: OpCode,
    payload: Bytes,
}

impl Frame {
    /// A final, unfragmented frame with the given opcode and payload.
    #[must_use]
    pub fn new(opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            rsv: 0,
            opcode,
            payload: payload.into(),
        }
    }

    /// A text frame.
    #[must_use]
    pub fn text(payload: impl Into<String>) -> Self {
        Self::new(OpCode::Text, payload.into().into_bytes())
    }

    /// A binary frame.
    #[must_use]
    pub fn binary(payload: impl Into<Bytes>) -> Self { Self::new(OpCode::Binary, payload) }

    /// A close frame: FIN set, unmasked, payload the big-endian status code
    /// followed by an optional UTF-8 reason.
    ///
    /// # Examples
    ///
    /// ```
    /// use mongrel2_handler::websocket::{Frame, CLOSE_POLICY_VIOLATION};
    ///
    /// let frame = Frame::close(CLOSE_POLICY_VIOLATION, "");
    /// assert_eq!(frame.payload().as_ref(), &[0x03, 0xF0]);
    /// ```
    #[must_use]
    pub fn close(status: u16, reason: &str) -> Self {
        let mut payload = BytesMut::with_capacity(2 + reason.len());
        payload.put_u16(status);
        payload.extend_from_slice(reason.as_bytes());
        Self::new(OpCode::Close, payload.freeze())
    }

    /// Parse one frame from the front of `input`, unmasking the payload
    /// when the mask bit is set. Bytes past the frame are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Truncated`] when the input ends inside the
    /// header or payload, and [`FrameError::PayloadTooLarge`] when a 64-bit
    /// length cannot be addressed.
    pub fn parse(input: &[u8]) -> Result<Self, FrameError> {
        let need = |need: usize| FrameError::Truncated {
            need,
            have: input.len(),
        };
        if input.len() < 2 {
            return Err(need(2));
        }
        let first = input[0];
        let second = input[1];
        let masked = second & 0x80 != 0;
        let mut offset = 2usize;

        let len = match second & 0x7F {
            126 => {
                let bytes: [u8; 2] = input
                    .get(offset..offset + 2)
                    .and_then(|s| s.try_into().ok())
                    .ok_or_else(|| need(offset + 2))?;
                offset += 2;
                u64::from(u16::from_be_bytes(bytes))
            }
            127 => {
                let bytes: [u8; 8] = input
                    .get(offset..offset + 8)
                    .and_then(|s| s.try_into().ok())
                    .ok_or_else(|| need(offset + 8))?;
                offset += 8;
                u64::from_be_bytes(bytes)
            }
            short => u64::from(short),
        };
        let len = usize::try_from(len).map_err(|_| FrameError::PayloadTooLarge { len })?;

        let mask: Option<[u8; 4]> = if masked {
            let bytes = input
                .get(offset..offset + 4)
                .and_then(|s| s.try_into().ok())
                .ok_or_else(|| need(offset + 4))?;
            offset += 4;
            Some(bytes)
        } else {
            None
        };

        let payload = input
            .get(offset..offset + len)
            .ok_or_else(|| need(offset + len))?;
        let payload = match mask {
            Some(key) => {
                let mut unmasked = payload.to_vec();
                for (i, byte) in unmasked.iter_mut().enumerate() {
                    *byte ^= key[i % 4];
                }
                Bytes::from(unmasked)
            }
            None => Bytes::copy_from_slice(payload),
        };

        Ok(Self {
            fin: first & 0x80 != 0,
            rsv: (first >> 4) & 0x07,
            opcode: OpCode::from_bits(first),
            payload,
        })
    }

    /// Serialise the frame unmasked, as servers must send them.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(10 + self.payload.len());
        buf.put_u8(self.header_byte());
        let len = self.payload.len();
        if len < 126 {
            buf.put_u8(len as u8);
        } else if len <= usize::from(u16::MAX) {
            buf.put_u8(126);
            buf.put_u16(len as u16);
        } else {
            buf.put_u8(127);
            buf.put_u64(len as u64);
        }
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    /// The first frame byte: FIN, reserved bits, opcode.
    #[must_use]
    pub fn header_byte(&self) -> u8 {
        (u8::from(self.fin) << 7) | (self.rsv << 4) | self.opcode.bits()
    }

    /// Whether this frame ends its message.
    #[must_use]
    pub fn fin(&self) -> bool { self.fin }

    /// The three reserved bits.
    #[must_use]
    pub fn rsv(&self) -> u8 { self.rsv }

    /// Frame opcode.
    #[must_use]
    pub fn opcode(&self) -> OpCode { self.opcode }

    /// Unmasked payload bytes.
    #[must_use]
    pub fn payload(&self) -> &Bytes { &self.payload }

    /// The close status carried by a close frame's first two payload bytes.
    #[must_use]
    pub fn close_status(&self) -> Option<u16> {
        if self.opcode != OpCode::Close {
            return None;
        }
        let bytes: [u8; 2] = self.payload.get(..2)?.try_into().ok()?;
        Some(u16::from_be_bytes(bytes))
    }
}

/// An outbound WebSocket reply: one frame addressed to one connection.
#[derive(Clone, Debug)]
pub struct WebSocketResponse {
    sender_id: String,
    conn_id: u64,
    frame: Frame,
}

impl WebSocketResponse {
    /// Wrap `frame` addressed to `conn_id` on `sender_id`.
    #[must_use]
    pub fn new(sender_id: impl Into<String>, conn_id: u64, frame: Frame) -> Self {
        Self {
            sender_id: sender_id.into(),
            conn_id,
            frame,
        }
    }

    /// A close frame carrying `status` and no reason.
    #[must_use]
    pub fn close(sender_id: impl Into<String>, conn_id: u64, status: u16) -> Self {
        Self::new(sender_id, conn_id, Frame::close(status, ""))
    }

    /// Identity of the server instance this reply is routed through.
    #[must_use]
    pub fn sender_id(&self) -> &str { &self.sender_id }

    /// Target connection id.
    #[must_use]
    pub fn conn_id(&self) -> u64 { self.conn_id }

    /// The frame to send.
    #[must_use]
    pub fn frame(&self) -> &Frame { &self.frame }

    /// The encoded frame, used as the reply payload.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes { self.frame.encode() }
}
