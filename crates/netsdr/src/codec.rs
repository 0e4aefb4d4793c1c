//! NetSDR frame encoder/decoder and sample unpacking.
//!
//! Pure byte-level functions with no I/O. The wire format is:
//!
//! ```text
//! +---------+-----------------------------+----------------+
//! | header  | item code (control types)   | body           |
//! | 2B LE   | or sequence no. (data types)|                |
//! |         | 2B LE                       |                |
//! +---------+-----------------------------+----------------+
//! ```
//!
//! The header's 13-bit length field counts the whole frame. A data-item
//! frame of exactly 8194 bytes is sent with a length field of `0`; control
//! items have no such escape and top out at 8191 bytes.
//!
//! Parsing distinguishes three outcomes: a valid frame, a well-formed
//! control frame carrying an unrecognized item code, and a malformed frame.
//! The last two are reported through [`ParseFailure`], which still carries
//! as much of the frame as could be decoded.

use std::slice::ChunksExact;

use bytes::{BufMut, Bytes, BytesMut};
use netsdr_core::error::{Error, Result};
use netsdr_core::frame::{
    self, HEADER_LEN, MAX_FRAME_LEN, MAX_LENGTH_FIELD, SENTINEL_LENGTH,
};

use crate::protocol::{ControlItemCode, MessageType};

/// Size of the item code / sequence number field following the header.
pub const FIELD_LEN: usize = 2;

/// Largest parameter block a control-item frame can carry (8187 bytes).
pub const MAX_CONTROL_PARAMS: usize = MAX_LENGTH_FIELD - HEADER_LEN - FIELD_LEN;

/// Largest sample width [`decode_samples`] accepts, in bits.
pub const MAX_SAMPLE_BITS: u16 = 32;

/// A decoded NetSDR frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message type from the header.
    pub msg_type: MessageType,
    /// Item code for control frames; `None` for data frames or when the
    /// code is not recognized.
    pub item_code: Option<ControlItemCode>,
    /// Sequence number for data frames; always `0` for control frames.
    pub sequence: u16,
    /// Bytes following the item code or sequence number.
    pub body: Bytes,
}

/// Why a received frame could not be accepted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseFailure {
    /// Too short to hold the header and item code / sequence number.
    #[error("frame truncated: {len} bytes")]
    Truncated {
        /// Number of bytes received.
        len: usize,
        /// Message type, if the header could be read.
        msg_type: Option<MessageType>,
    },

    /// The header's length field disagrees with the number of bytes received.
    #[error("declared length {declared} does not match {actual} received bytes")]
    LengthMismatch {
        /// Length field from the header.
        declared: u16,
        /// Number of bytes received.
        actual: usize,
        /// Best-effort decode of the frame.
        partial: Frame,
    },

    /// A structurally valid control frame with an item code outside the
    /// recognized set.
    #[error("unrecognized control item code 0x{code:04X}")]
    UnknownItemCode {
        /// Raw item code from the wire.
        code: u16,
        /// The frame with `item_code` set to `None`.
        partial: Frame,
    },
}

impl ParseFailure {
    /// The partially decoded frame, when enough bytes were present.
    pub fn partial(&self) -> Option<&Frame> {
        match self {
            ParseFailure::Truncated { .. } => None,
            ParseFailure::LengthMismatch { partial, .. }
            | ParseFailure::UnknownItemCode { partial, .. } => Some(partial),
        }
    }

    /// Message type from the header, if it could be read.
    pub fn msg_type(&self) -> Option<MessageType> {
        match self {
            ParseFailure::Truncated { msg_type, .. } => *msg_type,
            other => other.partial().map(|f| f.msg_type),
        }
    }
}

/// Build a control-item frame.
///
/// The total length (header, item code, parameters) must not exceed 8191
/// bytes; there is no sentinel escape for control items.
///
/// # Example
///
/// ```
/// use netsdr::codec::build_control_item_frame;
/// use netsdr::protocol::{ControlItemCode, MessageType};
///
/// let frame = build_control_item_frame(
///     MessageType::SetControlItem,
///     ControlItemCode::ReceiverState,
///     &[0x80, 0x02, 0x01, 0x01],
/// ).unwrap();
/// assert_eq!(&frame[..], &[0x08, 0x00, 0x18, 0x00, 0x80, 0x02, 0x01, 0x01]);
/// ```
pub fn build_control_item_frame(
    msg_type: MessageType,
    item_code: ControlItemCode,
    params: &[u8],
) -> Result<Bytes> {
    if !msg_type.is_control() {
        return Err(Error::InvalidParameter(format!(
            "{:?} is not a control message type",
            msg_type
        )));
    }

    let total = HEADER_LEN + FIELD_LEN + params.len();
    if total > MAX_LENGTH_FIELD {
        return Err(Error::InvalidParameter(format!(
            "control item frame length {} exceeds {}",
            total, MAX_LENGTH_FIELD
        )));
    }

    let mut buf = BytesMut::with_capacity(total);
    buf.put_u16_le(frame::encode_header(msg_type.bits(), total as u16));
    buf.put_i16_le(item_code.raw());
    buf.put_slice(params);
    Ok(buf.freeze())
}

/// Build a data-item frame.
///
/// No sequence number is inserted: by convention the caller places it in
/// the first two bytes of `params`. A frame of exactly 8194 bytes is
/// encoded with the sentinel length field `0`; 8192, 8193, and anything
/// above 8194 bytes cannot be encoded.
pub fn build_data_item_frame(msg_type: MessageType, params: &[u8]) -> Result<Bytes> {
    if !msg_type.is_data() {
        return Err(Error::InvalidParameter(format!(
            "{:?} is not a data item message type",
            msg_type
        )));
    }

    let total = HEADER_LEN + params.len();
    let length_field = if total == MAX_FRAME_LEN {
        SENTINEL_LENGTH
    } else if total <= MAX_LENGTH_FIELD {
        total as u16
    } else {
        return Err(Error::InvalidParameter(format!(
            "data item frame length {} is neither <= {} nor exactly {}",
            total, MAX_LENGTH_FIELD, MAX_FRAME_LEN
        )));
    };

    let mut buf = BytesMut::with_capacity(total);
    buf.put_u16_le(frame::encode_header(msg_type.bits(), length_field));
    buf.put_slice(params);
    Ok(buf.freeze())
}

/// Parse a received frame.
///
/// Copies the body out of `data`; use [`parse_frame_bytes`] to slice an
/// owned buffer without copying.
pub fn parse_frame(data: &[u8]) -> std::result::Result<Frame, ParseFailure> {
    parse_frame_bytes(Bytes::copy_from_slice(data))
}

/// Parse a received frame held in an owned buffer.
///
/// A length field of `0` means the frame's true length is however many
/// bytes were received. Any other length field must equal `data.len()`.
pub fn parse_frame_bytes(data: Bytes) -> std::result::Result<Frame, ParseFailure> {
    let len = data.len();
    let Some(raw_header) = frame::read_header(&data) else {
        return Err(ParseFailure::Truncated {
            len,
            msg_type: None,
        });
    };

    let (type_bits, declared) = frame::decode_header(raw_header);
    let msg_type = MessageType::from_bits(type_bits);

    if len < HEADER_LEN + FIELD_LEN {
        return Err(ParseFailure::Truncated {
            len,
            msg_type: Some(msg_type),
        });
    }

    let length_ok = declared == SENTINEL_LENGTH || declared as usize == len;
    let field = u16::from_le_bytes([data[2], data[3]]);
    let body = data.slice(HEADER_LEN + FIELD_LEN..);

    let (item_code, sequence) = if msg_type.is_control() {
        (ControlItemCode::from_raw(field as i16), 0)
    } else {
        (None, field)
    };

    let decoded = Frame {
        msg_type,
        item_code,
        sequence,
        body,
    };

    if !length_ok {
        return Err(ParseFailure::LengthMismatch {
            declared,
            actual: len,
            partial: decoded,
        });
    }

    if msg_type.is_control() && item_code.is_none() {
        return Err(ParseFailure::UnknownItemCode {
            code: field,
            partial: decoded,
        });
    }

    Ok(decoded)
}

/// Lazy iterator over fixed-width little-endian samples.
///
/// Produced by [`decode_samples`]. Cloning restarts from the same position,
/// so a fresh pass over the body is always available.
#[derive(Debug, Clone)]
pub struct Samples<'a> {
    chunks: ChunksExact<'a, u8>,
}

impl Iterator for Samples<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let chunk = self.chunks.next()?;
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        Some(u32::from_le_bytes(word))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.chunks.size_hint()
    }
}

impl ExactSizeIterator for Samples<'_> {}

/// Interpret `body` as a sequence of `sample_bits`-wide unsigned samples.
///
/// Each sample occupies `ceil(sample_bits / 8)` bytes, little-endian. A
/// trailing partial sample is dropped silently. Widths outside `1..=32`
/// return [`Error::OutOfRange`].
///
/// # Example
///
/// ```
/// use netsdr::codec::decode_samples;
///
/// let samples: Vec<u32> = decode_samples(16, &[1, 0, 2, 0, 3]).unwrap().collect();
/// assert_eq!(samples, vec![1, 2]);
/// ```
pub fn decode_samples(sample_bits: u16, body: &[u8]) -> Result<Samples<'_>> {
    if sample_bits == 0 || sample_bits > MAX_SAMPLE_BITS {
        return Err(Error::OutOfRange(format!(
            "sample width {} bits, expected 1..={}",
            sample_bits, MAX_SAMPLE_BITS
        )));
    }

    let width = (sample_bits as usize).div_ceil(8);
    Ok(Samples {
        chunks: body.chunks_exact(width),
    })
}
