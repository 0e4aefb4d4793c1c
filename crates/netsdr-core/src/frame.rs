//! Wire header primitives shared by the codec and the stream transports.
//!
//! Every NetSDR frame starts with a 16-bit little-endian header:
//!
//! ```text
//!  15  14  13  12                                 0
//! +-----------+-----------------------------------+
//! |   type    |            length field           |
//! +-----------+-----------------------------------+
//! ```
//!
//! The length field counts the whole frame, header included. It can express
//! at most 8191 bytes; the one larger frame the protocol allows (a data item
//! with an 8192-byte body, 8194 bytes total) is sent with a length field of
//! `0`.

/// Size of the frame header in bytes.
pub const HEADER_LEN: usize = 2;

/// Bit position of the 3-bit message type inside the header.
pub const TYPE_SHIFT: u32 = 13;

/// Mask selecting the 13-bit length field.
pub const LENGTH_MASK: u16 = 0x1FFF;

/// Largest total frame length expressible in the length field.
pub const MAX_LENGTH_FIELD: usize = LENGTH_MASK as usize;

/// Largest frame the protocol carries: 2-byte header plus 8192-byte body.
///
/// Frames of exactly this size are encoded with a length field of `0`.
pub const MAX_FRAME_LEN: usize = HEADER_LEN + 8192;

/// Length field value reserved for a [`MAX_FRAME_LEN`] frame.
pub const SENTINEL_LENGTH: u16 = 0;

/// Pack a 3-bit type tag and a 13-bit length field into a header word.
///
/// Bits above the field widths are discarded.
pub fn encode_header(type_bits: u8, length_field: u16) -> u16 {
    (length_field & LENGTH_MASK) | (((type_bits & 0x07) as u16) << TYPE_SHIFT)
}

/// Split a header word into its 3-bit type tag and 13-bit length field.
pub fn decode_header(raw: u16) -> (u8, u16) {
    ((raw >> TYPE_SHIFT) as u8, raw & LENGTH_MASK)
}

/// Read the little-endian header word from the start of `data`.
///
/// Returns `None` if fewer than [`HEADER_LEN`] bytes are available.
pub fn read_header(data: &[u8]) -> Option<u16> {
    match data {
        [lo, hi, ..] => Some(u16::from_le_bytes([*lo, *hi])),
        _ => None,
    }
}

/// Total frame length announced by a length field.
///
/// The sentinel `0` stands for [`MAX_FRAME_LEN`]. Stream transports use
/// this to know how many bytes to collect before a frame is complete.
pub fn announced_len(length_field: u16) -> usize {
    if length_field == SENTINEL_LENGTH {
        MAX_FRAME_LEN
    } else {
        length_field as usize
    }
}
