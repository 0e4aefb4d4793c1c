//! NetSDR message types, control item codes, and fixed command parameters.

/// The 3-bit message type tag carried in every frame header.
///
/// Values `0..=3` are control categories: the frame carries a 16-bit item
/// code after the header. Values `4..=7` are data items: the frame carries a
/// 16-bit sequence number after the header instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Host request to set a control item.
    SetControlItem = 0,
    /// Request for (or report of) a control item's current value.
    CurrentControlItem = 1,
    /// Request for a control item's permitted range.
    ControlItemRange = 2,
    /// Acknowledgement.
    Ack = 3,
    /// Data item, sub-channel 0.
    DataItem0 = 4,
    /// Data item, sub-channel 1.
    DataItem1 = 5,
    /// Data item, sub-channel 2.
    DataItem2 = 6,
    /// Data item, sub-channel 3.
    DataItem3 = 7,
}

impl MessageType {
    /// Decode the 3-bit tag. Every value in `0..=7` is a valid type.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0 => MessageType::SetControlItem,
            1 => MessageType::CurrentControlItem,
            2 => MessageType::ControlItemRange,
            3 => MessageType::Ack,
            4 => MessageType::DataItem0,
            5 => MessageType::DataItem1,
            6 => MessageType::DataItem2,
            _ => MessageType::DataItem3,
        }
    }

    /// The 3-bit tag value.
    pub fn bits(self) -> u8 {
        self as u8
    }

    /// Whether frames of this type carry an item code.
    pub fn is_control(self) -> bool {
        self.bits() < MessageType::DataItem0.bits()
    }

    /// Whether frames of this type carry a sequence number.
    pub fn is_data(self) -> bool {
        !self.is_control()
    }
}

/// Recognized control item codes.
///
/// Codes outside this set are reported by the codec as `None` rather than
/// rejected outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum ControlItemCode {
    /// Receiver run/idle state and capture mode.
    ReceiverState = 0x0018,
    /// Receiver NCO frequency.
    ReceiverFrequency = 0x0020,
    /// RF input filter selection.
    RfFilter = 0x0044,
    /// A/D converter modes (dither, gain).
    AdModes = 0x008A,
    /// IQ output sample rate.
    IqOutputDataSampleRate = 0x00B8,
}

impl ControlItemCode {
    /// All recognized codes.
    pub const ALL: [ControlItemCode; 5] = [
        ControlItemCode::ReceiverState,
        ControlItemCode::ReceiverFrequency,
        ControlItemCode::RfFilter,
        ControlItemCode::AdModes,
        ControlItemCode::IqOutputDataSampleRate,
    ];

    /// Look up a raw wire code. Returns `None` for unrecognized values.
    pub fn from_raw(raw: i16) -> Option<Self> {
        Self::ALL.into_iter().find(|code| code.raw() == raw)
    }

    /// The raw 16-bit wire value.
    pub fn raw(self) -> i16 {
        self as i16
    }
}

// ---------------------------------------------------------------------------
// Command parameters
// ---------------------------------------------------------------------------

/// Default TCP control port.
pub const DEFAULT_TCP_PORT: u16 = 50000;

/// Default UDP data port.
pub const DEFAULT_UDP_PORT: u16 = 60000;

/// Default IQ output sample rate in samples per second.
pub const DEFAULT_SAMPLE_RATE: u32 = 100_000;

/// Sample width used by the receiver's 16-bit capture mode.
pub const IQ_SAMPLE_BITS: u16 = 16;

/// Largest frequency expressible in the 5-byte frequency field.
pub const MAX_FREQUENCY_HZ: u64 = (1 << 40) - 1;

/// `RfFilter` parameters: channel 0, automatic filter selection.
pub const RF_FILTER_AUTO: [u8; 2] = [0x00, 0x00];

/// `AdModes` parameters: channel 0, dither and gain enabled.
pub const AD_MODES_DITHER_GAIN: [u8; 2] = [0x00, 0x03];

/// `ReceiverState` parameters: complex IQ, run, 16-bit FIFO capture, one block.
pub const RECEIVER_STATE_RUN: [u8; 4] = [0x80, 0x02, 0x01, 0x01];

/// `ReceiverState` parameters: idle.
pub const RECEIVER_STATE_IDLE: [u8; 4] = [0x00, 0x01, 0x00, 0x00];

/// `IqOutputDataSampleRate` parameters: channel 0 followed by the rate.
pub fn sample_rate_params(rate: u32) -> [u8; 5] {
    let r = rate.to_le_bytes();
    [0x00, r[0], r[1], r[2], r[3]]
}

/// `ReceiverFrequency` parameters: channel selector followed by the
/// frequency as a 40-bit little-endian integer.
///
/// The caller must ensure `frequency_hz <= MAX_FREQUENCY_HZ`; higher bits
/// are discarded.
pub fn frequency_params(frequency_hz: u64, channel: u8) -> [u8; 6] {
    let f = frequency_hz.to_le_bytes();
    [channel, f[0], f[1], f[2], f[3], f[4]]
}
