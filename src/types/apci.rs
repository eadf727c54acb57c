//! IEC 60870-5-104 APCI (Application Protocol Control Information).
//!
//! APCI is the 6-byte header of an APDU, containing frame type and sequence numbers.

use crate::error::{Iec104Error, Result};

/// Start byte for IEC 104 frames.
pub const START_BYTE: u8 = 0x68;

/// Minimum APDU length (APCI only, no ASDU).
pub const MIN_APDU_LENGTH: usize = 4;

/// Maximum APDU length.
pub const MAX_APDU_LENGTH: usize = 253;

/// Sequence numbers are 15 bits wide and wrap at this value.
pub const SEQ_MODULO: u16 = 32768;

/// Next sequence number after `seq`.
#[inline]
pub const fn seq_next(seq: u16) -> u16 {
    (seq + 1) % SEQ_MODULO
}

/// Number of frames from `from` up to (excluding) `to`, modulo 2^15.
#[inline]
pub const fn seq_distance(from: u16, to: u16) -> u16 {
    (to + SEQ_MODULO - from) % SEQ_MODULO
}

/// U-frame function codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UFunction {
    /// STARTDT act (Start Data Transfer activation)
    StartDtAct,
    /// STARTDT con (Start Data Transfer confirmation)
    StartDtCon,
    /// STOPDT act (Stop Data Transfer activation)
    StopDtAct,
    /// STOPDT con (Stop Data Transfer confirmation)
    StopDtCon,
    /// TESTFR act (Test Frame activation)
    TestFrAct,
    /// TESTFR con (Test Frame confirmation)
    TestFrCon,
}

impl UFunction {
    /// Get the control field byte for this U-function.
    #[inline]
    pub const fn control_byte(&self) -> u8 {
        match self {
            Self::StartDtAct => 0x07, // 0000 0111
            Self::StartDtCon => 0x0B, // 0000 1011
            Self::StopDtAct => 0x13,  // 0001 0011
            Self::StopDtCon => 0x23,  // 0010 0011
            Self::TestFrAct => 0x43,  // 0100 0011
            Self::TestFrCon => 0x83,  // 1000 0011
        }
    }

    /// Parse U-function from control byte.
    #[inline]
    pub fn from_control_byte(byte: u8) -> Result<Self> {
        match byte {
            0x07 => Ok(Self::StartDtAct),
            0x0B => Ok(Self::StartDtCon),
            0x13 => Ok(Self::StopDtAct),
            0x23 => Ok(Self::StopDtCon),
            0x43 => Ok(Self::TestFrAct),
            0x83 => Ok(Self::TestFrCon),
            _ => Err(Iec104Error::invalid_frame(format!(
                "Unknown U-frame function 0x{:02X}",
                byte
            ))),
        }
    }

    /// Confirmation the outstation answers an activation with.
    #[inline]
    pub const fn confirmation(&self) -> Option<Self> {
        match self {
            Self::StartDtAct => Some(Self::StartDtCon),
            Self::StopDtAct => Some(Self::StopDtCon),
            Self::TestFrAct => Some(Self::TestFrCon),
            _ => None,
        }
    }
}

/// APCI (Application Protocol Control Information).
///
/// The 6-byte header of an IEC 104 APDU.
///
/// ```text
/// +--------+--------+--------+--------+--------+--------+
/// | 0x68   | Length | CF1    | CF2    | CF3    | CF4    |
/// +--------+--------+--------+--------+--------+--------+
///   Start    APDU     Control Field (4 bytes)
///   Byte     Length
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Apci {
    /// I-frame with send and receive sequence numbers.
    IFrame {
        /// Send sequence number (0-32767)
        send_seq: u16,
        /// Receive sequence number (0-32767)
        recv_seq: u16,
    },
    /// S-frame with receive sequence number only.
    SFrame {
        /// Receive sequence number (0-32767)
        recv_seq: u16,
    },
    /// U-frame with function code.
    UFrame {
        /// U-frame function
        function: UFunction,
    },
}

impl Apci {
    /// Create a new I-frame APCI.
    #[inline]
    pub fn i_frame(send_seq: u16, recv_seq: u16) -> Self {
        Self::IFrame { send_seq, recv_seq }
    }

    /// Create a new S-frame APCI.
    #[inline]
    pub fn s_frame(recv_seq: u16) -> Self {
        Self::SFrame { recv_seq }
    }

    /// Create a new U-frame APCI.
    #[inline]
    pub fn u_frame(function: UFunction) -> Self {
        Self::UFrame { function }
    }

    /// Parse APCI from the 4 control field bytes (not the full 6-byte APCI).
    #[inline]
    pub fn parse(control: &[u8]) -> Result<Self> {
        if control.len() < 4 {
            return Err(Iec104Error::invalid_frame("Control field too short"));
        }

        let cf1 = control[0];
        let recv_seq = ((control[3] as u16) << 7) | ((control[2] >> 1) as u16);

        if cf1 & 0x01 == 0 {
            // I-frame: bit 0 = 0
            let send_seq = ((control[1] as u16) << 7) | ((cf1 >> 1) as u16);
            Ok(Self::IFrame { send_seq, recv_seq })
        } else if cf1 & 0x03 == 0x01 {
            // S-frame: bits 0-1 = 01
            Ok(Self::SFrame { recv_seq })
        } else {
            // U-frame: bits 0-1 = 11
            let function = UFunction::from_control_byte(cf1)?;
            Ok(Self::UFrame { function })
        }
    }

    /// Encode APCI to 4 bytes of control field.
    #[inline]
    pub fn encode(&self) -> [u8; 4] {
        match self {
            Self::IFrame { send_seq, recv_seq } => {
                let cf1 = ((send_seq & 0x7F) << 1) as u8;
                let cf2 = (send_seq >> 7) as u8;
                let cf3 = ((recv_seq & 0x7F) << 1) as u8;
                let cf4 = (recv_seq >> 7) as u8;
                [cf1, cf2, cf3, cf4]
            }
            Self::SFrame { recv_seq } => {
                let cf3 = ((recv_seq & 0x7F) << 1) as u8;
                let cf4 = (recv_seq >> 7) as u8;
                [0x01, 0x00, cf3, cf4]
            }
            Self::UFrame { function } => [function.control_byte(), 0x00, 0x00, 0x00],
        }
    }

    /// Encode full APDU header (6 bytes: start + length + control).
    ///
    /// `asdu_len` is the length of the ASDU that follows (0 for S-frame and U-frame).
    #[inline]
    pub fn encode_header(&self, asdu_len: usize) -> [u8; 6] {
        let control = self.encode();
        let apdu_len = (MIN_APDU_LENGTH + asdu_len) as u8;
        [
            START_BYTE, apdu_len, control[0], control[1], control[2], control[3],
        ]
    }

    /// Check if this is an I-frame.
    #[inline]
    pub fn is_i_frame(&self) -> bool {
        matches!(self, Self::IFrame { .. })
    }
}

impl std::fmt::Display for Apci {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IFrame { send_seq, recv_seq } => {
                write!(f, "I(S={}, R={})", send_seq, recv_seq)
            }
            Self::SFrame { recv_seq } => {
                write!(f, "S(R={})", recv_seq)
            }
            Self::UFrame { function } => {
                let name = match function {
                    UFunction::StartDtAct => "STARTDT act",
                    UFunction::StartDtCon => "STARTDT con",
                    UFunction::StopDtAct => "STOPDT act",
                    UFunction::StopDtCon => "STOPDT con",
                    UFunction::TestFrAct => "TESTFR act",
                    UFunction::TestFrCon => "TESTFR con",
                };
                write!(f, "U({})", name)
            }
        }
    }
}
