//! IEC 60870-5-104 Cause of Transmission (COT).
//!
//! The cause of transmission defines the reason for sending an ASDU. Replies
//! from the outstation reuse the request ASDU with only the cause (and the
//! P/N bit) changed.

use crate::error::{Iec104Error, Result};

/// Cause of Transmission (COT).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Cot {
    /// Periodic, cyclic (1)
    Periodic = 1,
    /// Background scan (2)
    Background = 2,
    /// Spontaneous (3)
    Spontaneous = 3,
    /// Initialized (4)
    Initialized = 4,
    /// Request or requested (5)
    Request = 5,
    /// Activation (6)
    Activation = 6,
    /// Activation confirmation (7)
    ActivationCon = 7,
    /// Deactivation (8)
    Deactivation = 8,
    /// Deactivation confirmation (9)
    DeactivationCon = 9,
    /// Activation termination (10)
    ActivationTerm = 10,
    /// Return information caused by a remote command (11)
    ReturnRemoteCommand = 11,
    /// Return information caused by a local command (12)
    ReturnLocalCommand = 12,
    /// File transfer (13)
    FileTransfer = 13,
    /// Interrogated by station interrogation (20)
    InterrogatedByStation = 20,
    /// Interrogated by group 1 interrogation (21)
    InterrogatedByGroup1 = 21,
    /// Interrogated by group 2 interrogation (22)
    InterrogatedByGroup2 = 22,
    /// Interrogated by group 3 interrogation (23)
    InterrogatedByGroup3 = 23,
    /// Interrogated by group 4 interrogation (24)
    InterrogatedByGroup4 = 24,
    /// Interrogated by group 5 interrogation (25)
    InterrogatedByGroup5 = 25,
    /// Interrogated by group 6 interrogation (26)
    InterrogatedByGroup6 = 26,
    /// Interrogated by group 7 interrogation (27)
    InterrogatedByGroup7 = 27,
    /// Interrogated by group 8 interrogation (28)
    InterrogatedByGroup8 = 28,
    /// Interrogated by group 9 interrogation (29)
    InterrogatedByGroup9 = 29,
    /// Interrogated by group 10 interrogation (30)
    InterrogatedByGroup10 = 30,
    /// Interrogated by group 11 interrogation (31)
    InterrogatedByGroup11 = 31,
    /// Interrogated by group 12 interrogation (32)
    InterrogatedByGroup12 = 32,
    /// Interrogated by group 13 interrogation (33)
    InterrogatedByGroup13 = 33,
    /// Interrogated by group 14 interrogation (34)
    InterrogatedByGroup14 = 34,
    /// Interrogated by group 15 interrogation (35)
    InterrogatedByGroup15 = 35,
    /// Interrogated by group 16 interrogation (36)
    InterrogatedByGroup16 = 36,
    /// Requested by general counter request (37)
    RequestedByGeneralCounter = 37,
    /// Requested by group 1 counter request (38)
    RequestedByGroup1Counter = 38,
    /// Requested by group 2 counter request (39)
    RequestedByGroup2Counter = 39,
    /// Requested by group 3 counter request (40)
    RequestedByGroup3Counter = 40,
    /// Requested by group 4 counter request (41)
    RequestedByGroup4Counter = 41,
    /// Unknown type identification (44)
    UnknownTypeId = 44,
    /// Unknown cause of transmission (45)
    UnknownCot = 45,
    /// Unknown common address of ASDU (46)
    UnknownCommonAddress = 46,
    /// Unknown information object address (47)
    UnknownIoa = 47,
}

/// Station interrogation qualifier (QOI 20).
pub const QOI_STATION: u8 = 20;

/// General counter request qualifier (QCC request bits = 5).
pub const QCC_GENERAL: u8 = 5;

impl Cot {
    /// Convert to raw byte value.
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Cause used for data answering an interrogation with qualifier `qoi`.
    ///
    /// The QOI values 20..=36 map one-to-one onto the interrogated-by causes.
    pub fn for_interrogation(qoi: u8) -> Option<Self> {
        match qoi {
            20..=36 => Self::try_from(qoi).ok(),
            _ => None,
        }
    }

    /// Check if this is one of the error causes (44..=47).
    #[inline]
    pub const fn is_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownTypeId | Self::UnknownCot | Self::UnknownCommonAddress | Self::UnknownIoa
        )
    }

    /// Check if this cause answers an interrogation.
    #[inline]
    pub const fn is_interrogation_response(&self) -> bool {
        matches!(self.as_u8(), 20..=36)
    }
}

impl TryFrom<u8> for Cot {
    type Error = Iec104Error;

    /// Parse from the lower 6 bits of the COT octet.
    fn try_from(value: u8) -> Result<Self> {
        let cause = value & 0x3F;
        let cot = match cause {
            1 => Self::Periodic,
            2 => Self::Background,
            3 => Self::Spontaneous,
            4 => Self::Initialized,
            5 => Self::Request,
            6 => Self::Activation,
            7 => Self::ActivationCon,
            8 => Self::Deactivation,
            9 => Self::DeactivationCon,
            10 => Self::ActivationTerm,
            11 => Self::ReturnRemoteCommand,
            12 => Self::ReturnLocalCommand,
            13 => Self::FileTransfer,
            20 => Self::InterrogatedByStation,
            21 => Self::InterrogatedByGroup1,
            22 => Self::InterrogatedByGroup2,
            23 => Self::InterrogatedByGroup3,
            24 => Self::InterrogatedByGroup4,
            25 => Self::InterrogatedByGroup5,
            26 => Self::InterrogatedByGroup6,
            27 => Self::InterrogatedByGroup7,
            28 => Self::InterrogatedByGroup8,
            29 => Self::InterrogatedByGroup9,
            30 => Self::InterrogatedByGroup10,
            31 => Self::InterrogatedByGroup11,
            32 => Self::InterrogatedByGroup12,
            33 => Self::InterrogatedByGroup13,
            34 => Self::InterrogatedByGroup14,
            35 => Self::InterrogatedByGroup15,
            36 => Self::InterrogatedByGroup16,
            37 => Self::RequestedByGeneralCounter,
            38 => Self::RequestedByGroup1Counter,
            39 => Self::RequestedByGroup2Counter,
            40 => Self::RequestedByGroup3Counter,
            41 => Self::RequestedByGroup4Counter,
            44 => Self::UnknownTypeId,
            45 => Self::UnknownCot,
            46 => Self::UnknownCommonAddress,
            47 => Self::UnknownIoa,
            _ => return Err(Iec104Error::UnknownCot(cause)),
        };
        Ok(cot)
    }
}

impl std::fmt::Display for Cot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Periodic => f.write_str("PERIODIC"),
            Self::Background => f.write_str("BACKGROUND_SCAN"),
            Self::Spontaneous => f.write_str("SPONTANEOUS"),
            Self::Initialized => f.write_str("INITIALIZED"),
            Self::Request => f.write_str("REQUEST"),
            Self::Activation => f.write_str("ACTIVATION"),
            Self::ActivationCon => f.write_str("ACTIVATION_CON"),
            Self::Deactivation => f.write_str("DEACTIVATION"),
            Self::DeactivationCon => f.write_str("DEACTIVATION_CON"),
            Self::ActivationTerm => f.write_str("ACTIVATION_TERM"),
            Self::ReturnRemoteCommand => f.write_str("RETURN_INFO_REMOTE"),
            Self::ReturnLocalCommand => f.write_str("RETURN_INFO_LOCAL"),
            Self::FileTransfer => f.write_str("FILE_TRANSFER"),
            Self::InterrogatedByStation => f.write_str("INTERROGATED_BY_STATION"),
            Self::RequestedByGeneralCounter => f.write_str("REQUESTED_BY_GENERAL_COUNTER"),
            Self::UnknownTypeId => f.write_str("UNKNOWN_TYPE_ID"),
            Self::UnknownCot => f.write_str("UNKNOWN_CAUSE_OF_TRANSMISSION"),
            Self::UnknownCommonAddress => f.write_str("UNKNOWN_COMMON_ADDRESS"),
            Self::UnknownIoa => f.write_str("UNKNOWN_INFORMATION_OBJECT_ADDRESS"),
            other if other.is_interrogation_response() => {
                write!(f, "INTERROGATED_BY_GROUP_{}", other.as_u8() - 20)
            }
            other => write!(f, "REQUESTED_BY_GROUP_{}_COUNTER", other.as_u8() - 37),
        }
    }
}
