//! IEC 60870-5-104 Type Identification.
//!
//! Only the types this outstation can encode and decode are listed. Any other
//! identifier received from a master is answered with `UnknownTypeId`.

use crate::error::{Iec104Error, Result};

/// IEC 60870-5-104 Type Identification.
///
/// Defines the type of information contained in an ASDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeId {
    // ============================================
    // Process information in monitoring direction
    // ============================================
    /// Single-point information (M_SP_NA_1)
    SinglePoint = 1,

    /// Measured value, scaled (M_ME_NB_1)
    MeasuredScaled = 11,

    /// Measured value, short floating point (M_ME_NC_1)
    MeasuredFloat = 13,

    /// Integrated totals (M_IT_NA_1)
    IntegratedTotals = 15,

    /// Single-point information with time tag CP56Time2a (M_SP_TB_1)
    SinglePointTime56 = 30,

    /// Integrated totals with time tag CP56Time2a (M_IT_TB_1)
    IntegratedTotalsTime56 = 37,

    // ============================================
    // Process information in control direction
    // ============================================
    /// Single command (C_SC_NA_1)
    SingleCommand = 45,

    // ============================================
    // System information in control direction
    // ============================================
    /// Interrogation command (C_IC_NA_1)
    InterrogationCommand = 100,

    /// Counter interrogation command (C_CI_NA_1)
    CounterInterrogation = 101,

    /// Read command (C_RD_NA_1)
    ReadCommand = 102,

    /// Clock synchronization command (C_CS_NA_1)
    ClockSync = 103,
}

impl TypeId {
    /// Convert to raw byte value.
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Encoded size of one information element, IOA excluded.
    #[inline]
    pub const fn element_size(&self) -> usize {
        match self {
            Self::SinglePoint => 1,
            Self::MeasuredScaled => 3,
            Self::MeasuredFloat => 5,
            Self::IntegratedTotals => 5,
            Self::SinglePointTime56 => 1 + 7,
            Self::IntegratedTotalsTime56 => 5 + 7,
            Self::SingleCommand => 1,
            Self::InterrogationCommand => 1,
            Self::CounterInterrogation => 1,
            Self::ReadCommand => 0,
            Self::ClockSync => 7,
        }
    }

    /// Get the IEC standard name (e.g., "M_SP_NA_1").
    #[inline]
    pub const fn standard_name(&self) -> &'static str {
        match self {
            Self::SinglePoint => "M_SP_NA_1",
            Self::MeasuredScaled => "M_ME_NB_1",
            Self::MeasuredFloat => "M_ME_NC_1",
            Self::IntegratedTotals => "M_IT_NA_1",
            Self::SinglePointTime56 => "M_SP_TB_1",
            Self::IntegratedTotalsTime56 => "M_IT_TB_1",
            Self::SingleCommand => "C_SC_NA_1",
            Self::InterrogationCommand => "C_IC_NA_1",
            Self::CounterInterrogation => "C_CI_NA_1",
            Self::ReadCommand => "C_RD_NA_1",
            Self::ClockSync => "C_CS_NA_1",
        }
    }
}

impl TryFrom<u8> for TypeId {
    type Error = Iec104Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::SinglePoint),
            11 => Ok(Self::MeasuredScaled),
            13 => Ok(Self::MeasuredFloat),
            15 => Ok(Self::IntegratedTotals),
            30 => Ok(Self::SinglePointTime56),
            37 => Ok(Self::IntegratedTotalsTime56),
            45 => Ok(Self::SingleCommand),
            100 => Ok(Self::InterrogationCommand),
            101 => Ok(Self::CounterInterrogation),
            102 => Ok(Self::ReadCommand),
            103 => Ok(Self::ClockSync),
            _ => Err(Iec104Error::UnknownTypeId(value)),
        }
    }
}

impl std::fmt::Display for TypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.standard_name())
    }
}
