//! Information objects.
//!
//! Every supported object kind is its own struct, and `InformationObject` is
//! the closed sum over them. The variant fixes the type identification, so an
//! object can never drift to another type after construction.

use bytes::{BufMut, BytesMut};

use super::{Cp56Time2a, Ioa, Quality, TypeId};

/// Binary counter reading (BCR) of integrated totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BinaryCounterReading {
    /// Counter value
    pub value: i32,
    /// Sequence number (0-31)
    pub sequence: u8,
    /// Counter overflowed since last reading (CY)
    pub carry: bool,
    /// Counter was adjusted since last reading (CA)
    pub adjusted: bool,
    /// Reading is invalid (IV)
    pub invalid: bool,
}

impl BinaryCounterReading {
    /// Create a reading.
    pub const fn new(value: i32, sequence: u8, carry: bool, adjusted: bool, invalid: bool) -> Self {
        Self {
            value,
            sequence: sequence & 0x1F,
            carry,
            adjusted,
            invalid,
        }
    }

    /// Parse from 5 bytes.
    pub fn from_bytes(bytes: [u8; 5]) -> Self {
        let flags = bytes[4];
        Self {
            value: i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            sequence: flags & 0x1F,
            carry: (flags & 0x20) != 0,
            adjusted: (flags & 0x40) != 0,
            invalid: (flags & 0x80) != 0,
        }
    }

    /// Encode to 5 bytes.
    pub fn to_bytes(&self) -> [u8; 5] {
        let v = self.value.to_le_bytes();
        let mut flags = self.sequence & 0x1F;
        if self.carry {
            flags |= 0x20;
        }
        if self.adjusted {
            flags |= 0x40;
        }
        if self.invalid {
            flags |= 0x80;
        }
        [v[0], v[1], v[2], v[3], flags]
    }
}

/// Single-point information (M_SP_NA_1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinglePointInformation {
    pub ioa: Ioa,
    pub value: bool,
    pub quality: Quality,
}

/// Single-point information with CP56Time2a (M_SP_TB_1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinglePointWithTime {
    pub ioa: Ioa,
    pub value: bool,
    pub quality: Quality,
    pub timestamp: Cp56Time2a,
}

/// Measured value, scaled (M_ME_NB_1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasuredValueScaled {
    pub ioa: Ioa,
    pub value: i16,
    pub quality: Quality,
}

/// Measured value, short floating point (M_ME_NC_1).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasuredValueFloat {
    pub ioa: Ioa,
    pub value: f32,
    pub quality: Quality,
}

/// Integrated totals (M_IT_NA_1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegratedTotals {
    pub ioa: Ioa,
    pub reading: BinaryCounterReading,
}

/// Integrated totals with CP56Time2a (M_IT_TB_1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegratedTotalsWithTime {
    pub ioa: Ioa,
    pub reading: BinaryCounterReading,
    pub timestamp: Cp56Time2a,
}

/// Single command (C_SC_NA_1).
///
/// SCO layout: S/E(7) QU(6..2) reserved(1) SCS(0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SingleCommand {
    pub ioa: Ioa,
    /// Commanded state (SCS)
    pub state: bool,
    /// Select (true) or execute (false)
    pub select: bool,
    /// Qualifier of command (0-31)
    pub qualifier: u8,
}

impl SingleCommand {
    /// Parse from a SCO byte.
    pub fn from_sco(ioa: Ioa, sco: u8) -> Self {
        Self {
            ioa,
            state: (sco & 0x01) != 0,
            select: (sco & 0x80) != 0,
            qualifier: (sco >> 2) & 0x1F,
        }
    }

    /// Encode to a SCO byte.
    pub fn to_sco(&self) -> u8 {
        let mut sco = (self.qualifier & 0x1F) << 2;
        if self.state {
            sco |= 0x01;
        }
        if self.select {
            sco |= 0x80;
        }
        sco
    }
}

/// Interrogation command (C_IC_NA_1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterrogationCommand {
    pub ioa: Ioa,
    /// Qualifier of interrogation (20 = station, 21..=36 = group 1..16)
    pub qoi: u8,
}

/// Counter interrogation command (C_CI_NA_1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterInterrogationCommand {
    pub ioa: Ioa,
    /// Qualifier of counter interrogation: RQT(5..0) FRZ(7..6)
    pub qcc: u8,
}

/// Read command (C_RD_NA_1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadCommand {
    pub ioa: Ioa,
}

/// Clock synchronization command (C_CS_NA_1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSyncCommand {
    pub ioa: Ioa,
    pub time: Cp56Time2a,
}

/// An addressed information object of one of the supported kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum InformationObject {
    SinglePoint(SinglePointInformation),
    SinglePointWithTime(SinglePointWithTime),
    MeasuredScaled(MeasuredValueScaled),
    MeasuredFloat(MeasuredValueFloat),
    IntegratedTotals(IntegratedTotals),
    IntegratedTotalsWithTime(IntegratedTotalsWithTime),
    SingleCommand(SingleCommand),
    Interrogation(InterrogationCommand),
    CounterInterrogation(CounterInterrogationCommand),
    Read(ReadCommand),
    ClockSync(ClockSyncCommand),
}

impl InformationObject {
    /// Type identification implied by the variant.
    pub const fn type_id(&self) -> TypeId {
        match self {
            Self::SinglePoint(_) => TypeId::SinglePoint,
            Self::SinglePointWithTime(_) => TypeId::SinglePointTime56,
            Self::MeasuredScaled(_) => TypeId::MeasuredScaled,
            Self::MeasuredFloat(_) => TypeId::MeasuredFloat,
            Self::IntegratedTotals(_) => TypeId::IntegratedTotals,
            Self::IntegratedTotalsWithTime(_) => TypeId::IntegratedTotalsTime56,
            Self::SingleCommand(_) => TypeId::SingleCommand,
            Self::Interrogation(_) => TypeId::InterrogationCommand,
            Self::CounterInterrogation(_) => TypeId::CounterInterrogation,
            Self::Read(_) => TypeId::ReadCommand,
            Self::ClockSync(_) => TypeId::ClockSync,
        }
    }

    /// Information object address.
    pub const fn ioa(&self) -> Ioa {
        match self {
            Self::SinglePoint(o) => o.ioa,
            Self::SinglePointWithTime(o) => o.ioa,
            Self::MeasuredScaled(o) => o.ioa,
            Self::MeasuredFloat(o) => o.ioa,
            Self::IntegratedTotals(o) => o.ioa,
            Self::IntegratedTotalsWithTime(o) => o.ioa,
            Self::SingleCommand(o) => o.ioa,
            Self::Interrogation(o) => o.ioa,
            Self::CounterInterrogation(o) => o.ioa,
            Self::Read(o) => o.ioa,
            Self::ClockSync(o) => o.ioa,
        }
    }

    /// Re-address the object, e.g. when reusing one as a template.
    pub fn set_ioa(&mut self, ioa: Ioa) {
        let slot = match self {
            Self::SinglePoint(o) => &mut o.ioa,
            Self::SinglePointWithTime(o) => &mut o.ioa,
            Self::MeasuredScaled(o) => &mut o.ioa,
            Self::MeasuredFloat(o) => &mut o.ioa,
            Self::IntegratedTotals(o) => &mut o.ioa,
            Self::IntegratedTotalsWithTime(o) => &mut o.ioa,
            Self::SingleCommand(o) => &mut o.ioa,
            Self::Interrogation(o) => &mut o.ioa,
            Self::CounterInterrogation(o) => &mut o.ioa,
            Self::Read(o) => &mut o.ioa,
            Self::ClockSync(o) => &mut o.ioa,
        };
        *slot = ioa;
    }

    /// Builder form of [`set_ioa`](Self::set_ioa).
    pub fn with_ioa(mut self, ioa: Ioa) -> Self {
        self.set_ioa(ioa);
        self
    }

    /// Quality flags, for monitored kinds.
    pub fn quality(&self) -> Option<Quality> {
        match self {
            Self::SinglePoint(o) => Some(o.quality),
            Self::SinglePointWithTime(o) => Some(o.quality),
            Self::MeasuredScaled(o) => Some(o.quality),
            Self::MeasuredFloat(o) => Some(o.quality),
            Self::IntegratedTotals(o) => Some(Quality::GOOD.set_invalid(o.reading.invalid)),
            Self::IntegratedTotalsWithTime(o) => {
                Some(Quality::GOOD.set_invalid(o.reading.invalid))
            }
            _ => None,
        }
    }

    /// Time tag, for time-tagged kinds.
    pub fn timestamp(&self) -> Option<&Cp56Time2a> {
        match self {
            Self::SinglePointWithTime(o) => Some(&o.timestamp),
            Self::IntegratedTotalsWithTime(o) => Some(&o.timestamp),
            Self::ClockSync(o) => Some(&o.time),
            _ => None,
        }
    }

    /// This object with every field cut down to what its wire element can
    /// hold, so that decoding the encoded element yields it unchanged.
    pub fn into_encodable(self) -> Self {
        match self {
            Self::SinglePoint(mut o) => {
                o.quality = o.quality.for_siq();
                Self::SinglePoint(o)
            }
            Self::SinglePointWithTime(mut o) => {
                o.quality = o.quality.for_siq();
                Self::SinglePointWithTime(o)
            }
            Self::IntegratedTotals(mut o) => {
                o.reading.sequence &= 0x1F;
                Self::IntegratedTotals(o)
            }
            Self::IntegratedTotalsWithTime(mut o) => {
                o.reading.sequence &= 0x1F;
                Self::IntegratedTotalsWithTime(o)
            }
            Self::SingleCommand(mut o) => {
                o.qualifier &= 0x1F;
                Self::SingleCommand(o)
            }
            other => other,
        }
    }

    /// Encoded size of the information element, IOA excluded.
    #[inline]
    pub const fn element_size(&self) -> usize {
        self.type_id().element_size()
    }

    /// Append the information element (without IOA) to `buf`.
    pub fn encode_element(&self, buf: &mut BytesMut) {
        match self {
            Self::SinglePoint(o) => buf.put_u8(o.quality.to_siq() | o.value as u8),
            Self::SinglePointWithTime(o) => {
                buf.put_u8(o.quality.to_siq() | o.value as u8);
                buf.put_slice(&o.timestamp.to_bytes());
            }
            Self::MeasuredScaled(o) => {
                buf.put_i16_le(o.value);
                buf.put_u8(o.quality.to_qds());
            }
            Self::MeasuredFloat(o) => {
                buf.put_f32_le(o.value);
                buf.put_u8(o.quality.to_qds());
            }
            Self::IntegratedTotals(o) => buf.put_slice(&o.reading.to_bytes()),
            Self::IntegratedTotalsWithTime(o) => {
                buf.put_slice(&o.reading.to_bytes());
                buf.put_slice(&o.timestamp.to_bytes());
            }
            Self::SingleCommand(o) => buf.put_u8(o.to_sco()),
            Self::Interrogation(o) => buf.put_u8(o.qoi),
            Self::CounterInterrogation(o) => buf.put_u8(o.qcc),
            Self::Read(_) => {}
            Self::ClockSync(o) => buf.put_slice(&o.time.to_bytes()),
        }
    }
}

macro_rules! impl_from_object {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for InformationObject {
                fn from(object: $ty) -> Self {
                    Self::$variant(object)
                }
            }
        )*
    };
}

impl_from_object! {
    SinglePoint => SinglePointInformation,
    SinglePointWithTime => SinglePointWithTime,
    MeasuredScaled => MeasuredValueScaled,
    MeasuredFloat => MeasuredValueFloat,
    IntegratedTotals => IntegratedTotals,
    IntegratedTotalsWithTime => IntegratedTotalsWithTime,
    SingleCommand => SingleCommand,
    Interrogation => InterrogationCommand,
    CounterInterrogation => CounterInterrogationCommand,
    Read => ReadCommand,
    ClockSync => ClockSyncCommand,
}
