//! Quality descriptors for monitored information objects.

/// Quality flags of a monitored value.
///
/// Packed into a single byte in the QDS wire layout, so encoding is a copy:
/// - Bit 0: overflow (OV)
/// - Bit 4: blocked (BL)
/// - Bit 5: substituted (SB)
/// - Bit 6: not topical (NT)
/// - Bit 7: invalid (IV)
///
/// SIQ (single-point) uses the same upper nibble but has no overflow bit.
/// Single-point objects get OV cleared when they are added to an ASDU or
/// stored in a process image, see [`Quality::for_siq`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct Quality(u8);

impl Quality {
    const OV_MASK: u8 = 0b0000_0001;
    const BL_MASK: u8 = 0b0001_0000;
    const SB_MASK: u8 = 0b0010_0000;
    const NT_MASK: u8 = 0b0100_0000;
    const IV_MASK: u8 = 0b1000_0000;
    const QDS_MASK: u8 = 0b1111_0001;
    const SIQ_MASK: u8 = 0b1111_0000;

    /// Good quality (no flags set).
    pub const GOOD: Self = Self(0);

    /// Invalid quality.
    pub const INVALID: Self = Self(Self::IV_MASK);

    #[inline(always)]
    const fn with_flag(self, mask: u8, value: bool) -> Self {
        if value {
            Self(self.0 | mask)
        } else {
            Self(self.0 & !mask)
        }
    }

    /// Overflow (OV) - value exceeds predefined range
    #[inline(always)]
    pub const fn overflow(&self) -> bool {
        (self.0 & Self::OV_MASK) != 0
    }

    /// Set overflow flag
    #[inline(always)]
    pub const fn set_overflow(self, value: bool) -> Self {
        self.with_flag(Self::OV_MASK, value)
    }

    /// Blocked (BL) - value is blocked for transmission
    #[inline(always)]
    pub const fn blocked(&self) -> bool {
        (self.0 & Self::BL_MASK) != 0
    }

    /// Set blocked flag
    #[inline(always)]
    pub const fn set_blocked(self, value: bool) -> Self {
        self.with_flag(Self::BL_MASK, value)
    }

    /// Substituted (SB) - value provided by an operator or automatic source
    #[inline(always)]
    pub const fn substituted(&self) -> bool {
        (self.0 & Self::SB_MASK) != 0
    }

    /// Set substituted flag
    #[inline(always)]
    pub const fn set_substituted(self, value: bool) -> Self {
        self.with_flag(Self::SB_MASK, value)
    }

    /// Not topical (NT) - last update is outdated
    #[inline(always)]
    pub const fn not_topical(&self) -> bool {
        (self.0 & Self::NT_MASK) != 0
    }

    /// Set not_topical flag
    #[inline(always)]
    pub const fn set_not_topical(self, value: bool) -> Self {
        self.with_flag(Self::NT_MASK, value)
    }

    /// Invalid (IV) - value is invalid
    #[inline(always)]
    pub const fn invalid(&self) -> bool {
        (self.0 & Self::IV_MASK) != 0
    }

    /// Set invalid flag
    #[inline(always)]
    pub const fn set_invalid(self, value: bool) -> Self {
        self.with_flag(Self::IV_MASK, value)
    }

    /// Check if quality is good (no flags set).
    #[inline(always)]
    pub const fn is_good(&self) -> bool {
        self.0 == 0
    }

    /// Parse from a QDS byte (measured values).
    #[inline(always)]
    pub const fn from_qds(byte: u8) -> Self {
        Self(byte & Self::QDS_MASK)
    }

    /// Encode to a QDS byte.
    #[inline(always)]
    pub const fn to_qds(&self) -> u8 {
        self.0
    }

    /// Parse the quality part of a SIQ byte (single-point information).
    #[inline(always)]
    pub const fn from_siq(byte: u8) -> Self {
        Self(byte & Self::SIQ_MASK)
    }

    /// These flags as a SIQ can carry them, i.e. without overflow.
    #[inline(always)]
    pub const fn for_siq(self) -> Self {
        Self(self.0 & Self::SIQ_MASK)
    }

    /// Encode the quality part of a SIQ byte, without the SPI value bit.
    #[inline(always)]
    pub const fn to_siq(&self) -> u8 {
        self.0 & Self::SIQ_MASK
    }
}

impl std::fmt::Debug for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Quality")
            .field("overflow", &self.overflow())
            .field("blocked", &self.blocked())
            .field("substituted", &self.substituted())
            .field("not_topical", &self.not_topical())
            .field("invalid", &self.invalid())
            .finish()
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_good() {
            return f.write_str("GOOD");
        }

        let flags = [
            (self.overflow(), "OV"),
            (self.blocked(), "BL"),
            (self.substituted(), "SB"),
            (self.not_topical(), "NT"),
            (self.invalid(), "IV"),
        ];
        let mut first = true;
        for (_, name) in flags.iter().filter(|(set, _)| *set) {
            if !first {
                f.write_str("|")?;
            }
            first = false;
            f.write_str(name)?;
        }
        Ok(())
    }
}
