//! IEC 60870-5-104 ASDU (Application Service Data Unit).
//!
//! ```text
//! +--------+--------+--------+--------+--------+--------+----------------
//! | TypeID | VSQ    | COT    | ORG    | CA (LE, 2 bytes)| objects...
//! +--------+--------+--------+--------+--------+--------+----------------
//!            SQ|N     T|PN|cause
//! ```
//!
//! Each object is a 3-byte IOA followed by its information element. With
//! SQ=1 only the first IOA is transmitted and the following objects take
//! consecutive addresses.

use bytes::{BufMut, BytesMut};

use crate::error::{Iec104Error, Result};
use crate::types::{Cot, InformationObject, TypeId};

/// Size of the fixed ASDU header.
pub const ASDU_HEADER_SIZE: usize = 6;

/// Size of an encoded information object address.
pub const IOA_SIZE: usize = 3;

/// Largest ASDU that fits into one APDU (253 - 4 control octets).
pub const MAX_ASDU_LENGTH: usize = 249;

/// Largest object count the VSQ can express.
pub const MAX_OBJECTS: usize = 127;

/// Variable Structure Qualifier (VSQ).
///
/// Defines the structure of information objects in an ASDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vsq {
    /// Number of information objects (0-127)
    pub count: u8,
    /// If true, addresses are sequential (SQ=1)
    pub sequence: bool,
}

impl Vsq {
    /// Create a new VSQ.
    #[inline]
    pub const fn new(count: u8, sequence: bool) -> Self {
        Self { count, sequence }
    }

    /// Parse VSQ from byte.
    #[inline]
    pub const fn from_u8(value: u8) -> Self {
        Self {
            count: value & 0x7F,
            sequence: (value & 0x80) != 0,
        }
    }

    /// Encode VSQ to byte.
    #[inline]
    pub const fn as_u8(&self) -> u8 {
        (self.count & 0x7F) | if self.sequence { 0x80 } else { 0 }
    }
}

/// Information Object Address (IOA).
///
/// 3-byte address identifying a specific data point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Ioa(u32);

impl Ioa {
    /// Highest representable address.
    pub const MAX: Self = Self(0x00FF_FFFF);

    /// Create IOA from u32 (lower 24 bits).
    #[inline]
    pub const fn new(value: u32) -> Self {
        Self(value & 0x00FF_FFFF)
    }

    /// Parse IOA from 3 bytes (little-endian).
    #[inline]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < IOA_SIZE {
            return Err(Iec104Error::invalid_asdu("IOA too short"));
        }
        Ok(Self(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0])))
    }

    /// Encode IOA to 3 bytes (little-endian).
    #[inline]
    pub fn to_bytes(&self) -> [u8; IOA_SIZE] {
        let b = self.0.to_le_bytes();
        [b[0], b[1], b[2]]
    }

    /// Get the raw value.
    #[inline]
    pub const fn value(&self) -> u32 {
        self.0
    }

    /// Address `offset` positions further on, if still representable.
    #[inline]
    pub fn checked_add(self, offset: u32) -> Option<Self> {
        let next = self.0.checked_add(offset)?;
        (next <= Self::MAX.0).then_some(Self(next))
    }
}

impl From<u32> for Ioa {
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

impl std::fmt::Display for Ioa {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Complete ASDU.
///
/// Fields are private so that every contained object always matches the
/// type identification and the encoded size stays within one APDU.
#[derive(Debug, Clone, PartialEq)]
pub struct Asdu {
    type_id: TypeId,
    cot: Cot,
    test: bool,
    negative: bool,
    originator: u8,
    common_address: u16,
    sequence: bool,
    objects: Vec<InformationObject>,
}

impl Asdu {
    /// Create an empty ASDU with individually addressed objects (SQ=0).
    pub fn new(type_id: TypeId, cot: Cot, common_address: u16) -> Self {
        Self {
            type_id,
            cot,
            test: false,
            negative: false,
            originator: 0,
            common_address,
            sequence: false,
            objects: Vec::new(),
        }
    }

    /// Create an empty ASDU whose objects take consecutive addresses (SQ=1).
    pub fn sequential(type_id: TypeId, cot: Cot, common_address: u16) -> Self {
        Self {
            sequence: true,
            ..Self::new(type_id, cot, common_address)
        }
    }

    /// Set the originator address.
    pub fn with_originator(mut self, originator: u8) -> Self {
        self.originator = originator;
        self
    }

    /// Set the test flag.
    pub fn with_test(mut self, test: bool) -> Self {
        self.test = test;
        self
    }

    /// Copy of this ASDU with a different cause.
    pub fn with_cot(&self, cot: Cot) -> Self {
        let mut asdu = self.clone();
        asdu.cot = cot;
        asdu
    }

    /// Copy of this ASDU as a reply: new cause and P/N flag, everything
    /// else (objects, addresses, test flag) unchanged.
    pub fn reply(&self, cot: Cot, negative: bool) -> Self {
        let mut asdu = self.with_cot(cot);
        asdu.negative = negative;
        asdu
    }

    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    #[inline]
    pub fn cot(&self) -> Cot {
        self.cot
    }

    #[inline]
    pub fn set_cot(&mut self, cot: Cot) {
        self.cot = cot;
    }

    #[inline]
    pub fn is_test(&self) -> bool {
        self.test
    }

    /// Negative confirmation flag (P/N).
    #[inline]
    pub fn is_negative(&self) -> bool {
        self.negative
    }

    #[inline]
    pub fn set_negative(&mut self, negative: bool) {
        self.negative = negative;
    }

    #[inline]
    pub fn originator(&self) -> u8 {
        self.originator
    }

    #[inline]
    pub fn common_address(&self) -> u16 {
        self.common_address
    }

    #[inline]
    pub fn set_common_address(&mut self, common_address: u16) {
        self.common_address = common_address;
    }

    /// SQ flag.
    #[inline]
    pub fn is_sequence(&self) -> bool {
        self.sequence
    }

    #[inline]
    pub fn objects(&self) -> &[InformationObject] {
        &self.objects
    }

    #[inline]
    pub fn first_object(&self) -> Option<&InformationObject> {
        self.objects.first()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Append an information object.
    ///
    /// Flags the wire element cannot carry are dropped first (e.g. OV on a
    /// single point), see [`InformationObject::into_encodable`].
    ///
    /// Fails with `TypeMismatch` if the object kind differs from the ASDU
    /// type, with `AsduFull` if the object would not fit, and with
    /// `InvalidAsdu` if SQ=1 and the address does not follow the previous
    /// one. The ASDU is unchanged on failure.
    pub fn add_object(&mut self, object: impl Into<InformationObject>) -> Result<()> {
        let object = object.into().into_encodable();
        if object.type_id() != self.type_id {
            return Err(Iec104Error::TypeMismatch {
                expected: self.type_id,
                actual: object.type_id(),
            });
        }

        let current = self.encoded_len();
        if self.objects.len() >= MAX_OBJECTS || current + self.object_size(&object) > MAX_ASDU_LENGTH {
            return Err(Iec104Error::AsduFull(current));
        }

        if self.sequence {
            if let Some(last) = self.objects.last() {
                if last.ioa().checked_add(1) != Some(object.ioa()) {
                    return Err(Iec104Error::invalid_asdu(format!(
                        "IOA {} does not follow {} in sequence",
                        object.ioa(),
                        last.ioa()
                    )));
                }
            }
        }

        self.objects.push(object);
        Ok(())
    }

    /// Whether one more object of this ASDU's type would still fit.
    pub fn has_room(&self) -> bool {
        let next = if self.sequence && !self.objects.is_empty() {
            self.type_id.element_size()
        } else {
            IOA_SIZE + self.type_id.element_size()
        };
        self.objects.len() < MAX_OBJECTS && self.encoded_len() + next <= MAX_ASDU_LENGTH
    }

    fn object_size(&self, object: &InformationObject) -> usize {
        if self.sequence && !self.objects.is_empty() {
            object.element_size()
        } else {
            IOA_SIZE + object.element_size()
        }
    }

    /// Calculate the encoded length of this ASDU.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        let element = self.type_id.element_size();
        let body = match (self.sequence, self.objects.len()) {
            (_, 0) => 0,
            (true, n) => IOA_SIZE + n * element,
            (false, n) => n * (IOA_SIZE + element),
        };
        ASDU_HEADER_SIZE + body
    }

    /// Encode ASDU to bytes.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_to(&mut buf);
        buf
    }

    /// Encode ASDU directly into the provided buffer.
    #[inline]
    pub fn encode_to(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        buf.put_u8(self.type_id.as_u8());
        buf.put_u8(Vsq::new(self.objects.len() as u8, self.sequence).as_u8());

        let mut cot_byte = self.cot.as_u8();
        if self.test {
            cot_byte |= 0x80;
        }
        if self.negative {
            cot_byte |= 0x40;
        }
        buf.put_u8(cot_byte);
        buf.put_u8(self.originator);
        buf.put_u16_le(self.common_address);

        for (i, obj) in self.objects.iter().enumerate() {
            if !self.sequence || i == 0 {
                buf.put_slice(&obj.ioa().to_bytes());
            }
            obj.encode_element(buf);
        }
    }

    /// Parse ASDU from bytes (after APCI).
    pub fn decode(data: &[u8]) -> Result<Self> {
        crate::parser::parse_asdu(data)
    }

    /// Assemble a decoded ASDU. The parser guarantees object kinds match.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        type_id: TypeId,
        cot: Cot,
        test: bool,
        negative: bool,
        originator: u8,
        common_address: u16,
        sequence: bool,
        objects: Vec<InformationObject>,
    ) -> Self {
        Self {
            type_id,
            cot,
            test,
            negative,
            originator,
            common_address,
            sequence,
            objects,
        }
    }
}

impl std::fmt::Display for Asdu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} COT={} CA={} n={}",
            self.type_id,
            self.cot,
            self.common_address,
            self.objects.len()
        )?;
        if self.negative {
            f.write_str(" NEG")?;
        }
        if self.test {
            f.write_str(" TEST")?;
        }
        Ok(())
    }
}
