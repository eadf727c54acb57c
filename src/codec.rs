//! IEC 60870-5-104 codec for tokio.
//!
//! Frames APDUs on a byte stream using the tokio-util codec framework. The
//! ASDU of an I-frame is handed up undecoded so that an ASDU with an unknown
//! type or cause is answered by the transport instead of tearing down the
//! stream.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::Iec104Error;
use crate::types::{Apci, Asdu, UFunction, MAX_APDU_LENGTH, MIN_APDU_LENGTH, START_BYTE};

/// An IEC 104 APDU (Application Protocol Data Unit).
///
/// Contains the APCI header and, for I-frames, the encoded ASDU.
#[derive(Debug, Clone, PartialEq)]
pub struct Apdu {
    /// APCI (Application Protocol Control Information)
    pub apci: Apci,
    /// Encoded ASDU, only present in I-frames
    pub payload: Option<Bytes>,
}

impl Apdu {
    /// Create a new I-frame APDU carrying `asdu`.
    pub fn i_frame(send_seq: u16, recv_seq: u16, asdu: &Asdu) -> Self {
        Self::i_frame_raw(send_seq, recv_seq, asdu.encode().freeze())
    }

    /// Create a new I-frame APDU from an already encoded ASDU.
    pub fn i_frame_raw(send_seq: u16, recv_seq: u16, payload: Bytes) -> Self {
        Self {
            apci: Apci::i_frame(send_seq, recv_seq),
            payload: Some(payload),
        }
    }

    /// Create a new S-frame APDU.
    pub fn s_frame(recv_seq: u16) -> Self {
        Self {
            apci: Apci::s_frame(recv_seq),
            payload: None,
        }
    }

    /// Create a new U-frame APDU.
    pub fn u_frame(function: UFunction) -> Self {
        Self {
            apci: Apci::u_frame(function),
            payload: None,
        }
    }
}

impl std::fmt::Display for Apdu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.apci)?;
        if let Some(payload) = &self.payload {
            write!(f, " [{} bytes]", payload.len())?;
        }
        Ok(())
    }
}

/// IEC 60870-5-104 codec.
///
/// # Example
///
/// ```rust,ignore
/// use tokio_util::codec::Framed;
/// use voltage_outstation::codec::{Apdu, Iec104Codec};
///
/// let (stream, _) = listener.accept().await?;
/// let mut framed = Framed::new(stream, Iec104Codec::new());
///
/// while let Some(apdu) = framed.next().await {
///     println!("Received: {}", apdu?);
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Iec104Codec {
    // State for handling partial frames
    state: DecodeState,
}

#[derive(Debug, Clone, Default)]
#[allow(clippy::enum_variant_names)]
enum DecodeState {
    #[default]
    WaitingForStart,
    WaitingForLength,
    WaitingForData {
        length: usize,
    },
}

impl Iec104Codec {
    /// Create a new IEC 104 codec.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for Iec104Codec {
    type Item = Apdu;
    type Error = Iec104Error;

    fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> std::result::Result<Option<Self::Item>, Self::Error> {
        loop {
            match &self.state {
                DecodeState::WaitingForStart => {
                    // Skip bytes until we find the start byte
                    while !src.is_empty() && src[0] != START_BYTE {
                        src.advance(1);
                    }

                    if src.is_empty() {
                        return Ok(None);
                    }

                    self.state = DecodeState::WaitingForLength;
                }

                DecodeState::WaitingForLength => {
                    // Need at least 2 bytes (start + length)
                    if src.len() < 2 {
                        return Ok(None);
                    }

                    let length = src[1] as usize;

                    if !(MIN_APDU_LENGTH..=MAX_APDU_LENGTH).contains(&length) {
                        // Invalid length, skip start byte and restart
                        src.advance(1);
                        self.state = DecodeState::WaitingForStart;
                        continue;
                    }

                    self.state = DecodeState::WaitingForData { length };
                }

                DecodeState::WaitingForData { length } => {
                    let total_length = 2 + length; // start + length byte + APDU content

                    if src.len() < total_length {
                        src.reserve(total_length - src.len());
                        return Ok(None);
                    }

                    // Frame structure: [0x68] [length] [control1..4] [ASDU...]
                    let mut frame = src.split_to(total_length);
                    self.state = DecodeState::WaitingForStart;

                    let apci = Apci::parse(&frame[2..6])?;
                    frame.advance(6);

                    let payload = if apci.is_i_frame() {
                        Some(frame.freeze())
                    } else {
                        None
                    };

                    return Ok(Some(Apdu { apci, payload }));
                }
            }
        }
    }
}

impl Encoder<Apdu> for Iec104Codec {
    type Error = Iec104Error;

    fn encode(&mut self, item: Apdu, dst: &mut BytesMut) -> std::result::Result<(), Self::Error> {
        let asdu_len = item.payload.as_ref().map_or(0, Bytes::len);

        if asdu_len > MAX_APDU_LENGTH - MIN_APDU_LENGTH {
            return Err(Iec104Error::Codec(format!("ASDU too large ({} bytes)", asdu_len)));
        }

        dst.reserve(6 + asdu_len);
        dst.extend_from_slice(&item.apci.encode_header(asdu_len));
        if let Some(payload) = &item.payload {
            dst.extend_from_slice(payload);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Cot, InterrogationCommand, Ioa, TypeId};

    #[test]
    fn test_decode_u_frame() {
        let mut codec = Iec104Codec::new();
        let mut buf = BytesMut::from(&[0x68, 0x04, 0x07, 0x00, 0x00, 0x00][..]);

        let apdu = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(apdu, Apdu::u_frame(UFunction::StartDtAct));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_s_frame() {
        let mut codec = Iec104Codec::new();
        // S-frame with recv_seq = 100
        let mut buf = BytesMut::from(&[0x68, 0x04, 0x01, 0x00, 0xC8, 0x00][..]);

        let apdu = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(apdu.apci, Apci::s_frame(100));
    }

    #[test]
    fn test_encode_s_frame() {
        let mut codec = Iec104Codec::new();
        let mut buf = BytesMut::new();

        codec.encode(Apdu::s_frame(100), &mut buf).unwrap();
        assert_eq!(&buf[..], &[0x68, 0x04, 0x01, 0x00, 0xC8, 0x00]);
    }

    #[test]
    fn test_i_frame_roundtrip() {
        let mut codec = Iec104Codec::new();
        let mut buf = BytesMut::new();

        let mut asdu = Asdu::new(TypeId::InterrogationCommand, Cot::Activation, 1);
        asdu.add_object(InterrogationCommand { ioa: Ioa::new(0), qoi: 20 })
            .unwrap();
        codec.encode(Apdu::i_frame(10, 5, &asdu), &mut buf).unwrap();

        // 4 control + 6 header + 3 IOA + 1 QOI
        assert_eq!(buf[0], START_BYTE);
        assert_eq!(buf[1], 14);

        let apdu = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(apdu.apci, Apci::i_frame(10, 5));
        let payload = apdu.payload.unwrap();
        assert_eq!(Asdu::decode(&payload).unwrap(), asdu);
    }

    #[test]
    fn test_decode_i_frame_with_unknown_type_is_not_an_error() {
        let mut codec = Iec104Codec::new();
        let mut buf = BytesMut::from(
            &[0x68, 0x10, 0x00, 0x00, 0x00, 0x00, 9, 1, 3, 0, 1, 0, 1, 0, 0, 0, 0, 0][..],
        );

        let apdu = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(apdu.payload.unwrap().len(), 12);
    }

    #[test]
    fn test_encode_oversized_payload() {
        let mut codec = Iec104Codec::new();
        let mut buf = BytesMut::new();
        let apdu = Apdu::i_frame_raw(0, 0, Bytes::from(vec![0u8; 250]));
        assert!(matches!(codec.encode(apdu, &mut buf), Err(Iec104Error::Codec(_))));
    }

    #[test]
    fn test_decode_partial_frame() {
        let mut codec = Iec104Codec::new();

        let mut buf = BytesMut::from(&[0x68, 0x04][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&[0x07, 0x00, 0x00, 0x00]);
        let apdu = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(apdu, Apdu::u_frame(UFunction::StartDtAct));
    }

    #[test]
    fn test_decode_skip_garbage() {
        let mut codec = Iec104Codec::new();
        // Garbage, then a start byte with an invalid length, then a valid frame
        let mut buf =
            BytesMut::from(&[0xFF, 0xAA, 0x68, 0x02, 0x68, 0x04, 0x43, 0x00, 0x00, 0x00][..]);

        let apdu = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(apdu, Apdu::u_frame(UFunction::TestFrAct));
    }

    #[test]
    fn test_decode_bad_control_field() {
        let mut codec = Iec104Codec::new();
        let mut buf = BytesMut::from(&[0x68, 0x04, 0xFF, 0x00, 0x00, 0x00][..]);
        assert!(matches!(codec.decode(&mut buf), Err(Iec104Error::InvalidFrame(_))));
    }
}
