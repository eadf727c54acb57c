//! ASDU parser.
//!
//! Decodes the wire form of an ASDU into a typed [`Asdu`], one information
//! element decoder per supported type.

use bytes::BytesMut;

use crate::error::{Iec104Error, Result};
use crate::types::{
    Asdu, BinaryCounterReading, ClockSyncCommand, Cot, CounterInterrogationCommand, Cp56Time2a,
    InformationObject, IntegratedTotals, IntegratedTotalsWithTime, InterrogationCommand, Ioa,
    MeasuredValueFloat, MeasuredValueScaled, Quality, ReadCommand, SingleCommand,
    SinglePointInformation, SinglePointWithTime, TypeId, Vsq, ASDU_HEADER_SIZE, CP56_TIME_SIZE,
    IOA_SIZE,
};

/// Parse an ASDU from bytes (after APCI).
///
/// Unsupported type identifiers fail with `UnknownTypeId` and unknown causes
/// with `UnknownCot`; both can be answered with [`negative_echo`].
pub fn parse_asdu(data: &[u8]) -> Result<Asdu> {
    if data.len() < ASDU_HEADER_SIZE {
        return Err(Iec104Error::invalid_asdu("ASDU header too short"));
    }

    let type_id = TypeId::try_from(data[0])?;
    let vsq = Vsq::from_u8(data[1]);

    // COT is in lower 6 bits, test flag in bit 7, negative in bit 6
    let cot = Cot::try_from(data[2])?;
    let test = (data[2] & 0x80) != 0;
    let negative = (data[2] & 0x40) != 0;

    let originator = data[3];
    let common_address = u16::from_le_bytes([data[4], data[5]]);

    let objects = parse_objects(
        type_id,
        &data[ASDU_HEADER_SIZE..],
        vsq.count as usize,
        vsq.sequence,
    )?;

    Ok(Asdu::from_parts(
        type_id,
        cot,
        test,
        negative,
        originator,
        common_address,
        vsq.sequence,
        objects,
    ))
}

/// Build the negative reply for an ASDU that could not be decoded.
///
/// The raw header is copied with the cause replaced and the P/N bit set.
/// Returns `None` if the input is too short to carry a header.
pub fn negative_echo(raw: &[u8], cause: Cot) -> Option<BytesMut> {
    if raw.len() < ASDU_HEADER_SIZE {
        return None;
    }
    let mut reply = BytesMut::from(raw);
    reply[2] = (raw[2] & 0x80) | 0x40 | cause.as_u8();
    Some(reply)
}

/// Walk the object area and decode `count` elements of `type_id`.
///
/// With SQ=1 only the first IOA is on the wire; the others are derived.
fn parse_objects(
    type_id: TypeId,
    data: &[u8],
    count: usize,
    sequence: bool,
) -> Result<Vec<InformationObject>> {
    let mut objects = Vec::with_capacity(count);
    if count == 0 {
        return Ok(objects);
    }

    let element_size = type_id.element_size();

    // First IOA (always present)
    if data.len() < IOA_SIZE {
        return Err(Iec104Error::invalid_asdu("Data too short for IOA"));
    }
    let first_ioa = Ioa::from_bytes(&data[0..IOA_SIZE])?;
    let mut offset = IOA_SIZE;

    for i in 0..count {
        let ioa = if sequence {
            first_ioa
                .checked_add(i as u32)
                .ok_or_else(|| Iec104Error::invalid_asdu("IOA sequence overflows 24 bits"))?
        } else if i > 0 {
            if offset + IOA_SIZE > data.len() {
                return Err(Iec104Error::invalid_asdu("Data too short for IOA"));
            }
            let ioa = Ioa::from_bytes(&data[offset..offset + IOA_SIZE])?;
            offset += IOA_SIZE;
            ioa
        } else {
            first_ioa
        };

        if offset + element_size > data.len() {
            return Err(Iec104Error::invalid_asdu(format!(
                "Data too short for {} element",
                type_id
            )));
        }

        objects.push(parse_element(type_id, ioa, &data[offset..offset + element_size])?);
        offset += element_size;
    }

    Ok(objects)
}

/// Decode one information element. `element` is exactly `element_size` long.
fn parse_element(type_id: TypeId, ioa: Ioa, element: &[u8]) -> Result<InformationObject> {
    let object = match type_id {
        TypeId::SinglePoint => SinglePointInformation {
            ioa,
            value: (element[0] & 0x01) != 0,
            quality: Quality::from_siq(element[0]),
        }
        .into(),

        TypeId::SinglePointTime56 => SinglePointWithTime {
            ioa,
            value: (element[0] & 0x01) != 0,
            quality: Quality::from_siq(element[0]),
            timestamp: Cp56Time2a::from_bytes(&element[1..])?,
        }
        .into(),

        TypeId::MeasuredScaled => MeasuredValueScaled {
            ioa,
            value: i16::from_le_bytes([element[0], element[1]]),
            quality: Quality::from_qds(element[2]),
        }
        .into(),

        TypeId::MeasuredFloat => MeasuredValueFloat {
            ioa,
            value: f32::from_le_bytes([element[0], element[1], element[2], element[3]]),
            quality: Quality::from_qds(element[4]),
        }
        .into(),

        TypeId::IntegratedTotals => IntegratedTotals {
            ioa,
            reading: parse_bcr(element),
        }
        .into(),

        TypeId::IntegratedTotalsTime56 => IntegratedTotalsWithTime {
            ioa,
            reading: parse_bcr(element),
            timestamp: Cp56Time2a::from_bytes(&element[5..5 + CP56_TIME_SIZE])?,
        }
        .into(),

        TypeId::SingleCommand => SingleCommand::from_sco(ioa, element[0]).into(),

        TypeId::InterrogationCommand => InterrogationCommand {
            ioa,
            qoi: element[0],
        }
        .into(),

        TypeId::CounterInterrogation => CounterInterrogationCommand {
            ioa,
            qcc: element[0],
        }
        .into(),

        TypeId::ReadCommand => ReadCommand { ioa }.into(),

        TypeId::ClockSync => ClockSyncCommand {
            ioa,
            time: Cp56Time2a::from_bytes(element)?,
        }
        .into(),
    };
    Ok(object)
}

#[inline]
fn parse_bcr(element: &[u8]) -> BinaryCounterReading {
    BinaryCounterReading::from_bytes([element[0], element[1], element[2], element[3], element[4]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_asdu(type_id: TypeId, count: u8, sequence: bool, cot: u8, data: &[u8]) -> Vec<u8> {
        let mut raw = vec![
            type_id.as_u8(),
            Vsq::new(count, sequence).as_u8(),
            cot,
            0x00,
            0x01,
            0x00,
        ];
        raw.extend_from_slice(data);
        raw
    }

    #[test]
    fn test_parse_single_command() {
        // IOA=5000, SCO: select, QU=0, SCS=1
        let raw = make_asdu(TypeId::SingleCommand, 1, false, 6, &[0x88, 0x13, 0x00, 0x81]);
        let asdu = parse_asdu(&raw).unwrap();

        assert_eq!(asdu.type_id(), TypeId::SingleCommand);
        assert_eq!(asdu.cot(), Cot::Activation);
        assert_eq!(asdu.common_address(), 1);

        match asdu.first_object() {
            Some(InformationObject::SingleCommand(cmd)) => {
                assert_eq!(cmd.ioa, Ioa::new(5000));
                assert!(cmd.state);
                assert!(cmd.select);
            }
            other => panic!("Expected single command, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_measured_scaled() {
        // IOA=4000, value=1000 (i16), QDS=0x00
        let data = [
            0xA0, 0x0F, 0x00, // IOA=4000
            0xE8, 0x03, // 1000 in little-endian
            0x00, // QDS
        ];
        let asdu = parse_asdu(&make_asdu(TypeId::MeasuredScaled, 1, false, 3, &data)).unwrap();

        assert_eq!(
            asdu.objects(),
            &[InformationObject::MeasuredScaled(MeasuredValueScaled {
                ioa: Ioa::new(4000),
                value: 1000,
                quality: Quality::GOOD,
            })]
        );
    }

    #[test]
    fn test_parse_sequence() {
        // SQ=1, IOA=100, 3 values
        let data = [
            0x64, 0x00, 0x00, // IOA=100
            0xFF, 0xFF, 0x00, // -1
            0x17, 0x00, 0x00, // 23
            0xFC, 0x08, 0x80, // 2300, IV
        ];
        let asdu = parse_asdu(&make_asdu(TypeId::MeasuredScaled, 3, true, 20, &data)).unwrap();

        assert!(asdu.is_sequence());
        let ioas: Vec<u32> = asdu.objects().iter().map(|o| o.ioa().value()).collect();
        assert_eq!(ioas, vec![100, 101, 102]);
        assert_eq!(asdu.objects()[2].quality(), Some(Quality::INVALID));
    }

    #[test]
    fn test_parse_integrated_totals() {
        // IOA=6000, counter=123456, seq=5, no flags
        let data = [
            0x70, 0x17, 0x00, // IOA=6000
            0x40, 0xE2, 0x01, 0x00, // 123456 in little-endian
            0x05, // sequence=5, no carry/adjust/invalid
        ];
        let asdu = parse_asdu(&make_asdu(TypeId::IntegratedTotals, 1, false, 37, &data)).unwrap();

        match asdu.first_object() {
            Some(InformationObject::IntegratedTotals(it)) => {
                assert_eq!(it.ioa, Ioa::new(6000));
                assert_eq!(it.reading, BinaryCounterReading::new(123456, 5, false, false, false));
            }
            other => panic!("Expected integrated totals, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_clock_sync() {
        let time = [0x2A, 0x76, 30, 0x0C, 0xCF, 6, 24];
        let mut data = vec![0x00, 0x00, 0x00];
        data.extend_from_slice(&time);
        let asdu = parse_asdu(&make_asdu(TypeId::ClockSync, 1, false, 6, &data)).unwrap();

        match asdu.first_object() {
            Some(InformationObject::ClockSync(cs)) => {
                assert_eq!(cs.time.hours, 12);
                assert_eq!(cs.time.milliseconds, 30_250);
            }
            other => panic!("Expected clock sync, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_zero_objects() {
        let asdu = parse_asdu(&make_asdu(TypeId::SingleCommand, 0, false, 6, &[])).unwrap();
        assert!(asdu.is_empty());
    }

    #[test]
    fn test_parse_truncated() {
        // Two objects announced, one present
        let data = [0x88, 0x13, 0x00, 0x01];
        let err = parse_asdu(&make_asdu(TypeId::SingleCommand, 2, false, 6, &data)).unwrap_err();
        assert!(matches!(err, Iec104Error::InvalidAsdu(_)));

        assert!(parse_asdu(&[45, 1, 6]).is_err());
    }

    #[test]
    fn test_parse_unknown_type_and_cot() {
        let err = parse_asdu(&[9, 1, 3, 0, 1, 0, 1, 0, 0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, Iec104Error::UnknownTypeId(9)));
        assert!(err.is_answerable());

        let err = parse_asdu(&make_asdu(TypeId::SingleCommand, 1, false, 0x0E, &[1, 0, 0, 1]))
            .unwrap_err();
        assert!(matches!(err, Iec104Error::UnknownCot(14)));
    }

    #[test]
    fn test_negative_echo() {
        let raw = [9, 1, 0x86, 0, 1, 0, 1, 0, 0, 0];
        let reply = negative_echo(&raw, Cot::UnknownTypeId).unwrap();
        // Test bit kept, P/N set, cause replaced
        assert_eq!(reply[2], 0x80 | 0x40 | 44);
        assert_eq!(&reply[3..], &raw[3..]);

        assert!(negative_echo(&[9, 1], Cot::UnknownTypeId).is_none());
    }
}
