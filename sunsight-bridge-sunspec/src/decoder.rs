//! Register decoding.
//!
//! Turns raw register words into typed values. Every encoding has a
//! "not implemented" sentinel; a field holding its sentinel decodes to
//! `None` and is left out of the sample instead of being reported as zero.

use sunsight_common::{DeviceIdentity, FieldValue, OperatingStatus};
use thiserror::Error;

use crate::registers::{Encoding, RegisterBlock, RegisterField, WordOrder, Wiring, identity};

/// Valid range of a SunSpec scale factor exponent.
const SCALE_RANGE: std::ops::RangeInclusive<i16> = -10..=10;

/// A field is present but its encoding is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown status code {0}")]
    UnknownStatus(u16),

    #[error("scale factor is not implemented")]
    ScaleNotImplemented,

    #[error("scale factor exponent {0} out of range")]
    ScaleOutOfRange(i16),

    #[error("text is not printable ASCII")]
    InvalidText,

    #[error("field needs registers up to offset {needed}, block has {available}")]
    ShortBlock { needed: usize, available: usize },
}

/// A decode failure with the context needed to diagnose it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field} at {address}: {error} (raw {raw:04X?})")]
pub struct FieldError {
    pub field: &'static str,
    pub address: u16,
    pub raw: Vec<u16>,
    pub error: DecodeError,
}

/// Result of decoding one register block.
#[derive(Debug, Default)]
pub struct DecodedBlock {
    /// Implemented fields, in register order.
    pub values: Vec<(&'static str, FieldValue)>,
    /// Fields that failed to decode this cycle.
    pub errors: Vec<FieldError>,
}

impl DecodedBlock {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
    }

    /// Consume the block into owned `(name, value)` pairs.
    pub fn into_fields(self) -> impl Iterator<Item = (String, FieldValue)> {
        self.values.into_iter().map(|(n, v)| (n.to_string(), v))
    }

    /// Interpret the block as a SunSpec common (identity) block.
    pub fn to_identity(&self) -> DeviceIdentity {
        let text = |name: &str| match self.get(name) {
            Some(FieldValue::Text(s)) => s.clone(),
            _ => String::new(),
        };

        DeviceIdentity {
            manufacturer: text(identity::MANUFACTURER),
            model: text(identity::MODEL),
            options: text(identity::OPTIONS),
            version: text(identity::VERSION),
            serial_number: text(identity::SERIAL_NUMBER),
            device_address: self
                .get(identity::DEVICE_ADDRESS)
                .and_then(FieldValue::as_f64)
                .map(|v| v as u16),
        }
    }
}

/// Combine words into one unsigned integer honoring the word order.
fn assemble(words: &[u16], order: WordOrder) -> u64 {
    let fold = |acc: u64, w: &u16| (acc << 16) | u64::from(*w);
    match order {
        WordOrder::BigEndian => words.iter().fold(0, fold),
        WordOrder::LittleEndian => words.iter().rev().fold(0, fold),
    }
}

/// Decode a numeric register value without applying any scale factor.
///
/// Returns `None` when the raw value is the encoding's not-implemented
/// sentinel. Text encodings are not scalars and also return `None`.
pub fn decode_scalar(words: &[u16], encoding: Encoding, order: WordOrder) -> Option<f64> {
    let raw = assemble(words, order);
    match encoding {
        Encoding::Uint16 | Encoding::Status => (raw != 0xFFFF).then_some(raw as f64),
        Encoding::Int16 | Encoding::ScaleFactor => {
            (raw != 0x8000).then_some(f64::from(raw as u16 as i16))
        }
        Encoding::Uint32 | Encoding::Bitfield32 => (raw != 0xFFFF_FFFF).then_some(raw as f64),
        Encoding::Acc32 => (raw != 0).then_some(raw as f64),
        Encoding::Uint64 => (raw != u64::MAX).then_some(raw as f64),
        Encoding::Float32 => {
            let value = f32::from_bits(raw as u32);
            (!value.is_nan()).then_some(f64::from(value))
        }
        Encoding::Text => None,
    }
}

/// Decode a scale factor register into its exponent.
pub fn decode_scale(word: u16) -> Result<i16, DecodeError> {
    if word == 0x8000 {
        return Err(DecodeError::ScaleNotImplemented);
    }
    let exponent = word as i16;
    if !SCALE_RANGE.contains(&exponent) {
        return Err(DecodeError::ScaleOutOfRange(exponent));
    }
    Ok(exponent)
}

/// Apply a power-of-ten exponent to a raw value.
pub fn apply_scale(value: f64, exponent: i16) -> f64 {
    let factor = 10f64.powi(i32::from(exponent.unsigned_abs()));
    if exponent < 0 {
        value / factor
    } else {
        value * factor
    }
}

/// Decode NUL-padded ASCII text. All-NUL text is not implemented.
pub fn decode_string(words: &[u16]) -> Result<Option<String>, DecodeError> {
    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let text = &bytes[..end];

    if !text.iter().all(|b| b.is_ascii() && !b.is_ascii_control()) {
        return Err(DecodeError::InvalidText);
    }

    let text = String::from_utf8_lossy(text).trim_end().to_string();
    Ok((!text.is_empty()).then_some(text))
}

/// Map a status code to an operating state.
pub fn decode_status(word: u16) -> Result<OperatingStatus, DecodeError> {
    OperatingStatus::from_code(word).ok_or(DecodeError::UnknownStatus(word))
}

fn field_words<'a>(words: &'a [u16], offset: u16, count: u16) -> Result<&'a [u16], DecodeError> {
    let start = usize::from(offset);
    let end = start + usize::from(count);
    words.get(start..end).ok_or(DecodeError::ShortBlock {
        needed: end,
        available: words.len(),
    })
}

/// Decode one field out of a block's words.
///
/// Scaled fields are decoded together with their scale factor register;
/// `Ok(None)` means the device does not implement the field.
pub fn decode_field(
    field: &RegisterField,
    words: &[u16],
    order: WordOrder,
) -> Result<Option<FieldValue>, DecodeError> {
    let raw = field_words(words, field.offset, field.count)?;

    match field.encoding {
        Encoding::Text => Ok(decode_string(raw)?.map(FieldValue::Text)),
        Encoding::Status => match decode_scalar(raw, Encoding::Status, order) {
            Some(_) => Ok(Some(FieldValue::Status(decode_status(raw[0])?))),
            None => Ok(None),
        },
        Encoding::ScaleFactor => Ok(Some(FieldValue::Number(f64::from(decode_scale(raw[0])?)))),
        encoding => {
            let Some(value) = decode_scalar(raw, encoding, order) else {
                return Ok(None);
            };
            let value = match field.scale {
                Some(sf_offset) => {
                    let sf = field_words(words, sf_offset, 1)?;
                    apply_scale(value, decode_scale(sf[0])?)
                }
                None => value,
            };
            Ok(Some(FieldValue::Number(value)))
        }
    }
}

/// Decode every published field of a block for the given wiring.
///
/// A failure on one field is recorded in `errors` and decoding continues
/// with the next field.
pub fn decode_block(block: &RegisterBlock, words: &[u16], wiring: Option<Wiring>) -> DecodedBlock {
    let mut decoded = DecodedBlock::default();

    for field in block.fields_for(wiring) {
        if !field.is_published() {
            continue;
        }
        match decode_field(field, words, block.word_order) {
            Ok(Some(value)) => decoded.values.push((field.name, value)),
            Ok(None) => {}
            Err(error) => decoded.errors.push(FieldError {
                field: field.name,
                address: field.address(block.start),
                raw: raw_context(field, words),
                error,
            }),
        }
    }

    decoded
}

fn raw_context(field: &RegisterField, words: &[u16]) -> Vec<u16> {
    let mut raw: Vec<u16> = field_words(words, field.offset, field.count)
        .map(<[u16]>::to_vec)
        .unwrap_or_default();
    if let Some(sf) = field.scale.and_then(|o| words.get(usize::from(o))) {
        raw.push(*sf);
    }
    raw
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::{battery_block, inverter_block, inverter_identity_block};

    fn text_words(s: &str, count: usize) -> Vec<u16> {
        let mut bytes = s.as_bytes().to_vec();
        bytes.resize(count * 2, 0);
        bytes
            .chunks(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect()
    }

    #[test]
    fn test_sentinels_decode_to_none() {
        let be = WordOrder::BigEndian;
        assert_eq!(decode_scalar(&[0xFFFF], Encoding::Uint16, be), None);
        assert_eq!(decode_scalar(&[0x8000], Encoding::Int16, be), None);
        assert_eq!(decode_scalar(&[0xFFFF, 0xFFFF], Encoding::Uint32, be), None);
        assert_eq!(decode_scalar(&[0, 0], Encoding::Acc32, be), None);
        assert_eq!(decode_scalar(&[0xFFFF; 4], Encoding::Uint64, be), None);
        assert_eq!(decode_scalar(&[0x7FC0, 0x0000], Encoding::Float32, be), None);
    }

    #[test]
    fn test_zero_is_not_a_sentinel() {
        let be = WordOrder::BigEndian;
        assert_eq!(decode_scalar(&[0], Encoding::Uint16, be), Some(0.0));
        assert_eq!(decode_scalar(&[0], Encoding::Int16, be), Some(0.0));
        assert_eq!(decode_scalar(&[0, 0], Encoding::Uint32, be), Some(0.0));
    }

    #[test]
    fn test_sign_extension() {
        let be = WordOrder::BigEndian;
        assert_eq!(decode_scalar(&[0xFFFF], Encoding::Int16, be), Some(-1.0));
        assert_eq!(decode_scalar(&[0xFF88], Encoding::Int16, be), Some(-120.0));
        assert_eq!(decode_scalar(&[0xFFFE], Encoding::ScaleFactor, be), Some(-2.0));
    }

    #[test]
    fn test_multi_word_order() {
        assert_eq!(
            decode_scalar(&[0x0001, 0x0002], Encoding::Uint32, WordOrder::BigEndian),
            Some(65538.0)
        );
        assert_eq!(
            decode_scalar(&[0x0002, 0x0001], Encoding::Uint32, WordOrder::LittleEndian),
            Some(65538.0)
        );

        let bits = 1234.5f32.to_bits();
        let (hi, lo) = ((bits >> 16) as u16, bits as u16);
        assert_eq!(
            decode_scalar(&[lo, hi], Encoding::Float32, WordOrder::LittleEndian),
            Some(1234.5)
        );
    }

    #[test]
    fn test_scale_round_trip() {
        assert_eq!(apply_scale(2413.0, -1), 241.3);
        assert_eq!(apply_scale(5000.0, -2), 50.0);
        assert_eq!(apply_scale(35.0, 2), 3500.0);
        assert_eq!(apply_scale(3500.0, 0), 3500.0);
    }

    #[test]
    fn test_scale_errors() {
        assert_eq!(decode_scale(0xFFFF), Ok(-1));
        assert_eq!(decode_scale(0x8000), Err(DecodeError::ScaleNotImplemented));
        assert_eq!(decode_scale(11), Err(DecodeError::ScaleOutOfRange(11)));
        assert_eq!(
            decode_scale((-11i16) as u16),
            Err(DecodeError::ScaleOutOfRange(-11))
        );
    }

    #[test]
    fn test_decode_string() {
        assert_eq!(
            decode_string(&text_words("SolarEdge", 16)),
            Ok(Some("SolarEdge".to_string()))
        );
        assert_eq!(decode_string(&[0; 8]), Ok(None));
        assert_eq!(decode_string(&[0x8081, 0]), Err(DecodeError::InvalidText));
    }

    #[test]
    fn test_decode_status() {
        assert_eq!(decode_status(4), Ok(OperatingStatus::Producing));
        assert_eq!(decode_status(6), Ok(OperatingStatus::ShuttingDown));
        assert_eq!(decode_status(9), Err(DecodeError::UnknownStatus(9)));
    }

    #[test]
    fn test_decode_scaled_field() {
        let block = inverter_block();
        let mut words = vec![0u16; block.count as usize];
        words[10] = 2413; // AC_VoltageAN
        words[13] = (-1i16) as u16; // AC_Voltage_SF

        let field = block.fields.iter().find(|f| f.name == "AC_VoltageAN").unwrap();
        assert_eq!(
            decode_field(field, &words, block.word_order),
            Ok(Some(FieldValue::Number(241.3)))
        );
    }

    #[test]
    fn test_unimplemented_scale_for_implemented_value() {
        let block = inverter_block();
        let mut words = vec![0u16; block.count as usize];
        words[14] = 3500;
        words[15] = 0x8000;

        let field = block.fields.iter().find(|f| f.name == "AC_Power").unwrap();
        assert_eq!(
            decode_field(field, &words, block.word_order),
            Err(DecodeError::ScaleNotImplemented)
        );
    }

    #[test]
    fn test_decode_block_omits_sentinels_and_keeps_going() {
        let block = inverter_block();
        let mut words = vec![0u16; block.count as usize];
        words[0] = 103;
        words[1] = 50;
        words[2] = 0xFFFF; // AC_Current not implemented
        words[14] = 3500; // AC_Power
        words[15] = 0;
        words[27] = 12; // DC_Current with a broken scale factor
        words[28] = 42;
        words[31] = 3600; // DC_Power
        words[32] = 0;
        words[38] = 9; // unknown status

        let decoded = decode_block(&block, &words, Some(Wiring::ThreePhase));

        assert!(decoded.get("AC_Current").is_none());
        assert_eq!(decoded.get("AC_Power"), Some(&FieldValue::Number(3500.0)));
        assert_eq!(decoded.get("DC_Power"), Some(&FieldValue::Number(3600.0)));
        assert!(decoded.get("Status").is_none());
        assert!(decoded.get("AC_Power_SF").is_none());

        let failed: Vec<_> = decoded.errors.iter().map(|e| e.field).collect();
        assert!(failed.contains(&"DC_Current"));
        assert!(failed.contains(&"Status"));

        let status = decoded.errors.iter().find(|e| e.field == "Status").unwrap();
        assert_eq!(status.address, 40107);
        assert_eq!(status.raw, vec![9]);
        assert_eq!(status.error, DecodeError::UnknownStatus(9));
    }

    #[test]
    fn test_decode_block_short_block() {
        let block = inverter_block();
        let words = vec![101u16, 50];

        let decoded = decode_block(&block, &words, None);
        assert_eq!(decoded.get("SunSpec_DID"), Some(&FieldValue::Number(101.0)));
        assert!(
            decoded
                .errors
                .iter()
                .any(|e| matches!(e.error, DecodeError::ShortBlock { .. }))
        );
    }

    #[test]
    fn test_battery_block_little_endian() {
        let block = battery_block(1);
        let mut words = vec![0xFFFFu16; block.count as usize];
        let bits = 87.5f32.to_bits();
        words[66] = bits as u16; // State_of_Energy, low word first
        words[67] = (bits >> 16) as u16;
        // NaN in every other float32 field
        for offset in [0usize, 2, 4, 6, 8, 42, 44, 46, 48, 50, 60, 62, 64] {
            words[offset] = 0x0000;
            words[offset + 1] = 0x7FC0;
        }

        let decoded = decode_block(&block, &words, None);
        assert_eq!(
            decoded.get("State_of_Energy"),
            Some(&FieldValue::Number(87.5))
        );
        assert!(decoded.get("Rated_Energy").is_none());
        assert!(decoded.get("Lifetime_Export_Energy_Counter").is_none());
        assert!(decoded.errors.is_empty());
    }

    #[test]
    fn test_identity_block() {
        let block = inverter_identity_block();
        let mut words = vec![0u16; block.count as usize];
        words[0..16].copy_from_slice(&text_words("SolarEdge", 16));
        words[16..32].copy_from_slice(&text_words("SE7600H-US", 16));
        words[40..48].copy_from_slice(&text_words("0004.0011", 8));
        words[48..64].copy_from_slice(&text_words("7E1A2B3C", 16));
        words[64] = 1;

        let identity = decode_block(&block, &words, None).to_identity();
        assert_eq!(identity.manufacturer, "SolarEdge");
        assert_eq!(identity.model, "SE7600H-US");
        assert_eq!(identity.options, "");
        assert_eq!(identity.version, "0004.0011");
        assert_eq!(identity.device_address, Some(1));
        assert_eq!(identity.label(), "SolarEdge(7E1A2B3C)");
    }
}
