//! GSM / UCS2 text codecs.
//!
//! GSM is carried byte-for-byte. UCS2 is the modem convention of
//! UTF-16BE code units spelled as uppercase hex digit pairs, e.g.
//! `"Hi"` ⇒ `"00480069"`.

use crate::at::error::{AtError, AtResult};
use crate::at::types::Encoding;

/// Encode host text into the on-wire form for `enc`.
pub fn encode_text(input: &str, enc: Encoding) -> String {
    match enc {
        Encoding::Gsm => input.to_string(),
        Encoding::Ucs2 => {
            let mut bytes = Vec::with_capacity(input.len() * 2);
            for unit in input.encode_utf16() {
                bytes.extend_from_slice(&unit.to_be_bytes());
            }
            hex::encode_upper(bytes)
        }
    }
}

/// Decode on-wire text received under `enc` back into host text.
///
/// A malformed UCS2 payload (bad hex, odd length, invalid UTF-16) is
/// modem output that violates the protocol, so it surfaces as an
/// `UnrecognizedResponse` failure.
pub fn decode_text(input: &str, enc: Encoding) -> AtResult<String> {
    match enc {
        Encoding::Gsm => Ok(input.to_string()),
        Encoding::Ucs2 => {
            let bytes = hex::decode(input.trim()).map_err(|e| {
                AtError::unrecognized_response(format!("invalid UCS2 hex payload: {e}"))
            })?;
            if bytes.len() % 2 != 0 {
                return Err(AtError::unrecognized_response(
                    "UCS2 payload has an odd byte count",
                ));
            }
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16(&units).map_err(|e| {
                AtError::unrecognized_response(format!("invalid UTF-16 in UCS2 payload: {e}"))
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::at::error::AtErrorKind;

    #[test]
    fn test_gsm_is_identity() {
        assert_eq!(encode_text("AT+CMGF=1", Encoding::Gsm), "AT+CMGF=1");
        assert_eq!(decode_text("READY", Encoding::Gsm).unwrap(), "READY");
    }

    #[test]
    fn test_ucs2_encode_ascii() {
        assert_eq!(encode_text("Hi", Encoding::Ucs2), "00480069");
    }

    #[test]
    fn test_ucs2_round_trip() {
        for s in ["", "hello", "+4917612345678", "蛤 UCS2 🤔", "line1\nline2"] {
            let wire = encode_text(s, Encoding::Ucs2);
            assert_eq!(decode_text(&wire, Encoding::Ucs2).unwrap(), s);
        }
    }

    #[test]
    fn test_ucs2_surrogate_pair_spelling() {
        // U+1F914 is the surrogate pair D83E DD14.
        assert_eq!(encode_text("🤔", Encoding::Ucs2), "D83EDD14");
    }

    #[test]
    fn test_ucs2_decode_rejects_bad_hex() {
        let err = decode_text("00GZ", Encoding::Ucs2).unwrap_err();
        assert_eq!(err.kind, AtErrorKind::UnrecognizedResponse);
    }

    #[test]
    fn test_ucs2_decode_rejects_odd_length() {
        let err = decode_text("004800", Encoding::Ucs2).unwrap_err();
        assert_eq!(err.kind, AtErrorKind::UnrecognizedResponse);
    }

    #[test]
    fn test_ucs2_decode_rejects_lone_surrogate() {
        let err = decode_text("D83E", Encoding::Ucs2).unwrap_err();
        assert_eq!(err.kind, AtErrorKind::UnrecognizedResponse);
    }
}
