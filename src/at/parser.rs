//! Reply-line parsing: field-tuple classification and unsolicited
//! result codes.
//!
//! A reply segment (the text after `<CMD>: `) is split on commas with
//! no quoted-comma escaping, then each token is classified in order:
//! 1. **Quoted string**: `"..."`, content codec-decoded unless
//!    decoding is suppressed for the in-flight command.
//! 2. **Decimal integer**: optional sign.
//! 3. **Hex integer**: `0x` followed by hex digits.
//! 4. **Raw token**: anything else, verbatim.

use regex::Regex;

use crate::at::encoding::decode_text;
use crate::at::error::AtResult;
use crate::at::types::{AtEvent, AtValue, Encoding, FieldTuple};

/// Parse one reply segment into a field-tuple.
///
/// A segment wrapped in a single matching parenthesis pair is
/// unwrapped first (`("GSM","UCS2")` lists). Empty tokens produced by
/// consecutive commas are skipped, which keeps field positions stable
/// for consumers indexing past optional fields.
pub fn parse_fields(text: &str, enc: Encoding, decode_strings: bool) -> AtResult<FieldTuple> {
    let inner = strip_outer_parens(text.trim());
    let mut fields = Vec::new();
    for token in inner.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        fields.push(classify_token(token, enc, decode_strings)?);
    }
    Ok(fields)
}

/// Classify a single token.
pub fn classify_token(token: &str, enc: Encoding, decode_strings: bool) -> AtResult<AtValue> {
    if token.len() >= 2 && token.starts_with('"') && token.ends_with('"') {
        let body = &token[1..token.len() - 1];
        let content = if decode_strings {
            decode_text(body, enc)?
        } else {
            body.to_string()
        };
        return Ok(AtValue::Text(content));
    }

    if let Some(digits) = token.strip_prefix("0x") {
        if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_hexdigit()) {
            if let Ok(v) = i64::from_str_radix(digits, 16) {
                return Ok(AtValue::Int(v));
            }
        }
    }

    if let Ok(v) = token.parse::<i64>() {
        return Ok(AtValue::Int(v));
    }

    Ok(AtValue::Raw(token.to_string()))
}

/// Parse an unsolicited result code line, `+NAME: fields`. Returns
/// None when the line does not have that shape. The stored event name
/// drops the `+` sigil.
pub fn parse_event(line: &str, enc: Encoding) -> Option<AtEvent> {
    let re = Regex::new(r"^\+([A-Z]+):\s*(.*)$").ok()?;
    let caps = re.captures(line)?;
    let name = caps.get(1)?.as_str().to_string();
    let fields = parse_fields(caps.get(2)?.as_str(), enc, true).ok()?;
    Some(AtEvent { name, fields })
}

fn strip_outer_parens(text: &str) -> &str {
    let bytes = text.as_bytes();
    if bytes.first() != Some(&b'(') || bytes.last() != Some(&b')') {
        return text;
    }
    // The opening paren must match the final close, not an earlier one.
    let mut depth = 0usize;
    for (i, b) in bytes.iter().enumerate() {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 && i != bytes.len() - 1 {
                    return text;
                }
            }
            _ => {}
        }
    }
    &text[1..text.len() - 1]
}
