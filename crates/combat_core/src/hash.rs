//! Stable snapshot hashing.
//!
//! [`stable_stringify`] renders a JSON value with object keys sorted at every
//! depth and numbers normalized, so two values with the same observable
//! content always produce the same text. [`hash_json`] reduces that text to a
//! FNV-1a 32-bit checksum rendered as eight lowercase hex digits.

use std::fmt::Write as _;

use serde::Serialize;
use serde_json::Value;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Largest magnitude below which every integer is exactly representable.
const EXACT_INTEGER_LIMIT: f64 = 9_007_199_254_740_992.0;

pub fn fnv1a32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, &byte| {
        (hash ^ u32::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

pub fn stable_stringify(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(flag) => out.push_str(if *flag { "true" } else { "false" }),
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                let _ = write!(out, "{}", int);
            } else if let Some(uint) = number.as_u64() {
                let _ = write!(out, "{}", uint);
            } else {
                write_float(out, number.as_f64().unwrap_or(f64::NAN));
            }
        }
        Value::String(text) => {
            let _ = write!(out, "{}", Value::String(text.clone()));
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (index, (key, item)) in entries.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}:", Value::String(key.clone()));
                write_value(out, item);
            }
            out.push('}');
        }
    }
}

fn write_float(out: &mut String, value: f64) {
    if !value.is_finite() {
        out.push_str("null");
    } else if value == 0.0 {
        // Covers negative zero.
        out.push('0');
    } else if value.fract() == 0.0 && value.abs() < EXACT_INTEGER_LIMIT {
        let _ = write!(out, "{}", value as i64);
    } else {
        let _ = write!(out, "{}", value);
    }
}

/// Checksum of a JSON value as fixed-width lowercase hex.
pub fn hash_json(value: &Value) -> String {
    format!("{:08x}", fnv1a32(stable_stringify(value).as_bytes()))
}

/// Checksum of any serializable value. Non-finite floats become `null`.
pub fn hash_value<T: Serialize>(value: &T) -> serde_json::Result<String> {
    Ok(hash_json(&serde_json::to_value(value)?))
}
