//! Hex-quantity and address formatting helpers.
//!
//! Ethereum clients are loose about numeric encodings: the same address may
//! arrive as `"0xAB"`, `"0x00ab"`, or even a decimal string depending on the
//! tooling that produced it. Identifier synchronization compares values by
//! the integer they denote, so everything funnels through a canonical form:
//! lowercase hex with no `0x` prefix and no leading zeros.

use serde_json::Value;

/// Decodes a JSON-RPC quantity (`"0x5208"` or decimal) into an integer.
///
/// 128 bits covers every quantity the core compares (gas, nonces, balances);
/// full-width hashes go through [`canonicalize`] instead.
pub fn decode_quantity(raw: &str) -> Option<u128> {
    let raw = raw.trim();
    if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        u128::from_str_radix(hex, 16).ok()
    } else if raw.chars().any(|c| matches!(c, 'a'..='f' | 'A'..='F')) {
        u128::from_str_radix(raw, 16).ok()
    } else {
        raw.parse().ok()
    }
}

/// Canonicalizes a hex or decimal string to lowercase hex with no `0x`
/// prefix and no leading zeros. Two strings denote the same integer exactly
/// when their canonical forms are equal.
pub fn canonicalize(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let hex = if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        hex.to_ascii_lowercase()
    } else if raw.chars().all(|c| c.is_ascii_digit()) {
        // decimal form; widths beyond u128 never appear undecorated
        return Some(format!("{:x}", raw.parse::<u128>().ok()?));
    } else {
        raw.to_ascii_lowercase()
    };
    if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let trimmed = hex.trim_start_matches('0');
    Some(if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    })
}

/// Canonicalizes a JSON value when it plausibly denotes an identifier.
///
/// Only strings and integers qualify; objects, arrays, and booleans are
/// never identifiers.
pub fn canonicalize_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => canonicalize(s),
        Value::Number(n) => n.as_u64().map(|n| format!("{n:x}")),
        _ => None,
    }
}

/// Formats a value as a `0x`-prefixed hex address, zero-padded to 20 bytes.
///
/// Values wider than 20 bytes are rounded up to 32 bytes instead; those are
/// transaction hashes rather than addresses.
pub fn format_hex_address(raw: &str) -> String {
    let body = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw)
        .to_ascii_lowercase();
    let width = if body.len() <= 40 { 40 } else { 64 };
    format!("0x{body:0>width$}")
}

/// Strips an optional `0x` prefix.
pub fn strip_0x(raw: &str) -> &str {
    raw.strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw)
}

/// Decodes a `0x`-prefixed hex blob into bytes.
pub fn decode_hex(raw: &str) -> Option<Vec<u8>> {
    let body = strip_0x(raw);
    if body.len() % 2 != 0 {
        return None;
    }
    (0..body.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&body[i..i + 2], 16).ok())
        .collect()
}

/// Encodes bytes as a `0x`-prefixed lowercase hex string.
pub fn encode_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("0x");
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}
