//! Solidity ABI parameter codec.
//!
//! [`encode_params`] is the single function that turns `(paramTypes, params)`
//! into bytes. Timelock queueing and execution both call it, so the payload
//! the timelock hashes is identical on both sides, including after a snapshot
//! has been written to disk and read back by another process.
//!
//! Values are JSON:
//! - `address`: hex string (`0x` optional, any case)
//! - `uintN` / `intN`: decimal string, `0x` hex string, or a JSON integer
//! - `bool`: `true`/`false` (or the strings)
//! - `string`: string
//! - `bytes` / `bytesN`: hex string
//! - arrays and tuples: JSON arrays
//!
//! JSON floats are rejected: a float cannot round-trip an integer above 2^53.

use ethers::abi::{self, param_type::Reader, ParamType, Token};
use ethers::types::{Address, Bytes, U256};
use ethers::utils::{id, to_checksum};
use serde_json::Value;

use crate::error::EncodingError;

/// Parse one Solidity type tag (`uint256`, `address[]`, `(uint256,bool)`).
pub fn parse_param_type(ty: &str) -> Result<ParamType, EncodingError> {
    let kind = Reader::read(ty.trim()).map_err(|e| EncodingError::UnknownType {
        ty: ty.to_string(),
        reason: e.to_string(),
    })?;
    check_width(&kind).map_err(|reason| EncodingError::UnknownType {
        ty: ty.to_string(),
        reason,
    })?;
    Ok(kind)
}

/// Integer widths must be a multiple of 8 in `8..=256`, at any nesting depth.
fn check_width(kind: &ParamType) -> Result<(), String> {
    match kind {
        ParamType::Uint(bits) | ParamType::Int(bits) => {
            if *bits % 8 == 0 && (8..=256).contains(bits) {
                Ok(())
            } else {
                Err(format!("invalid integer width {}", bits))
            }
        }
        ParamType::Array(inner) | ParamType::FixedArray(inner, _) => check_width(inner),
        ParamType::Tuple(kinds) => kinds.iter().try_for_each(check_width),
        _ => Ok(()),
    }
}

/// Parse a list of type tags.
pub fn parse_param_types<S: AsRef<str>>(types: &[S]) -> Result<Vec<ParamType>, EncodingError> {
    types.iter().map(|t| parse_param_type(t.as_ref())).collect()
}

/// Argument type tags of a function signature, e.g. `f(address,(uint8,bool))`
/// yields `["address", "(uint8,bool)"]`.
pub fn signature_arguments(signature: &str) -> Result<Vec<String>, EncodingError> {
    let invalid = || EncodingError::InvalidSignature {
        signature: signature.to_string(),
    };
    let open = signature.find('(').ok_or_else(invalid)?;
    if open == 0 || !signature.ends_with(')') {
        return Err(invalid());
    }
    let inner = &signature[open + 1..signature.len() - 1];
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (idx, ch) in inner.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.checked_sub(1).ok_or_else(invalid)?,
            ',' if depth == 0 => {
                args.push(inner[start..idx].trim().to_string());
                start = idx + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(invalid());
    }
    args.push(inner[start..].trim().to_string());
    if args.iter().any(|a| a.is_empty()) {
        return Err(invalid());
    }
    Ok(args)
}

/// Check that a non-empty signature declares exactly `kinds` as its arguments.
pub fn check_signature(signature: &str, kinds: &[ParamType]) -> Result<(), EncodingError> {
    if signature.is_empty() {
        return Ok(());
    }
    let declared = parse_param_types(&signature_arguments(signature)?)?;
    if declared.as_slice() != kinds {
        return Err(EncodingError::SignatureMismatch {
            signature: signature.to_string(),
            param_types: kinds.iter().map(|k| k.to_string()).collect(),
        });
    }
    Ok(())
}

/// ABI-encode `params` as the tuple described by `types`
/// (`defaultAbiCoder.encode(types, params)`).
pub fn encode_params<S: AsRef<str>>(types: &[S], params: &[Value]) -> Result<Bytes, EncodingError> {
    let kinds = parse_param_types(types)?;
    let tokens = tokenize_all(&kinds, params)?;
    Ok(Bytes::from(abi::encode(&tokens)))
}

/// Selector of `signature` followed by the encoded arguments.
///
/// The argument types are read from the signature itself.
pub fn encode_call(signature: &str, params: &[Value]) -> Result<Bytes, EncodingError> {
    let kinds = parse_param_types(&signature_arguments(signature)?)?;
    let tokens = tokenize_all(&kinds, params)?;
    let mut data = id(signature).to_vec();
    data.extend(abi::encode(&tokens));
    Ok(Bytes::from(data))
}

/// Convert JSON values into tokens, one per declared type.
pub fn tokenize_all(kinds: &[ParamType], params: &[Value]) -> Result<Vec<Token>, EncodingError> {
    if kinds.len() != params.len() {
        return Err(EncodingError::ArityMismatch {
            expected: kinds.len(),
            got: params.len(),
        });
    }
    kinds
        .iter()
        .zip(params)
        .map(|(kind, value)| tokenize(kind, value))
        .collect()
}

/// Convert one JSON value into a token of the given type.
pub fn tokenize(kind: &ParamType, value: &Value) -> Result<Token, EncodingError> {
    let invalid = |reason: &str| EncodingError::InvalidValue {
        ty: kind.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    };

    match kind {
        ParamType::Address => {
            let raw = value
                .as_str()
                .ok_or_else(|| invalid("expected a hex address string"))?;
            parse_address(raw).map(Token::Address)
        }
        ParamType::Uint(bits) => {
            if *bits == 0 || *bits > 256 {
                return Err(invalid("invalid integer width"));
            }
            let parsed = parse_uint(value).map_err(|reason| invalid(&reason))?;
            if *bits < 256 && parsed.bits() > *bits {
                return Err(invalid("value out of range"));
            }
            Ok(Token::Uint(parsed))
        }
        ParamType::Int(bits) => {
            let (negative, magnitude) = parse_int(value).map_err(|reason| invalid(&reason))?;
            let shift = bits
                .checked_sub(1)
                .filter(|shift| *shift < 256)
                .ok_or_else(|| invalid("invalid integer width"))?;
            let limit = U256::one() << shift;
            let out_of_range = if negative {
                magnitude > limit
            } else {
                magnitude >= limit
            };
            if out_of_range {
                return Err(invalid("value out of range"));
            }
            Ok(Token::Int(twos_complement(negative, magnitude)))
        }
        ParamType::Bool => match value {
            Value::Bool(b) => Ok(Token::Bool(*b)),
            Value::String(s) if s == "true" => Ok(Token::Bool(true)),
            Value::String(s) if s == "false" => Ok(Token::Bool(false)),
            _ => Err(invalid("expected a boolean")),
        },
        ParamType::String => value
            .as_str()
            .map(|s| Token::String(s.to_string()))
            .ok_or_else(|| invalid("expected a string")),
        ParamType::Bytes => {
            let raw = value.as_str().ok_or_else(|| invalid("expected a hex string"))?;
            decode_hex(raw)
                .map(Token::Bytes)
                .map_err(|reason| invalid(&reason))
        }
        ParamType::FixedBytes(len) => {
            let raw = value.as_str().ok_or_else(|| invalid("expected a hex string"))?;
            let bytes = decode_hex(raw).map_err(|reason| invalid(&reason))?;
            if bytes.len() != *len {
                return Err(invalid(&format!("expected {} bytes, got {}", len, bytes.len())));
            }
            Ok(Token::FixedBytes(bytes))
        }
        ParamType::Array(inner) => {
            let items = value.as_array().ok_or_else(|| invalid("expected an array"))?;
            let tokens = items
                .iter()
                .map(|item| tokenize(inner, item))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Token::Array(tokens))
        }
        ParamType::FixedArray(inner, len) => {
            let items = value.as_array().ok_or_else(|| invalid("expected an array"))?;
            if items.len() != *len {
                return Err(invalid(&format!("expected {} elements, got {}", len, items.len())));
            }
            let tokens = items
                .iter()
                .map(|item| tokenize(inner, item))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Token::FixedArray(tokens))
        }
        ParamType::Tuple(kinds) => {
            let items = value
                .as_array()
                .ok_or_else(|| invalid("expected an array for a tuple"))?;
            Ok(Token::Tuple(tokenize_all(kinds, items)?))
        }
    }
}

/// Decode ABI data (function return values) into tokens.
pub fn decode(kinds: &[ParamType], data: &[u8]) -> Result<Vec<Token>, EncodingError> {
    abi::decode(kinds, data).map_err(|e| EncodingError::Decode {
        reason: e.to_string(),
    })
}

/// Render a token as JSON in the same notation [`tokenize`] accepts.
pub fn token_to_json(token: &Token) -> Value {
    match token {
        Token::Address(addr) => Value::String(checksum(addr)),
        Token::Uint(v) => Value::String(v.to_string()),
        Token::Int(raw) => {
            if raw.bit(255) {
                let magnitude = (!*raw).overflowing_add(U256::one()).0;
                Value::String(format!("-{}", magnitude))
            } else {
                Value::String(raw.to_string())
            }
        }
        Token::Bool(b) => Value::Bool(*b),
        Token::String(s) => Value::String(s.clone()),
        Token::Bytes(b) | Token::FixedBytes(b) => Value::String(format!("0x{}", hex::encode(b))),
        Token::Array(items) | Token::FixedArray(items) | Token::Tuple(items) => {
            Value::Array(items.iter().map(token_to_json).collect())
        }
    }
}

/// Parse a 20-byte hex address.
pub fn parse_address(raw: &str) -> Result<Address, EncodingError> {
    let invalid = |reason: &str| EncodingError::InvalidValue {
        ty: "address".to_string(),
        value: raw.to_string(),
        reason: reason.to_string(),
    };
    let bytes = decode_hex(raw).map_err(|reason| invalid(&reason))?;
    if bytes.len() != 20 {
        return Err(invalid("expected 20 bytes"));
    }
    Ok(Address::from_slice(&bytes))
}

/// EIP-55 checksummed rendering of an address.
pub fn checksum(address: &Address) -> String {
    to_checksum(address, None)
}

/// Parse an unsigned integer from a decimal or `0x` hex string.
pub fn parse_uint_str(raw: &str) -> Result<U256, String> {
    let raw = raw.trim();
    if let Some(hex_digits) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        if hex_digits.is_empty() {
            return Err("empty hex number".to_string());
        }
        U256::from_str_radix(hex_digits, 16).map_err(|e| format!("{:?}", e))
    } else {
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err("expected a decimal integer".to_string());
        }
        U256::from_dec_str(raw).map_err(|e| format!("{:?}", e))
    }
}

fn parse_uint(value: &Value) -> Result<U256, String> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| "expected a non-negative integer (use a string for large values)".to_string()),
        Value::String(s) => parse_uint_str(s),
        _ => Err("expected an integer".to_string()),
    }
}

fn parse_int(value: &Value) -> Result<(bool, U256), String> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(|v| (v < 0, U256::from(v.unsigned_abs())))
            .ok_or_else(|| "expected an integer (use a string for large values)".to_string()),
        Value::String(s) => {
            let s = s.trim();
            match s.strip_prefix('-') {
                Some(rest) => parse_uint_str(rest).map(|m| (!m.is_zero(), m)),
                None => parse_uint_str(s).map(|m| (false, m)),
            }
        }
        _ => Err("expected an integer".to_string()),
    }
}

fn twos_complement(negative: bool, magnitude: U256) -> U256 {
    if negative {
        (!magnitude).overflowing_add(U256::one()).0
    } else {
        magnitude
    }
}

fn decode_hex(raw: &str) -> Result<Vec<u8>, String> {
    let raw = raw.trim();
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);
    hex::decode(digits).map_err(|e| format!("invalid hex: {}", e))
}
