//! Log decoding against a JSON ABI
//!
//! topic0 selects the event by selector; indexed parameters come from the
//! remaining topics and the rest from the data section. Arguments are
//! returned as a JSON object keyed by parameter name. Integers are decimal
//! strings, byte values `0x` hex, addresses lowercase hex.

use super::{ChainError, ContractAbi};
use alloy_dyn_abi::{DynSolValue, EventExt};
use alloy_primitives::B256;
use serde_json::{Map, Value};
use std::str::FromStr;

/// Parse `0x`-prefixed topic strings
pub fn parse_topics(topics: &[String]) -> Result<Vec<B256>, ChainError> {
    topics
        .iter()
        .map(|t| B256::from_str(t).map_err(|e| ChainError::Abi(format!("bad topic {}: {}", t, e))))
        .collect()
}

pub fn parse_data(data: &str) -> Result<Vec<u8>, ChainError> {
    let digits = data.strip_prefix("0x").unwrap_or(data);
    hex::decode(digits).map_err(|e| ChainError::Abi(format!("bad log data: {}", e)))
}

/// Decode one raw log into `(event_name, args)`
pub fn decode_log(
    abi: &ContractAbi,
    topics: &[B256],
    data: &[u8],
) -> Result<(String, Value), ChainError> {
    let topic0 = topics
        .first()
        .ok_or_else(|| ChainError::Abi("log has no topics".to_string()))?;

    let event = abi
        .inner()
        .events()
        .find(|e| !e.anonymous && e.selector() == *topic0)
        .ok_or_else(|| ChainError::Abi(format!("no event with selector {}", topic0)))?;

    let decoded = event
        .decode_log_parts(topics.iter().copied(), data, true)
        .map_err(|e| ChainError::Abi(format!("{}: {}", event.name, e)))?;

    let mut indexed = decoded.indexed.into_iter();
    let mut body = decoded.body.into_iter();
    let mut args = Map::new();

    for (position, param) in event.inputs.iter().enumerate() {
        let value = if param.indexed { indexed.next() } else { body.next() };
        let Some(value) = value else {
            return Err(ChainError::Abi(format!(
                "{}: missing value for parameter {}",
                event.name, position
            )));
        };
        let key = if param.name.is_empty() {
            format!("arg{}", position)
        } else {
            param.name.clone()
        };
        args.insert(key, to_json(&value));
    }

    Ok((event.name.clone(), Value::Object(args)))
}

fn to_json(value: &DynSolValue) -> Value {
    match value {
        DynSolValue::Bool(b) => Value::Bool(*b),
        DynSolValue::Int(i, _) => Value::String(i.to_string()),
        DynSolValue::Uint(u, _) => Value::String(u.to_string()),
        DynSolValue::FixedBytes(word, size) => {
            Value::String(format!("0x{}", hex::encode(&word[..*size])))
        }
        DynSolValue::Address(a) => Value::String(a.to_string().to_lowercase()),
        DynSolValue::Bytes(b) => Value::String(format!("0x{}", hex::encode(b))),
        DynSolValue::String(s) => Value::String(s.clone()),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            Value::Array(items.iter().map(to_json).collect())
        }
        #[allow(unreachable_patterns)]
        other => Value::String(format!("{:?}", other)),
    }
}
