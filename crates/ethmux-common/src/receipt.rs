//! Transaction receipt interpretation.
//!
//! `eth_getTransactionReceipt` is the system's "is it mined yet" primitive.
//! The answer is a tri-state: `Some(true)` mined and succeeded, `Some(false)`
//! mined and reverted, `None` still pending (poll again).

use serde_json::Value;

use crate::hex::decode_quantity;
use crate::protocol::JsonRpcResponse;

/// Interprets a receipt response.
///
/// A receipt that names a `contractAddress` or a `blockHash` is considered
/// mined even when no `status` field is present; older clients omit it.
pub fn receipt_status(response: &JsonRpcResponse) -> Option<bool> {
    let result = response.result_value()?;
    if non_null_field(result, "contractAddress").is_some() {
        return Some(true);
    }
    if non_null_field(result, "blockHash").is_some() {
        return Some(true);
    }
    let status = non_null_field(result, "status")?;
    let status = match status {
        Value::Number(n) => n.as_u64()? as u128,
        Value::String(s) => decode_quantity(s)?,
        _ => return None,
    };
    Some(status > 0)
}

/// The `contractAddress` of a receipt result, when one was created.
pub fn contract_address(result: &Value) -> Option<&str> {
    non_null_field(result, "contractAddress")?.as_str()
}

/// The `gasUsed` quantity of a receipt result.
pub fn gas_used(result: &Value) -> Option<u128> {
    match non_null_field(result, "gasUsed")? {
        Value::Number(n) => n.as_u64().map(|n| n as u128),
        Value::String(s) => decode_quantity(s),
        _ => None,
    }
}

fn non_null_field<'a>(result: &'a Value, key: &str) -> Option<&'a Value> {
    match result.get(key) {
        Some(Value::Null) | None => None,
        Some(v) => Some(v),
    }
}
