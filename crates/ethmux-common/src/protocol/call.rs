//! Parsed call model.
//!
//! Handlers inside ethmux work with a request's parameters split into
//! positional arguments and a keyword map, matching the two shapes the
//! Ethereum JSON-RPC surface uses. A named argument literally called `from`
//! is renamed to `from_addr` at parse time; `from` is a reserved word in
//! several languages that consume these calls, so it never appears as a
//! handler input.

use serde_json::{Map, Value};

use super::jsonrpc::JsonRpcRequest;

/// The reserved-word alias for the `from` parameter.
pub const FROM_ADDR_KEY: &str = "from_addr";

/// A JSON-RPC request with its parameters parsed into positional and named
/// forms.
///
/// Parsing rules:
/// - no `params`: empty args and kwargs
/// - `params` is an array whose single element is an object: that object
///   becomes the kwargs (with the `from` rename)
/// - `params` is any other array: the elements become positional args
/// - `params` is an object: it becomes the kwargs (with the `from` rename)
#[derive(Debug, Clone)]
pub struct RpcCall {
    /// The original request, untouched
    pub request: JsonRpcRequest,
    /// Positional parameters
    pub args: Vec<Value>,
    /// Named parameters, with `from` renamed to `from_addr`
    pub kwargs: Map<String, Value>,
}

impl RpcCall {
    /// Parses a request into its positional/named parameter forms.
    pub fn parse(request: JsonRpcRequest) -> Self {
        let mut args = Vec::new();
        let mut kwargs = Map::new();
        match &request.params {
            None => {}
            Some(Value::Array(items)) => {
                if items.len() == 1 {
                    if let Value::Object(map) = &items[0] {
                        kwargs = rename_from(map.clone());
                    } else {
                        args = items.clone();
                    }
                } else {
                    args = items.clone();
                }
            }
            Some(Value::Object(map)) => {
                kwargs = rename_from(map.clone());
            }
            // a scalar params value is degenerate but tolerated as one arg
            Some(other) => args.push(other.clone()),
        }
        Self {
            request,
            args,
            kwargs,
        }
    }

    /// The method name of the underlying request.
    pub fn method(&self) -> &str {
        &self.request.method
    }

    /// The first positional parameter, if any.
    pub fn first_arg(&self) -> Option<&Value> {
        self.args.first()
    }
}

fn rename_from(mut map: Map<String, Value>) -> Map<String, Value> {
    if let Some(value) = map.remove("from") {
        map.insert(FROM_ADDR_KEY.to_string(), value);
    }
    map
}
