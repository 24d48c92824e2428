pub mod call;
pub mod jsonrpc;
pub mod outcome;


pub use call::RpcCall;
pub use jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION};
pub use outcome::{ClientResult, RpcFailure};
