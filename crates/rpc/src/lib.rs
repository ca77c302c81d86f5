//! Line-oriented bidirectional JSON-RPC over stdio, for agents that speak
//! the Codex-style thread/turn protocol (§4.C3).

pub mod multiplexer;
pub mod protocol;

pub use multiplexer::{Multiplexer, Notification};
pub use protocol::{classify, ClientInfo, JsonRpcError, JsonRpcRequest, JsonRpcResponse, ParsedMessage};
