//! Newline-delimited JSON server over a byte stream pair.

pub mod protocol;
pub mod server;

pub use protocol::{IpcRequest, IpcResponse, ReadyHandshake};
pub use server::run_server;
