//! Language server front end for Linterhub.
//!
//! Speaks JSON-RPC with `Content-Length` framing over any byte stream and
//! drives one [`linterhub_engine::Orchestrator`] per session.

pub mod codec;
mod host;
pub mod protocol;
mod server;

pub use host::{CLIENT_REQUEST_TIMEOUT, ClientHost, Outbound};
pub use server::{OrchestratorFactory, Server};
