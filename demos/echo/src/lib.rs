//! Minimal echo demo built on the `webrpc` runtime: a server exposing a
//! single "echo" service over real WebSocket connections, and a client
//! façade that calls it through [`webrpc::DurableSocket`].

pub mod config;
pub mod ws_channel;
