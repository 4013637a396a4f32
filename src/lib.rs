//! webrpc: a bidirectional, capability-style RPC runtime.
//!
//! A [`session::Session`] sits on top of an abstract [`channel::Channel`] and
//! turns JSON frames into dispatched calls on either [`dispatch::Dispatchable`]
//! local objects or [`proxy::RemoteHandle`]s standing in for the peer's
//! objects. [`durable_socket::DurableSocket`] is the reconnecting transport
//! most applications actually plug in; [`service_proxy::ServiceProxy`] is the
//! façade that survives reconnects by re-resolving services and
//! re-subscribing on recovery.

pub mod channel;
pub mod dispatch;
pub mod durable_socket;
pub mod error;
pub mod introspection;
pub mod proxy;
pub mod reference;
pub mod registry;
pub mod service;
pub mod service_proxy;
pub mod session;

pub use channel::{Channel, ChannelError, InMemoryChannel, Readiness};
pub use dispatch::Dispatchable;
pub use durable_socket::{DurableSocket, DurableSocketOptions, RawConnector};
pub use error::{raise, RpcError};
pub use introspection::{discovered, event, method, ServiceIntrospectionBuilder};
pub use proxy::{RemoteHandle, RemoteSubscription, RequestSender};
pub use service::{ServiceHandle, ServiceRegistry};
pub use service_proxy::ServiceProxy;
pub use session::{Session, SessionOptions};
