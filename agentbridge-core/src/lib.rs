//! Gateway core: the agent registry, router, RPC multiplexer, request broker, name
//! mapper, and sqlite persistence that back the HTTP/WS transport layer.

pub mod broker;
pub mod error;
pub mod mapper;
pub mod persistence;
pub mod registry;
pub mod router;
pub mod rpc;
pub mod transport;

pub use broker::{BrokerState, RequestBroker, RequestKind};
pub use error::GatewayError;
pub use mapper::NameMapper;
pub use persistence::{PersistError, Store};
pub use registry::{AgentRegistry, AgentSnapshot};
pub use router::select_agent;
pub use rpc::RpcMultiplexer;
pub use transport::AgentHandle;
