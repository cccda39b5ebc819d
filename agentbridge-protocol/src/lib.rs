//! Wire types shared by the gateway core and HTTP/WS transport: the agent RPC frame
//! envelope, the typed RPC method payloads, OpenAI-compatible DTOs, and the model
//! mapping record.

pub mod agent_methods;
pub mod frame;
pub mod mapping;
pub mod openai;

pub use agent_methods::{
    AgentErrorArgs, DownloadModelArgs, GenerationArgs, LoadModelArgs, LoadModelResult,
    ModelsResult, ReceiveCompletionArgs, StartModelArgs, StartModelResult, StatusResult,
    DONE_MARKER,
};
pub use frame::{CallId, Frame, RpcError};
pub use mapping::ModelMapping;
