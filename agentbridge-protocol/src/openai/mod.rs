//! OpenAI-compatible wire types (spec §6.2).

pub mod chunk;
pub mod error;
pub mod request;
pub mod response;

pub use chunk::{
    ChatCompletionChunk, ChunkChoice, ChunkUsage, CompletionChunk, CompletionChunkChoice, Delta,
    DeltaToolCall, DeltaToolCallFunction, SSE_DONE_LINE,
};
pub use error::{OpenAiErrorBody, OpenAiErrorDetail};
pub use request::{ChatCompletionRequest, ChatMessage, CompletionRequest, ContentPart, MessageContent};
pub use response::{
    ChatCompletionResponse, ChatCompletionResponseChoice, ChatResponseMessage, CompletionResponse,
    CompletionResponseChoice, ModelObject, ModelsListResponse,
};
