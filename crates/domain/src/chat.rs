use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::message::Message;
use crate::tool::ToolSpec;

pub type BoxStream<'a, T> = std::pin::Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Why the model stopped generating. `Length` is what drives context
/// recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Cancelled,
}

/// Events yielded by `ChatBackend::stream_chat`, the only external
/// collaborator the agent loop depends on. Wire protocol encoding lives
/// behind the trait.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    TextDelta(String),
    ToolCalls(Vec<RawToolCall>),
    Completed { finish_reason: FinishReason },
    ContextLengthExceeded,
    Error(String),
}

/// A tool call as it comes off the wire, before `ToolCall::from_raw`
/// parses `raw_arguments`.
#[derive(Debug, Clone)]
pub struct RawToolCall {
    pub call_id: String,
    pub name: String,
    pub raw_arguments: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
}

/// Abstract chat completion backend. The engine never encodes a provider's
/// wire protocol directly — it drives this trait.
#[async_trait::async_trait]
pub trait ChatBackend: Send + Sync {
    async fn stream_chat(&self, req: ChatRequest) -> Result<BoxStream<'static, StreamEvent>, EngineError>;
}
