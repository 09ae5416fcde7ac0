//! Convenience re-exports for consumers of the runtime.

pub use crate::agent::{
    Agent, AggChaptersAgent, AttachChaptersAgent, BqaAgent, ChapterPromptAgent, JudgeLabel,
    NewStateAgent, PairwiseJudge, RewardAgent, SelectActionsAgent, StateSelectAgent,
};
pub use crate::chapter::{ChapterNode, ChapterStructure};
pub use crate::embedding::{Embedder, EmbeddingClient};
pub use crate::error::{Error, Result, ToolError};
pub use crate::feedback::Feedback;
pub use crate::fsm::{Action, Memory, State, StateMachine, Step};
pub use crate::llm::{
    ChatProvider, ChatRequest, ChatResponse, LlmEngine, MockProvider, OpenAiProvider, ToolChoice,
    ToolSpec,
};
pub use crate::message::{AIContext, Content, ContentPart, Message, Role, ToolCall};
pub use crate::qa::{BQAItem, BQAList, Ospa, QAItem, QAList};
pub use crate::service::{
    BackwardRequest, BackwardResponse, BackwardService, CancelFlag, ChatService, ChatTurnRequest,
    ChatTurnResponse, FeedbackRecall, FeedbackService, ResultType, RewardResult, RewardService,
};
pub use crate::setting::{EmbeddingSetting, LlmSetting, Setting, VectorDbSetting};
pub use crate::store::{MemoryStore, VectorStore, WeaviateStore};
pub use crate::tool::{RequestMethod, RequestTool, SendMessageToUser, Tool, ToolRegistry};
pub use crate::usage::{TokenCounter, TokenCounterSnapshot, Usage};
