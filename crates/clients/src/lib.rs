//! Thin HTTP wrappers around the runtime's external collaborators: the
//! LLM provider (chat / search / embed), the data service (document
//! parsing + semantic query), and the object store's POST-policy
//! signer. Every call carries a deadline; retrying is the caller's
//! concern.

pub mod data_service;
pub mod llm;
pub mod object_store;
mod sse;

pub use data_service::{DataService, HttpDataService, ParsedDocument};
pub use llm::{
    BoxStream, ChatMessage, ChatStreamRequest, HttpLlmClient, LlmClient, LlmEvent, SearchHit,
    ToolSpec,
};
pub use object_store::{PostPolicy, PostPolicySigner};
