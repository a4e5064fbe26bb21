//! Azure OpenAI provider module
//! This module provides the deployment-scoped chat-completion and embedding client

pub mod client;
pub mod types;

pub use client::{is_transient_status, AzureOpenAIClient};
pub use types::{
    AzureChatMessage, AzureChatRequest, AzureChatResponse, AzureChoice, AzureEmbeddingRequest,
    AzureEmbeddingResponse, AzureTool, AzureToolCall, AzureUsage,
};
