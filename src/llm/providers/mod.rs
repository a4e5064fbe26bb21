//! LLM Providers Module
//!
//! Each provider lives in its own subdirectory containing:
//! - client.rs: Provider-specific client implementation
//! - types.rs: Provider-specific request/response types
//! - mod.rs: Module exports

pub mod azure;

// Re-export provider clients for convenience
pub use azure::AzureOpenAIClient;
