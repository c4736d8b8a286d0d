pub mod client;
pub mod types;

pub use client::OpenAIUpstream;
pub use types::TokenUsage;
