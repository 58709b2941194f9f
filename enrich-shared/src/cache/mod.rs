//! Request caches: content-addressed external API responses and
//! prompt-fingerprint LLM completions, each with an in-process moka front
//! over the durable sink.

pub mod ai;
pub mod key;
pub mod response;

pub use ai::{AiCache, CachedCompletion, CompletionKey, TokenUsage};
pub use key::{completion_cache_key, response_cache_key, SECRET_HEADERS};
pub use response::{CachedResponse, ResponseCache};
