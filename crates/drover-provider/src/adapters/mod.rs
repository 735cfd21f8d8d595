//! One adapter per wire dialect. The OpenAI-compatible backends (openai,
//! xai, scalytics-copilot, openrouter, deepseek, groq, vllm) share a single
//! codec parameterized by endpoint, auth, and rate-limit profile; codex and
//! gemini-cli wrap a sibling codec with CLI-cached OAuth credentials.

pub mod anthropic;
pub mod codex;
pub mod gemini;
pub mod gemini_cli;
pub mod openai;

pub use anthropic::AnthropicAdapter;
pub use codex::CodexAdapter;
pub use gemini::GeminiAdapter;
pub use gemini_cli::GeminiCliAdapter;
pub use openai::OpenAiAdapter;
