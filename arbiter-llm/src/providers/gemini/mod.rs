//! Google Gemini provider implementation

pub mod client;
pub mod judge;
pub mod types;

pub use client::GeminiClient;
pub use judge::GeminiJudge;
