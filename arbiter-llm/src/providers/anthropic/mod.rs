//! Anthropic (Claude) provider implementation
//!
//! This module provides a Claude-backed judge.

pub mod client;
pub mod judge;
pub mod types;

pub use client::AnthropicClient;
pub use judge::AnthropicJudge;
