//! expandai: multi-agent LLM chat with tool calling.
//!
//! A turn goes through [`orchestrator::Orchestrator`], which picks native
//! tool calling when the model supports it and falls back to a text
//! protocol ([`drivers::react`]) when the provider rejects tool schemas.
//! Either way the caller sees the same [`types::StreamEvent`] sequence.

pub mod chat;
pub mod config;
pub mod drivers;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod router;
pub mod runtime;
pub mod tools;
pub mod types;
