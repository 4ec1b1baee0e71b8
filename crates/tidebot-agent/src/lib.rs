//! tidebot-agent: the LLM-driven side of tidebot.
//!
//! Provides:
//! - [`llm`]: the provider trait and an OpenAI-compatible client
//! - [`run_tool_loop`], the LLM ↔ tool iteration
//! - [`AgentLoop`], which answers inbound bus messages
//! - [`SubagentManager`], which runs delegated tasks in the background
//! - [`BusJobHandler`], which turns fired cron jobs into agent turns
//! - [`Runtime`], which wires everything together

pub mod agent_loop;
pub mod cron_handler;
pub mod llm;
pub mod runner;
pub mod runtime;
pub mod subagent;
pub mod tools;

#[cfg(test)]
mod test_support;

pub use agent_loop::AgentLoop;
pub use cron_handler::BusJobHandler;
pub use llm::{LlmError, LlmProvider, OpenAiProvider};
pub use runner::{AgentError, LoopOutcome, run_tool_loop};
pub use runtime::Runtime;
pub use subagent::{SpawnRequest, SubagentManager};
