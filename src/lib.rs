//! toolflow: a tool-calling chat runtime for OpenAI-compatible APIs.
//!
//! A [`chat::ChatBot`] drives each conversation through an interruptible
//! turn loop. Tool calls the model requests are confirmation-gated, then run
//! strictly one at a time through [`tools::ToolExecutor`]. New tools can be
//! compiled at runtime from a small sandboxed [`script`] language.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use toolflow::api::ApiClient;
//! use toolflow::chat::{
//!     ApprovalPolicy, ChatBot, ChatOptions, ChatRuntime, ChatSession, MemorySessionStore,
//!     StaticApprover,
//! };
//! use toolflow::config::load_config;
//! use toolflow::tools::{builtin::register_builtins, ToolExecutor, ToolRegistry};
//!
//! # async fn example() {
//! let config = load_config(None).unwrap();
//! let registry = ToolRegistry::new();
//! register_builtins(&registry, &config.builtin_options()).unwrap();
//! let runtime = ChatRuntime {
//!     service: Arc::new(ApiClient::new(&config.api).unwrap()),
//!     executor: ToolExecutor::new(registry),
//!     store: Arc::new(MemorySessionStore::new()),
//!     approver: Arc::new(StaticApprover(false)),
//!     policy: ApprovalPolicy::from(&config.approval),
//!     options: ChatOptions::from_config(&config),
//! };
//! let mut bot = ChatBot::new(runtime, ChatSession::new("demo", "me", ""));
//! let outcome = bot.send("Hello!", &CancellationToken::new()).await.unwrap();
//! println!("{outcome:?}");
//! # }
//! ```

pub mod api;
pub mod build_info;
pub mod chat;
pub mod config;
pub mod error;
pub mod prompt;
pub mod render;
pub mod script;
#[cfg(test)]
pub mod testsupport;
pub mod textutil;
pub mod tools;
pub mod types;
