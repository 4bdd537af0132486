//! Multi-agent text-to-SQL pipeline.
//!
//! Each question becomes a [`WorkItem`] that an [`Orchestrator`] routes
//! between three agents until it is terminal or out of rounds. All model
//! traffic goes through a [`ResilientClient`], which adds rate limiting,
//! retry with backoff, and token accounting on top of an
//! OpenAI-compatible [`LlmProvider`].
//!
//! # Architecture
//!
//! ```text
//! WorkItem (route = Selector) → Orchestrator
//!   ├── SelectorAgent    loads the schema, prunes large ones with the model
//!   ├── DecomposerAgent  writes candidate SQL
//!   └── RefinerAgent     executes it, repairs failures up to the budget
//!        └── route = Terminal
//! ```

pub mod backoff;
pub mod client;
pub mod clock;
pub mod config;
pub mod decomposer;
pub mod dialect;
pub mod extract;
pub mod message;
pub mod orchestrator;
pub mod prompt;
pub mod provider;
pub mod providers;
pub mod rate_limit;
pub mod refiner;
pub mod resilient;
pub mod selector;
pub mod traits;
pub mod work_item;

// Re-export key types
pub use backoff::RetryPolicy;
pub use client::{create_client, create_provider};
pub use clock::{Clock, ManualClock, TokioClock};
pub use config::AgentConfig;
pub use decomposer::DecomposerAgent;
pub use dialect::Dialect;
pub use extract::{ExtractionError, extract_sql};
pub use message::{ChatMessage, ChatRequest, ChatResponse, Role, TokenUsage};
pub use orchestrator::{Dataset, Orchestrator, Pipeline, RunSummary};
pub use prompt::{DecomposeStyle, PromptSet};
pub use provider::LlmProvider;
pub use rate_limit::{RateLimitConfig, RateLimiter, UsageSnapshot};
pub use refiner::{RefinePolicy, RefinerAgent};
pub use resilient::{Completion, ModelClient, ResilientClient};
pub use selector::SelectorAgent;
pub use traits::{Agent, AgentModel};
pub use work_item::{Route, WorkItem};
