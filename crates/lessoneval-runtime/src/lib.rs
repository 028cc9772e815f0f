//! # lessoneval-runtime
//!
//! Concurrent, multi-provider evaluation of lesson plans.
//!
//! This crate drives the network half of an evaluation. The scoring rules,
//! record types and parsing live in `lessoneval-core`; everything here is
//! about calling providers safely and persisting what comes back.
//!
//! ## Guarantees
//!
//! 1. **Isolation**: one dimension failing, stalling or panicking never
//!    cancels or alters its siblings
//! 2. **Bounded**: every call has a timeout, every retry loop has an attempt
//!    cap, and the whole fan-out has a deadline
//! 3. **Classified failures**: only transient provider errors are retried
//! 4. **Persisted once**: a record is created `pending` and completed exactly
//!    once
//!
//! ## Example
//!
//! ```rust,ignore
//! use lessoneval_core::EvaluationRequest;
//! use lessoneval_runtime::{EvaluationOptions, EvaluationOrchestrator, RuntimeConfig};
//!
//! let orchestrator = EvaluationOrchestrator::builder()
//!     .config(RuntimeConfig::from_file("lessoneval.yaml")?)
//!     .build()?;
//!
//! let request = EvaluationRequest::new("Harbour study", lesson_text);
//! let record = orchestrator.run(request, EvaluationOptions::default()).await?;
//! println!("{:?} {:?}", record.status, record.overall_score());
//! ```

pub mod agents;
pub mod config;
pub mod consensus;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod resilience;
pub mod store;

pub use agents::{AgentState, DimensionAgent, RubricAgent};
pub use config::{ConfigError, DebateConfig, ProviderSettings, RuntimeConfig};
pub use consensus::ConsensusPass;
pub use orchestrator::{
    EvaluationOptions, EvaluationOrchestrator, EvaluationOrchestratorBuilder, OrchestratorError,
};
pub use prompts::{PromptError, PromptLibrary};
pub use providers::{
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, MockProvider, ProviderBinding,
    ProviderError, ProviderRegistry, Role,
};
pub use resilience::{RetryError, RetryPolicy};
pub use store::{
    MemoryResultStore, ResultStore, SqliteResultStore, StoreError, StoreStatistics,
};
