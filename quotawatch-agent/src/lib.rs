// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # `QuotaWatch` Agent
//!
//! The polling core of `QuotaWatch`: one [`Orchestrator`] per provider
//! account, each running on its own task.
//!
//! ## Pipeline
//!
//! ```text
//! Scheduler tick
//!   -> AuthRetryPolicy (credential refresh, one auth retry, pause breaker)
//!   -> UsageFetcher
//!   -> Store::insert_snapshot
//!   -> ResetTracker -> Normalizer -> SessionManager
//!   -> Notifier (per quota)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use quotawatch_agent::{shutdown, KeyedNormalizer, Orchestrator, OrchestratorConfig};
//!
//! let (trigger, signal) = shutdown::channel();
//! let agent = Orchestrator::new(
//!     fetcher,
//!     KeyedNormalizer::new(["requests", "tokens"]),
//!     store,
//!     OrchestratorConfig::new(Duration::from_secs(60)),
//! )?;
//! let handle = tokio::spawn(agent.run(signal));
//! // ...
//! trigger.trigger();
//! handle.await??;
//! ```

pub mod circuit;
pub mod error;
pub mod normalize;
pub mod notify;
pub mod orchestrator;
pub mod scheduler;
pub mod session;
pub mod shutdown;
pub mod tracker;

// Errors
pub use error::{AgentError, NotifyError};

// Scheduling and cancellation
pub use scheduler::{Poller, Scheduler};
pub use shutdown::{Shutdown, ShutdownTrigger};

// Auth policy
pub use circuit::{
    AuthRetryPolicy, CircuitState, DEFAULT_AUTH_FAILURE_THRESHOLD, PollOutcome, TokenGate,
};

// Detection
pub use normalize::{KeyedNormalizer, Normalizer};
pub use session::{ActiveSession, DEFAULT_IDLE_TIMEOUT, SessionManager};
pub use tracker::{RESET_GRACE_SECS, ResetTracker};

// Alerts
pub use notify::{
    Alert, AlertLevel, AlertSink, LogSink, Notifier, QuotaStatus, ThresholdNotifier, WebhookSink,
};

// Orchestration
pub use orchestrator::{AgentStatus, Orchestrator, OrchestratorConfig, PollingSwitch};
