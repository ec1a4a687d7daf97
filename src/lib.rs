//! DeepStudy - Focus and burnout scoring engine for browser study sessions
//!
//! DeepStudy turns the tab, idle, and star events of a browser study session
//! into time accounting and scores: event ingestion → domain classification
//! → interval flushing → focus scoring → burnout scoring → storage and sync.
//!
//! ## Modules
//!
//! - **Engine**: Session state machine, probe table, and clock split
//! - **Scoring**: Focus and burnout calculators shared by every caller
//! - **Storage & Sync**: JSON session store and dashboard sync adapter
//! - **Driver & Replay**: Async event loop and deterministic replay of recordings

pub mod burnout;
pub mod classifier;
pub mod collaborators;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod focus;
pub mod replay;
pub mod store;
pub mod sync;
pub mod types;

pub use burnout::{burnout_breakdown, compute_burnout, BurnoutBreakdown};
pub use classifier::{ContentHeuristic, DomainClassifier, DomainPolicy};
pub use config::{InterventionMode, Settings};
pub use driver::{Driver, EngineHandle};
pub use engine::{EngineState, ManualClock, SessionEngine, SystemClock};
pub use error::EngineError;
pub use focus::{compute_focus, FocusInputs, FocusOutcome};
pub use store::JsonSessionStore;
pub use sync::{HttpSyncAdapter, SyncRequest};
pub use types::{Category, HistoricalSessionSummary, Session};

/// Engine version reported by the CLI
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for synced payloads and logs
pub const PRODUCER_NAME: &str = "deepstudy";
