//! Session state machine
//!
//! This module owns the live study session. Host events (tab focus, tab
//! updates, idle changes, stars) and asynchronous content verdicts are applied
//! strictly in delivery order; every transition closes the open visit interval
//! with a flush before opening the next one.
//!
//! Pieces: a monotonic/wall clock split, a pending content-probe table, and the
//! engine itself.

pub mod clock;
pub mod machine;
pub mod probe;

pub use clock::{Clock, ManualClock, SystemClock};
pub use machine::{EngineState, SessionEngine};
pub use probe::{PendingProbes, ProbePolicy, ProbeRequest, ProbeTicket};
