//! Focus score calculation
//!
//! Turns a session's accumulators into effective study time and a 0-100 focus
//! score.

use serde::{Deserialize, Serialize};

use crate::types::Session;

/// Flat context-switch tax per penalized switch (seconds)
const SWITCH_TAX_SECONDS: f64 = 5.0;

/// Weight of the distracting-time ratio
const DISTRACTION_WEIGHT: f64 = 50.0;

/// Weight of the switch-per-second ratio
const SWITCH_WEIGHT: f64 = 30.0;

/// Points lost per micro-distraction
const MICRO_DISTRACTION_PENALTY: f64 = 2.0;

/// Domains first seen after the settling period that are free of penalty
const FREE_LATE_DOMAINS: usize = 5;

/// Points lost per late domain beyond the free allowance
const NOVELTY_PENALTY: f64 = 5.0;

/// Inputs of the focus formula, extracted from a finished session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FocusInputs {
    /// Session length in seconds
    pub elapsed_seconds: f64,
    pub distracting_seconds: f64,
    pub penalized_switches: u32,
    pub important_important_switches: u32,
    pub micro_distractions: u32,
    pub idle_seconds: f64,
    /// Distinct domains first seen after the first five minutes
    pub late_domains: usize,
}

impl FocusInputs {
    pub fn from_session(session: &Session, elapsed_seconds: f64) -> Self {
        Self {
            elapsed_seconds,
            distracting_seconds: session.total_distracting_seconds,
            penalized_switches: session.penalized_switches,
            important_important_switches: session.important_important_switches,
            micro_distractions: session.micro_distraction_count,
            idle_seconds: session.total_idle_seconds,
            late_domains: session.domains_after_five_minutes.len(),
        }
    }
}

/// Result of the focus calculation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FocusOutcome {
    /// `T`, the elapsed time clamped to at least one second
    pub total_time_seconds: f64,
    pub effective_time_seconds: f64,
    pub focus_score: f64,
}

/// Compute effective time and focus score
///
/// Formula:
/// ```text
/// S = penalized + important_pairs, I = important_pairs
/// effective = max(0, T - D - (S - I) * 5 - IDLE)
/// score     = 100 - (D / T) * 50 - ((S - I) / T) * 30 - M * 2 - max(0, late - 5) * 5
/// ```
/// with the score clamped to `[0, 100]`.
pub fn compute_focus(inputs: &FocusInputs) -> FocusOutcome {
    let total = inputs.elapsed_seconds.max(1.0);
    let distracting = inputs.distracting_seconds;
    let switches =
        (inputs.penalized_switches as f64) + (inputs.important_important_switches as f64);
    let taxed_switches = switches - inputs.important_important_switches as f64;

    let effective = (total - distracting - taxed_switches * SWITCH_TAX_SECONDS - inputs.idle_seconds)
        .max(0.0);

    let extra_domains = inputs.late_domains.saturating_sub(FREE_LATE_DOMAINS) as f64;
    let score = 100.0
        - (distracting / total) * DISTRACTION_WEIGHT
        - (taxed_switches / total) * SWITCH_WEIGHT
        - inputs.micro_distractions as f64 * MICRO_DISTRACTION_PENALTY
        - extra_domains * NOVELTY_PENALTY;

    FocusOutcome {
        total_time_seconds: total,
        effective_time_seconds: effective,
        focus_score: score.clamp(0.0, 100.0),
    }
}

/// Compute the focus outcome for `session` and write it back
pub fn apply_focus(session: &mut Session, elapsed_seconds: f64) -> FocusOutcome {
    let outcome = compute_focus(&FocusInputs::from_session(session, elapsed_seconds));
    session.total_time_seconds = outcome.total_time_seconds;
    session.effective_time_seconds = outcome.effective_time_seconds;
    session.focus_score = outcome.focus_score;
    outcome
}
