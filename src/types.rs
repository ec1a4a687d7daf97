//! Session data model
//!
//! This module defines the live study session owned by the state machine, the
//! per-domain and per-visit records it accumulates, and the compact history
//! summaries consumed by the burnout calculator.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Host-assigned browser tab identifier
pub type TabId = i64;

/// Classification of a domain visit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Academic,
    Distracting,
    #[default]
    Neutral,
}

impl Category {
    pub fn is_distracting(self) -> bool {
        matches!(self, Category::Distracting)
    }
}

/// Idle state reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleState {
    Active,
    Idle,
    Locked,
}

impl IdleState {
    /// `idle` and `locked` both suspend accumulation
    pub fn is_idle(self) -> bool {
        matches!(self, IdleState::Idle | IdleState::Locked)
    }
}

/// Outcome of a content probe for a distracting video page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentVerdict {
    /// The page text looks like study material
    Academic,
    /// The page text was read and does not look like study material
    NotAcademic,
    /// No usable reply arrived within the grace window and retry
    TimedOut,
}

impl ContentVerdict {
    pub fn from_heuristic(is_academic: bool) -> Self {
        if is_academic {
            ContentVerdict::Academic
        } else {
            ContentVerdict::NotAcademic
        }
    }

    /// Category the verdict resolves a provisional `distracting` visit to
    pub fn resolved_category(self) -> Category {
        match self {
            ContentVerdict::Academic => Category::Academic,
            ContentVerdict::NotAcademic | ContentVerdict::TimedOut => Category::Distracting,
        }
    }
}

/// Aggregate time spent on one domain during a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabStat {
    pub domain: String,
    pub total_time_seconds: f64,
    pub distracting_time_seconds: f64,
    /// Category of the first visit that created this entry
    pub category: Category,
    /// Whether any visit to this domain was from a starred tab
    pub is_important: bool,
}

/// One closed visit interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabLog {
    pub tab_id: TabId,
    pub domain: String,
    /// Resolved category at the moment the interval was flushed
    pub category: Category,
    pub time_spent_seconds: f64,
    pub is_important: bool,
    pub timestamp: DateTime<Utc>,
}

/// The currently open visit interval's tab
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabAnchor {
    pub tab_id: TabId,
    pub domain: String,
    pub category: Category,
}

/// A study session
///
/// Created by `SessionEngine::start`, mutated only by the engine, and handed to
/// the configured sinks once finalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    /// Wall-clock start, recorded once; the only input to calendar-hour buckets
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub subject_label: String,

    // Time accumulators (seconds)
    pub total_time_seconds: f64,
    pub effective_time_seconds: f64,
    pub total_idle_seconds: f64,
    pub total_distracting_seconds: f64,

    // Counters
    pub total_switches: u32,
    pub penalized_switches: u32,
    pub important_important_switches: u32,
    pub micro_distraction_count: u32,

    pub important_tabs: BTreeSet<TabId>,
    pub tab_stats: HashMap<String, TabStat>,
    pub tab_logs: Vec<TabLog>,

    /// Tab anchoring the open interval, if any
    pub last_tab: Option<TabAnchor>,

    pub domains_seen: BTreeSet<String>,
    pub domains_after_five_minutes: BTreeSet<String>,

    pub focus_score: f64,
    pub burnout_score: f64,

    /// Late-arriving content verdicts, consulted when a tab's interval is flushed
    pub youtube_resolved_category: BTreeMap<TabId, Category>,
}

impl Session {
    /// Create an empty session starting at `start_time`
    pub fn new(subject_label: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            start_time,
            end_time: None,
            subject_label: subject_label.into(),
            total_time_seconds: 0.0,
            effective_time_seconds: 0.0,
            total_idle_seconds: 0.0,
            total_distracting_seconds: 0.0,
            total_switches: 0,
            penalized_switches: 0,
            important_important_switches: 0,
            micro_distraction_count: 0,
            important_tabs: BTreeSet::new(),
            tab_stats: HashMap::new(),
            tab_logs: Vec::new(),
            last_tab: None,
            domains_seen: BTreeSet::new(),
            domains_after_five_minutes: BTreeSet::new(),
            focus_score: 0.0,
            burnout_score: 0.0,
            youtube_resolved_category: BTreeMap::new(),
        }
    }

    pub fn is_important(&self, tab_id: TabId) -> bool {
        self.important_tabs.contains(&tab_id)
    }

    pub fn is_finalized(&self) -> bool {
        self.end_time.is_some()
    }

    /// Notification text shown when a session ends
    pub fn summary_line(&self) -> String {
        format!(
            "Focus Score: {:.1}\nEffective Study Time: {:.1} minutes",
            self.focus_score,
            self.effective_time_seconds / 60.0
        )
    }

    /// History summary of this session for burnout analysis
    pub fn summary(&self) -> HistoricalSessionSummary {
        HistoricalSessionSummary {
            start_time: self.start_time,
            total_time: self.total_time_seconds,
            effective_time: self.effective_time_seconds,
            focus_score: self.focus_score,
        }
    }
}

/// Compact record of a past session, as read from the session store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalSessionSummary {
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub total_time: f64,
    #[serde(default)]
    pub effective_time: f64,
    #[serde(default)]
    pub focus_score: f64,
}
