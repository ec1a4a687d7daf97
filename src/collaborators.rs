//! Host collaborator interfaces
//!
//! The engine talks to its environment only through these traits: tab metadata
//! lookup, page-text retrieval for content probes, distraction interventions,
//! and delivery of finalized sessions.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::types::{IdleState, Session, TabId};

/// Tab metadata as reported by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabInfo {
    pub url: String,
    #[serde(default)]
    pub title: String,
}

/// Events delivered by the host browser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    /// A tab became the focused tab; metadata must be looked up
    TabActivated { tab_id: TabId },
    /// A tab finished loading
    TabUpdated {
        tab_id: TabId,
        url: String,
        #[serde(default)]
        title: String,
        #[serde(default)]
        active: bool,
    },
    /// The machine went idle, was locked, or became active again
    IdleStateChanged { state: IdleState },
    /// The user starred or unstarred a tab
    ToggleImportant { tab_id: TabId },
}

/// Looks up current tab metadata for events that only carry an id
pub trait TabHost {
    fn tab_info(&self, tab_id: TabId) -> Option<TabInfo>;

    /// Called with every event before the engine sees it
    fn observe(&mut self, _event: &HostEvent) {}
}

/// Tabs remembered before the least recently updated one is forgotten
pub const RECORDED_TABS_CAPACITY: usize = 256;

/// Tab metadata learned from `TabUpdated` events
///
/// Holds at most `RECORDED_TABS_CAPACITY` tabs, evicting the one updated
/// longest ago.
#[derive(Debug, Clone, Default)]
pub struct RecordedTabs {
    tabs: HashMap<TabId, (TabInfo, u64)>,
    updates: u64,
}

impl RecordedTabs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tab_id: TabId, info: TabInfo) {
        self.updates += 1;
        self.tabs.insert(tab_id, (info, self.updates));
        if self.tabs.len() > RECORDED_TABS_CAPACITY {
            let oldest = self
                .tabs
                .iter()
                .min_by_key(|(_, (_, seq))| *seq)
                .map(|(id, _)| *id);
            if let Some(oldest) = oldest {
                self.tabs.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }
}

impl TabHost for RecordedTabs {
    fn tab_info(&self, tab_id: TabId) -> Option<TabInfo> {
        self.tabs.get(&tab_id).map(|(info, _)| info.clone())
    }

    /// Remember metadata carried by `TabUpdated` events
    fn observe(&mut self, event: &HostEvent) {
        if let HostEvent::TabUpdated {
            tab_id, url, title, ..
        } = event
        {
            self.insert(
                *tab_id,
                TabInfo {
                    url: url.clone(),
                    title: title.clone(),
                },
            );
        }
    }
}

/// Retrieves page text from a tab for the content heuristic
///
/// `Ok(None)` means the page has no readable text yet.
#[async_trait]
pub trait ContentProbe: Send + Sync {
    async fn page_text(&self, tab_id: TabId) -> Result<Option<String>, EngineError>;
}

/// How a distracting tab is interrupted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Intervention {
    /// Show an overlay that counts down before the page can be used
    SoftDelay { countdown_seconds: u32 },
    /// Redirect the tab to the deep-study page
    HardBlock,
}

/// Carries out interventions on behalf of the engine
pub trait InterventionSink: Send {
    fn intervene(&self, tab_id: TabId, intervention: Intervention);
}

/// Receives finalized sessions
///
/// Delivery failures are logged by the engine and never affect finalization.
pub trait SessionSink: Send {
    /// Short name used in logs
    fn name(&self) -> &str;

    fn deliver(&self, session: &Session) -> Result<(), EngineError>;
}
