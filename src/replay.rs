//! Recorded event replay
//!
//! A recording is newline-delimited JSON, one timestamped event per line:
//!
//! ```text
//! {"at":"2024-01-15T14:00:00Z","type":"start","subject":"Calculus"}
//! {"at":"2024-01-15T14:00:05Z","type":"tab_updated","tab_id":3,"url":"https://docs.google.com/d/1","active":true}
//! {"at":"2024-01-15T14:20:00Z","type":"tab_activated","tab_id":7}
//! {"at":"2024-01-15T14:20:01Z","type":"content_verdict","tab_id":7,"academic":false}
//! {"at":"2024-01-15T14:45:00Z","type":"idle_state_changed","state":"idle"}
//! {"at":"2024-01-15T15:00:00Z","type":"end"}
//! ```
//!
//! Replay drives the engine with a manual clock set to each event's time, so a
//! recording always produces the same sessions. Probes without a recorded
//! verdict expire at their deadline.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::collaborators::{HostEvent, RecordedTabs, TabHost};
use crate::engine::{ManualClock, ProbeTicket, SessionEngine};
use crate::error::EngineError;
use crate::types::{ContentVerdict, IdleState, Session, TabId};

/// One line of a recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayEvent {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub action: ReplayAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayAction {
    Start {
        #[serde(default)]
        subject: String,
    },
    End,
    TabActivated {
        tab_id: TabId,
    },
    TabUpdated {
        tab_id: TabId,
        url: String,
        #[serde(default)]
        title: String,
        #[serde(default)]
        active: bool,
    },
    IdleStateChanged {
        state: IdleState,
    },
    ToggleImportant {
        tab_id: TabId,
    },
    /// Reply to the latest probe of `tab_id`; a missing `academic` means the
    /// tab never answered
    ContentVerdict {
        tab_id: TabId,
        #[serde(default)]
        academic: Option<bool>,
    },
}

impl ReplayAction {
    fn host_event(&self) -> Option<HostEvent> {
        match self {
            ReplayAction::TabActivated { tab_id } => Some(HostEvent::TabActivated { tab_id: *tab_id }),
            ReplayAction::TabUpdated {
                tab_id,
                url,
                title,
                active,
            } => Some(HostEvent::TabUpdated {
                tab_id: *tab_id,
                url: url.clone(),
                title: title.clone(),
                active: *active,
            }),
            ReplayAction::IdleStateChanged { state } => {
                Some(HostEvent::IdleStateChanged { state: *state })
            }
            ReplayAction::ToggleImportant { tab_id } => {
                Some(HostEvent::ToggleImportant { tab_id: *tab_id })
            }
            ReplayAction::Start { .. } | ReplayAction::End | ReplayAction::ContentVerdict { .. } => {
                None
            }
        }
    }
}

/// Parse a recording, skipping blank lines and `#` comments
pub fn parse_events(input: &str) -> Result<Vec<ReplayEvent>, EngineError> {
    input
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(idx, line)| {
            serde_json::from_str(line)
                .map_err(|e| EngineError::ParseError(format!("line {}: {}", idx + 1, e)))
        })
        .collect()
}

/// Manual clock starting at the first event of a recording
pub fn clock_for(events: &[ReplayEvent]) -> ManualClock {
    let start = events.first().map(|e| e.at).unwrap_or_else(Utc::now);
    ManualClock::new(start)
}

/// What a replay produced
#[derive(Debug, Default)]
pub struct ReplayOutcome {
    /// Finalized sessions in the order they ended
    pub sessions: Vec<Session>,
    /// Recorded verdicts that did not match a pending probe
    pub discarded_verdicts: usize,
}

/// Feeds recorded events to an engine
pub struct Replayer {
    engine: SessionEngine<ManualClock>,
    tabs: RecordedTabs,
    tickets: HashMap<TabId, ProbeTicket>,
}

impl Replayer {
    /// The engine's clock should start at or before the first event
    pub fn new(engine: SessionEngine<ManualClock>) -> Self {
        Self {
            engine,
            tabs: RecordedTabs::new(),
            tickets: HashMap::new(),
        }
    }

    pub fn engine(&self) -> &SessionEngine<ManualClock> {
        &self.engine
    }

    pub fn into_engine(self) -> SessionEngine<ManualClock> {
        self.engine
    }

    /// Replay every event, then end a session the recording left open
    pub fn run(mut self, events: &[ReplayEvent]) -> Result<ReplayOutcome, EngineError> {
        let mut outcome = ReplayOutcome::default();
        for event in events {
            self.apply(event, &mut outcome)?;
        }
        if self.engine.session().is_some() {
            debug!("ending session left open by the recording");
            outcome.sessions.push(self.engine.end()?);
        }
        Ok(outcome)
    }

    fn apply(&mut self, event: &ReplayEvent, outcome: &mut ReplayOutcome) -> Result<(), EngineError> {
        self.engine.clock().advance_to(event.at);
        for ticket in self.engine.expire_probes() {
            self.tickets.remove(&ticket.tab_id);
        }

        match &event.action {
            ReplayAction::Start { subject } => {
                self.engine.start(subject)?;
                self.tickets.clear();
            }
            ReplayAction::End => {
                outcome.sessions.push(self.engine.end()?);
                self.tickets.clear();
            }
            ReplayAction::ContentVerdict { tab_id, academic } => {
                let verdict = match academic {
                    Some(academic) => ContentVerdict::from_heuristic(*academic),
                    None => ContentVerdict::TimedOut,
                };
                let applied = match self.tickets.remove(tab_id) {
                    Some(ticket) => self.engine.on_content_verdict(&ticket, verdict),
                    None => false,
                };
                if !applied {
                    debug!(tab_id, "recorded verdict has no pending probe");
                    outcome.discarded_verdicts += 1;
                }
            }
            action => {
                if let Some(host_event) = action.host_event() {
                    self.tabs.observe(&host_event);
                    if let Some(request) = self.engine.handle_event(host_event, &self.tabs) {
                        self.tickets.insert(request.ticket.tab_id, request.ticket);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::types::Category;

    const RECORDING: &str = r#"
# two tabs, one distracting video that turns out to be a lecture
{"at":"2024-01-15T14:00:00Z","type":"start","subject":"Calculus"}
{"at":"2024-01-15T14:00:00Z","type":"tab_updated","tab_id":1,"url":"https://docs.google.com/document/d/1","title":"Notes","active":true}
{"at":"2024-01-15T14:10:00Z","type":"tab_updated","tab_id":2,"url":"https://www.youtube.com/watch?v=x","title":"Week 2","active":true}
{"at":"2024-01-15T14:10:01Z","type":"content_verdict","tab_id":2,"academic":true}
{"at":"2024-01-15T14:20:00Z","type":"tab_activated","tab_id":1}
{"at":"2024-01-15T14:30:00Z","type":"end"}
"#;

    fn replay(input: &str) -> ReplayOutcome {
        let events = parse_events(input).unwrap();
        let engine = SessionEngine::new(clock_for(&events), &Settings::default()).unwrap();
        Replayer::new(engine).run(&events).unwrap()
    }

    #[test]
    fn test_parse_events() {
        let events = parse_events(RECORDING).unwrap();
        assert_eq!(events.len(), 6);
        assert_eq!(
            events[0].action,
            ReplayAction::Start {
                subject: "Calculus".to_string()
            }
        );
        assert_eq!(events[5].action, ReplayAction::End);
    }

    #[test]
    fn test_parse_error_names_line() {
        let err = parse_events("\n{\"at\":\"2024-01-15T14:00:00Z\",\"type\":\"nap\"}").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_replay_recorded_session() {
        let outcome = replay(RECORDING);
        assert_eq!(outcome.sessions.len(), 1);
        assert_eq!(outcome.discarded_verdicts, 0);

        let session = &outcome.sessions[0];
        assert_eq!(session.subject_label, "Calculus");
        assert_eq!(session.total_time_seconds, 1800.0);
        assert_eq!(session.tab_logs.len(), 3);
        assert_eq!(session.tab_logs[1].domain, "www.youtube.com");
        assert_eq!(session.tab_logs[1].category, Category::Academic);
        assert_eq!(session.total_distracting_seconds, 0.0);
        assert_eq!(session.total_switches, 2);
        assert_eq!(session.penalized_switches, 1);
        assert_eq!(session.tab_stats["docs.google.com"].total_time_seconds, 1200.0);
    }

    #[test]
    fn test_unanswered_probe_expires() {
        let outcome = replay(
            r#"
{"at":"2024-01-15T14:00:00Z","type":"start"}
{"at":"2024-01-15T14:00:00Z","type":"tab_updated","tab_id":2,"url":"https://www.youtube.com/watch?v=x","title":"Cats","active":true}
{"at":"2024-01-15T14:00:30Z","type":"content_verdict","tab_id":2,"academic":true}
{"at":"2024-01-15T14:01:00Z","type":"end"}
"#,
        );
        assert_eq!(outcome.discarded_verdicts, 1);
        let session = &outcome.sessions[0];
        assert_eq!(session.youtube_resolved_category.get(&2), Some(&Category::Distracting));
        assert_eq!(session.total_distracting_seconds, 60.0);
    }

    #[test]
    fn test_open_session_is_ended() {
        let outcome = replay(
            r#"
{"at":"2024-01-15T23:00:00Z","type":"start"}
{"at":"2024-01-15T23:05:00Z","type":"idle_state_changed","state":"locked"}
"#,
        );
        assert_eq!(outcome.sessions.len(), 1);
        assert_eq!(outcome.sessions[0].total_time_seconds, 300.0);
        assert_eq!(outcome.sessions[0].burnout_score, 10.0);
    }

    #[test]
    fn test_double_start_fails() {
        let events = parse_events(
            r#"
{"at":"2024-01-15T14:00:00Z","type":"start"}
{"at":"2024-01-15T14:01:00Z","type":"start"}
"#,
        )
        .unwrap();
        let engine = SessionEngine::new(clock_for(&events), &Settings::default()).unwrap();
        let result = Replayer::new(engine).run(&events);
        assert!(matches!(result, Err(EngineError::SessionAlreadyActive(_))));
    }
}
