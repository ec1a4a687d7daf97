//! Pending content probes
//!
//! A content probe asks the host for the text of a distracting video page so
//! the content heuristic can reclassify it. Requests are tracked by tab id with
//! a deadline; the engine never waits on them. A verdict is applied only if it
//! answers the request still pending for that tab.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::TabId;

/// Default wait for a single probe attempt
pub const DEFAULT_GRACE: Duration = Duration::from_millis(1000);

/// Default pause before the single retry
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(2500);

/// Page text must be longer than this on the first attempt to skip the retry
pub const DEFAULT_MIN_TEXT_LEN: usize = 20;

/// Timing of content probes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbePolicy {
    /// Wait for one attempt before treating it as unanswered
    pub grace: Duration,
    /// Pause before retrying once
    pub retry_delay: Duration,
    /// Page text no longer than this on the first attempt is retried
    pub min_text_len: usize,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            grace: DEFAULT_GRACE,
            retry_delay: DEFAULT_RETRY_DELAY,
            min_text_len: DEFAULT_MIN_TEXT_LEN,
        }
    }
}

impl ProbePolicy {
    /// Longest time a probe may take: attempt, pause, retry
    pub fn budget(&self) -> Duration {
        self.grace * 2 + self.retry_delay
    }
}

/// Identifies one probe request of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProbeTicket {
    pub session_id: Uuid,
    pub tab_id: TabId,
    pub request_id: u64,
}

/// A probe the host should run out of band
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeRequest {
    pub ticket: ProbeTicket,
    pub domain: String,
    pub deadline: Instant,
}

#[derive(Debug, Clone)]
struct PendingProbe {
    request_id: u64,
    deadline: Instant,
}

/// Probes awaiting a verdict, keyed by tab
#[derive(Debug, Default)]
pub struct PendingProbes {
    entries: HashMap<TabId, PendingProbe>,
    next_request_id: u64,
}

impl PendingProbes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a probe for `tab_id`, superseding any older one for that tab
    pub fn register(
        &mut self,
        session_id: Uuid,
        tab_id: TabId,
        domain: &str,
        now: Instant,
        budget: Duration,
    ) -> ProbeRequest {
        self.next_request_id += 1;
        let request_id = self.next_request_id;
        let deadline = now + budget;
        self.entries.insert(tab_id, PendingProbe { request_id, deadline });

        ProbeRequest {
            ticket: ProbeTicket {
                session_id,
                tab_id,
                request_id,
            },
            domain: domain.to_string(),
            deadline,
        }
    }

    /// Remove the pending probe answered by `ticket`
    ///
    /// Returns false for superseded, expired, or unknown requests.
    pub fn resolve(&mut self, ticket: &ProbeTicket) -> bool {
        match self.entries.get(&ticket.tab_id) {
            Some(pending) if pending.request_id == ticket.request_id => {
                self.entries.remove(&ticket.tab_id);
                true
            }
            _ => false,
        }
    }

    /// Remove and return every probe whose deadline has passed, ordered by tab
    pub fn take_expired(&mut self, now: Instant, session_id: Uuid) -> Vec<ProbeTicket> {
        let mut expired: Vec<ProbeTicket> = self
            .entries
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(&tab_id, p)| ProbeTicket {
                session_id,
                tab_id,
                request_id: p.request_id,
            })
            .collect();
        expired.sort_by_key(|t| t.tab_id);

        for ticket in &expired {
            self.entries.remove(&ticket.tab_id);
        }
        expired
    }

    pub fn contains(&self, tab_id: TabId) -> bool {
        self.entries.contains_key(&tab_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_budget() {
        let policy = ProbePolicy::default();
        assert_eq!(policy.budget(), Duration::from_millis(4500));
    }

    #[test]
    fn test_register_and_resolve() {
        let mut probes = PendingProbes::new();
        let session = Uuid::new_v4();
        let now = Instant::now();

        let request = probes.register(session, 7, "www.youtube.com", now, Duration::from_secs(5));
        assert!(probes.contains(7));
        assert_eq!(request.deadline, now + Duration::from_secs(5));

        assert!(probes.resolve(&request.ticket));
        assert!(probes.is_empty());

        // A second reply for the same request is ignored
        assert!(!probes.resolve(&request.ticket));
    }

    #[test]
    fn test_newer_request_supersedes_older() {
        let mut probes = PendingProbes::new();
        let session = Uuid::new_v4();
        let now = Instant::now();

        let first = probes.register(session, 7, "www.youtube.com", now, Duration::from_secs(5));
        let second = probes.register(session, 7, "www.youtube.com", now, Duration::from_secs(5));

        assert_eq!(probes.len(), 1);
        assert!(!probes.resolve(&first.ticket));
        assert!(probes.resolve(&second.ticket));
    }

    #[test]
    fn test_take_expired() {
        let mut probes = PendingProbes::new();
        let session = Uuid::new_v4();
        let now = Instant::now();

        probes.register(session, 2, "youtube.com", now, Duration::from_secs(1));
        probes.register(session, 1, "youtube.com", now, Duration::from_secs(1));
        probes.register(session, 3, "youtube.com", now, Duration::from_secs(10));

        assert!(probes.take_expired(now, session).is_empty());

        let expired = probes.take_expired(now + Duration::from_secs(2), session);
        let tabs: Vec<TabId> = expired.iter().map(|t| t.tab_id).collect();
        assert_eq!(tabs, vec![1, 2]);
        assert_eq!(probes.len(), 1);
        assert!(probes.contains(3));
    }
}
