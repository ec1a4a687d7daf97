//! The session engine
//!
//! `SessionEngine` owns at most one live session. Every mutation goes through
//! `&mut self`, so callers serialize events simply by owning the engine (see
//! the `driver` module for the async owner task).
//!
//! Time is tracked as an open visit interval anchored on a tab and a monotonic
//! instant. Each transition flushes the interval into the session's stats and
//! visit log before anchoring the next one.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::burnout::compute_burnout;
use crate::classifier::{extract_domain, DomainClassifier};
use crate::collaborators::{HostEvent, Intervention, InterventionSink, SessionSink, TabHost};
use crate::config::Settings;
use crate::engine::clock::{seconds_between, Clock, SystemClock};
use crate::engine::probe::{PendingProbes, ProbePolicy, ProbeRequest, ProbeTicket};
use crate::error::EngineError;
use crate::focus::apply_focus;
use crate::types::{
    Category, ContentVerdict, HistoricalSessionSummary, IdleState, Session, TabAnchor, TabId,
    TabStat, TabLog,
};

/// Visits shorter than this on a distracting domain are micro-distractions
const MICRO_DISTRACTION_SECONDS: f64 = 60.0;

/// Domains first seen after this many seconds count toward the novelty penalty
const SETTLING_PERIOD_SECONDS: f64 = 300.0;

/// Lifecycle state of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// No session
    Inactive,
    /// Session running and accumulating
    Active,
    /// Session running, accumulation paused while the user is away
    IdleSuspended,
}

/// A running session plus its monotonic bookkeeping
#[derive(Debug)]
struct ActiveSession {
    session: Session,
    started_at: Instant,
    anchored_at: Instant,
    idle_since: Option<Instant>,
    probes: PendingProbes,
}

impl ActiveSession {
    /// Close the open interval at `now`
    ///
    /// `next` is the destination tab and its category when the flush is a tab
    /// switch; `None` for idle and end flushes, which count no switch.
    fn flush(&mut self, now: Instant, wall: DateTime<Utc>, next: Option<(TabId, Category)>) {
        let Some(prev) = self.session.last_tab.take() else {
            return;
        };
        let elapsed = seconds_between(self.anchored_at, now);
        let since_start = seconds_between(self.started_at, now);
        let session = &mut self.session;

        let resolved = session
            .youtube_resolved_category
            .get(&prev.tab_id)
            .copied()
            .unwrap_or(prev.category);
        let starred = session.is_important(prev.tab_id);

        let stat = session
            .tab_stats
            .entry(prev.domain.clone())
            .or_insert_with(|| TabStat {
                domain: prev.domain.clone(),
                total_time_seconds: 0.0,
                distracting_time_seconds: 0.0,
                category: prev.category,
                is_important: false,
            });
        stat.total_time_seconds += elapsed;
        if resolved.is_distracting() {
            stat.distracting_time_seconds += elapsed;
            session.total_distracting_seconds += elapsed;
        }
        stat.is_important |= starred;

        session.tab_logs.push(TabLog {
            tab_id: prev.tab_id,
            domain: prev.domain.clone(),
            category: resolved,
            time_spent_seconds: elapsed,
            is_important: starred,
            timestamp: wall,
        });

        if resolved.is_distracting() && elapsed < MICRO_DISTRACTION_SECONDS {
            session.micro_distraction_count += 1;
        }

        if session.domains_seen.insert(prev.domain.clone()) && since_start > SETTLING_PERIOD_SECONDS {
            session.domains_after_five_minutes.insert(prev.domain.clone());
        }

        if let Some((next_tab, next_category)) = next {
            session.total_switches += 1;
            if resolved.is_distracting() || next_category.is_distracting() {
                session.penalized_switches += 1;
            }
            if starred && session.is_important(next_tab) {
                session.important_important_switches += 1;
            }
        }

        debug!(
            tab_id = prev.tab_id,
            domain = %prev.domain,
            category = ?resolved,
            elapsed,
            "flushed visit interval"
        );
    }
}

/// Session state machine
///
/// # Example
///
/// ```ignore
/// let mut engine = SessionEngine::new(SystemClock, &Settings::default())?;
/// engine.start("Organic Chemistry")?;
/// engine.on_tab_focus_changed(3, "docs.google.com", "Lab notes");
/// let session = engine.end()?;
/// println!("{}", session.summary_line());
/// ```
pub struct SessionEngine<C: Clock = SystemClock> {
    clock: C,
    classifier: DomainClassifier,
    intervention: Option<Intervention>,
    probe_policy: ProbePolicy,
    history: Vec<HistoricalSessionSummary>,
    active: Option<ActiveSession>,
    sinks: Vec<Box<dyn SessionSink>>,
    interventions: Option<Box<dyn InterventionSink>>,
}

impl<C: Clock> SessionEngine<C> {
    /// Create an engine with no history
    pub fn new(clock: C, settings: &Settings) -> Result<Self, EngineError> {
        Ok(Self {
            clock,
            classifier: DomainClassifier::new(&settings.policy)?,
            intervention: settings.intervention(),
            probe_policy: settings.probe.policy(),
            history: Vec::new(),
            active: None,
            sinks: Vec::new(),
            interventions: None,
        })
    }

    /// Seed the history used for burnout scoring
    pub fn with_history(mut self, history: Vec<HistoricalSessionSummary>) -> Self {
        self.history = history;
        self
    }

    /// Add a receiver for finalized sessions
    pub fn with_sink(mut self, sink: Box<dyn SessionSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Set the collaborator that carries out interventions
    pub fn with_interventions(mut self, sink: Box<dyn InterventionSink>) -> Self {
        self.interventions = Some(sink);
        self
    }

    /// Re-apply settings to a running engine
    ///
    /// Rebuilds the classifier; the open interval keeps the category it was
    /// anchored with.
    pub fn apply_settings(&mut self, settings: &Settings) -> Result<(), EngineError> {
        self.classifier = DomainClassifier::new(&settings.policy)?;
        self.intervention = settings.intervention();
        self.probe_policy = settings.probe.policy();
        Ok(())
    }

    pub fn set_intervention(&mut self, intervention: Option<Intervention>) {
        self.intervention = intervention;
    }

    pub fn state(&self) -> EngineState {
        match &self.active {
            None => EngineState::Inactive,
            Some(active) if active.idle_since.is_some() => EngineState::IdleSuspended,
            Some(_) => EngineState::Active,
        }
    }

    /// The live session, if any
    pub fn session(&self) -> Option<&Session> {
        self.active.as_ref().map(|a| &a.session)
    }

    /// Summaries of sessions seen so far, including finalized ones
    pub fn history(&self) -> &[HistoricalSessionSummary] {
        &self.history
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn classifier(&self) -> &DomainClassifier {
        &self.classifier
    }

    pub fn probe_policy(&self) -> ProbePolicy {
        self.probe_policy
    }

    /// Number of content probes awaiting a verdict
    pub fn pending_probes(&self) -> usize {
        self.active.as_ref().map_or(0, |a| a.probes.len())
    }

    /// Start a session
    ///
    /// The open interval is anchored at the current instant with no tab.
    pub fn start(&mut self, subject_label: &str) -> Result<&Session, EngineError> {
        if let Some(active) = &self.active {
            return Err(EngineError::SessionAlreadyActive(active.session.id));
        }

        let now = self.clock.now();
        let session = Session::new(subject_label, self.clock.wall());
        info!(session_id = %session.id, subject = %session.subject_label, "session started");

        let active = self.active.insert(ActiveSession {
            session,
            started_at: now,
            anchored_at: now,
            idle_since: None,
            probes: PendingProbes::new(),
        });
        Ok(&active.session)
    }

    /// The focused tab changed
    ///
    /// Ignored unless a session is running and not idle. Returns a content
    /// probe the host should run when the new tab is a distracting video page.
    pub fn on_tab_focus_changed(
        &mut self,
        tab_id: TabId,
        domain: &str,
        title: &str,
    ) -> Option<ProbeRequest> {
        if self.state() != EngineState::Active {
            return None;
        }
        let category = self.classifier.classify(domain, title);
        let now = self.clock.now();
        let wall = self.clock.wall();

        let active = self.active.as_mut()?;
        active.flush(now, wall, Some((tab_id, category)));
        active.session.last_tab = Some(TabAnchor {
            tab_id,
            domain: domain.to_string(),
            category,
        });
        active.anchored_at = now;

        self.review_distraction(tab_id, domain, category)
    }

    /// A tab finished loading
    ///
    /// The active tab is treated as a focus change. Background tabs are only
    /// reviewed for distraction.
    pub fn on_tab_updated(
        &mut self,
        tab_id: TabId,
        url: &str,
        title: &str,
        is_active: bool,
    ) -> Option<ProbeRequest> {
        if self.state() != EngineState::Active {
            return None;
        }
        let domain = extract_domain(url);
        if is_active {
            return self.on_tab_focus_changed(tab_id, &domain, title);
        }
        let category = self.classifier.classify(&domain, title);
        self.review_distraction(tab_id, &domain, category)
    }

    /// A tab was activated; its metadata is looked up on the host
    pub fn on_tab_activated(&mut self, tab_id: TabId, host: &dyn TabHost) -> Option<ProbeRequest> {
        if self.state() != EngineState::Active {
            return None;
        }
        let Some(info) = host.tab_info(tab_id) else {
            debug!(tab_id, "activated tab unknown to host, ignoring");
            return None;
        };
        let domain = extract_domain(&info.url);
        self.on_tab_focus_changed(tab_id, &domain, &info.title)
    }

    /// The host idle state changed
    ///
    /// Repeated signals for the state already in effect are no-ops.
    pub fn on_idle_state_changed(&mut self, state: IdleState) {
        let now = self.clock.now();
        let wall = self.clock.wall();
        let Some(active) = self.active.as_mut() else {
            return;
        };

        match (state.is_idle(), active.idle_since) {
            (true, None) => {
                active.flush(now, wall, None);
                active.idle_since = Some(now);
                debug!(?state, "session suspended");
            }
            (false, Some(since)) => {
                let idle = seconds_between(since, now);
                active.session.total_idle_seconds += idle;
                active.idle_since = None;
                active.anchored_at = now;
                debug!(idle_seconds = idle, "session resumed");
            }
            _ => {}
        }
    }

    /// Star or unstar a tab; returns the new starred state
    ///
    /// `None` when no session is running.
    pub fn toggle_important(&mut self, tab_id: TabId) -> Option<bool> {
        let active = self.active.as_mut()?;
        let tabs = &mut active.session.important_tabs;
        let starred = if tabs.remove(&tab_id) {
            false
        } else {
            tabs.insert(tab_id);
            true
        };
        debug!(tab_id, starred, "toggled important tab");
        Some(starred)
    }

    /// Apply a host event, looking up tab metadata on `host` where needed
    pub fn handle_event(&mut self, event: HostEvent, host: &dyn TabHost) -> Option<ProbeRequest> {
        match event {
            HostEvent::TabActivated { tab_id } => self.on_tab_activated(tab_id, host),
            HostEvent::TabUpdated {
                tab_id,
                url,
                title,
                active,
            } => self.on_tab_updated(tab_id, &url, &title, active),
            HostEvent::IdleStateChanged { state } => {
                self.on_idle_state_changed(state);
                None
            }
            HostEvent::ToggleImportant { tab_id } => {
                self.toggle_important(tab_id);
                None
            }
        }
    }

    /// Apply the verdict of a content probe
    ///
    /// Returns false when the verdict was discarded: the session ended, a newer
    /// probe superseded it, or it already expired.
    pub fn on_content_verdict(&mut self, ticket: &ProbeTicket, verdict: ContentVerdict) -> bool {
        let accepted = match self.active.as_mut() {
            Some(active) => active.session.id == ticket.session_id && active.probes.resolve(ticket),
            None => false,
        };
        if !accepted {
            debug!(
                tab_id = ticket.tab_id,
                request_id = ticket.request_id,
                ?verdict,
                "discarding stale content verdict"
            );
            return false;
        }
        self.apply_verdict(ticket.tab_id, verdict);
        true
    }

    /// Resolve every probe past its deadline as timed out
    pub fn expire_probes(&mut self) -> Vec<ProbeTicket> {
        let now = self.clock.now();
        let expired = match self.active.as_mut() {
            Some(active) => active.probes.take_expired(now, active.session.id),
            None => return Vec::new(),
        };
        for ticket in &expired {
            self.apply_verdict(ticket.tab_id, ContentVerdict::TimedOut);
        }
        expired
    }

    /// End the running session and hand it to the sinks
    ///
    /// Outstanding probes are dropped. Sink failures are logged and do not
    /// affect the returned session.
    pub fn end(&mut self) -> Result<Session, EngineError> {
        let mut active = self.active.take().ok_or(EngineError::NoActiveSession)?;
        let now = self.clock.now();
        let wall = self.clock.wall();

        active.flush(now, wall, None);
        if let Some(since) = active.idle_since.take() {
            active.session.total_idle_seconds += seconds_between(since, now);
        }
        if !active.probes.is_empty() {
            debug!(pending = active.probes.len(), "dropping unanswered content probes");
        }

        let mut session = active.session;
        session.end_time = Some(wall);
        apply_focus(&mut session, seconds_between(active.started_at, now));

        self.history.push(session.summary());
        session.burnout_score = compute_burnout(&self.history);

        info!(
            session_id = %session.id,
            total_seconds = session.total_time_seconds,
            effective_seconds = session.effective_time_seconds,
            focus = session.focus_score,
            burnout = session.burnout_score,
            "session ended"
        );

        for sink in &self.sinks {
            if let Err(e) = sink.deliver(&session) {
                warn!(sink = sink.name(), error = %e, "failed to deliver session");
            }
        }

        Ok(session)
    }

    /// Probe video pages; intervene immediately on other distracting pages
    fn review_distraction(
        &mut self,
        tab_id: TabId,
        domain: &str,
        category: Category,
    ) -> Option<ProbeRequest> {
        if !category.is_distracting() {
            return None;
        }
        if !self.classifier.is_video_domain(domain) {
            self.intervene(tab_id);
            return None;
        }

        let now = self.clock.now();
        let budget = self.probe_policy.budget();
        let active = self.active.as_mut()?;
        let request = active
            .probes
            .register(active.session.id, tab_id, domain, now, budget);
        debug!(tab_id, request_id = request.ticket.request_id, "requested content probe");
        Some(request)
    }

    fn apply_verdict(&mut self, tab_id: TabId, verdict: ContentVerdict) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        active
            .session
            .youtube_resolved_category
            .insert(tab_id, verdict.resolved_category());
        debug!(tab_id, ?verdict, "applied content verdict");

        if verdict == ContentVerdict::Academic {
            if let Some(anchor) = active
                .session
                .last_tab
                .as_mut()
                .filter(|anchor| anchor.tab_id == tab_id)
            {
                anchor.category = Category::Academic;
            }
        } else {
            self.intervene(tab_id);
        }
    }

    fn intervene(&self, tab_id: TabId) {
        if let (Some(intervention), Some(sink)) = (self.intervention, self.interventions.as_ref()) {
            debug!(tab_id, ?intervention, "intervening on distracting tab");
            sink.intervene(tab_id, intervention);
        }
    }
}
