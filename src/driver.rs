//! Async engine driver
//!
//! Runs a [`SessionEngine`] on one tokio task. Host events, lifecycle commands,
//! and content verdicts all arrive over channels and are applied one at a time
//! in arrival order. Content probes run on their own tasks with a grace window
//! and a single retry, then report back through the verdict channel; the event
//! loop never waits on them.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::debug;

use crate::classifier::ContentHeuristic;
use crate::collaborators::{ContentProbe, HostEvent, TabHost};
use crate::config::Settings;
use crate::engine::{Clock, ProbePolicy, ProbeRequest, ProbeTicket, SessionEngine};
use crate::error::EngineError;
use crate::types::{ContentVerdict, Session, TabId};

/// Buffered commands before senders wait
const COMMAND_BUFFER: usize = 64;

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

enum Command {
    Start { subject: String, reply: Reply<Session> },
    End { reply: Reply<Session> },
    Host(HostEvent),
    Snapshot { reply: oneshot::Sender<Option<Session>> },
    UpdateSettings { settings: Box<Settings>, reply: Reply<()> },
}

/// Cloneable handle to a running driver
///
/// The driver stops once every handle is dropped.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
}

impl EngineHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| EngineError::EngineStopped)?;
        rx.await.map_err(|_| EngineError::EngineStopped)?
    }

    pub async fn start(&self, subject: impl Into<String>) -> Result<Session, EngineError> {
        let subject = subject.into();
        self.request(|reply| Command::Start { subject, reply }).await
    }

    pub async fn end(&self) -> Result<Session, EngineError> {
        self.request(|reply| Command::End { reply }).await
    }

    /// Queue a host event; returns once the driver accepted it
    pub async fn send(&self, event: HostEvent) -> Result<(), EngineError> {
        self.commands
            .send(Command::Host(event))
            .await
            .map_err(|_| EngineError::EngineStopped)
    }

    /// Copy of the live session, if any
    pub async fn snapshot(&self) -> Result<Option<Session>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Snapshot { reply })
            .await
            .map_err(|_| EngineError::EngineStopped)?;
        rx.await.map_err(|_| EngineError::EngineStopped)
    }

    pub async fn update_settings(&self, settings: Settings) -> Result<(), EngineError> {
        let settings = Box::new(settings);
        self.request(|reply| Command::UpdateSettings { settings, reply }).await
    }
}

/// Owns an engine, its tab host, and the content probe transport
pub struct Driver<C: Clock, H: TabHost> {
    engine: SessionEngine<C>,
    host: H,
    probe: Arc<dyn ContentProbe>,
    heuristic: Arc<ContentHeuristic>,
}

impl<C, H> Driver<C, H>
where
    C: Clock + 'static,
    H: TabHost + Send + 'static,
{
    pub fn new(
        engine: SessionEngine<C>,
        host: H,
        probe: Arc<dyn ContentProbe>,
        heuristic: ContentHeuristic,
    ) -> Self {
        Self {
            engine,
            host,
            probe,
            heuristic: Arc::new(heuristic),
        }
    }

    /// Spawn the event loop on the current runtime
    ///
    /// The join handle yields the engine back once every handle is dropped.
    pub fn spawn(self) -> (EngineHandle, JoinHandle<SessionEngine<C>>) {
        let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
        let task = tokio::spawn(self.run(rx));
        (EngineHandle { commands }, task)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) -> SessionEngine<C> {
        let (verdict_tx, mut verdicts) = mpsc::unbounded_channel::<(ProbeTicket, ContentVerdict)>();

        loop {
            tokio::select! {
                biased;
                Some((ticket, verdict)) = verdicts.recv() => {
                    self.engine.on_content_verdict(&ticket, verdict);
                }
                command = commands.recv() => match command {
                    Some(command) => self.dispatch(command, &verdict_tx),
                    None => break,
                },
            }
        }

        debug!("engine driver stopped");
        self.engine
    }

    fn dispatch(
        &mut self,
        command: Command,
        verdicts: &mpsc::UnboundedSender<(ProbeTicket, ContentVerdict)>,
    ) {
        match command {
            Command::Start { subject, reply } => {
                let _ = reply.send(self.engine.start(&subject).map(Session::clone));
            }
            Command::End { reply } => {
                let _ = reply.send(self.engine.end());
            }
            Command::Host(event) => {
                self.host.observe(&event);
                if let Some(request) = self.engine.handle_event(event, &self.host) {
                    self.dispatch_probe(request, verdicts.clone());
                }
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.engine.session().cloned());
            }
            Command::UpdateSettings { settings, reply } => {
                let result = self.engine.apply_settings(&settings);
                if result.is_ok() {
                    self.heuristic = Arc::new(ContentHeuristic::new(&settings.policy));
                }
                let _ = reply.send(result);
            }
        }
    }

    fn dispatch_probe(
        &self,
        request: ProbeRequest,
        verdicts: mpsc::UnboundedSender<(ProbeTicket, ContentVerdict)>,
    ) {
        let probe = Arc::clone(&self.probe);
        let heuristic = Arc::clone(&self.heuristic);
        let policy = self.engine.probe_policy();
        let ticket = request.ticket;

        tokio::spawn(async move {
            let verdict = run_probe(probe.as_ref(), &heuristic, policy, ticket.tab_id).await;
            if verdicts.send((ticket, verdict)).is_err() {
                debug!(tab_id = ticket.tab_id, "driver stopped before content verdict");
            }
        });
    }
}

/// Ask the host for page text and judge it
///
/// The first attempt must return more than `min_text_len` bytes within the
/// grace window; otherwise the probe waits `retry_delay` and accepts whatever
/// the second attempt returns. Transport errors and a silent second attempt
/// resolve as timed out.
pub async fn run_probe(
    probe: &dyn ContentProbe,
    heuristic: &ContentHeuristic,
    policy: ProbePolicy,
    tab_id: TabId,
) -> ContentVerdict {
    match timeout(policy.grace, probe.page_text(tab_id)).await {
        Ok(Ok(Some(text))) if text.len() > policy.min_text_len => {
            return ContentVerdict::from_heuristic(heuristic.is_academic(&text));
        }
        Ok(Err(e)) => {
            debug!(tab_id, error = %e, "content probe failed");
            return ContentVerdict::TimedOut;
        }
        _ => {}
    }

    sleep(policy.retry_delay).await;

    match timeout(policy.grace, probe.page_text(tab_id)).await {
        Ok(Ok(text)) => ContentVerdict::from_heuristic(heuristic.is_academic(text.as_deref().unwrap_or(""))),
        Ok(Err(e)) => {
            debug!(tab_id, error = %e, "content probe retry failed");
            ContentVerdict::TimedOut
        }
        Err(_) => ContentVerdict::TimedOut,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{Intervention, InterventionSink, RecordedTabs};
    use crate::config::InterventionMode;
    use crate::engine::ManualClock;
    use crate::types::Category;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    enum Script {
        Text(&'static str),
        Hang,
        Fail,
    }

    struct ScriptedProbe {
        replies: Mutex<VecDeque<Script>>,
    }

    impl ScriptedProbe {
        fn new(replies: Vec<Script>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
            }
        }
    }

    #[async_trait]
    impl ContentProbe for ScriptedProbe {
        async fn page_text(&self, _tab_id: TabId) -> Result<Option<String>, EngineError> {
            let reply = self.replies.lock().unwrap().pop_front().unwrap_or(Script::Hang);
            match reply {
                Script::Text(text) => Ok(Some(text.to_string())),
                Script::Hang => std::future::pending().await,
                Script::Fail => Err(EngineError::TransportError("no receiver".to_string())),
            }
        }
    }

    #[derive(Clone, Default)]
    struct RecordingInterventions(Arc<std::sync::Mutex<Vec<(TabId, Intervention)>>>);

    impl InterventionSink for RecordingInterventions {
        fn intervene(&self, tab_id: TabId, intervention: Intervention) {
            self.0.lock().unwrap().push((tab_id, intervention));
        }
    }

    fn spawn_driver(
        replies: Vec<Script>,
        settings: &Settings,
    ) -> (EngineHandle, JoinHandle<SessionEngine<ManualClock>>, RecordingInterventions) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap());
        let recorded = RecordingInterventions::default();
        let engine = SessionEngine::new(clock, settings)
            .unwrap()
            .with_interventions(Box::new(recorded.clone()));
        let driver = Driver::new(
            engine,
            RecordedTabs::new(),
            Arc::new(ScriptedProbe::new(replies)),
            ContentHeuristic::new(&settings.policy),
        );
        let (handle, task) = driver.spawn();
        (handle, task, recorded)
    }

    fn youtube_update(tab_id: TabId) -> HostEvent {
        HostEvent::TabUpdated {
            tab_id,
            url: "https://www.youtube.com/watch?v=abc".to_string(),
            title: "Week 4".to_string(),
            active: true,
        }
    }

    fn resolved(session: &Session, tab_id: TabId) -> Option<Category> {
        session.youtube_resolved_category.get(&tab_id).copied()
    }

    #[tokio::test(start_paused = true)]
    async fn test_academic_page_text_updates_anchor() {
        let (handle, _task, _) = spawn_driver(
            vec![Script::Text("Linear algebra lecture 4: eigenvalues and eigenvectors")],
            &Settings::default(),
        );
        handle.start("Math").await.unwrap();
        handle.send(youtube_update(5)).await.unwrap();
        sleep(Duration::from_millis(10)).await;

        let session = handle.snapshot().await.unwrap().unwrap();
        assert_eq!(resolved(&session, 5), Some(Category::Academic));
        assert_eq!(session.last_tab.unwrap().category, Category::Academic);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_text_is_retried_after_delay() {
        let (handle, _task, _) = spawn_driver(
            vec![Script::Text("loading"), Script::Text("Organic chemistry crash course, part 2")],
            &Settings::default(),
        );
        handle.start("").await.unwrap();
        handle.send(youtube_update(5)).await.unwrap();

        sleep(Duration::from_millis(1500)).await;
        let session = handle.snapshot().await.unwrap().unwrap();
        assert_eq!(resolved(&session, 5), None);

        sleep(Duration::from_millis(3000)).await;
        let session = handle.snapshot().await.unwrap().unwrap();
        assert_eq!(resolved(&session, 5), Some(Category::Academic));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_tab_times_out_and_intervenes() {
        let mut settings = Settings::default();
        settings.intervention = InterventionMode::HardBlock;
        let (handle, _task, recorded) = spawn_driver(vec![], &settings);

        handle.start("").await.unwrap();
        handle.send(youtube_update(5)).await.unwrap();
        sleep(Duration::from_millis(4000)).await;
        assert!(recorded.0.lock().unwrap().is_empty());

        sleep(Duration::from_millis(1000)).await;
        let session = handle.snapshot().await.unwrap().unwrap();
        assert_eq!(resolved(&session, 5), Some(Category::Distracting));
        assert_eq!(recorded.0.lock().unwrap().as_slice(), &[(5, Intervention::HardBlock)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_resolves_without_retry() {
        let (handle, _task, _) = spawn_driver(vec![Script::Fail], &Settings::default());
        handle.start("").await.unwrap();
        handle.send(youtube_update(5)).await.unwrap();
        sleep(Duration::from_millis(10)).await;

        let session = handle.snapshot().await.unwrap().unwrap();
        assert_eq!(resolved(&session, 5), Some(Category::Distracting));
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_does_not_wait_for_probes() {
        let (handle, task, _) = spawn_driver(vec![], &Settings::default());
        handle.start("History").await.unwrap();
        assert!(matches!(
            handle.start("Again").await,
            Err(EngineError::SessionAlreadyActive(_))
        ));

        handle.send(youtube_update(5)).await.unwrap();
        let session = handle.end().await.unwrap();
        assert_eq!(session.subject_label, "History");
        assert!(session.is_finalized());

        // The late verdict is discarded
        sleep(Duration::from_secs(10)).await;
        assert!(handle.snapshot().await.unwrap().is_none());
        assert!(matches!(handle.end().await, Err(EngineError::NoActiveSession)));

        drop(handle);
        let engine = task.await.unwrap();
        assert_eq!(engine.history().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_settings_applies_intervention() {
        let (handle, _task, recorded) = spawn_driver(vec![], &Settings::default());
        handle.start("").await.unwrap();

        let mut settings = Settings::default();
        settings.intervention = InterventionMode::SoftDelay;
        settings.soft_delay_seconds = 3;
        handle.update_settings(settings).await.unwrap();

        handle
            .send(HostEvent::TabUpdated {
                tab_id: 2,
                url: "https://www.reddit.com/".to_string(),
                title: String::new(),
                active: true,
            })
            .await
            .unwrap();
        handle.snapshot().await.unwrap();

        assert_eq!(
            recorded.0.lock().unwrap().as_slice(),
            &[(2, Intervention::SoftDelay { countdown_seconds: 3 })]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_activation_uses_observed_metadata() {
        let (handle, _task, _) = spawn_driver(vec![], &Settings::default());
        handle.start("").await.unwrap();

        handle
            .send(HostEvent::TabUpdated {
                tab_id: 1,
                url: "https://docs.google.com/document/d/1".to_string(),
                title: "Essay".to_string(),
                active: false,
            })
            .await
            .unwrap();
        handle.send(HostEvent::TabActivated { tab_id: 1 }).await.unwrap();

        let session = handle.snapshot().await.unwrap().unwrap();
        let anchor = session.last_tab.unwrap();
        assert_eq!(anchor.domain, "docs.google.com");
        assert_eq!(anchor.category, Category::Academic);
    }
}
