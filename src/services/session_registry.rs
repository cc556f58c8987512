use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::analysis_session::{AnalysisSession, SessionServices, SessionSettings, Subscription};
use super::context_cache::ContextCache;
use super::lock;
use super::request_fanout::RequestFanout;
use crate::domain::errors::AnalysisResult;
use crate::domain::models::{Config, SessionSnapshot, SubjectId};
use crate::domain::ports::{PayloadBuilder, StreamTransport, Transport};

/// Process-wide map from subject to its single [`AnalysisSession`].
///
/// Sessions are created on first access and torn down on `release`, on
/// `purge`, or by idle eviction when an idle timeout is configured. Released
/// sessions leave their history in a [`ContextCache`] so a recreated session
/// for the same subject starts where the previous one stopped.
///
/// # Example
///
/// ```rust,no_run
/// use clinical_orchestrator::adapters::{MockStreamTransport, MockTransport};
/// use clinical_orchestrator::domain::models::{ClinicalInput, Config, SubjectId};
/// use clinical_orchestrator::services::{ClinicalPayloadBuilder, SessionRegistry};
/// use std::sync::Arc;
///
/// # async fn example() {
/// let registry = SessionRegistry::new(
///     &Config::default(),
///     Arc::new(MockTransport::new()),
///     Arc::new(MockStreamTransport::new()),
///     Arc::new(ClinicalPayloadBuilder::new()),
/// );
/// let session = registry.get(&SubjectId::from("42"));
/// session.trigger_now(ClinicalInput::from_notes("fever and productive cough"));
/// registry.release(&SubjectId::from("42"));
/// # }
/// ```
pub struct SessionRegistry {
    settings: SessionSettings,
    services: SessionServices,
    transport: Arc<dyn Transport>,
    idle_timeout: Option<Duration>,
    sessions: Mutex<HashMap<SubjectId, AnalysisSession>>,
    cache: ContextCache,
}

impl SessionRegistry {
    pub fn new(
        config: &Config,
        transport: Arc<dyn Transport>,
        streams: Arc<dyn StreamTransport>,
        payloads: Arc<dyn PayloadBuilder>,
    ) -> Self {
        let services = SessionServices {
            fanout: RequestFanout::from_config(Arc::clone(&transport), config),
            streams,
            payloads,
        };
        Self {
            settings: SessionSettings::from(config),
            services,
            transport,
            idle_timeout: config.idle_timeout_secs.map(Duration::from_secs),
            sessions: Mutex::new(HashMap::new()),
            cache: ContextCache::new(config.history_size, config.cached_subjects),
        }
    }

    /// Session for `subject`, created if absent.
    pub fn get(&self, subject: &SubjectId) -> AnalysisSession {
        let mut sessions = lock(&self.sessions);
        if let Some(session) = sessions.get(subject) {
            return session.clone();
        }

        let session = AnalysisSession::new(
            subject.clone(),
            self.settings.clone(),
            self.services.clone(),
            self.cache.restore(subject),
        );
        sessions.insert(subject.clone(), session.clone());
        debug!(subject = %subject, "session created");
        session
    }

    /// Session for `subject` without creating one.
    pub fn peek(&self, subject: &SubjectId) -> Option<AnalysisSession> {
        lock(&self.sessions).get(subject).cloned()
    }

    /// Observe `subject`'s session, creating it if needed.
    pub fn subscribe(
        &self,
        subject: &SubjectId,
        listener: impl Fn(&SessionSnapshot) + Send + Sync + 'static,
    ) -> Subscription {
        self.get(subject).subscribe(listener)
    }

    /// Detach the subject's session after cancelling its debounce, closing
    /// its stream and dropping its listeners. History is kept in the cache.
    /// Handles to the released session stay inert afterwards. Returns false
    /// if there was no session.
    pub fn release(&self, subject: &SubjectId) -> bool {
        let mut sessions = lock(&self.sessions);
        let Some(session) = sessions.remove(subject) else {
            return false;
        };
        // History must be cached before `get` can recreate the session.
        let history = session.shutdown();
        self.cache.store(subject, &history);
        drop(sessions);

        info!(subject = %subject, "session released");
        true
    }

    /// Forget the subject's history, both live and cached.
    pub fn clear_history(&self, subject: &SubjectId) {
        if let Some(session) = self.peek(subject) {
            session.clear_history();
        }
        self.cache.remove(subject);
    }

    /// Release the session, drop all history and ask the backend to forget
    /// the subject's context.
    pub async fn purge(&self, subject: &SubjectId) -> AnalysisResult<()> {
        self.release(subject);
        self.cache.remove(subject);
        self.transport.clear_context(subject).await?;
        info!(subject = %subject, "subject purged");
        Ok(())
    }

    /// Release sessions idle for longer than the configured timeout.
    /// Sessions that are dispatching or streaming are never evicted.
    pub fn evict_idle(&self) -> Vec<SubjectId> {
        let Some(timeout) = self.idle_timeout else {
            return Vec::new();
        };

        let mut sessions = lock(&self.sessions);
        let idle: Vec<SubjectId> = sessions
            .iter()
            .filter(|(_, session)| !session.is_busy() && session.idle_for() >= timeout)
            .map(|(subject, _)| subject.clone())
            .collect();

        for subject in &idle {
            if let Some(session) = sessions.remove(subject) {
                let history = session.shutdown();
                self.cache.store(subject, &history);
                debug!(subject = %subject, "idle session evicted");
            }
        }
        idle
    }

    /// Run `evict_idle` every `interval` until a shutdown signal arrives.
    pub fn spawn_idle_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick fires immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = registry.evict_idle();
                        if !evicted.is_empty() {
                            info!(count = evicted.len(), "evicted idle sessions");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("idle sweeper shutting down");
                        break;
                    }
                }
            }
        })
    }

    pub fn contains(&self, subject: &SubjectId) -> bool {
        lock(&self.sessions).contains_key(subject)
    }

    pub fn subjects(&self) -> Vec<SubjectId> {
        let mut subjects: Vec<SubjectId> = lock(&self.sessions).keys().cloned().collect();
        subjects.sort();
        subjects
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.sessions).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::{MockStreamTransport, MockTransport, StreamLogEntry};
    use crate::domain::errors::AnalysisError;
    use crate::domain::models::{AggregateAnalysis, ClinicalInput, History, SessionState};
    use crate::services::ClinicalPayloadBuilder;

    fn registry_with(config: &Config) -> (Arc<SessionRegistry>, Arc<MockTransport>, Arc<MockStreamTransport>) {
        let transport = Arc::new(MockTransport::new());
        let streams = Arc::new(MockStreamTransport::new());
        let registry = Arc::new(SessionRegistry::new(
            config,
            transport.clone(),
            streams.clone(),
            Arc::new(ClinicalPayloadBuilder::new()),
        ));
        (registry, transport, streams)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn test_get_returns_same_session() {
        let (registry, _, _) = registry_with(&Config::default());
        let subject = SubjectId::from("p-1");

        let a = registry.get(&subject);
        let b = registry.get(&subject);
        a.set_context(ClinicalInput::from_notes("shared context"));

        assert_eq!(b.context().notes, "shared context");
        assert_eq!(registry.len(), 1);
        assert!(registry.peek(&SubjectId::from("p-2")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_survives_release() {
        let (registry, _, _) = registry_with(&Config::default());
        let subject = SubjectId::from("p-1");

        registry
            .get(&subject)
            .trigger_now(ClinicalInput::from_notes("recurring migraines with aura"));
        settle().await;

        assert!(registry.release(&subject));
        assert!(!registry.release(&subject));
        assert!(!registry.contains(&subject));

        let recreated = registry.get(&subject);
        assert_eq!(recreated.history().len(), 1);
        assert_eq!(recreated.state(), SessionState::Idle);
        assert!(recreated.snapshot().aggregate.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_closes_stream_and_cancels_debounce() {
        let (registry, _, streams) = registry_with(&Config::default());
        let subject = SubjectId::from("p-3");
        let session = registry.get(&subject);

        session
            .start_stream(ClinicalInput::from_notes("acute abdominal pain"))
            .await
            .unwrap();
        session.on_input_changed("acute abdominal pain, right lower quadrant");

        registry.release(&subject);
        assert_eq!(streams.close_count(0), 1);
        assert!(!session.debounce_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_history_and_purge() {
        let (registry, transport, _) = registry_with(&Config::default());
        let subject = SubjectId::from("p-4");

        registry
            .get(&subject)
            .trigger_now(ClinicalInput::from_notes("elevated liver enzymes noted"));
        settle().await;
        registry.clear_history(&subject);
        assert!(registry.get(&subject).history().is_empty());

        registry.purge(&subject).await.unwrap();
        assert!(!registry.contains(&subject));
        assert_eq!(transport.cleared_contexts(), vec![subject]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_eviction_skips_busy_sessions() {
        let config = Config {
            idle_timeout_secs: Some(60),
            ..Config::default()
        };
        let (registry, _, _) = registry_with(&config);
        let idle = SubjectId::from("idle");
        let streaming = SubjectId::from("streaming");

        registry.get(&idle);
        registry
            .get(&streaming)
            .start_stream(ClinicalInput::from_notes("ongoing monitoring"))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        let evicted = registry.evict_idle();

        assert_eq!(evicted, vec![idle.clone()]);
        assert!(!registry.contains(&idle));
        assert!(registry.contains(&streaming));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_timeout_never_evicts() {
        let (registry, _, _) = registry_with(&Config::default());
        registry.get(&SubjectId::from("p-5"));
        tokio::time::advance(Duration::from_secs(86_400)).await;
        assert!(registry.evict_idle().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_sweeper_stops_on_shutdown() {
        let config = Config {
            idle_timeout_secs: Some(5),
            ..Config::default()
        };
        let (registry, _, _) = registry_with(&config);
        registry.get(&SubjectId::from("p-6"));

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = registry.spawn_idle_sweeper(Duration::from_secs(1), shutdown_rx);

        tokio::time::sleep(Duration::from_secs(7)).await;
        assert!(registry.is_empty());

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_released_handle_is_inert() {
        let (registry, transport, streams) = registry_with(&Config::default());
        let subject = SubjectId::from("p-10");
        let stale = registry.get(&subject);
        registry.release(&subject);

        let err = stale
            .start_stream(ClinicalInput::from_notes("syncope while standing"))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::SessionReleased(_)));

        stale.trigger_now(ClinicalInput::from_notes("syncope while standing"));
        stale.on_input_changed("syncope while standing up quickly");
        assert!(!stale.debounce_pending());
        settle().await;
        assert_eq!(transport.total_calls(), 0);

        registry
            .get(&subject)
            .start_stream(ClinicalInput::from_notes("syncope while standing"))
            .await
            .unwrap();
        assert_eq!(streams.log(), vec![StreamLogEntry::Opened(0)]);
        assert_eq!(streams.close_count(0), 0);
    }

    #[test]
    fn test_concurrent_get_never_loses_released_history() {
        let (registry, _, _) = registry_with(&Config::default());
        let subject = SubjectId::from("p-11");
        registry.cache.store(
            &subject,
            &History::from_entries(
                4,
                [AggregateAnalysis {
                    generation: 1,
                    ..AggregateAnalysis::empty()
                }],
            ),
        );

        for _ in 0..200 {
            registry.get(&subject);
            std::thread::scope(|scope| {
                scope.spawn(|| registry.release(&subject));
                scope.spawn(|| registry.get(&subject));
            });
            assert_eq!(registry.get(&subject).history().len(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_histories_are_bounded() {
        let config = Config {
            cached_subjects: 2,
            ..Config::default()
        };
        let (registry, _, _) = registry_with(&config);

        for id in ["a", "b", "c"] {
            let subject = SubjectId::from(id);
            registry
                .get(&subject)
                .trigger_now(ClinicalInput::from_notes("intermittent palpitations"));
            settle().await;
            registry.release(&subject);
        }

        assert!(registry.get(&SubjectId::from("a")).history().is_empty());
        assert_eq!(registry.get(&SubjectId::from("c")).history().len(), 1);
    }
}
