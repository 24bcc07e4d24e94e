//! Per-user extraction batching.
//!
//! Each user scope gets one worker task that owns its [`ExtractionWindow`]
//! state and drains a bounded `mpsc` mailbox. Exchanges for the same user
//! are therefore applied strictly in order, and a batch's extraction runs
//! inline in the worker, so the next batch cannot start until the current
//! one has finished or been dropped. Different users never share a worker.
//!
//! The window counts exchanges: one user message plus the reply to it is a
//! single entry, enqueued atomically, so a batch never splits an exchange.
//! Trigger rule, on the 0-based index `t` of the arriving exchange:
//! `t >= batch_size && (t - batch_size) % (batch_size + 1) == 0`.
//! With `batch_size = 1` that fires on exchanges 1, 3, 5; with 2 on 2, 5, 8.
//!
//! Workers idle for longer than the configured timeout extract whatever is
//! pending and exit; the next exchange for that user starts a fresh window.

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use memoria_types::config::ExtractionConfig;
use memoria_types::error::MemoryError;
use memoria_types::memory::{
    ConversationTurn, ExtractionReport, ExtractionWindow, MemoryRecord, TurnRange, UserScope,
};

use super::box_embedder::BoxEmbedder;
use super::box_vector::BoxVectorStore;
use super::dedup::{DedupDecision, DeduplicationEngine};
use super::extractor::FactExtractor;

/// Buffer size for per-user mailboxes.
const MAILBOX_BUFFER: usize = 1024;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The user's mailbox is full; the turn was not queued.
    #[error("extraction mailbox full for user '{0}'")]
    MailboxFull(UserScope),

    /// The worker for this user stopped.
    #[error("extraction worker for user '{0}' is gone")]
    WorkerGone(UserScope),
}

/// Whether the exchange with 0-based index `turn_index` closes a batch.
pub fn should_trigger(turn_index: u64, batch_size: usize) -> bool {
    let b = batch_size as u64;
    turn_index >= b && (turn_index - b) % (b + 1) == 0
}

/// Extract, embed, dedup and persist one batch.
pub struct ExtractionPipeline {
    extractor: FactExtractor,
    embedder: Arc<BoxEmbedder>,
    store: Arc<BoxVectorStore>,
    dedup: DeduplicationEngine,
}

impl ExtractionPipeline {
    pub fn new(
        extractor: FactExtractor,
        embedder: Arc<BoxEmbedder>,
        store: Arc<BoxVectorStore>,
        dedup: DeduplicationEngine,
    ) -> Self {
        Self {
            extractor,
            embedder,
            store,
            dedup,
        }
    }

    /// Run one batch. Per-candidate failures drop that candidate only;
    /// an isolation violation aborts the batch.
    #[tracing::instrument(
        name = "memory.extraction_batch",
        skip(self, turns),
        fields(user_scope = %user_scope, turns = %turn_range)
    )]
    pub async fn run(
        &self,
        user_scope: &UserScope,
        turns: &[ConversationTurn],
        turn_range: TurnRange,
    ) -> Result<ExtractionReport, MemoryError> {
        let facts = self.extractor.extract(turns).await?;
        let mut report = ExtractionReport::new(user_scope.clone(), turn_range);
        report.candidates = facts.len();

        for fact in facts {
            let embedding = match self.embedder.embed_one(&fact.content).await {
                Ok(embedding) => embedding,
                Err(e) => {
                    warn!(error = %e, "Dropping extracted fact: embedding failed");
                    report.dropped += 1;
                    continue;
                }
            };

            match self.dedup.check(user_scope, &fact.content, &embedding).await {
                Ok(DedupDecision::Store) => {}
                Ok(decision) => {
                    debug!(?decision, "Skipping duplicate fact");
                    report.duplicates += 1;
                    continue;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "Dropping extracted fact: dedup check failed");
                    report.dropped += 1;
                    continue;
                }
            }

            let record = MemoryRecord::new(
                user_scope.clone(),
                fact.content.clone(),
                fact.memory_type,
                embedding,
                self.embedder.model_name().to_string(),
                self.dedup.fingerprint(&fact.content),
                turn_range,
            );
            match self.store.insert(&record).await {
                Ok(()) => report.stored += 1,
                Err(e) => {
                    warn!(error = %e, "Dropping extracted fact: store write failed");
                    report.dropped += 1;
                }
            }
        }

        Ok(report)
    }
}

enum WindowCommand {
    /// One exchange; all its turns land in the same batch.
    Exchange(Vec<ConversationTurn>),
    Flush(oneshot::Sender<()>),
    /// Extract whatever is pending, even below the batch size.
    Drain(oneshot::Sender<()>),
    Snapshot(oneshot::Sender<ExtractionWindow>),
}

type Mailboxes = DashMap<UserScope, mpsc::Sender<WindowCommand>>;

struct SchedulerShared {
    mailboxes: Arc<Mailboxes>,
    pipeline: Arc<ExtractionPipeline>,
    batch_size: usize,
    timeout: Duration,
    idle_timeout: Option<Duration>,
    reports: Option<mpsc::UnboundedSender<ExtractionReport>>,
}

/// Routes auto-storable exchanges to per-user extraction workers.
///
/// Cheap to clone. Workers live until the last clone is dropped or they
/// sit idle past the idle timeout.
#[derive(Clone)]
pub struct ExtractionScheduler {
    shared: Arc<SchedulerShared>,
}

impl ExtractionScheduler {
    pub fn new(pipeline: ExtractionPipeline, config: &ExtractionConfig) -> Self {
        Self::build(pipeline, config, None)
    }

    /// Like [`Self::new`], additionally publishing every batch report.
    pub fn with_report_sink(
        pipeline: ExtractionPipeline,
        config: &ExtractionConfig,
        sink: mpsc::UnboundedSender<ExtractionReport>,
    ) -> Self {
        Self::build(pipeline, config, Some(sink))
    }

    fn build(
        pipeline: ExtractionPipeline,
        config: &ExtractionConfig,
        reports: Option<mpsc::UnboundedSender<ExtractionReport>>,
    ) -> Self {
        Self {
            shared: Arc::new(SchedulerShared {
                mailboxes: Arc::new(DashMap::new()),
                pipeline: Arc::new(pipeline),
                batch_size: config.batch_size.max(1),
                timeout: Duration::from_secs(config.timeout_seconds),
                idle_timeout: (config.idle_timeout_seconds > 0)
                    .then(|| Duration::from_secs(config.idle_timeout_seconds)),
                reports,
            }),
        }
    }

    /// Apply a settings override; only possible before the scheduler is shared.
    fn configure(self, apply: impl FnOnce(&mut SchedulerShared)) -> Self {
        match Arc::try_unwrap(self.shared) {
            Ok(mut shared) => {
                apply(&mut shared);
                Self {
                    shared: Arc::new(shared),
                }
            }
            Err(shared) => {
                warn!("Scheduler already shared; settings override ignored");
                Self { shared }
            }
        }
    }

    /// Override the per-batch timeout.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.configure(|shared| shared.timeout = timeout)
    }

    /// Override the idle eviction timeout (`None` disables eviction).
    pub fn with_idle_timeout(self, idle_timeout: Option<Duration>) -> Self {
        self.configure(|shared| shared.idle_timeout = idle_timeout)
    }

    pub fn batch_size(&self) -> usize {
        self.shared.batch_size
    }

    /// Number of users with a live window.
    pub fn active_windows(&self) -> usize {
        self.shared.mailboxes.len()
    }

    /// Append one exchange to the user's window without waiting for
    /// extraction. The exchange advances the turn index by one however many
    /// messages it holds; an empty exchange is ignored.
    pub fn enqueue_exchange(
        &self,
        user_scope: &UserScope,
        turns: Vec<ConversationTurn>,
    ) -> Result<(), SchedulerError> {
        if turns.is_empty() {
            return Ok(());
        }
        let mailbox = self.mailbox(user_scope);
        match mailbox.try_send(WindowCommand::Exchange(turns)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(user_scope = %user_scope, "Extraction mailbox full; dropping exchange");
                Err(SchedulerError::MailboxFull(user_scope.clone()))
            }
            Err(mpsc::error::TrySendError::Closed(command)) => {
                // Worker was evicted between lookup and send.
                self.shared
                    .mailboxes
                    .remove_if(user_scope, |_, tx| tx.same_channel(&mailbox));
                self.mailbox(user_scope)
                    .try_send(command)
                    .map_err(|_| SchedulerError::WorkerGone(user_scope.clone()))
            }
        }
    }

    /// Append a single-message exchange.
    pub fn enqueue(&self, user_scope: &UserScope, turn: ConversationTurn) -> Result<(), SchedulerError> {
        self.enqueue_exchange(user_scope, vec![turn])
    }

    /// Wait until every command queued for this user so far was processed,
    /// including any extraction it triggered.
    pub async fn flush(&self, user_scope: &UserScope) {
        self.request(user_scope, WindowCommand::Flush).await;
    }

    /// Flush every live window.
    pub async fn flush_all(&self) {
        for scope in self.scopes() {
            self.flush(&scope).await;
        }
    }

    /// Like [`Self::flush`], then extract the exchanges still pending below
    /// the batch size. Used when the host shuts down.
    pub async fn drain(&self, user_scope: &UserScope) {
        self.request(user_scope, WindowCommand::Drain).await;
    }

    /// Drain every live window.
    pub async fn drain_all(&self) {
        for scope in self.scopes() {
            self.drain(&scope).await;
        }
    }

    /// Current window of a user, if one exists.
    pub async fn window_snapshot(&self, user_scope: &UserScope) -> Option<ExtractionWindow> {
        let mailbox = self.shared.mailboxes.get(user_scope).map(|m| m.clone())?;
        let (tx, rx) = oneshot::channel();
        mailbox.send(WindowCommand::Snapshot(tx)).await.ok()?;
        rx.await.ok()
    }

    async fn request(&self, user_scope: &UserScope, command: fn(oneshot::Sender<()>) -> WindowCommand) {
        let Some(mailbox) = self.shared.mailboxes.get(user_scope).map(|m| m.clone()) else {
            return;
        };
        let (tx, rx) = oneshot::channel();
        if mailbox.send(command(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    fn scopes(&self) -> Vec<UserScope> {
        self.shared
            .mailboxes
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    fn mailbox(&self, user_scope: &UserScope) -> mpsc::Sender<WindowCommand> {
        self.shared
            .mailboxes
            .entry(user_scope.clone())
            .or_insert_with(|| self.spawn_worker(user_scope.clone()))
            .clone()
    }

    fn spawn_worker(&self, user_scope: UserScope) -> mpsc::Sender<WindowCommand> {
        let (tx, rx) = mpsc::channel(MAILBOX_BUFFER);
        let worker = WindowWorker {
            window: ExtractionWindow {
                user_scope: user_scope.clone(),
                pending_turns: Vec::new(),
                turn_count: 0,
                batch_size: self.shared.batch_size,
                next_turn_index: 0,
            },
            batch_start: 0,
            pipeline: self.shared.pipeline.clone(),
            timeout: self.shared.timeout,
            idle_timeout: self.shared.idle_timeout,
            reports: self.shared.reports.clone(),
            mailboxes: Arc::downgrade(&self.shared.mailboxes),
            own_mailbox: tx.downgrade(),
        };
        debug!(user_scope = %user_scope, "Started extraction window");
        tokio::spawn(worker.run(rx));
        tx
    }
}

struct WindowWorker {
    window: ExtractionWindow,
    /// Index of the first pending exchange.
    batch_start: u64,
    pipeline: Arc<ExtractionPipeline>,
    timeout: Duration,
    idle_timeout: Option<Duration>,
    reports: Option<mpsc::UnboundedSender<ExtractionReport>>,
    /// Weak so workers never keep the scheduler's map alive.
    mailboxes: Weak<Mailboxes>,
    own_mailbox: mpsc::WeakSender<WindowCommand>,
}

impl WindowWorker {
    async fn run(mut self, mut rx: mpsc::Receiver<WindowCommand>) {
        loop {
            let next = match self.idle_timeout {
                Some(idle) => match tokio::time::timeout(idle, rx.recv()).await {
                    Ok(next) => next,
                    Err(_) => {
                        self.evict(&mut rx).await;
                        return;
                    }
                },
                None => rx.recv().await,
            };
            let Some(command) = next else {
                break;
            };
            self.handle(command).await;
        }
        debug!(user_scope = %self.window.user_scope, "Extraction window closed");
    }

    async fn handle(&mut self, command: WindowCommand) {
        match command {
            WindowCommand::Exchange(turns) => self.accept(turns).await,
            WindowCommand::Flush(reply) => {
                let _ = reply.send(());
            }
            WindowCommand::Drain(reply) => {
                self.extract_pending().await;
                let _ = reply.send(());
            }
            WindowCommand::Snapshot(reply) => {
                let _ = reply.send(self.window.clone());
            }
        }
    }

    /// Unregister, finish anything already queued, extract the tail, exit.
    async fn evict(&mut self, rx: &mut mpsc::Receiver<WindowCommand>) {
        if let (Some(mailboxes), Some(me)) = (self.mailboxes.upgrade(), self.own_mailbox.upgrade()) {
            mailboxes.remove_if(&self.window.user_scope, |_, tx| tx.same_channel(&me));
        }
        rx.close();
        while let Some(command) = rx.recv().await {
            self.handle(command).await;
        }
        self.extract_pending().await;
        debug!(user_scope = %self.window.user_scope, "Idle extraction window evicted");
    }

    async fn accept(&mut self, turns: Vec<ConversationTurn>) {
        let index = self.window.next_turn_index;
        self.window.next_turn_index += 1;
        if self.window.turn_count == 0 {
            self.batch_start = index;
        }
        self.window.pending_turns.extend(turns);
        self.window.turn_count += 1;

        if should_trigger(index, self.window.batch_size) {
            self.extract(TurnRange::new(self.batch_start, index)).await;
        }
    }

    async fn extract_pending(&mut self) {
        if self.window.turn_count == 0 {
            return;
        }
        let last = self.window.next_turn_index - 1;
        self.extract(TurnRange::new(self.batch_start, last)).await;
    }

    async fn extract(&mut self, turn_range: TurnRange) {
        // The window is cleared whatever the outcome.
        let turns = std::mem::take(&mut self.window.pending_turns);
        self.window.turn_count = 0;
        let user_scope = self.window.user_scope.clone();

        let outcome =
            tokio::time::timeout(self.timeout, self.pipeline.run(&user_scope, &turns, turn_range))
                .await;

        let report = match outcome {
            Ok(Ok(report)) => {
                info!(
                    user_scope = %user_scope,
                    turns = %turn_range,
                    candidates = report.candidates,
                    stored = report.stored,
                    duplicates = report.duplicates,
                    dropped = report.dropped,
                    "Extraction batch complete"
                );
                report
            }
            Ok(Err(e)) => {
                if e.is_fatal() {
                    error!(user_scope = %user_scope, turns = %turn_range, error = %e, "Extraction batch aborted");
                } else {
                    warn!(user_scope = %user_scope, turns = %turn_range, error = %e, "Extraction batch failed; window cleared");
                }
                let mut report = ExtractionReport::new(user_scope, turn_range);
                report.failure = Some(e.to_string());
                report
            }
            Err(_) => {
                warn!(
                    user_scope = %user_scope,
                    turns = %turn_range,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Extraction batch timed out; window cleared"
                );
                let mut report = ExtractionReport::new(user_scope, turn_range);
                report.failure = Some(format!(
                    "timed out after {}ms",
                    self.timeout.as_millis()
                ));
                report
            }
        };

        if let Some(sink) = &self.reports {
            let _ = sink.send(report);
        }
    }
}
