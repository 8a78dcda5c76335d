//! Coalescing progress reporter.
//!
//! Player ticks arrive many times per second; the batcher keeps only the
//! newest position per chapter and ships the batch once per flush window.
//! Completions skip the window entirely.

use crate::config::ProgressConfig;
use crate::error::{IsRetryable, LecternError};
use crate::types::ProgressUpdate;

use backon::{ExponentialBuilder, Retryable};
use futures::future::BoxFuture;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Destination for progress batches, usually the REST API.
pub trait ProgressSink: Send + Sync + 'static {
    /// Deliver a batch; the batcher retries retryable errors.
    fn send(&self, batch: Vec<ProgressUpdate>) -> BoxFuture<'static, Result<(), LecternError>>;

    /// Best-effort delivery that must not be awaited (page unload).
    fn beacon(&self, batch: Vec<ProgressUpdate>);
}

/// Updates that could not be delivered after the retry budget was spent.
#[derive(Debug)]
pub struct DeliveryFailure {
    pub updates: Vec<ProgressUpdate>,
    pub error: LecternError,
}

pub type FailureHandler = Arc<dyn Fn(DeliveryFailure) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct BatchPolicy {
    pub flush_delay: Duration,
    pub max_retries: usize,
    pub min_retry_delay: Duration,
    pub max_retry_delay: Duration,
}

impl BatchPolicy {
    fn retry_policy(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_retry_delay)
            .with_max_delay(self.max_retry_delay)
            .with_max_times(self.max_retries)
            .with_jitter()
    }
}

impl From<&ProgressConfig> for BatchPolicy {
    fn from(cfg: &ProgressConfig) -> Self {
        Self {
            flush_delay: cfg.flush_delay(),
            max_retries: cfg.max_retries,
            min_retry_delay: Duration::from_millis(cfg.min_retry_delay_ms),
            max_retry_delay: Duration::from_millis(cfg.max_retry_delay_ms),
        }
    }
}

impl Default for BatchPolicy {
    fn default() -> Self {
        (&ProgressConfig::default()).into()
    }
}

pub enum BatcherMessage {
    /// A player tick or completion.
    Record(ProgressUpdate),
    /// Ship whatever is pending now; replies with the number of updates dispatched.
    Flush(RpcReplyPort<usize>),
    /// Hand pending updates to the sink's beacon and forget them.
    FlushOnUnload,
    SetFailureHandler(Option<FailureHandler>),
    PendingLen(RpcReplyPort<usize>),

    // Internal messages (sent by the actor itself)
    /// The flush window armed under `generation` has elapsed.
    FlushDue { generation: u64 },
}

/// Handle for interacting with the batcher actor.
#[derive(Clone)]
pub struct ProgressBatcher {
    actor: ActorRef<BatcherMessage>,
}

impl ProgressBatcher {
    pub async fn spawn(
        sink: Arc<dyn ProgressSink>,
        policy: BatchPolicy,
    ) -> Result<Self, LecternError> {
        let (actor, _jh) = Actor::spawn(None, ProgressBatcherActor, (sink, policy))
            .await
            .map_err(|e| LecternError::RactorError(format!("spawn progress batcher: {e}")))?;
        Ok(Self { actor })
    }

    pub fn record(&self, chapter_id: impl Into<String>, current_time: f64, is_completed: bool) {
        let update = ProgressUpdate::new(chapter_id, current_time, is_completed);
        let _ = ractor::cast!(self.actor, BatcherMessage::Record(update));
    }

    /// Force the pending batch out (page hide, unmount, navigation).
    pub async fn flush(&self) -> Result<usize, LecternError> {
        ractor::call!(self.actor, BatcherMessage::Flush)
            .map_err(|e| LecternError::RactorError(format!("Flush RPC failed: {e}")))
    }

    pub fn flush_on_unload(&self) {
        let _ = ractor::cast!(self.actor, BatcherMessage::FlushOnUnload);
    }

    pub fn on_failure(&self, handler: impl Fn(DeliveryFailure) + Send + Sync + 'static) {
        let _ = ractor::cast!(
            self.actor,
            BatcherMessage::SetFailureHandler(Some(Arc::new(handler)))
        );
    }

    pub async fn pending_len(&self) -> Result<usize, LecternError> {
        ractor::call!(self.actor, BatcherMessage::PendingLen)
            .map_err(|e| LecternError::RactorError(format!("PendingLen RPC failed: {e}")))
    }

    pub fn stop(&self) {
        self.actor.stop(None);
    }
}

struct BatcherState {
    sink: Arc<dyn ProgressSink>,
    policy: BatchPolicy,
    on_failure: Option<FailureHandler>,
    /// Newest non-completion update per chapter.
    pending: BTreeMap<String, ProgressUpdate>,
    /// Bumped whenever the pending map is drained, so stale timers are ignored.
    generation: u64,
    armed: bool,
}

struct ProgressBatcherActor;

#[ractor::async_trait]
impl Actor for ProgressBatcherActor {
    type Msg = BatcherMessage;
    type State = BatcherState;
    type Arguments = (Arc<dyn ProgressSink>, BatchPolicy);

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        (sink, policy): Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        debug!(
            flush_delay_ms = policy.flush_delay.as_millis() as u64,
            max_retries = policy.max_retries,
            "progress batcher started"
        );
        Ok(BatcherState {
            sink,
            policy,
            on_failure: None,
            pending: BTreeMap::new(),
            generation: 0,
            armed: false,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            BatcherMessage::Record(update) => self.handle_record(state, &myself, update),
            BatcherMessage::Flush(reply) => {
                let n = self.dispatch_pending(state);
                let _ = reply.send(n);
            }
            BatcherMessage::FlushOnUnload => {
                let batch = self.drain(state);
                if !batch.is_empty() {
                    info!(count = batch.len(), "unload: handing progress to beacon");
                    state.sink.beacon(batch);
                }
            }
            BatcherMessage::SetFailureHandler(handler) => state.on_failure = handler,
            BatcherMessage::PendingLen(reply) => {
                let _ = reply.send(state.pending.len());
            }
            BatcherMessage::FlushDue { generation } => {
                if state.armed && generation == state.generation {
                    self.dispatch_pending(state);
                }
            }
        }
        Ok(())
    }
}

impl ProgressBatcherActor {
    fn handle_record(
        &self,
        state: &mut BatcherState,
        myself: &ActorRef<BatcherMessage>,
        update: ProgressUpdate,
    ) {
        if !update.is_valid() {
            warn!(chapter_id = %update.chapter_id, time = update.current_time, "dropping invalid progress update");
            return;
        }

        if update.is_completed {
            // a completion supersedes any queued position for the same chapter
            state.pending.remove(&update.chapter_id);
            debug!(chapter_id = %update.chapter_id, "completion sent immediately");
            self.deliver(state, vec![update]);
            return;
        }

        state.pending.insert(update.chapter_id.clone(), update);
        if !state.armed {
            state.armed = true;
            let generation = state.generation;
            let _ = myself.send_after(state.policy.flush_delay, move || BatcherMessage::FlushDue {
                generation,
            });
        }
    }

    fn drain(&self, state: &mut BatcherState) -> Vec<ProgressUpdate> {
        state.armed = false;
        state.generation = state.generation.wrapping_add(1);
        std::mem::take(&mut state.pending).into_values().collect()
    }

    fn dispatch_pending(&self, state: &mut BatcherState) -> usize {
        let batch = self.drain(state);
        let n = batch.len();
        if n > 0 {
            self.deliver(state, batch);
        }
        n
    }

    /// Send on a detached task; retries never block the mailbox.
    fn deliver(&self, state: &BatcherState, batch: Vec<ProgressUpdate>) {
        let sink = state.sink.clone();
        let retry_policy = state.policy.retry_policy();
        let on_failure = state.on_failure.clone();

        tokio::spawn(async move {
            let result = (|| sink.send(batch.clone()))
                .retry(retry_policy)
                .when(|e: &LecternError| e.is_retryable())
                .notify(|err, dur: Duration| {
                    warn!("progress send retrying after error {}, sleeping {:?}", err, dur);
                })
                .await;

            if let Err(error) = result {
                warn!(count = batch.len(), error = %error, "progress updates dropped");
                if let Some(handler) = on_failure {
                    handler(DeliveryFailure {
                        updates: batch,
                        error,
                    });
                }
            }
        });
    }
}
