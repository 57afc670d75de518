//! The queue engine: lifecycle state machine, polling loop, retry and
//! rate-limit arithmetic.
//!
//! One engine instance drives one sequential receive/dispatch loop against
//! one queue. Sequencing is structural: the loop fully resolves every message
//! of a received batch (delete, retry-leave, or requeue) before issuing the
//! next receive, so no two handler invocations ever overlap. Producers may
//! call [`QueueEngine::send_message`] concurrently from any task; the
//! transport handle is the only shared resource.

use crate::dispatch::{DispatchContext, Envelope, WorkPayload};
use crate::error::EngineError;
use crate::hooks::{ErrorClassifier, MetricsSink, RateLimitChecker, RequestHandler};
use bytes::Bytes;
use conveyor_transport::{DeliveredMessage, DeliveryToken, MessageId, QueueConfig, QueueTransport};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;

/// Hard ceiling on transport enqueue/redelivery delays, in seconds
///
/// Requested delays are clamped into `[0, MAX_DELAY_SECONDS)`: anything at or
/// above the ceiling is truncated to `MAX_DELAY_SECONDS - 1` rather than
/// rejected, so delivery is never dropped for an over-long delay.
pub const MAX_DELAY_SECONDS: u32 = 900;

/// Failure counter, incremented once per cycle where the classifier reports
/// `is_failure`, tagged by tenant
const HANDLER_FAILURE_METRIC: &str = "queue_handler_failures_total";

/// Pause before polling again after a transport receive failure
const RECEIVE_FAILURE_PAUSE: std::time::Duration = std::time::Duration::from_secs(1);

/// Clamp a requested delay into the transport-supported range
pub fn clamp_delay(delay_seconds: u32) -> u32 {
    delay_seconds.min(MAX_DELAY_SECONDS - 1)
}

/// Engine lifecycle states
///
/// Transitions: `Stopped -> Running -> Stopping -> Stopped`. The engine is
/// restartable; a new `start()` after `stop()` resumes polling with no
/// residual state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Running,
    Stopping,
}

/// Slot holding the spawned polling task while the engine runs
enum Runner {
    Idle,
    Active {
        shutdown: watch::Sender<bool>,
        handle: JoinHandle<()>,
    },
}

/// Durable-queue consumer/producer engine
///
/// Constructed once with an immutable configuration and collaborator set;
/// see the crate docs for the processing guarantees.
pub struct QueueEngine<T: WorkPayload> {
    inner: Arc<EngineInner<T>>,
    runner: Mutex<Runner>,
    state: watch::Sender<LifecycleState>,
}

/// State shared with the spawned polling loop
struct EngineInner<T> {
    config: QueueConfig,
    transport: Arc<dyn QueueTransport>,
    handler: Arc<dyn RequestHandler<T>>,
    classifier: Arc<dyn ErrorClassifier<T>>,
    rate_limiter: Arc<dyn RateLimitChecker<T>>,
    metrics: Arc<dyn MetricsSink>,
}

impl<T: WorkPayload> QueueEngine<T> {
    /// Create an engine from configuration and collaborators
    ///
    /// Collaborators are injected once and owned by the engine for its
    /// lifetime; substitutable fakes make the engine deterministic to test.
    pub fn new(
        config: QueueConfig,
        transport: Arc<dyn QueueTransport>,
        handler: Arc<dyn RequestHandler<T>>,
        classifier: Arc<dyn ErrorClassifier<T>>,
        rate_limiter: Arc<dyn RateLimitChecker<T>>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let (state, _) = watch::channel(LifecycleState::Stopped);

        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                transport,
                handler,
                classifier,
                rate_limiter,
                metrics,
            }),
            runner: Mutex::new(Runner::Idle),
            state,
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Start the polling loop
    ///
    /// No-op if the engine is already running.
    pub async fn start(&self) {
        let mut runner = self.runner.lock().await;

        if matches!(*runner, Runner::Active { .. }) {
            debug!(queue = %self.inner.config.queue_name, "Engine already running");
            return;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(run_poll_loop(inner, shutdown_rx));

        *runner = Runner::Active { shutdown, handle };
        self.state.send_replace(LifecycleState::Running);

        info!(queue = %self.inner.config.queue_name, "Engine started");
    }

    /// Stop the polling loop and wait for full quiescence
    ///
    /// Resolves only once the in-flight receive/dispatch cycle has drained
    /// and the loop has exited; no handler invocation happens afterwards.
    /// No-op if the engine is not running.
    pub async fn stop(&self) {
        let mut runner = self.runner.lock().await;

        let Runner::Active { shutdown, handle } = std::mem::replace(&mut *runner, Runner::Idle)
        else {
            return;
        };

        self.state.send_replace(LifecycleState::Stopping);

        // The loop checks this between cycles, never mid-dispatch
        let _ = shutdown.send(true);

        if let Err(join_error) = handle.await {
            error!(
                queue = %self.inner.config.queue_name,
                error = %join_error,
                "Polling loop terminated abnormally"
            );
        }

        self.state.send_replace(LifecycleState::Stopped);
        info!(queue = %self.inner.config.queue_name, "Engine stopped");
    }

    /// Enqueue a work item, optionally delayed
    ///
    /// The delay is clamped into `[0, MAX_DELAY_SECONDS)`. Enqueue failures
    /// are propagated to the caller and never retried internally. Safe to
    /// call concurrently from any number of tasks.
    pub async fn send_message(
        &self,
        payload: &T,
        delay_seconds: Option<u32>,
    ) -> Result<MessageId, EngineError> {
        let body = serde_json::to_vec(payload)?;
        let delay = delay_seconds.map(clamp_delay);

        Ok(self.inner.transport.send(Bytes::from(body), delay).await?)
    }

    /// Remove all messages from the underlying queue
    ///
    /// Only well-defined while not actively dispatching a message that
    /// depends on queue contents; typically used between test runs. Does not
    /// alter the lifecycle state.
    pub async fn purge_queue(&self) -> Result<(), EngineError> {
        Ok(self.inner.transport.purge().await?)
    }
}

// ============================================================================
// Polling Loop
// ============================================================================

/// The sequential receive/dispatch loop
///
/// Shutdown is observed only between cycles, so every received batch is
/// fully resolved before the loop exits.
async fn run_poll_loop<T: WorkPayload>(
    inner: Arc<EngineInner<T>>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(queue = %inner.config.queue_name, "Polling loop started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let batch = tokio::select! {
            // Also fires if the engine is dropped while running
            _ = shutdown.changed() => break,
            received = inner.transport.receive() => match received {
                Ok(batch) => batch,
                Err(transport_error) => {
                    // The transport's own redelivery semantics cover anything
                    // received but lost; keep polling
                    warn!(
                        queue = %inner.config.queue_name,
                        error = %transport_error,
                        "Receive failed, continuing to poll"
                    );
                    tokio::time::sleep(RECEIVE_FAILURE_PAUSE).await;
                    continue;
                }
            },
        };

        // Batch messages are resolved strictly in the order returned
        for message in batch {
            inner.dispatch(message).await;
        }
    }

    info!(queue = %inner.config.queue_name, "Polling loop exited");
}

impl<T: WorkPayload> EngineInner<T> {
    /// Dispatch one delivery and fully resolve its outcome
    async fn dispatch(&self, message: DeliveredMessage) {
        let message_id = message.message_id.clone();

        let envelope = match Envelope::<T>::decode(&message, self.config.max_attempts) {
            Ok(envelope) => envelope,
            Err(decode_error) => {
                // An undecodable payload can never succeed; drop it rather
                // than redeliver forever
                error!(
                    queue = %self.config.queue_name,
                    message_id = %message_id,
                    error = %decode_error,
                    "Deleting undecodable message"
                );
                self.delete_message(&message.token, &message_id).await;
                return;
            }
        };

        let Envelope {
            token,
            payload,
            receive_count,
            last_attempt,
        } = envelope;

        let tenant_key = payload.tenant_key();
        let span = info_span!(
            "dispatch",
            queue = %self.config.queue_name,
            message_id = %message_id,
            tenant = %tenant_key,
            receive_count,
            last_attempt,
        );

        let ctx = DispatchContext {
            payload,
            receive_count,
            last_attempt,
            tenant_key,
            span: span.clone(),
        };

        // Rate-limit preemption: throttled work is handed back to the
        // transport before the handler ever runs
        let verdict = match self.rate_limiter.check(&ctx.tenant_key, &ctx.payload).await {
            Ok(verdict) => verdict,
            Err(limiter_error) => {
                warn!(
                    queue = %self.config.queue_name,
                    message_id = %message_id,
                    tenant = %ctx.tenant_key,
                    error = %limiter_error,
                    "Rate limiter failed, leaving message for redelivery"
                );
                return;
            }
        };

        if verdict.exceeded {
            let cooldown = verdict.cooldown_seconds.unwrap_or(0);
            self.preempt(ctx, &token, &message_id, cooldown).await;
            return;
        }

        match self.handler.handle(&ctx).instrument(span.clone()).await {
            Ok(()) => {
                debug!(
                    queue = %self.config.queue_name,
                    message_id = %message_id,
                    tenant = %ctx.tenant_key,
                    "Message processed"
                );
                self.delete_message(&token, &message_id).await;
            }
            Err(handler_error) => {
                self.resolve_failure(handler_error, ctx, &token, &message_id)
                    .await;
            }
        }
    }

    /// Route a handler failure through the classifier and apply the decision
    async fn resolve_failure(
        &self,
        handler_error: anyhow::Error,
        ctx: DispatchContext<T>,
        token: &DeliveryToken,
        message_id: &MessageId,
    ) {
        let decision = {
            let _entered = ctx.span.enter();
            match self.classifier.classify(&handler_error, &ctx) {
                Ok(decision) => decision,
                Err(classifier_error) => {
                    error!(
                        queue = %self.config.queue_name,
                        message_id = %message_id,
                        tenant = %ctx.tenant_key,
                        error = %classifier_error,
                        "Classifier failed, leaving message for redelivery"
                    );
                    return;
                }
            }
        };

        if decision.is_failure {
            self.metrics.increment(
                HANDLER_FAILURE_METRIC,
                &[("tenant", ctx.tenant_key.as_str())],
            );
        }

        if decision.retryable {
            let delay = clamp_delay(decision.retry_delay_seconds.unwrap_or(0));
            warn!(
                queue = %self.config.queue_name,
                message_id = %message_id,
                tenant = %ctx.tenant_key,
                error = %handler_error,
                retry_delay_seconds = delay,
                receive_count = ctx.receive_count,
                "Handler failed, scheduling redelivery"
            );

            // Deferral on the same delivery preserves the provider's
            // receive-count bookkeeping, which last_attempt depends on
            if let Err(visibility_error) = self.transport.change_visibility(token, delay).await {
                // The baseline visibility timeout still redelivers it
                warn!(
                    queue = %self.config.queue_name,
                    message_id = %message_id,
                    error = %visibility_error,
                    "Failed to defer redelivery"
                );
            }
        } else {
            warn!(
                queue = %self.config.queue_name,
                message_id = %message_id,
                tenant = %ctx.tenant_key,
                error = %handler_error,
                is_failure = decision.is_failure,
                "Handler failed, abandoning attempt"
            );
            self.delete_message(token, message_id).await;
        }
    }

    /// Defer a throttled message without attempting it
    ///
    /// Deletes the current delivery and re-enqueues the marked payload under
    /// a new message identity, delayed by the limiter's cool-down. The wait
    /// lives in the durable transport, which is safe across process
    /// restarts, and the fresh identity resets the receive count because
    /// this was never an attempt.
    async fn preempt(
        &self,
        ctx: DispatchContext<T>,
        token: &DeliveryToken,
        message_id: &MessageId,
        cooldown_seconds: u32,
    ) {
        let delay = clamp_delay(cooldown_seconds);
        info!(
            queue = %self.config.queue_name,
            message_id = %message_id,
            tenant = %ctx.tenant_key,
            cooldown_seconds = delay,
            "Rate limit exceeded, deferring without attempting"
        );

        if let Err(delete_error) = self.transport.delete(token).await {
            // Leave the original in place; it will redeliver unmarked
            warn!(
                queue = %self.config.queue_name,
                message_id = %message_id,
                error = %delete_error,
                "Failed to delete throttled message, leaving for redelivery"
            );
            return;
        }

        let mut payload = ctx.payload;
        payload.mark_rate_limited();

        let body = match serde_json::to_vec(&payload) {
            Ok(body) => body,
            Err(serialize_error) => {
                error!(
                    queue = %self.config.queue_name,
                    message_id = %message_id,
                    error = %serialize_error,
                    "Failed to serialize deferred message"
                );
                return;
            }
        };

        if let Err(send_error) = self.transport.send(Bytes::from(body), Some(delay)).await {
            error!(
                queue = %self.config.queue_name,
                message_id = %message_id,
                tenant = %ctx.tenant_key,
                error = %send_error,
                "Failed to re-enqueue throttled message"
            );
        }
    }

    /// Delete a delivery, logging rather than propagating failures
    async fn delete_message(&self, token: &DeliveryToken, message_id: &MessageId) {
        if let Err(delete_error) = self.transport.delete(token).await {
            warn!(
                queue = %self.config.queue_name,
                message_id = %message_id,
                error = %delete_error,
                "Failed to delete message"
            );
        }
    }
}
