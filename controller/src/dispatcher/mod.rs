mod invoke;
mod results;
mod sequence;
mod trigger;

use super::*;
use activation::Activation;
use activations::ActivationManager;
use invoker_registry::InvokerRegistry;
use store::Store;
use uuid::Uuid;

/// Per-call invocation flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct InvokeOptions {
    pub blocking: bool,
    /// With `blocking`, strip the record down to `response.result`.
    pub result_only: bool,
    /// Milliseconds; clamped to the action's own timeout limit.
    pub timeout: Option<u32>,
    /// Parent activation for causal linking.
    pub cause: Option<Uuid>,
}

#[derive(Debug)]
pub enum InvokeOutcome {
    /// Non-blocking: the execution was handed off.
    Accepted { activation_id: Uuid },
    /// Blocking: the finalized activation record.
    Completed(Box<Activation>),
    /// Blocking with `result_only`: just the response payload.
    Result(serde_json::Value),
}

impl InvokeOutcome {
    pub fn activation_id(&self) -> Option<Uuid> {
        match self {
            Self::Accepted { activation_id } => Some(*activation_id),
            Self::Completed(record) => Some(record.activation_id),
            Self::Result(_) => None,
        }
    }
}

/// The invocation orchestrator.
///
/// Owns the result-stream consumer task that finalizes activations as
/// invokers report back; the task starts with the dispatcher and stops at
/// shutdown.
pub struct Dispatcher {
    code_bucket: String,
    store: Arc<Store>,
    registry: Arc<InvokerRegistry>,
    activations: Arc<ActivationManager>,
    broker: Arc<dyn broker::MessageBroker>,
    cancel_token: tokio_util::sync::CancellationToken,
    task_tracker: tokio_util::task::TaskTracker,
}

impl Dispatcher {
    pub fn new(
        config: &config::Config,
        store: Arc<Store>,
        registry: Arc<InvokerRegistry>,
        activations: Arc<ActivationManager>,
        broker: Arc<dyn broker::MessageBroker>,
    ) -> Arc<Self> {
        let dispatcher = Arc::new(Self {
            code_bucket: config.code_bucket.clone(),
            store,
            registry,
            activations,
            broker,
            cancel_token: tokio_util::sync::CancellationToken::new(),
            task_tracker: tokio_util::task::TaskTracker::new(),
        });

        // Spawn the result consumer
        let dispatcher_cloned = dispatcher.clone();
        let cancel_token = dispatcher.cancel_token.clone();
        dispatcher
            .task_tracker
            .spawn(async move { dispatcher_cloned.run_results(cancel_token).await });

        dispatcher
    }

    pub async fn shutdown(&self) {
        self.cancel_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;
    }
}
