use super::*;
use activation::{Activation, ActivationUpdate, Response, now_ms};
use entity::Limits;
use std::collections::HashMap;
use std::sync::Mutex;
use store::Store;
use tokio::sync::Notify;
use uuid::Uuid;

/// Grace period past the deadline for a result that arrives right at the
/// wire; waiters still unblock well within 100ms of expiry.
const DEADLINE_SLACK: std::time::Duration = std::time::Duration::from_millis(50);

/// What the orchestrator knows about an execution before it starts.
#[derive(Debug, Clone)]
pub struct PendingActivation {
    pub namespace: String,
    /// Fully-qualified action name.
    pub name: String,
    pub version: String,
    pub kind: String,
    pub limits: Limits,
    pub subject: String,
    pub cause: Option<Uuid>,
    pub publish: bool,
}

/// Terminal outcome applied to a pending activation.
#[derive(Debug, Clone)]
pub struct Finalization {
    pub status_code: i64,
    pub response: Response,
    pub logs: Vec<String>,
    /// Invoker-measured duration; wall-clock against the record's `start`
    /// when absent.
    pub duration: Option<u64>,
    pub annotations: params::Map,
}

impl Finalization {
    pub fn failure(status_code: i64, message: impl std::fmt::Display) -> Self {
        Self {
            status_code,
            response: Response::error(message),
            logs: Vec::new(),
            duration: None,
            annotations: params::Map::new(),
        }
    }
}

/// Creates pending activation records, finalizes them exactly once, and
/// parks blocking callers until their record turns terminal.
pub struct ActivationManager {
    store: Arc<Store>,
    waiters: Mutex<HashMap<Uuid, Arc<Notify>>>,
}

impl ActivationManager {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            waiters: Default::default(),
        }
    }

    /// Write the pending record. Must complete before the matching
    /// invocation message is published anywhere.
    pub async fn open(&self, spec: PendingActivation) -> Result<Activation, Error> {
        let mut annotations = params::Map::new();
        annotations.insert("path".into(), serde_json::Value::String(spec.name.clone()));
        annotations.insert("kind".into(), serde_json::Value::String(spec.kind.clone()));
        annotations.insert(
            "limits".into(),
            serde_json::to_value(spec.limits)
                .map_err(|e| Error::Internal(format!("failed to serialize limits: {e}")))?,
        );

        let record = Activation {
            activation_id: Uuid::new_v4(),
            namespace: spec.namespace,
            name: spec.name,
            version: spec.version,
            subject: spec.subject,
            start: now_ms(),
            end: None,
            duration: None,
            status_code: 0,
            response: Response::default(),
            logs: Vec::new(),
            annotations,
            cause: spec.cause,
            publish: spec.publish,
        };

        self.store
            .entity_storage()
            .create_activation(&record)
            .await
            .map_err(Error::Storage)?;

        debug!("Created pending activation {}", record.activation_id);
        Ok(record)
    }

    /// Apply the terminal state. Idempotent: only the first call for an
    /// activation does anything, later calls return false.
    pub async fn finalize(&self, id: &Uuid, outcome: Finalization) -> Result<bool, Error> {
        let Some(record) = self
            .store
            .entity_storage()
            .find_activation(id)
            .await
            .map_err(Error::Storage)?
        else {
            warn!("Result for unknown activation {id}");
            return Ok(false);
        };
        if record.is_terminal() {
            return Ok(false);
        }

        let end = now_ms().max(record.start);
        let update = ActivationUpdate {
            end,
            // Wall-clock against the record when the invoker did not
            // report a duration
            duration: outcome.duration.unwrap_or(end - record.start),
            status_code: outcome.status_code,
            response: outcome.response,
            logs: outcome.logs,
            annotations: outcome.annotations,
        };

        let applied = self
            .store
            .entity_storage()
            .update_activation(id, &update)
            .await
            .map_err(Error::Storage)?;

        if applied {
            debug!("Finalized activation {id} with status {}", update.status_code);
            self.notify(id);
        }
        Ok(applied)
    }

    /// Block until the activation is terminal or the timeout passes.
    pub async fn await_result(
        &self,
        namespace: &str,
        id: &Uuid,
        timeout: std::time::Duration,
    ) -> Result<Activation, Error> {
        let deadline = tokio::time::Instant::now() + timeout + DEADLINE_SLACK;

        let notify = self
            .waiters
            .lock()
            .trace_expect("Failed to lock mutex")
            .entry(*id)
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone();

        loop {
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            // Check after arming, so a finalize between the read and the
            // wait cannot be missed
            if let Some(record) = self
                .store
                .entity_storage()
                .get_activation(namespace, id)
                .await
                .map_err(Error::Storage)?
            {
                if record.is_terminal() {
                    self.drop_waiter(id);
                    return Ok(record);
                }
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => {
                    self.drop_waiter(id);

                    // Last look, the result may have landed while the timer
                    // was arming
                    if let Ok(Some(record)) =
                        self.store.entity_storage().get_activation(namespace, id).await
                    {
                        if record.is_terminal() {
                            return Ok(record);
                        }
                    }
                    return Err(Error::Timeout(*id));
                }
            }
        }
    }

    fn notify(&self, id: &Uuid) {
        if let Some(notify) = self
            .waiters
            .lock()
            .trace_expect("Failed to lock mutex")
            .get(id)
        {
            notify.notify_waiters();
        }
    }

    fn drop_waiter(&self, id: &Uuid) {
        self.waiters
            .lock()
            .trace_expect("Failed to lock mutex")
            .remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager() -> ActivationManager {
        ActivationManager::new(Arc::new(Store::new(&config::Config::default())))
    }

    fn pending(name: &str) -> PendingActivation {
        PendingActivation {
            namespace: "ns1".into(),
            name: format!("/ns1/{name}"),
            version: "0.0.1".into(),
            kind: "python:3.12".into(),
            limits: Limits::default(),
            subject: "user@example.com".into(),
            cause: None,
            publish: false,
        }
    }

    #[tokio::test]
    async fn open_then_finalize_once() {
        let manager = manager();
        let record = manager.open(pending("hello")).await.unwrap();
        assert!(!record.is_terminal());
        assert_eq!(record.annotations["kind"], json!("python:3.12"));

        let outcome = Finalization {
            status_code: 200,
            response: Response::ok(json!({"greet": "pat"})),
            logs: vec!["hi".into()],
            duration: Some(12),
            annotations: params::Map::new(),
        };
        assert!(
            manager
                .finalize(&record.activation_id, outcome.clone())
                .await
                .unwrap()
        );

        // Second finalize is a no-op
        assert!(
            !manager
                .finalize(&record.activation_id, outcome)
                .await
                .unwrap()
        );

        let stored = manager
            .store
            .activation("ns1", &record.activation_id)
            .await
            .unwrap();
        assert!(stored.is_terminal());
        assert_eq!(stored.duration, Some(12));
        assert_eq!(stored.status_code, 200);
        assert!(stored.end.unwrap() >= stored.start);
    }

    #[tokio::test]
    async fn await_returns_after_finalize() {
        let manager = Arc::new(manager());
        let record = manager.open(pending("hello")).await.unwrap();
        let id = record.activation_id;

        let waiter = manager.clone();
        let handle = tokio::spawn(async move {
            waiter
                .await_result("ns1", &id, std::time::Duration::from_secs(5))
                .await
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        manager
            .finalize(
                &id,
                Finalization {
                    status_code: 200,
                    response: Response::ok(json!(1)),
                    logs: Vec::new(),
                    duration: None,
                    annotations: params::Map::new(),
                },
            )
            .await
            .unwrap();

        let record = handle.await.unwrap().unwrap();
        assert!(record.is_terminal());
        assert_eq!(record.duration, Some(record.end.unwrap() - record.start));
    }

    #[tokio::test]
    async fn await_times_out() {
        let manager = manager();
        let record = manager.open(pending("hello")).await.unwrap();

        let start = tokio::time::Instant::now();
        let result = manager
            .await_result(
                "ns1",
                &record.activation_id,
                std::time::Duration::from_millis(100),
            )
            .await;

        assert!(matches!(result, Err(Error::Timeout(_))));
        // Unblocks within the allowed margin past the deadline
        assert!(start.elapsed() < std::time::Duration::from_millis(350));
    }
}
