use super::*;
use activations::{Finalization, PendingActivation};
use entity::{Action, Exec, SEQUENCE_KIND};
use fqn::Fqn;
use std::future::Future;
use std::pin::Pin;

impl Dispatcher {
    /// Run an action whose exec descriptor is a sequence.
    ///
    /// Components execute strictly in order, each blocking, each linked to
    /// the parent record via `cause`. A component failure finalizes the
    /// parent with that component's envelope and stops the chain.
    ///
    /// Boxed explicitly (rather than a plain `async fn`) to break the
    /// mutual recursion with `invoke_action`/`run_sequence`, which would
    /// otherwise leave the compiler unable to prove the returned future
    /// is `Send`.
    #[instrument(skip(self, action, params, options), fields(sequence = %action.fqn()))]
    pub(super) fn invoke_sequence<'a>(
        self: &'a Arc<Self>,
        namespace: &'a str,
        action: &'a Action,
        params: params::Map,
        options: InvokeOptions,
        subject: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<InvokeOutcome, Error>> + Send + 'a>> {
        Box::pin(self.invoke_sequence_inner(namespace, action, params, options, subject))
    }

    async fn invoke_sequence_inner(
        self: &Arc<Self>,
        namespace: &str,
        action: &Action,
        params: params::Map,
        options: InvokeOptions,
        subject: &str,
    ) -> Result<InvokeOutcome, Error> {
        let Exec::Sequence { components } = &action.exec else {
            return Err(Error::Internal(format!(
                "action {} is not a sequence",
                action.fqn()
            )));
        };
        if components.is_empty() {
            return Err(Error::validation(
                "sequence has no components",
                Some("exec.components"),
            ));
        }

        let record = self
            .activations
            .open(PendingActivation {
                namespace: namespace.to_string(),
                name: action.fqn().to_string(),
                version: action.version.clone(),
                kind: SEQUENCE_KIND.to_string(),
                limits: action.limits,
                subject: subject.to_string(),
                cause: options.cause,
                publish: action.publish,
            })
            .await?;
        let parent_id = record.activation_id;

        if options.blocking {
            let record = self
                .run_sequence(
                    parent_id,
                    namespace.to_string(),
                    components.clone(),
                    params,
                    subject.to_string(),
                )
                .await?;
            Ok(if options.result_only {
                InvokeOutcome::Result(record.response.result)
            } else {
                InvokeOutcome::Completed(record.into())
            })
        } else {
            // The chain still runs to completion, the caller just does not
            // wait for it
            let dispatcher = self.clone();
            let components = components.clone();
            let namespace = namespace.to_string();
            let subject = subject.to_string();
            self.task_tracker.spawn(async move {
                _ = dispatcher
                    .run_sequence(parent_id, namespace, components, params, subject)
                    .await
                    .inspect_err(|e| warn!("Sequence {parent_id} failed: {e}"));
            });
            Ok(InvokeOutcome::Accepted {
                activation_id: parent_id,
            })
        }
    }

    async fn run_sequence(
        self: &Arc<Self>,
        parent_id: Uuid,
        parent_namespace: String,
        components: Vec<Fqn>,
        params: params::Map,
        subject: String,
    ) -> Result<Activation, Error> {
        let total = components.len();
        let mut current_params = params;
        let mut last: Option<Activation> = None;
        let mut component_ids = Vec::new();

        for (step, component) in components.iter().enumerate() {
            debug!("Sequence step {}/{total}: {component}", step + 1);

            let outcome = self
                .invoke_action(
                    &component.namespace,
                    &component.path(),
                    current_params.clone(),
                    InvokeOptions {
                        blocking: true,
                        result_only: false,
                        timeout: None,
                        cause: Some(parent_id),
                    },
                    &subject,
                )
                .await;

            let child = match outcome {
                Ok(InvokeOutcome::Completed(record)) => *record,
                Ok(_) => {
                    let message = "sequence component produced no record".to_string();
                    self.fail_activation(&parent_id, 500, &message).await;
                    return Err(Error::Internal(message));
                }
                Err(e) => {
                    self.fail_activation(&parent_id, i64::from(e.status()), &e.to_string())
                        .await;
                    return Err(e);
                }
            };
            component_ids.push(child.activation_id.to_string());

            if !child.response.success {
                warn!(
                    "Sequence {parent_id} failed at step {}/{total}: {}",
                    step + 1,
                    component
                );
                _ = self
                    .activations
                    .finalize(
                        &parent_id,
                        Finalization {
                            status_code: child.status_code,
                            response: child.response.clone(),
                            logs: component_ids,
                            duration: None,
                            annotations: params::Map::new(),
                        },
                    )
                    .await?;
                return self.store.activation(&parent_namespace, &parent_id).await;
            }

            // Chain the component's result into the next component's input,
            // wrapping non-object results
            current_params = match &child.response.result {
                serde_json::Value::Object(map) => map.clone(),
                other => {
                    let mut wrapped = params::Map::new();
                    wrapped.insert("result".into(), other.clone());
                    wrapped
                }
            };
            last = Some(child);
        }

        let last = last.ok_or_else(|| Error::Internal("empty sequence chain".into()))?;
        _ = self
            .activations
            .finalize(
                &parent_id,
                Finalization {
                    status_code: last.status_code,
                    response: last.response,
                    // The parent's log lines are its component activations,
                    // in execution order
                    logs: component_ids,
                    duration: None,
                    annotations: params::Map::new(),
                },
            )
            .await?;
        self.store.activation(&parent_namespace, &parent_id).await
    }
}
