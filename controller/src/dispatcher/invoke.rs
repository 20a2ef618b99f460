use super::*;
use activations::{Finalization, PendingActivation};
use broker::messages::{ActionDescriptor, CodeReference, InvocationMessage};
use entity::Exec;
use storage::BlobKey;

impl Dispatcher {
    /// Invoke an action by path within a namespace.
    ///
    /// The pending activation record is written before the invocation
    /// message is published, so a result can never arrive for a record that
    /// does not exist yet. Every failure past that point finalizes the
    /// record before surfacing.
    #[instrument(skip(self, params, options), fields(blocking = options.blocking))]
    pub async fn invoke_action(
        self: &Arc<Self>,
        namespace: &str,
        action_path: &str,
        params: params::Map,
        options: InvokeOptions,
        subject: &str,
    ) -> Result<InvokeOutcome, Error> {
        let action = self.store.resolve_action(namespace, action_path).await?;

        // Sequences are orchestrated locally, component by component
        if action.exec.is_sequence() {
            return self
                .invoke_sequence(namespace, &action, params, options, subject)
                .await;
        }

        params::validate_size(&params, "parameters")?;

        let mut timeout = options.timeout.unwrap_or(action.limits.timeout);
        if timeout > action.limits.timeout {
            warn!(
                "Requested timeout {timeout}ms exceeds limit {}ms, clamping",
                action.limits.timeout
            );
            timeout = action.limits.timeout;
        }

        let Exec::Code {
            kind,
            main,
            binary,
            image,
        } = &action.exec
        else {
            return Err(Error::Internal(format!(
                "action {} has an unexpected exec descriptor",
                action.fqn()
            )));
        };

        let code_hash = action.code_hash.clone().ok_or_else(|| {
            Error::Internal(format!("action {} has no code reference", action.fqn()))
        })?;
        let blob_key = BlobKey::new(namespace, &action.name, &code_hash);
        let code = CodeReference {
            bucket: self.code_bucket.clone(),
            key: blob_key.to_string(),
            hash: code_hash,
            // Invokers without blob credentials fetch through this instead
            url: self.store.presign_code(&blob_key).await.unwrap_or_default(),
        };

        // The invoker needs the caller's credential for nested API calls
        let auth_key = self
            .store
            .namespace(namespace)
            .await
            .map(|ns| format!("{}:{}", ns.auth_uuid, ns.auth_key))
            .ok();

        let record = self
            .activations
            .open(PendingActivation {
                namespace: namespace.to_string(),
                name: action.fqn().to_string(),
                version: action.version.clone(),
                kind: kind.clone(),
                limits: action.limits,
                subject: subject.to_string(),
                cause: options.cause,
                publish: action.publish,
            })
            .await?;
        let activation_id = record.activation_id;

        let Some(invoker_id) = self
            .registry
            .select(kind, u64::from(action.limits.memory))
        else {
            let message = format!("no invoker available for {kind}");
            self.fail_activation(&activation_id, 503, &message).await;
            metrics::counter!("whisk_invocations_failed_total").increment(1);
            return Err(Error::ServiceUnavailable(message));
        };
        debug!("Dispatching activation {activation_id} to invoker {invoker_id}");

        let mut limits = action.limits;
        limits.timeout = timeout;
        let message = InvocationMessage {
            activation_id,
            action: ActionDescriptor {
                name: action.fqn().to_string(),
                namespace: namespace.to_string(),
                version: action.version.clone(),
                kind: kind.clone(),
                image: image.clone(),
                main: main.clone(),
                binary: *binary,
                code: Some(code),
                limits,
                parameters: action.parameters.clone(),
            },
            params: serde_json::Value::Object(params),
            blocking: options.blocking,
            response_channel: broker::STREAM_RESULTS.to_string(),
            deadline: record.start + u64::from(timeout),
            namespace: namespace.to_string(),
            subject: subject.to_string(),
            cause: options.cause,
            auth_key,
        };

        let fields = match message.to_fields() {
            Ok(fields) => fields,
            Err(e) => {
                let message = format!("failed to encode invocation: {e}");
                self.fail_activation(&activation_id, 500, &message).await;
                return Err(Error::Internal(message));
            }
        };

        if let Err(e) = self.broker.publish(broker::STREAM_INVOCATIONS, &fields).await {
            let message = format!("failed to publish invocation: {e}");
            self.fail_activation(&activation_id, 502, &message).await;
            metrics::counter!("whisk_invocations_failed_total").increment(1);
            return Err(Error::ServiceUnavailable(message));
        }
        metrics::counter!("whisk_invocations_total").increment(1);

        if !options.blocking {
            return Ok(InvokeOutcome::Accepted { activation_id });
        }

        match self
            .activations
            .await_result(
                namespace,
                &activation_id,
                std::time::Duration::from_millis(u64::from(timeout)),
            )
            .await
        {
            Ok(record) => Ok(if options.result_only {
                InvokeOutcome::Result(record.response.result)
            } else {
                InvokeOutcome::Completed(record.into())
            }),
            Err(Error::Timeout(_)) => {
                self.fail_activation(
                    &activation_id,
                    504,
                    &format!("activation timed out after {timeout}ms"),
                )
                .await;
                metrics::counter!("whisk_invocations_timed_out_total").increment(1);
                Err(Error::Timeout(activation_id))
            }
            Err(e) => {
                self.fail_activation(&activation_id, 500, &e.to_string()).await;
                Err(e)
            }
        }
    }

    /// Best-effort error finalization; the primary error is surfaced to the
    /// caller regardless.
    pub(super) async fn fail_activation(&self, activation_id: &Uuid, status_code: i64, message: &str) {
        _ = self
            .activations
            .finalize(activation_id, Finalization::failure(status_code, message))
            .await
            .inspect_err(|e| error!("Failed to finalize activation {activation_id}: {e}"));
    }
}
