use super::*;
use activations::Finalization;
use broker::MessageId;
use broker::messages::ResultMessage;

const RESULT_BLOCK: std::time::Duration = std::time::Duration::from_millis(1000);
const RESULT_BATCH: usize = 32;

impl Dispatcher {
    /// Consume the result stream, finalizing activations and waking blocked
    /// callers. Runs until shutdown; replayed messages are absorbed by
    /// finalize idempotence.
    pub(super) async fn run_results(
        self: Arc<Self>,
        cancel_token: tokio_util::sync::CancellationToken,
    ) {
        let mut last_id = MessageId::zero();
        loop {
            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => break,
                read = self.broker.read_blocking(
                    broker::STREAM_RESULTS,
                    &last_id,
                    RESULT_BLOCK,
                    RESULT_BATCH,
                ) => match read {
                    Ok(messages) => {
                        for message in messages {
                            last_id = message.id.clone();
                            match ResultMessage::from_fields(&message.fields) {
                                Ok(result) => self.ingest_result(result).await,
                                Err(e) => warn!("Ignoring invalid result message: {e}"),
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Result stream read failed: {e}");
                        tokio::time::sleep(RESULT_BLOCK).await;
                    }
                }
            }
        }
    }

    async fn ingest_result(&self, result: ResultMessage) {
        let mut annotations = result.annotations;
        if let Some(invoker_id) = &result.invoker_id {
            annotations.insert(
                "invoker".into(),
                serde_json::Value::String(invoker_id.clone()),
            );
        }

        match self
            .activations
            .finalize(
                &result.activation_id,
                Finalization {
                    status_code: result.status_code,
                    response: result.response,
                    logs: result.logs,
                    duration: Some(result.duration),
                    annotations,
                },
            )
            .await
        {
            Ok(true) => {
                metrics::counter!("whisk_results_ingested_total").increment(1);
            }
            Ok(false) => {
                trace!(
                    "Result for activation {} already applied or unknown",
                    result.activation_id
                );
            }
            Err(e) => {
                error!(
                    "Failed to finalize activation {}: {e}",
                    result.activation_id
                );
            }
        }
    }
}
