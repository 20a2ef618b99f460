use super::*;

impl Dispatcher {
    /// Fire a trigger: fan the merged event out to every active rule,
    /// non-blocking. Individual rule failures are logged and skipped, never
    /// aborting the fan-out.
    #[instrument(skip(self, params))]
    pub async fn fire_trigger(
        self: &Arc<Self>,
        namespace: &str,
        trigger_name: &str,
        params: params::Map,
        subject: &str,
    ) -> Result<Vec<Uuid>, Error> {
        let trigger = self.store.trigger(namespace, trigger_name).await?;

        // Callers override the trigger's default parameters
        let merged = params::merge(&trigger.parameters, &params);

        let rules = self
            .store
            .active_rules_for_trigger(namespace, trigger_name)
            .await?;

        let mut activation_ids = Vec::new();
        for rule in rules {
            match self
                .invoke_action(
                    namespace,
                    &rule.action,
                    merged.clone(),
                    InvokeOptions::default(),
                    subject,
                )
                .await
            {
                Ok(outcome) => {
                    if let Some(activation_id) = outcome.activation_id() {
                        debug!(
                            "Rule {} triggered action {}: {activation_id}",
                            rule.name, rule.action
                        );
                        activation_ids.push(activation_id);
                    }
                }
                Err(e) => {
                    warn!("Failed to invoke action for rule {}: {e}", rule.name);
                }
            }
        }

        info!(
            "Trigger /{namespace}/{trigger_name} fired {} actions",
            activation_ids.len()
        );
        metrics::counter!("whisk_trigger_fires_total").increment(1);
        Ok(activation_ids)
    }
}
