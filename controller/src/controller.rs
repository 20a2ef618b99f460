use super::*;
use activations::ActivationManager;
use dispatcher::Dispatcher;
use invoker_registry::InvokerRegistry;
use store::Store;

/// Top-level control plane object: wires the store, broker, invoker
/// registry, activation manager and dispatcher together and owns their
/// lifecycle.
pub struct Controller {
    store: Arc<Store>,
    broker: Arc<dyn broker::MessageBroker>,
    registry: Arc<InvokerRegistry>,
    activations: Arc<ActivationManager>,
    dispatcher: Arc<Dispatcher>,
}

impl Controller {
    pub fn new(config: &config::Config) -> Self {
        let store = Arc::new(Store::new(config));

        let broker = config
            .broker
            .as_ref()
            .map(|b| b.clone())
            .unwrap_or_else(|| broker::mem::new(&broker::mem::Config::default()));

        let registry = Arc::new(InvokerRegistry::new(broker.clone()));
        let activations = Arc::new(ActivationManager::new(store.clone()));

        // New dispatcher (returns Arc, starts its result consumer immediately)
        let dispatcher = Dispatcher::new(
            config,
            store.clone(),
            registry.clone(),
            activations.clone(),
            broker.clone(),
        );

        Self {
            store,
            broker,
            registry,
            activations,
            dispatcher,
        }
    }

    /// Prepare broker consumer groups and start the heartbeat monitor.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<(), Error> {
        for (stream, group) in [
            (broker::STREAM_INVOCATIONS, broker::GROUP_INVOKERS),
            (broker::STREAM_RESULTS, broker::GROUP_CONTROLLERS),
            (broker::STREAM_HEARTBEATS, broker::GROUP_MONITORS),
        ] {
            self.broker
                .ensure_group(stream, group)
                .await
                .map_err(Error::Broker)?;
        }

        self.registry.start();
        info!("Controller started");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        // Stop consuming results before the registry goes quiet; storage
        // is released when the last reference drops
        self.dispatcher.shutdown().await;
        self.registry.stop().await;
        info!("Controller stopped");
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn registry(&self) -> &Arc<InvokerRegistry> {
        &self.registry
    }

    pub fn activations(&self) -> &Arc<ActivationManager> {
        &self.activations
    }

    pub fn broker(&self) -> &Arc<dyn broker::MessageBroker> {
        &self.broker
    }
}
