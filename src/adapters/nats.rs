//! NATS notifier. Each event is published on `<prefix>.<subject>` from a
//! spawned task so the order path never waits on the broker.

use tracing::{debug, warn};
use crate::domain::events::DomainEvent;
use crate::ports::Notifier;

#[derive(Clone)]
pub struct NatsNotifier {
    client: async_nats::Client,
    prefix: String,
}

impl NatsNotifier {
    pub fn new(client: async_nats::Client, prefix: impl Into<String>) -> Self { Self { client, prefix: prefix.into() } }

    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self, async_nats::ConnectError> {
        let client = async_nats::connect(url).await?;
        Ok(Self::new(client, prefix))
    }

    fn subject_for(&self, event: &DomainEvent) -> String { format!("{}.{}", self.prefix, event.subject()) }
}

impl Notifier for NatsNotifier {
    fn notify(&self, event: DomainEvent) {
        let subject = self.subject_for(&event);
        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(subject = %subject, error = %e, "could not encode event");
                return;
            }
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(subject = %subject, "no runtime to publish event on, dropping it");
            return;
        };
        let client = self.client.clone();
        runtime.spawn(async move {
            match client.publish(subject.clone(), payload.into()).await {
                Ok(()) => debug!(subject = %subject, "event published"),
                Err(e) => warn!(subject = %subject, error = %e, "event publish failed"),
            }
        });
    }
}
