use std::sync::Arc;

use super::{LocalBroker, Transport};
use crate::config::Config;
use crate::error::TransportError;
use crate::message::{Channel, Envelope, EvaluationStatus, Properties, codec};

/// Transport plus configuration, handed to every publisher and consumer process.
///
/// Cheap to clone. Replaces any process-wide broker state: two contexts never share
/// anything unless they were cloned from one another.
#[derive(Clone)]
pub struct TransportContext {
    transport: Arc<dyn Transport>,
    config: Arc<Config>,
}

impl TransportContext {
    /// Creates a context.
    pub fn new(transport: Arc<dyn Transport>, config: Config) -> Self {
        Self {
            transport,
            config: Arc::new(config),
        }
    }

    /// Context over a fresh [`LocalBroker`] sized by `config.channel_capacity`.
    pub fn local(config: Config) -> Self {
        let broker = LocalBroker::new(config.channel_capacity_clamped());
        Self::new(Arc::new(broker), config)
    }

    /// Shared transport.
    #[inline]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Shared configuration.
    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Encodes and sends one status event.
    pub(crate) async fn send_status(
        &self,
        properties: Properties,
        status: &EvaluationStatus,
    ) -> Result<(), TransportError> {
        let payload = codec::encode(status).map_err(|e| TransportError::Malformed {
            reason: e.to_string(),
        })?;
        self.transport
            .publish(Envelope::new(Channel::Status, properties, payload))
            .await
    }
}

impl std::fmt::Debug for TransportContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
