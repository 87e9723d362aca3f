use std::sync::Arc;

use super::EvaluationPublisher;
use crate::error::EvaluationError;
use crate::message::{EvaluationDescription, EvaluationId};
use crate::negotiation::{ApproveAll, Approver};
use crate::sync::FlowController;
use crate::tracker::StatusTracker;
use crate::transport::TransportContext;

/// Builder for an [`EvaluationPublisher`].
pub struct PublisherBuilder {
    ctx: TransportContext,
    description: EvaluationDescription,
    client_id: Option<String>,
    evaluation_id: Option<EvaluationId>,
    approver: Option<Arc<dyn Approver>>,
}

impl PublisherBuilder {
    pub(super) fn new(ctx: TransportContext, description: EvaluationDescription) -> Self {
        Self {
            ctx,
            description,
            client_id: None,
            evaluation_id: None,
            approver: None,
        }
    }

    /// Identity the publisher reports in its status events.
    ///
    /// Defaults to `publisher-<evaluation id>`.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Uses a caller-chosen evaluation id instead of a random one.
    pub fn with_evaluation_id(mut self, evaluation_id: impl Into<EvaluationId>) -> Self {
        self.evaluation_id = Some(evaluation_id.into());
        self
    }

    /// Restricts which consumers may be assigned which formats.
    ///
    /// Defaults to [`ApproveAll`].
    pub fn with_approver(mut self, approver: impl Approver + 'static) -> Self {
        self.approver = Some(Arc::new(approver));
        self
    }

    /// Subscribes to the evaluation's status channel and returns the publisher.
    ///
    /// Nothing is published yet; call [`EvaluationPublisher::start`].
    pub async fn build(self) -> Result<EvaluationPublisher, EvaluationError> {
        let evaluation_id = self.evaluation_id.unwrap_or_else(EvaluationId::random);
        if evaluation_id.is_blank() {
            return Err(EvaluationError::IllegalState {
                evaluation_id,
                reason: "blank evaluation id".into(),
            });
        }
        let client_id = self
            .client_id
            .unwrap_or_else(|| format!("publisher-{evaluation_id}"));
        let approver: Arc<dyn Approver> = match self.approver {
            Some(approver) => approver,
            None => Arc::new(ApproveAll),
        };

        let flow = Arc::new(FlowController::new(self.ctx.config().flow_limits()));
        let tracker = StatusTracker::spawn(
            self.ctx.clone(),
            evaluation_id.clone(),
            client_id.clone(),
            self.description.formats.clone(),
            approver,
            flow.clone(),
        )
        .await?;

        Ok(EvaluationPublisher::new_internal(
            self.ctx,
            evaluation_id,
            client_id,
            self.description,
            tracker,
            flow,
        ))
    }
}
