//! Client side of the coordination transport
//!
//! The transport exposes exactly two calls. Delivery is at-most-once: a
//! failed `pull` can be retried freely, a failed `push` may or may not have
//! been applied.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::{GradientUpdate, ModelSnapshot, PushReceipt};

/// Request/response channel from an agent to the parameter server
#[async_trait]
pub trait ParameterClient: Send + Sync {
    /// Fetch the current snapshot
    async fn pull(&self) -> Result<Arc<ModelSnapshot>, TransportError>;

    /// Submit a gradient computed against `update.base_version`
    async fn push(&self, update: GradientUpdate) -> Result<PushReceipt, TransportError>;
}

#[async_trait]
impl<T: ParameterClient + ?Sized> ParameterClient for Arc<T> {
    async fn pull(&self) -> Result<Arc<ModelSnapshot>, TransportError> {
        (**self).pull().await
    }

    async fn push(&self, update: GradientUpdate) -> Result<PushReceipt, TransportError> {
        (**self).push(update).await
    }
}
