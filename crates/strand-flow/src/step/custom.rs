use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use strand_core::error::{Result, StrandError};
use tokio_util::sync::CancellationToken;

use super::StepConfig;
use crate::context::Context;
use crate::executor::ExecutionScope;

/// User-supplied step body. Receives the run's cancellation token and the
/// context it may read and write.
pub type StepFn = Arc<
    dyn for<'a> Fn(CancellationToken, &'a mut Context) -> BoxFuture<'a, Result<()>> + Send + Sync,
>;

#[derive(Clone)]
pub struct CustomStep {
    func: StepFn,
}

impl CustomStep {
    pub fn new<F>(func: F) -> Self
    where
        F: for<'a> Fn(CancellationToken, &'a mut Context) -> BoxFuture<'a, Result<()>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            func: Arc::new(func),
        }
    }

    pub(crate) async fn run(
        &self,
        _config: &StepConfig,
        ctx: &mut Context,
        scope: &ExecutionScope,
    ) -> Result<()> {
        tokio::select! {
            result = (self.func)(scope.cancel.clone(), ctx) => result,
            _ = scope.cancel.cancelled() => Err(StrandError::Cancelled),
        }
    }
}

impl fmt::Debug for CustomStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomStep(..)")
    }
}
