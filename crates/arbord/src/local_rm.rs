//! Resource manager for single-node use.
//!
//! Accepts every request and logs it. Nothing is actually launched, so
//! exits are reported by the operator through `arbord report-exit`.

use async_trait::async_trait;
use tracing::info;

use arbor_core::AllocationId;
use arbor_scheduler::{AllocateRequest, ResourceManager, RmError, SignalKind};

#[derive(Debug, Default)]
pub struct LocalResourceManager;

#[async_trait]
impl ResourceManager for LocalResourceManager {
    async fn allocate(&self, request: AllocateRequest) -> Result<(), RmError> {
        info!(
            allocation_id = %request.allocation_id,
            task_id = %request.task_id,
            job_id = %request.job_id,
            slots = request.slots_needed,
            resource_pool = %request.resource_pool,
            single_agent = request.fitting.single_agent,
            preemptible = request.preemptible,
            "allocation accepted"
        );
        Ok(())
    }

    async fn signal(
        &self,
        allocation_id: &AllocationId,
        kind: SignalKind,
        reason: &str,
    ) -> Result<(), RmError> {
        info!(%allocation_id, %kind, reason, "signal accepted");
        Ok(())
    }
}
