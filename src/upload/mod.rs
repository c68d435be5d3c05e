//! Direct upload coordination
//!
//! Clients ask for upload capability, then PUT bytes straight to the
//! backend. Nothing here decides whether an upload happened; that is the
//! ingest service's existence check at commit time.
//!
//! - [`plan_upload`] - single-part vs multipart, part size and count
//! - [`UploadCoordinator`] - presigned URLs, multipart completion and abort
//! - [`SessionTable`] - in-flight sessions, swept by [`UploadCoordinator::abort_expired`]

mod coordinator;
mod plan;
mod session;

pub use coordinator::UploadCoordinator;
pub use plan::{
    MAX_PART_COUNT, MAX_PART_SIZE, PART_SIZE_GRANULARITY, PlanLimits, UploadPlan, plan_upload,
};
pub use session::{PartUrl, SessionTable, UploadSession};
