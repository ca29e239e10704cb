//! Control plane: the engine, its sequencer, snapshots and workers.

mod acl;
mod sequencer;
mod snapshot;
mod workers;

pub use acl::TuntermAcl;
pub use sequencer::{ControlPlane, ControlPlaneError};
pub use snapshot::DataplaneSnapshot;
pub use workers::{BatchResult, WorkerError, WorkerPool};
