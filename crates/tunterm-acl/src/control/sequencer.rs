//! Single control-plane task that serializes every mutation.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use super::acl::TuntermAcl;
use super::snapshot::DataplaneSnapshot;
use crate::api::{self, ControlReply, ControlRequest, WireError};
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;

const QUEUE_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlPlaneError {
    #[error("control plane has stopped")]
    Stopped,

    #[error(transparent)]
    Wire(#[from] WireError),
}

enum Command {
    Request(ControlRequest, oneshot::Sender<ControlReply>),
    Message(Vec<u8>, oneshot::Sender<Result<Vec<u8>, WireError>>),
    RefreshPaths(oneshot::Sender<usize>),
    ShowInterfaces(oneshot::Sender<String>),
}

/// Handle to the control sequencer.
///
/// Requests are queued and applied one at a time, in arrival order. After
/// every change a fresh [`DataplaneSnapshot`] is published; dataplane
/// workers pick it up at their next frame and never see a half-applied
/// change.
#[derive(Clone)]
pub struct ControlPlane {
    tx: mpsc::Sender<Command>,
    snapshots: watch::Receiver<Arc<DataplaneSnapshot>>,
}

impl ControlPlane {
    /// Moves `acl` into a new sequencer task. The task ends, handing the
    /// engine back, once every handle has been dropped.
    pub fn spawn(acl: TuntermAcl) -> (Self, JoinHandle<TuntermAcl>) {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let (snapshot_tx, snapshots) = watch::channel(Arc::new(acl.snapshot()));
        let handle = tokio::spawn(run(acl, rx, snapshot_tx));
        (Self { tx, snapshots }, handle)
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ControlPlaneError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| ControlPlaneError::Stopped)?;
        reply_rx.await.map_err(|_| ControlPlaneError::Stopped)
    }

    pub async fn submit(&self, request: ControlRequest) -> Result<ControlReply, ControlPlaneError> {
        self.call(|tx| Command::Request(request, tx)).await
    }

    /// Applies one encoded message and returns the encoded reply.
    pub async fn handle_message(&self, msg: Vec<u8>) -> Result<Vec<u8>, ControlPlaneError> {
        Ok(self.call(|tx| Command::Message(msg, tx)).await??)
    }

    pub async fn refresh_paths(&self) -> Result<usize, ControlPlaneError> {
        self.call(Command::RefreshPaths).await
    }

    pub async fn show_interfaces(&self) -> Result<String, ControlPlaneError> {
        self.call(Command::ShowInterfaces).await
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Arc<DataplaneSnapshot> {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<DataplaneSnapshot>> {
        self.snapshots.clone()
    }
}

async fn run(
    mut acl: TuntermAcl,
    mut rx: mpsc::Receiver<Command>,
    snapshots: watch::Sender<Arc<DataplaneSnapshot>>,
) -> TuntermAcl {
    audit_log!(lifecycle("start").with_details(serde_json::json!({
        "tables": acl.tables().table_count(),
    })));
    let mut published = acl.generation();

    while let Some(command) = rx.recv().await {
        match command {
            Command::Request(request, reply) => {
                let _ = reply.send(request.execute(&mut acl));
            }
            Command::Message(msg, reply) => {
                let _ = reply.send(api::handle_message(&mut acl, &msg));
            }
            Command::RefreshPaths(reply) => {
                let _ = reply.send(acl.refresh_paths());
            }
            Command::ShowInterfaces(reply) => {
                let _ = reply.send(acl.show_interfaces());
            }
        }

        if acl.generation() != published {
            published = acl.generation();
            snapshots.send_replace(Arc::new(acl.snapshot()));
            debug!(generation = published, "published dataplane snapshot");
        }
    }

    audit_log!(lifecycle("stop").with_details(serde_json::json!({
        "tables": acl.tables().table_count(),
        "generation": published,
    })));
    acl
}

fn lifecycle(action: &str) -> AuditRecord {
    AuditRecord::new(AuditCategory::SystemLifecycle, "ControlPlane", action)
        .with_outcome(AuditOutcome::Success)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiStatus;
    use crate::fib::{AdjacencyTable, RoutePathDescriptor};
    use crate::host::{FeatureFlags, InterfaceMap};
    use crate::table::TunTermRule;
    use pretty_assertions::assert_eq;
    use tunterm_types::{AddressFamily, SwIfIndex};

    fn acl() -> TuntermAcl {
        let interfaces = Arc::new(InterfaceMap::new());
        interfaces.add(SwIfIndex::new(1), "eth1");
        let resolver = Arc::new(AdjacencyTable::new(interfaces.clone()));
        TuntermAcl::new(interfaces, Arc::new(FeatureFlags::new()), resolver)
    }

    fn create(context: u32, dst: &str) -> ControlRequest {
        ControlRequest::AddReplace {
            context,
            af: AddressFamily::V4,
            table: None,
            rules: vec![TunTermRule::new(
                dst.parse().unwrap(),
                RoutePathDescriptor::via(SwIfIndex::new(1), "192.168.1.1".parse().unwrap()),
            )],
        }
    }

    #[tokio::test]
    async fn test_requests_applied_in_order() {
        let (control, handle) = ControlPlane::spawn(acl());

        let mut replies = Vec::new();
        for context in 0..4 {
            replies.push(control.submit(create(context, "10.0.0.5")).await.unwrap());
        }
        let tables: Vec<u32> = replies
            .iter()
            .map(|r| r.table.map(|t| t.as_u32()).unwrap_or(u32::MAX))
            .collect();
        assert_eq!(tables, vec![0, 1, 2, 3]);

        drop(control);
        let acl = handle.await.unwrap();
        assert_eq!(acl.tables().table_count(), 4);
    }

    #[tokio::test]
    async fn test_snapshot_published_after_mutation() {
        let (control, _handle) = ControlPlane::spawn(acl());
        let mut updates = control.subscribe();
        assert_eq!(control.snapshot().generation(), 0);

        control.submit(create(1, "10.0.0.5")).await.unwrap();
        updates.changed().await.unwrap();
        assert_eq!(updates.borrow().generation(), 1);
    }

    #[tokio::test]
    async fn test_rejected_request_publishes_nothing() {
        let (control, _handle) = ControlPlane::spawn(acl());
        let reply = control
            .submit(ControlRequest::Delete {
                context: 5,
                table: None,
            })
            .await
            .unwrap();
        assert_eq!(reply.status, ApiStatus::InvalidValue);
        assert_eq!(control.snapshot().generation(), 0);
    }

    #[tokio::test]
    async fn test_unknown_message_through_sequencer() {
        let (control, _handle) = ControlPlane::spawn(acl());
        assert_eq!(
            control.handle_message(vec![0, 9, 0, 0, 0, 0]).await,
            Err(ControlPlaneError::Wire(WireError::UnhandledMessage(9)))
        );
    }
}
