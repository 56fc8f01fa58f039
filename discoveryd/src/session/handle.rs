use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use shared::tlv::CodecError;
use shared::types::ServiceRecord;
use crate::error::SessionError;
use super::{SessionInfo, SessionState};

/// Commands sent to the session loop
pub enum SessionCommand {
    Publish(ServiceRecord, oneshot::Sender<Result<(), CodecError>>),
    GetReceived(oneshot::Sender<BTreeMap<String, ServiceRecord>>),
    GetPublished(oneshot::Sender<BTreeMap<String, ServiceRecord>>),
    Discover(oneshot::Sender<()>),
}

/// Handle to interact with a running session
#[derive(Clone)]
pub struct SessionHandle {
    info: Arc<SessionInfo>,
    tx: mpsc::Sender<SessionCommand>,
    state_rx: watch::Receiver<SessionState>,
    digest_rx: watch::Receiver<String>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub(super) fn new(
        info: Arc<SessionInfo>,
        tx: mpsc::Sender<SessionCommand>,
        state_rx: watch::Receiver<SessionState>,
        digest_rx: watch::Receiver<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            info,
            tx,
            state_rx,
            digest_rx,
            cancel,
        }
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// Store, announce and serve a record.
    pub async fn publish_service_detail(&self, record: ServiceRecord) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Publish(record, reply)).await?;
        Ok(rx.await.map_err(|_| SessionError::Closed)??)
    }

    /// Snapshot of records fetched from other nodes
    pub async fn received_service_details(
        &self,
    ) -> Result<BTreeMap<String, ServiceRecord>, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::GetReceived(reply)).await?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Snapshot of records this session serves
    pub async fn published_service_details(
        &self,
    ) -> Result<BTreeMap<String, ServiceRecord>, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::GetPublished(reply)).await?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Ask every producer in the group to re-announce its records.
    pub async fn send_discovery_request(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Discover(reply)).await?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Digest of the received cache
    pub fn digest(&self) -> String {
        self.digest_rx.borrow().clone()
    }

    /// Signal the session to stop. Returns immediately.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Wait until the session has fully stopped.
    pub async fn stopped(&self) {
        let mut rx = self.state_rx.clone();
        // An error means the loop is gone, which is stopped as well.
        let _ = rx.wait_for(|s| *s == SessionState::Stopped).await;
    }

    async fn send(&self, cmd: SessionCommand) -> Result<(), SessionError> {
        if self.cancel.is_cancelled() {
            return Err(SessionError::Closed);
        }
        self.tx.send(cmd).await.map_err(|_| SessionError::Closed)
    }
}
