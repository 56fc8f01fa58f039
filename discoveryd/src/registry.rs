use std::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use crate::error::RegistrationError;
use crate::session::{DiscoverySession, RoleKind, SessionHandle};

enum Slot {
    Pending(Box<DiscoverySession>),
    Started {
        handle: SessionHandle,
        task: Option<JoinHandle<()>>,
    },
    Failed,
}

/// Every session of the process, in insertion order.
///
/// The mutex guards the list only; session state lives in each session's task.
pub struct SessionRegistry {
    slots: Mutex<Vec<Slot>>,
    cancel: CancellationToken,
}

impl SessionRegistry {
    /// Sessions get child tokens of `cancel`, so cancelling it stops them all.
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            cancel,
        }
    }

    fn slots(&self) -> MutexGuard<'_, Vec<Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a session. It runs on the next [`start_all`](Self::start_all).
    pub fn add(&self, session: DiscoverySession) {
        self.slots().push(Slot::Pending(Box::new(session)));
    }

    /// Start every pending session and spawn its task.
    ///
    /// A session that fails to register does not keep the others from
    /// starting; the first such error is returned once all are launched.
    /// Must be called from within a tokio runtime.
    pub fn start_all(&self) -> Result<(), RegistrationError> {
        let mut first_error = None;
        let mut slots = self.slots();
        for slot in slots.iter_mut() {
            if !matches!(slot, Slot::Pending(_)) {
                continue;
            }
            let Slot::Pending(session) = std::mem::replace(slot, Slot::Failed) else {
                continue;
            };
            let node = session.config().node.clone();
            match session.start(self.cancel.child_token()) {
                Ok((handle, task)) => {
                    let task = tokio::spawn(task.run());
                    *slot = Slot::Started {
                        handle,
                        task: Some(task),
                    };
                }
                Err(e) => {
                    tracing::error!("Session {} failed to start: {}", node, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Signal every started session to stop. Returns immediately.
    pub fn stop_all(&self) {
        for handle in self.handles() {
            handle.stop();
        }
    }

    /// Wait for every spawned session task to finish.
    pub async fn join_all(&self) {
        let tasks: Vec<JoinHandle<()>> = self
            .slots()
            .iter_mut()
            .filter_map(|slot| match slot {
                Slot::Started { task, .. } => task.take(),
                _ => None,
            })
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!("Session task failed: {}", e);
            }
        }
    }

    /// Handles of started sessions, in insertion order.
    pub fn handles(&self) -> Vec<SessionHandle> {
        self.slots()
            .iter()
            .filter_map(|slot| match slot {
                Slot::Started { handle, .. } => Some(handle.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn handles_with_role(&self, role: RoleKind) -> Vec<SessionHandle> {
        self.handles()
            .into_iter()
            .filter(|h| h.info().role == role)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use shared::types::{DiscoveryReply, Name, ServiceRecord};
    use crate::face::{Face, MemoryNetwork};
    use crate::session::{DiscoveryCallback, Role, SessionConfig, SessionState};

    fn ignore() -> DiscoveryCallback {
        Arc::new(|_: &ServiceRecord, _: &DiscoveryReply| {})
    }

    fn session(face: &Arc<dyn Face>, role: Role, node: &str) -> DiscoverySession {
        DiscoverySession::new(role, SessionConfig::new("/printer", node), face.clone(), ignore())
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stop_join() {
        let face: Arc<dyn Face> = Arc::new(MemoryNetwork::new());
        let registry = SessionRegistry::new(CancellationToken::new());
        registry.add(session(&face, Role::Producer { services: vec![] }, "/node-A"));
        registry.add(session(&face, Role::Consumer { continuous: true }, "/node-B"));
        assert!(registry.handles().is_empty());

        registry.start_all().unwrap();
        let handles = registry.handles();
        assert_eq!(handles.len(), 2);
        assert_eq!(registry.handles_with_role(RoleKind::Producer).len(), 1);
        assert_eq!(
            registry.handles_with_role(RoleKind::Consumer)[0].info().node,
            Name::parse("/node-B")
        );

        registry.stop_all();
        registry.join_all().await;
        assert!(handles.iter().all(|h| h.state() == SessionState::Stopped));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_session_does_not_block_others() {
        let face: Arc<dyn Face> = Arc::new(MemoryNetwork::new());
        let registry = SessionRegistry::new(CancellationToken::new());
        registry.add(session(&face, Role::Producer { services: vec![] }, "/node-A"));
        registry.add(session(&face, Role::Consumer { continuous: true }, "/node-A"));
        registry.add(session(&face, Role::Consumer { continuous: true }, "/node-C"));

        assert!(matches!(
            registry.start_all(),
            Err(RegistrationError::DuplicateNode { .. })
        ));
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.handles().len(), 2);

        // Already started and failed sessions are left alone.
        registry.start_all().unwrap();
        assert_eq!(registry.handles().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_token_stops_sessions() {
        let cancel = CancellationToken::new();
        let face: Arc<dyn Face> = Arc::new(MemoryNetwork::new());
        let registry = SessionRegistry::new(cancel.clone());
        registry.add(session(&face, Role::Consumer { continuous: true }, "/node-A"));
        registry.start_all().unwrap();

        cancel.cancel();
        registry.join_all().await;
        assert_eq!(registry.handles()[0].state(), SessionState::Stopped);
    }
}
