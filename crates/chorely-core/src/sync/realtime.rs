//! Realtime listener: a change notice triggers a targeted table pull

use std::sync::{Arc, Weak};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::scheduler::EngineInner;
use crate::models::EntityKind;
use crate::remote::{ChangeFeed, ChangeNotice};

/// Subscribe to every entity kind and spawn one listener per subscription.
///
/// A kind whose subscription fails is left to the poll timer.
pub(crate) async fn spawn_listeners(
    inner: &Arc<EngineInner>,
    feed: &dyn ChangeFeed,
    owner_id: &str,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::with_capacity(EntityKind::ALL.len());
    for kind in EntityKind::ALL {
        match feed.subscribe(kind, owner_id).await {
            Ok(receiver) => {
                handles.push(tokio::spawn(listen(Arc::downgrade(inner), kind, receiver)));
            }
            Err(error) => {
                tracing::warn!(kind = %kind, %error, "Realtime subscription failed");
            }
        }
    }
    tracing::debug!(subscriptions = handles.len(), "Realtime listeners started");
    handles
}

async fn listen(
    engine: Weak<EngineInner>,
    kind: EntityKind,
    mut receiver: mpsc::Receiver<ChangeNotice>,
) {
    while let Some(notice) = receiver.recv().await {
        // Collapse a burst of notices into one pull
        while receiver.try_recv().is_ok() {}

        let Some(inner) = engine.upgrade() else {
            break;
        };
        tracing::debug!(kind = %kind, record_id = ?notice.record_id, "Change notice received");
        if let Err(error) = inner.pull_one(kind).await {
            tracing::warn!(kind = %kind, %error, "Realtime pull failed");
        }
    }
    tracing::debug!(kind = %kind, "Realtime listener stopped");
}
