use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::QueueUpdate;

pub type QueueUpdateSender = broadcast::Sender<QueueUpdate>;
pub type QueueUpdateReceiver = broadcast::Receiver<QueueUpdate>;

const ORGANIZATION_CHANNEL_CAPACITY: usize = 100;
const GLOBAL_CHANNEL_CAPACITY: usize = 1000;

/// Fan-out of queue changes to waiting-room displays and patient apps.
///
/// Delivery is best-effort: a lagging or absent subscriber never fails
/// the queue operation that produced the update.
#[derive(Clone)]
pub struct QueueNotificationService {
    channels: Arc<RwLock<HashMap<Uuid, QueueUpdateSender>>>,
    global_sender: QueueUpdateSender,
}

impl Default for QueueNotificationService {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueNotificationService {
    pub fn new() -> Self {
        let (global_sender, _) = broadcast::channel(GLOBAL_CHANNEL_CAPACITY);

        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            global_sender,
        }
    }

    /// Subscribes to one organization's queue, opening its channel on first use.
    pub async fn subscribe(&self, organization_id: Uuid) -> QueueUpdateReceiver {
        let mut channels = self.channels.write().await;
        let sender = channels.entry(organization_id).or_insert_with(|| {
            debug!("Created queue channel for organization {}", organization_id);
            broadcast::channel(ORGANIZATION_CHANNEL_CAPACITY).0
        });
        sender.subscribe()
    }

    pub fn subscribe_global(&self) -> QueueUpdateReceiver {
        self.global_sender.subscribe()
    }

    pub async fn remove_channel(&self, organization_id: Uuid) {
        let mut channels = self.channels.write().await;
        channels.remove(&organization_id);
        debug!("Removed queue channel for organization {}", organization_id);
    }

    pub async fn active_channels(&self) -> Vec<Uuid> {
        let channels = self.channels.read().await;
        channels.keys().cloned().collect()
    }

    pub async fn publish(&self, update: QueueUpdate) {
        {
            let channels = self.channels.read().await;
            if let Some(sender) = channels.get(&update.organization_id) {
                if let Err(e) = sender.send(update.clone()) {
                    debug!(
                        "No live subscribers for organization {}: {}",
                        update.organization_id, e
                    );
                }
            }
        }

        if let Err(e) = self.global_sender.send(update) {
            debug!("Failed to send to global queue channel: {}", e);
        }
    }
}
