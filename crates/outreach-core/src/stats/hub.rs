//! Per-task publish/subscribe for stats snapshots

use super::StatsSnapshot;
use outreach_common::types::TaskId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

const BUFFER_CAPACITY: usize = 64;

/// Fan-out of stats snapshots to subscribers, one channel per task.
///
/// Publishing never waits on subscribers; a slow one lags and skips snapshots.
#[derive(Clone, Default)]
pub struct StatsHub {
    channels: Arc<RwLock<HashMap<TaskId, broadcast::Sender<StatsSnapshot>>>>,
}

impl StatsHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to snapshots of one task
    pub async fn subscribe(&self, task_id: TaskId) -> broadcast::Receiver<StatsSnapshot> {
        let mut channels = self.channels.write().await;
        channels
            .entry(task_id)
            .or_insert_with(|| broadcast::channel(BUFFER_CAPACITY).0)
            .subscribe()
    }

    /// Whether anyone is listening to the task. Drops the channel once nobody is.
    pub async fn has_subscribers(&self, task_id: TaskId) -> bool {
        {
            let channels = self.channels.read().await;
            match channels.get(&task_id) {
                Some(sender) if sender.receiver_count() > 0 => return true,
                Some(_) => {}
                None => return false,
            }
        }
        self.prune(task_id).await;
        false
    }

    /// Send a snapshot to the task's subscribers. Returns how many received it.
    pub async fn publish(&self, snapshot: StatsSnapshot) -> usize {
        let task_id = snapshot.task_id;
        {
            let channels = self.channels.read().await;
            match channels.get(&task_id) {
                Some(sender) if sender.receiver_count() > 0 => {
                    return sender.send(snapshot).unwrap_or(0);
                }
                Some(_) => {}
                None => return 0,
            }
        }
        self.prune(task_id).await;
        0
    }

    /// Remove the task's channel if every receiver went away
    async fn prune(&self, task_id: TaskId) {
        let mut channels = self.channels.write().await;
        // A subscriber may have arrived between the read and write locks
        if channels
            .get(&task_id)
            .map_or(false, |sender| sender.receiver_count() == 0)
        {
            channels.remove(&task_id);
        }
    }

    #[cfg(test)]
    pub(crate) async fn is_tracking(&self, task_id: TaskId) -> bool {
        self.channels.read().await.contains_key(&task_id)
    }

    /// Drop a task's channel, ending every subscription to it
    pub async fn close(&self, task_id: TaskId) {
        self.channels.write().await.remove(&task_id);
    }
}
