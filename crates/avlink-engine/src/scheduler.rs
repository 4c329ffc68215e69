/*!
 * Follow-up scheduling.
 *
 * Some commands are followed by a query once the device has settled (a
 * camera move followed by a position inquiry). The driver only describes the
 * follow-up; this scheduler waits out the delay on a tokio timer and hands the
 * request back to the host over a channel, which then builds the command
 * through the driver as usual. Pending timers can be cancelled, typically when
 * the connection drops.
 */
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error};

use avlink_core::types::Id;

use crate::driver::FollowUpRequest;

/// Capacity of the delivery channel
const CHANNEL_CAPACITY: usize = 100;

type Timers = Arc<Mutex<HashMap<Id, JoinHandle<()>>>>;

/// Delivers follow-up requests once their delay has passed
#[derive(Debug, Clone)]
pub struct FollowUpScheduler {
    due_tx: mpsc::Sender<FollowUpRequest>,
    timers: Timers,
}

impl FollowUpScheduler {
    /// Create a scheduler and the receiver of due follow-ups
    pub fn new() -> (Self, mpsc::Receiver<FollowUpRequest>) {
        let (due_tx, due_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let scheduler = Self {
            due_tx,
            timers: Arc::new(Mutex::new(HashMap::new())),
        };
        (scheduler, due_rx)
    }

    /// Schedule a follow-up; must be called within a tokio runtime
    pub fn schedule(&self, request: FollowUpRequest) -> Id {
        let id = request.id.clone();
        let due_tx = self.due_tx.clone();
        let timers = Arc::clone(&self.timers);

        debug!(id = %id, command = %request.command, delay_ms = request.delay.as_millis() as u64, "Scheduled follow-up");

        // Held until the handle is stored; the task removes its own entry
        let mut guard = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        let task_id = id.clone();
        let handle = tokio::spawn(async move {
            time::sleep(request.delay).await;

            timers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&task_id);

            if let Err(e) = due_tx.send(request).await {
                error!("Failed to deliver follow-up: {}", e);
            }
        });
        guard.insert(id.clone(), handle);

        id
    }

    /// Cancel one follow-up; `false` if it already fired or is unknown
    pub fn cancel(&self, id: &Id) -> bool {
        let handle = self
            .timers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        match handle {
            Some(handle) => {
                handle.abort();
                debug!(id = %id, "Cancelled follow-up");
                true
            }
            None => false,
        }
    }

    /// Cancel every pending follow-up, returning how many were cancelled
    pub fn cancel_all(&self) -> usize {
        let handles: Vec<_> = self
            .timers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        for (_, handle) in &handles {
            handle.abort();
        }
        if !handles.is_empty() {
            debug!(count = handles.len(), "Cancelled all follow-ups");
        }
        handles.len()
    }

    /// Number of follow-ups waiting to fire
    pub fn pending_count(&self) -> usize {
        self.timers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
