// ── Per-device command queue ──
//
// One async mutex per device: enqueue, poll, correlate and expire on the
// same device are mutually exclusive, different devices never contend.
// The outer `DashMap` guard is always dropped before a device lock is
// awaited. Each device holds at most `capacity` commands; the oldest is
// evicted to make room.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::model::{CommandState, DeviceKey, PendingCommand};

type Slot = Arc<Mutex<VecDeque<PendingCommand>>>;

/// Commands held per device before the oldest is evicted.
pub const DEFAULT_CAPACITY: usize = 100;

/// Age limits applied by one expiration sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expiry {
    /// Commands still waiting for a poll; `None` keeps them until polled.
    pub queued: Option<Duration>,
    /// Commands handed to the device and still waiting for its result.
    pub awaiting_result: Duration,
}

impl Expiry {
    /// The same limit for every command.
    pub fn uniform(max_age: Duration) -> Self {
        Self {
            queued: Some(max_age),
            awaiting_result: max_age,
        }
    }
}

pub struct CommandQueue {
    devices: DashMap<DeviceKey, Slot>,
    capacity: usize,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            devices: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    fn slot(&self, key: &DeviceKey) -> Slot {
        Arc::clone(self.devices.entry(key.clone()).or_default().value())
    }

    fn existing(&self, key: &DeviceKey) -> Option<Slot> {
        self.devices.get(key).map(|r| Arc::clone(r.value()))
    }

    /// Append a command at the tail of its device queue. Returns the
    /// oldest command when the queue was full and it had to make room.
    pub async fn push(&self, command: PendingCommand) -> Option<PendingCommand> {
        let slot = self.slot(&command.key());
        let mut queue = slot.lock().await;
        let evicted = if queue.len() >= self.capacity {
            queue.pop_front()
        } else {
            None
        };
        queue.push_back(command);
        evicted
    }

    /// Hand every queued command to a polling device, oldest first.
    ///
    /// Returned commands are marked delivered and stay tracked until their
    /// result arrives, so a second poll returns nothing.
    pub async fn take_queued(&self, key: &DeviceKey) -> Vec<PendingCommand> {
        let Some(slot) = self.existing(key) else {
            return Vec::new();
        };
        let mut queue = slot.lock().await;
        queue
            .iter_mut()
            .filter(|c| c.state == CommandState::Queued)
            .map(|c| {
                c.state = CommandState::Delivered;
                c.clone()
            })
            .collect()
    }

    /// Record a successful push. Returns `false` when the command is gone
    /// (a result raced ahead of the acknowledgement).
    pub async fn mark_delivered(&self, key: &DeviceKey, id: Uuid) -> bool {
        let Some(slot) = self.existing(key) else {
            return false;
        };
        let mut queue = slot.lock().await;
        match queue.iter_mut().find(|c| c.id == id) {
            Some(c) => {
                c.state = CommandState::Delivered;
                true
            }
            None => false,
        }
    }

    pub async fn remove(&self, key: &DeviceKey, id: Uuid) -> Option<PendingCommand> {
        let slot = self.existing(key)?;
        let mut queue = slot.lock().await;
        let pos = queue.iter().position(|c| c.id == id)?;
        queue.remove(pos)
    }

    /// Settle the oldest command named `name` that awaits a result.
    pub async fn correlate(&self, key: &DeviceKey, name: &str) -> Option<PendingCommand> {
        let slot = self.existing(key)?;
        let mut queue = slot.lock().await;
        let pos = queue
            .iter()
            .position(|c| c.name == name && c.state.awaits_result())?;
        queue.remove(pos)
    }

    /// Remove every command older than the limit for its state.
    pub async fn expire(&self, expiry: Expiry, now: DateTime<Utc>) -> Vec<PendingCommand> {
        let cutoff = |max_age: Duration| {
            chrono::Duration::from_std(max_age)
                .ok()
                .and_then(|age| now.checked_sub_signed(age))
        };
        let queued_cutoff = expiry.queued.and_then(cutoff);
        let result_cutoff = cutoff(expiry.awaiting_result);
        let is_stale = |c: &PendingCommand| {
            let limit = if c.state.awaits_result() {
                result_cutoff
            } else {
                queued_cutoff
            };
            limit.is_some_and(|limit| c.created_at < limit)
        };

        let slots: Vec<Slot> = self.devices.iter().map(|r| Arc::clone(r.value())).collect();
        let mut expired = Vec::new();
        for slot in slots {
            let mut queue = slot.lock().await;
            let (old, keep): (Vec<_>, Vec<_>) = queue.drain(..).partition(|c| is_stale(c));
            queue.extend(keep);
            expired.extend(old);
        }
        expired
    }

    /// Snapshot of a device queue.
    pub async fn pending(&self, key: &DeviceKey) -> Vec<PendingCommand> {
        match self.existing(key) {
            Some(slot) => slot.lock().await.iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Drop a device queue (deprovisioning).
    pub fn purge(&self, key: &DeviceKey) -> usize {
        self.devices
            .remove(key)
            .map_or(0, |(_, slot)| slot.try_lock().map_or(0, |q| q.len()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::Device;
    use serde_json::json;

    fn cmd(device: &Device, name: &str, state: CommandState) -> PendingCommand {
        PendingCommand::new(device, name, json!("v"), state)
    }

    #[tokio::test]
    async fn poll_is_fifo_and_idempotent() {
        let queue = CommandQueue::new();
        let device = Device::new("dev1", "s", "/");
        queue.push(cmd(&device, "a", CommandState::Queued)).await;
        queue.push(cmd(&device, "b", CommandState::Queued)).await;

        let first = queue.take_queued(&device.key()).await;
        let names: Vec<&str> = first.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(first.iter().all(|c| c.state == CommandState::Delivered));

        assert!(queue.take_queued(&device.key()).await.is_empty());
        // Still tracked for correlation.
        assert_eq!(queue.pending(&device.key()).await.len(), 2);
    }

    #[tokio::test]
    async fn correlate_only_matches_delivered() {
        let queue = CommandQueue::new();
        let device = Device::new("dev1", "s", "/");
        queue.push(cmd(&device, "PING", CommandState::Queued)).await;

        assert!(queue.correlate(&device.key(), "PING").await.is_none());

        queue.take_queued(&device.key()).await;
        let settled = queue.correlate(&device.key(), "PING").await;
        assert_eq!(settled.map(|c| c.name), Some("PING".into()));
        assert!(queue.pending(&device.key()).await.is_empty());
    }

    #[tokio::test]
    async fn correlation_miss_leaves_other_devices_alone() {
        let queue = CommandQueue::new();
        let a = Device::new("a", "s", "/");
        let b = Device::new("b", "s", "/");
        queue.push(cmd(&b, "PING", CommandState::Delivering)).await;

        assert!(queue.correlate(&a.key(), "PING").await.is_none());
        assert!(queue.correlate(&b.key(), "RESET").await.is_none());
        assert_eq!(queue.pending(&b.key()).await.len(), 1);
    }

    #[tokio::test]
    async fn mark_delivered_after_result_reports_gone() {
        let queue = CommandQueue::new();
        let device = Device::new("dev1", "s", "/");
        let c = cmd(&device, "PING", CommandState::Delivering);
        let id = c.id;
        queue.push(c).await;

        assert!(queue.correlate(&device.key(), "PING").await.is_some());
        assert!(!queue.mark_delivered(&device.key(), id).await);
    }

    #[tokio::test]
    async fn expire_removes_old_commands() {
        let queue = CommandQueue::new();
        let device = Device::new("dev1", "s", "/");
        let mut old = cmd(&device, "old", CommandState::Queued);
        old.created_at = Utc::now() - chrono::Duration::seconds(120);
        queue.push(old).await;
        queue.push(cmd(&device, "fresh", CommandState::Queued)).await;

        let expired = queue
            .expire(Expiry::uniform(Duration::from_secs(60)), Utc::now())
            .await;
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].name, "old");

        let left = queue.pending(&device.key()).await;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].name, "fresh");
    }

    #[tokio::test]
    async fn unanswered_commands_expire_even_when_polling_never_does() {
        let queue = CommandQueue::new();
        let device = Device::new("dev1", "s", "/");
        let mut unanswered = cmd(&device, "PING", CommandState::Delivered);
        unanswered.created_at = Utc::now() - chrono::Duration::seconds(120);
        let mut waiting = cmd(&device, "reset", CommandState::Queued);
        waiting.created_at = Utc::now() - chrono::Duration::seconds(120);
        queue.push(unanswered).await;
        queue.push(waiting).await;

        let expiry = Expiry {
            queued: None,
            awaiting_result: Duration::from_secs(60),
        };
        let expired = queue.expire(expiry, Utc::now()).await;
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].name, "PING");

        let left = queue.pending(&device.key()).await;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].name, "reset");
    }

    #[tokio::test]
    async fn full_queue_evicts_the_oldest() {
        let queue = CommandQueue::with_capacity(2);
        let device = Device::new("dev1", "s", "/");
        assert!(queue.push(cmd(&device, "a", CommandState::Delivered)).await.is_none());
        assert!(queue.push(cmd(&device, "b", CommandState::Delivered)).await.is_none());

        let evicted = queue.push(cmd(&device, "c", CommandState::Delivered)).await;
        assert_eq!(evicted.map(|c| c.name), Some("a".into()));

        let names: Vec<String> = queue
            .pending(&device.key())
            .await
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_push_poll_and_correlate_lose_nothing() {
        const PER_DEVICE: usize = 50;
        let queue = Arc::new(CommandQueue::with_capacity(PER_DEVICE * 2));
        let device = Device::new("dev1", "s", "/");
        let other = Device::new("dev2", "s", "/");

        let producers = [device.clone(), other.clone()].map(|d| {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                for i in 0..PER_DEVICE {
                    queue.push(cmd(&d, &format!("c{i}"), CommandState::Queued)).await;
                    tokio::task::yield_now().await;
                }
            })
        });

        let poller = {
            let queue = Arc::clone(&queue);
            let key = device.key();
            tokio::spawn(async move {
                let mut delivered = Vec::new();
                while delivered.len() < PER_DEVICE {
                    delivered.extend(queue.take_queued(&key).await.into_iter().map(|c| c.name));
                    tokio::task::yield_now().await;
                }
                delivered
            })
        };

        let correlator = {
            let queue = Arc::clone(&queue);
            let key = device.key();
            tokio::spawn(async move {
                let mut settled = Vec::new();
                while settled.len() < PER_DEVICE {
                    for i in 0..PER_DEVICE {
                        if let Some(c) = queue.correlate(&key, &format!("c{i}")).await {
                            settled.push(c.name);
                        }
                    }
                    tokio::task::yield_now().await;
                }
                settled
            })
        };

        for producer in producers {
            producer.await.unwrap();
        }
        let mut delivered = poller.await.unwrap();
        let mut settled = correlator.await.unwrap();

        let mut expected: Vec<String> = (0..PER_DEVICE).map(|i| format!("c{i}")).collect();
        expected.sort();
        delivered.sort();
        settled.sort();
        assert_eq!(delivered, expected, "every command handed out exactly once");
        assert_eq!(settled, expected, "every command settled exactly once");
        assert!(queue.pending(&device.key()).await.is_empty());

        let untouched = queue.pending(&other.key()).await;
        assert_eq!(untouched.len(), PER_DEVICE);
        assert!(untouched.iter().all(|c| c.state == CommandState::Queued));
    }

    #[tokio::test]
    async fn remove_and_purge() {
        let queue = CommandQueue::new();
        let device = Device::new("dev1", "s", "/");
        let c = cmd(&device, "x", CommandState::Delivering);
        let id = c.id;
        queue.push(c).await;
        queue.push(cmd(&device, "y", CommandState::Queued)).await;

        assert!(queue.remove(&device.key(), id).await.is_some());
        assert_eq!(queue.purge(&device.key()), 1);
        assert!(queue.pending(&device.key()).await.is_empty());
    }
}
