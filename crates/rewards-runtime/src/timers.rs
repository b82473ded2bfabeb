//! Engine timer registry.
//!
//! Each armed timer is a tokio task that sleeps and then posts a
//! [`TimerFired`] message. The owning loop calls [`TimerRegistry::take_fired`]
//! when it processes that message; a timer killed in between is no longer in
//! the map, so its late fire is dropped there.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::engine::TimerNamespace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub namespace: TimerNamespace,
    pub timer_id: u32,
}

pub struct TimerRegistry {
    namespace: TimerNamespace,
    last_id: u32,
    timers: HashMap<u32, JoinHandle<()>>,
    fired_tx: mpsc::UnboundedSender<TimerFired>,
}

impl TimerRegistry {
    pub fn new(namespace: TimerNamespace, fired_tx: mpsc::UnboundedSender<TimerFired>) -> Self {
        Self {
            namespace,
            last_id: 0,
            timers: HashMap::new(),
            fired_tx,
        }
    }

    /// Arm a one-shot timer and return its id. Never returns 0.
    pub fn set_timer(&mut self, offset: Duration) -> u32 {
        let timer_id = self.next_id();
        let namespace = self.namespace;
        let tx = self.fired_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(offset).await;
            let _ = tx.send(TimerFired {
                namespace,
                timer_id,
            });
        });
        self.timers.insert(timer_id, task);
        debug!(
            "Timer {:?}/{} armed for {:?}",
            self.namespace, timer_id, offset
        );
        timer_id
    }

    /// Cancel a timer. Unknown or already fired ids are ignored.
    pub fn kill_timer(&mut self, timer_id: u32) -> bool {
        match self.timers.remove(&timer_id) {
            Some(task) => {
                task.abort();
                debug!("Timer {:?}/{} killed", self.namespace, timer_id);
                true
            }
            None => false,
        }
    }

    /// Retire a timer whose fire message arrived. Returns false when the
    /// timer was killed after it expired, in which case nothing is delivered.
    pub fn take_fired(&mut self, timer_id: u32) -> bool {
        self.timers.remove(&timer_id).is_some()
    }

    /// Abort every pending timer. Returns how many were cancelled.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.timers.len();
        for (_, task) in self.timers.drain() {
            task.abort();
        }
        count
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    fn next_id(&mut self) -> u32 {
        loop {
            self.last_id = self.last_id.wrapping_add(1);
            if self.last_id != 0 && !self.timers.contains_key(&self.last_id) {
                return self.last_id;
            }
        }
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn registry() -> (TimerRegistry, mpsc::UnboundedReceiver<TimerFired>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (TimerRegistry::new(TimerNamespace::Ledger, tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_once() {
        let (mut timers, mut rx) = registry();
        let id = timers.set_timer(Duration::from_secs(5));
        assert_ne!(id, 0);

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.timer_id, id);
        assert!(timers.take_fired(id));
        assert!(!timers.take_fired(id));
        assert!(timers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_killed_timer_never_fires() {
        let (mut timers, mut rx) = registry();
        let killed = timers.set_timer(Duration::from_secs(1));
        let kept = timers.set_timer(Duration::from_secs(2));
        assert!(timers.kill_timer(killed));
        assert!(!timers.kill_timer(killed));
        assert!(!timers.kill_timer(9999));

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.timer_id, kept);
        assert!(timers.take_fired(kept));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_kill_after_expiry_drops_fire() {
        let (mut timers, mut rx) = registry();
        let id = timers.set_timer(Duration::from_secs(1));
        let fired = rx.recv().await.unwrap();
        timers.kill_timer(id);
        assert!(!timers.take_fired(fired.timer_id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_ids_unique() {
        let (mut timers, _rx) = registry();
        let mut live = HashSet::new();
        for i in 0..200u64 {
            let id = timers.set_timer(Duration::from_secs(60 + i));
            assert!(live.insert(id), "duplicate live id {}", id);
            if i % 3 == 0 {
                timers.kill_timer(id);
                live.remove(&id);
            }
        }
        assert_eq!(timers.len(), live.len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_id_wrap_skips_zero_and_live() {
        let (mut timers, _rx) = registry();
        timers.last_id = u32::MAX - 1;
        let a = timers.set_timer(Duration::from_secs(60));
        assert_eq!(a, u32::MAX);

        timers.last_id = 0;
        let b = timers.set_timer(Duration::from_secs(60));
        assert_eq!(b, 1);

        timers.last_id = u32::MAX - 1;
        let c = timers.set_timer(Duration::from_secs(60));
        assert_eq!(c, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all() {
        let (mut timers, mut rx) = registry();
        timers.set_timer(Duration::from_secs(1));
        timers.set_timer(Duration::from_secs(2));
        assert_eq!(timers.cancel_all(), 2);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }
}
