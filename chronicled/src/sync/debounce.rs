use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

type FireFn = dyn Fn(String) + Send + Sync;

struct PendingTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Timers {
    next_generation: u64,
    pending: HashMap<String, PendingTimer>,
}

/// Per-key delayed callbacks where re-arming a key replaces its deadline.
///
/// Must be used from within a tokio runtime.
pub struct DebounceScheduler {
    timers: Arc<Mutex<Timers>>,
    on_fire: Arc<FireFn>,
}

impl DebounceScheduler {
    pub fn new(on_fire: impl Fn(String) + Send + Sync + 'static) -> Self {
        Self {
            timers: Arc::new(Mutex::new(Timers::default())),
            on_fire: Arc::new(on_fire),
        }
    }

    /// Starts (or restarts) the timer for `key`. Never blocks.
    pub fn arm(&self, key: &str, delay: Duration) {
        let mut timers = self.timers.lock();
        timers.next_generation += 1;
        let generation = timers.next_generation;

        let shared = Arc::clone(&self.timers);
        let on_fire = Arc::clone(&self.on_fire);
        let owned_key = key.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let still_current = {
                let mut timers = shared.lock();
                match timers.pending.get(&owned_key) {
                    Some(timer) if timer.generation == generation => {
                        timers.pending.remove(&owned_key);
                        true
                    }
                    _ => false,
                }
            };
            if still_current {
                on_fire(owned_key);
            }
        });

        if let Some(previous) = timers
            .pending
            .insert(key.to_string(), PendingTimer { generation, handle })
        {
            previous.handle.abort();
        }
    }

    pub fn cancel(&self, key: &str) -> bool {
        match self.timers.lock().pending.remove(key) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for (_, timer) in self.timers.lock().pending.drain() {
            timer.handle.abort();
        }
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.timers.lock().pending.contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.timers.lock().pending.len()
    }
}

impl Drop for DebounceScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
