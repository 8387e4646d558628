use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::core::error::Result;
use crate::core::queue::Queue;

/// [`QueueRegistry`] is the thread-safe name → queue map of a virtual host.
#[derive(Debug, Default)]
pub struct QueueRegistry {
    queues: DashMap<String, Arc<Queue>>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self {
            queues: DashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Queue>> {
        self.queues.get(name).map(|entry| Arc::clone(&*entry))
    }

    /// Returns the existing queue, or builds one with `create` and registers it.
    /// The flag is true when a new queue was created.
    pub fn get_or_create<F>(&self, name: &str, create: F) -> Result<(Arc<Queue>, bool)>
    where
        F: FnOnce() -> Result<Arc<Queue>>,
    {
        match self.queues.entry(name.to_string()) {
            Entry::Occupied(existing) => Ok((Arc::clone(existing.get()), false)),
            Entry::Vacant(slot) => {
                let queue = create()?;
                debug!(target: "amqcore::queue", queue = name, "queue registered");
                slot.insert(Arc::clone(&queue));
                Ok((queue, true))
            }
        }
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Queue>> {
        self.queues.remove(name).map(|(_, queue)| queue)
    }

    /// Registered queue names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}
