//! Producer flow control with a hysteresis band.
//!
//! ```text
//!   UnderCapacity ── depth >= capacity (capacity > 0) ──▶ Overfull
//!   Overfull ── depth <= flow_resume_capacity or capacity == 0 ──▶ UnderCapacity
//! ```
//!
//! At most one transition happens per evaluation. While overfull every channel
//! that checks capacity is blocked; all of them are released on the way back.

use std::sync::Arc;

use tracing::info;

use crate::core::channel::ProducerChannel;
use crate::core::error::{QueueError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    UnderCapacity,
    Overfull,
}

#[derive(Debug)]
pub struct FlowControl {
    queue: String,
    capacity: u64,
    flow_resume_capacity: u64,
    state: FlowState,
    blocked: Vec<Arc<ProducerChannel>>,
}

impl FlowControl {
    pub fn new(queue: impl Into<String>, capacity: u64, flow_resume_capacity: u64) -> Result<Self> {
        if flow_resume_capacity > capacity {
            return Err(QueueError::validation(format!(
                "flow resume capacity {flow_resume_capacity} exceeds capacity {capacity}"
            )));
        }
        Ok(Self {
            queue: queue.into(),
            capacity,
            flow_resume_capacity,
            state: FlowState::UnderCapacity,
            blocked: Vec::new(),
        })
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    #[inline]
    pub fn flow_resume_capacity(&self) -> u64 {
        self.flow_resume_capacity
    }

    #[inline]
    pub fn state(&self) -> FlowState {
        self.state
    }

    #[inline]
    pub fn is_overfull(&self) -> bool {
        self.state == FlowState::Overfull
    }

    pub fn blocked_channels(&self) -> usize {
        self.blocked.len()
    }

    pub fn set_capacity(&mut self, capacity: u64, depth: u64) -> Result<()> {
        if capacity < self.flow_resume_capacity {
            return Err(QueueError::validation(format!(
                "capacity {capacity} is below flow resume capacity {}",
                self.flow_resume_capacity
            )));
        }
        self.capacity = capacity;
        self.evaluate(depth);
        Ok(())
    }

    pub fn set_flow_resume_capacity(&mut self, resume: u64, depth: u64) -> Result<()> {
        if resume > self.capacity {
            return Err(QueueError::validation(format!(
                "flow resume capacity {resume} exceeds capacity {}",
                self.capacity
            )));
        }
        self.flow_resume_capacity = resume;
        self.evaluate(depth);
        Ok(())
    }

    /// Runs the state machine against the current depth. Returns the new state
    /// if a transition happened.
    pub fn evaluate(&mut self, depth: u64) -> Option<FlowState> {
        match self.state {
            FlowState::UnderCapacity if self.capacity > 0 && depth >= self.capacity => {
                self.state = FlowState::Overfull;
                info!(
                    target: "amqcore::flow",
                    queue = %self.queue,
                    depth,
                    capacity = self.capacity,
                    "queue overfull"
                );
                Some(FlowState::Overfull)
            }
            FlowState::Overfull if self.capacity == 0 || depth <= self.flow_resume_capacity => {
                self.state = FlowState::UnderCapacity;
                info!(
                    target: "amqcore::flow",
                    queue = %self.queue,
                    depth,
                    resume = self.flow_resume_capacity,
                    released = self.blocked.len(),
                    "queue back under capacity"
                );
                for channel in self.blocked.drain(..) {
                    channel.unblock(&self.queue);
                }
                Some(FlowState::UnderCapacity)
            }
            _ => None,
        }
    }

    /// Evaluates and, if overfull, blocks `channel`. Returns whether it was blocked.
    pub fn check_capacity(&mut self, depth: u64, channel: &Arc<ProducerChannel>) -> bool {
        self.evaluate(depth);
        if !self.is_overfull() {
            return false;
        }
        if !self.blocked.iter().any(|c| Arc::ptr_eq(c, channel)) {
            self.blocked.push(Arc::clone(channel));
        }
        channel.block(&self.queue);
        true
    }

    /// Releases every channel this queue holds blocked, e.g. on queue deletion.
    pub fn release_all(&mut self) {
        for channel in self.blocked.drain(..) {
            channel.unblock(&self.queue);
        }
        self.state = FlowState::UnderCapacity;
    }
}
