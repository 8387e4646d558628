//! Threshold alerts raised after enqueue. They are advisory only: a message
//! that trips one is still accepted.

use serde::Serialize;

/// Alert thresholds; `0` disables a check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueLimits {
    pub max_message_count: u64,
    pub max_message_size: u64,
    pub max_queue_depth: u64,
    pub max_message_age_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum QueueNotification {
    MessageCountAlert { count: u64, threshold: u64 },
    MessageSizeAlert { message_id: u64, size: u64, threshold: u64 },
    QueueDepthAlert { depth: u64, threshold: u64 },
    MessageAgeAlert { age_ms: u64, threshold: u64 },
}

/// What the checks look at, captured right after an enqueue.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Observation {
    pub message_id: u64,
    pub message_size: u64,
    pub message_count: u64,
    pub depth: u64,
    pub oldest_age_ms: Option<u64>,
}

impl QueueLimits {
    pub(crate) fn check(&self, obs: &Observation) -> Vec<QueueNotification> {
        let mut alerts = Vec::new();
        if self.max_message_count > 0 && obs.message_count > self.max_message_count {
            alerts.push(QueueNotification::MessageCountAlert {
                count: obs.message_count,
                threshold: self.max_message_count,
            });
        }
        if self.max_message_size > 0 && obs.message_size > self.max_message_size {
            alerts.push(QueueNotification::MessageSizeAlert {
                message_id: obs.message_id,
                size: obs.message_size,
                threshold: self.max_message_size,
            });
        }
        if self.max_queue_depth > 0 && obs.depth > self.max_queue_depth {
            alerts.push(QueueNotification::QueueDepthAlert {
                depth: obs.depth,
                threshold: self.max_queue_depth,
            });
        }
        if let Some(age) = obs.oldest_age_ms {
            if self.max_message_age_ms > 0 && age > self.max_message_age_ms {
                alerts.push(QueueNotification::MessageAgeAlert {
                    age_ms: age,
                    threshold: self.max_message_age_ms,
                });
            }
        }
        alerts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs() -> Observation {
        Observation {
            message_id: 7,
            message_size: 1000,
            message_count: 10,
            depth: 10_000,
            oldest_age_ms: Some(5),
        }
    }

    #[test]
    fn disabled_limits_never_alert() {
        assert!(QueueLimits::default().check(&obs()).is_empty());
    }

    #[test]
    fn each_exceeded_limit_alerts() {
        let limits = QueueLimits {
            max_message_count: 9,
            max_message_size: 999,
            max_queue_depth: 9_999,
            max_message_age_ms: 4,
        };
        let alerts = limits.check(&obs());
        assert_eq!(alerts.len(), 4);
        assert!(alerts.contains(&QueueNotification::MessageSizeAlert {
            message_id: 7,
            size: 1000,
            threshold: 999
        }));
    }

    #[test]
    fn limits_are_exclusive_thresholds() {
        let limits = QueueLimits {
            max_message_count: 10,
            max_message_size: 1000,
            max_queue_depth: 10_000,
            max_message_age_ms: 5,
        };
        assert!(limits.check(&obs()).is_empty());
    }
}
