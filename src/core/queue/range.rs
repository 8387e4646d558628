use crate::core::error::{QueueError, Result};
use crate::core::message::MessageId;

/// Inclusive id range for management views and bulk deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRange {
    from: MessageId,
    to: MessageId,
}

impl MessageRange {
    /// Validates raw management input: `0 <= from <= to` and the span fits a
    /// 32-bit signed count.
    pub fn new(from: i64, to: i64) -> Result<Self> {
        if from < 0 {
            return Err(QueueError::validation(format!(
                "range start {from} must not be negative"
            )));
        }
        if from > to {
            return Err(QueueError::validation(format!(
                "range start {from} is after range end {to}"
            )));
        }
        if to - from > i64::from(i32::MAX) {
            return Err(QueueError::validation(format!(
                "range {from}..={to} spans more than {} messages",
                i32::MAX
            )));
        }
        Ok(Self {
            from: from as MessageId,
            to: to as MessageId,
        })
    }

    #[inline]
    pub fn contains(&self, id: MessageId) -> bool {
        self.from <= id && id <= self.to
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_ranges() {
        assert!(MessageRange::new(-1, 1).is_err());
        assert!(MessageRange::new(2, 1).is_err());
        let end = i64::from(i32::MAX) + 2;
        assert!(MessageRange::new(1, end).is_err());
    }

    #[test]
    fn accepts_the_largest_span() {
        let end = i64::from(i32::MAX) + 1;
        let range = MessageRange::new(1, end).unwrap();
        assert!(range.contains(1));
        assert!(range.contains(end as u64));
        assert!(!range.contains(end as u64 + 1));
        assert!(MessageRange::new(0, 0).is_ok());
    }
}
