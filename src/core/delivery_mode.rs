use serde::{Deserialize, Serialize};

/// AMQP delivery mode carried in the content header.
///
/// Wire values are `1` (non-persistent) and `2` (persistent); anything else is
/// treated as non-persistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeliveryMode {
    #[default]
    NonPersistent,
    Persistent,
}

impl DeliveryMode {
    pub fn from_wire(value: u8) -> Self {
        match value {
            2 => DeliveryMode::Persistent,
            _ => DeliveryMode::NonPersistent,
        }
    }

    pub fn as_wire(self) -> u8 {
        match self {
            DeliveryMode::NonPersistent => 1,
            DeliveryMode::Persistent => 2,
        }
    }

    pub fn is_persistent(self) -> bool {
        matches!(self, DeliveryMode::Persistent)
    }
}
