use parking_lot::Mutex;

/// In-flight delivery budget: a message-count limit and a byte limit.
///
/// `None` means unlimited. When nothing is in flight a message is always
/// admitted by the byte limit, so one oversized message cannot wedge a consumer.
#[derive(Debug)]
pub struct CreditManager {
    inner: Mutex<CreditState>,
}

#[derive(Debug, Clone, Copy, Default)]
struct CreditState {
    message_limit: Option<u64>,
    byte_limit: Option<u64>,
    messages_in_flight: u64,
    bytes_in_flight: u64,
}

impl CreditState {
    fn admits(&self, size: u64) -> bool {
        let messages_ok = self
            .message_limit
            .map(|limit| self.messages_in_flight < limit)
            .unwrap_or(true);
        let bytes_ok = self
            .byte_limit
            .map(|limit| self.messages_in_flight == 0 || self.bytes_in_flight + size <= limit)
            .unwrap_or(true);
        messages_ok && bytes_ok
    }
}

impl Default for CreditManager {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl CreditManager {
    pub fn new(message_limit: Option<u64>, byte_limit: Option<u64>) -> Self {
        Self {
            inner: Mutex::new(CreditState {
                message_limit,
                byte_limit,
                ..Default::default()
            }),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None, None)
    }

    /// Prefetch-count style credit: at most `messages` unacknowledged deliveries.
    pub fn with_prefetch(messages: u64) -> Self {
        Self::new(Some(messages), None)
    }

    pub fn set_limits(&self, message_limit: Option<u64>, byte_limit: Option<u64>) {
        let mut inner = self.inner.lock();
        inner.message_limit = message_limit;
        inner.byte_limit = byte_limit;
    }

    pub fn has_credit(&self) -> bool {
        self.inner.lock().admits(0)
    }

    /// Consumes credit for one message of `size` bytes if the budget allows it.
    pub fn try_use(&self, size: u64) -> bool {
        let mut inner = self.inner.lock();
        if !inner.admits(size) {
            return false;
        }
        inner.messages_in_flight += 1;
        inner.bytes_in_flight += size;
        true
    }

    pub fn restore(&self, messages: u64, bytes: u64) {
        let mut inner = self.inner.lock();
        inner.messages_in_flight = inner.messages_in_flight.saturating_sub(messages);
        inner.bytes_in_flight = inner.bytes_in_flight.saturating_sub(bytes);
    }

    pub fn messages_in_flight(&self) -> u64 {
        self.inner.lock().messages_in_flight
    }

    pub fn bytes_in_flight(&self) -> u64 {
        self.inner.lock().bytes_in_flight
    }
}
