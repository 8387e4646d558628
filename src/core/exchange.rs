use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExchangeType {
    Direct,
    Fanout,
    Topic,
    Headers,
}

impl fmt::Display for ExchangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExchangeType::Direct => "direct",
            ExchangeType::Fanout => "fanout",
            ExchangeType::Topic => "topic",
            ExchangeType::Headers => "headers",
        };
        f.write_str(s)
    }
}

/// An exchange as far as the queue core cares: a name and a type. Binding and
/// routing live outside this crate.
#[derive(Debug, PartialEq, Eq)]
pub struct Exchange {
    name: String,
    kind: ExchangeType,
    durable: bool,
}

impl Exchange {
    pub fn new(name: impl Into<String>, kind: ExchangeType, durable: bool) -> Self {
        Self {
            name: name.into(),
            kind,
            durable,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ExchangeType {
        self.kind
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }
}

/// Thread-safe name → exchange lookup.
#[derive(Debug, Default)]
pub struct ExchangeRegistry {
    exchanges: DashMap<String, Arc<Exchange>>,
}

impl ExchangeRegistry {
    pub fn new() -> Self {
        Self {
            exchanges: DashMap::new(),
        }
    }

    /// Registry pre-populated with the default exchange and the `amq.*` set.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        for (name, kind) in [
            ("", ExchangeType::Direct),
            ("amq.direct", ExchangeType::Direct),
            ("amq.topic", ExchangeType::Topic),
            ("amq.fanout", ExchangeType::Fanout),
            ("amq.match", ExchangeType::Headers),
        ] {
            registry.declare(name, kind, true);
        }
        registry
    }

    /// Returns the existing exchange of that name, or registers a new one.
    pub fn declare(&self, name: &str, kind: ExchangeType, durable: bool) -> Arc<Exchange> {
        self.exchanges
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(target: "amqcore::exchange", exchange = name, %kind, "exchange declared");
                Arc::new(Exchange::new(name, kind, durable))
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Exchange>> {
        self.exchanges.get(name).map(|entry| Arc::clone(&*entry))
    }

    /// Removes an exchange. Queues that already hold it as their alternate keep their reference.
    pub fn remove(&self, name: &str) -> Option<Arc<Exchange>> {
        self.exchanges.remove(name).map(|(_, exchange)| exchange)
    }

    pub fn names(&self) -> Vec<String> {
        self.exchanges.iter().map(|e| e.key().clone()).collect()
    }
}
