//! amqcore – inspect configuration or run an in-process publish/consume demo.
//
//  $ amqcore check-config --config amqcore.toml
//  $ amqcore demo --messages 1000 --size 256 --prefetch 32
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use amqcore::api::QueueManagement;
use amqcore::core::channel::ProducerChannel;
use amqcore::core::delivery_mode::DeliveryMode;
use amqcore::core::message::{ContentHeader, PublishInfo};
use amqcore::core::queue::{QueueArguments, QueueAttributes};
use amqcore::core::subscription::{create_subscription, CreditManager};
use amqcore::core::txn::TransactionalContext;
use amqcore::logging::init_logging;
use amqcore::{load_config, Config, VirtualHost};

use anyhow::Context;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use tracing::info;

const DEFAULT_CONFIG: &str = "amqcore.toml";

#[derive(Debug, Parser)]
#[command(name = "amqcore", version, about = "AMQP-style queuing core")]
struct Cli {
    /// Path to config TOML (env AMQCORE_CONFIG overrides)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load, validate and print the resolved configuration.
    CheckConfig,
    /// Publish and consume through one queue, then print its counters as JSON.
    Demo {
        #[arg(long, default_value_t = 1_000)]
        messages: u64,
        /// Body size in bytes.
        #[arg(long, default_value_t = 256)]
        size: usize,
        /// Consumer prefetch (unacknowledged message limit).
        #[arg(long, default_value_t = 32)]
        prefetch: u64,
        /// Queue capacity in bytes; overrides the configured default.
        #[arg(long)]
        capacity: Option<u64>,
    },
}

fn resolve_config(flag: Option<String>) -> anyhow::Result<Config> {
    match std::env::var("AMQCORE_CONFIG").ok().or(flag) {
        Some(path) => load_config(&path),
        None if Path::new(DEFAULT_CONFIG).exists() => load_config(DEFAULT_CONFIG),
        None => Ok(Config::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = resolve_config(cli.config)?;
    init_logging(&cfg.logging.level)?;

    match cli.cmd {
        Command::CheckConfig => {
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
        Command::Demo {
            messages,
            size,
            prefetch,
            capacity,
        } => demo(&cfg, messages, size, prefetch, capacity).await?,
    }
    Ok(())
}

async fn demo(
    cfg: &Config,
    messages: u64,
    size: usize,
    prefetch: u64,
    capacity: Option<u64>,
) -> anyhow::Result<()> {
    let vhost = Arc::new(VirtualHost::from_config(cfg));
    let mut arguments: QueueArguments = vhost.default_arguments();
    if let Some(capacity) = capacity {
        arguments.capacity = capacity;
        arguments.flow_resume_capacity = arguments.flow_resume_capacity.min(capacity / 2);
    }
    let queue = vhost.declare_queue_with("demo", QueueAttributes::default(), arguments)?;

    let (subscription, deliveries) =
        create_subscription(1, "demo-consumer", false, Arc::new(CreditManager::with_prefetch(prefetch)));
    queue.register_subscription(&subscription, false)?;

    let consumer = {
        let queue = Arc::clone(&queue);
        let subscription = Arc::clone(&subscription);
        let mut txn = vhost.auto_commit();
        tokio::spawn(async move {
            let mut acked = 0u64;
            while acked < messages {
                let delivery = deliveries
                    .recv_async()
                    .await
                    .context("delivery channel closed")?;
                queue.acknowledge(&subscription, delivery.message_id(), &mut txn)?;
                acked += 1;
            }
            Ok::<u64, anyhow::Error>(acked)
        })
    };

    let channel = ProducerChannel::new(2);
    let body = Bytes::from(vec![b'x'; size]);
    let mut txn = vhost.auto_commit();
    let started = Instant::now();
    let mut throttled = 0u64;
    for i in 0..messages {
        if queue.check_capacity(&channel) {
            throttled += 1;
            while channel.is_blocking() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }
        let header = ContentHeader::new(size as u64, DeliveryMode::Persistent)
            .with_content_type("application/octet-stream");
        let publish = PublishInfo::new("", "demo");
        let report = vhost.publish(publish, header, body.clone(), &["demo"], &mut txn)?;
        if i == 0 {
            info!(target: "amqcore::demo", message_id = report.message_id, "first message published");
        }
    }
    txn.commit()?;

    let acked = consumer.await??;
    subscription.close();
    let elapsed = started.elapsed();
    info!(
        target: "amqcore::demo",
        published = messages,
        acked,
        throttled,
        elapsed_ms = elapsed.as_millis() as u64,
        "demo finished"
    );

    let management = QueueManagement::new(Arc::clone(&vhost));
    println!(
        "{}",
        serde_json::to_string_pretty(&management.queue_info("demo")?)?
    );
    Ok(())
}
