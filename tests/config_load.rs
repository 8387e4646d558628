use amqcore::config::{load_config, parse_config};
use amqcore::{Config, VirtualHost};

#[test]
fn load_config_matches_toml() {
    let cfg: Config = load_config("amqcore.toml").expect("failed to load config");

    assert_eq!(cfg.broker.virtual_host, "/");
    assert_eq!(cfg.queues.capacity, 1_048_576);
    assert_eq!(cfg.queues.flow_resume_capacity, 524_288);
    assert_eq!(cfg.queues.max_message_count, 50_000);
    assert_eq!(cfg.queues.max_message_age_ms, 600_000);
    assert_eq!(cfg.logging.level, "info");
}

#[test]
fn missing_sections_fall_back_to_defaults() {
    let cfg = parse_config("[queues]\ncapacity = 10\n").unwrap();
    assert_eq!(cfg.broker.virtual_host, "/");
    assert_eq!(cfg.queues.capacity, 10);
    assert_eq!(cfg.queues.flow_resume_capacity, 0);
    assert_eq!(cfg.logging.level, "info");
    assert_eq!(parse_config("").unwrap(), Config::default());
}

#[test]
fn inconsistent_thresholds_are_rejected() {
    let err = parse_config("[queues]\ncapacity = 10\nflow_resume_capacity = 11\n").unwrap_err();
    assert!(err.to_string().contains("flow_resume_capacity"));
    assert!(parse_config("[broker]\nvirtual_host = \"\"\n").is_err());
}

#[test]
fn missing_file_reports_the_path() {
    let err = load_config("does-not-exist.toml").unwrap_err();
    assert!(format!("{err:#}").contains("does-not-exist.toml"));
}

#[test]
fn virtual_host_uses_configured_queue_defaults() {
    let cfg = load_config("amqcore.toml").unwrap();
    let vhost = VirtualHost::from_config(&cfg);
    let queue = vhost
        .declare_queue("configured", Default::default())
        .unwrap();
    assert_eq!(queue.capacity(), 1_048_576);
    assert_eq!(queue.flow_resume_capacity(), 524_288);
    assert_eq!(queue.limits().max_message_size, 262_144);
}
