//! Configuration files loaded from disk.

use std::io::Write;
use std::time::Duration;

use offset_migrator_core::config::ClientConfig;
use offset_migrator_core::testing::MockAdmin;
use offset_migrator_core::{
    ConfigError, GroupOffsets, LoopCount, MigrationConfig, Scheduler, TopicPartition,
};
use tempfile::{Builder, NamedTempFile};

fn write_file(suffix: &str, content: &str) -> NamedTempFile {
    let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

const PROPERTIES: &str = r"
# orders move to the archive cluster naming
migration.targets=orders, audit
loops=3
interval.ms=10
require.stable=FALSE

orders.group.regex=app-orders-(\\d+)
orders.group.rename=migrated-orders-${1}
orders.topic.regex=orders\\.(.*)
orders.topic.rename=archived.${1}
orders.topic.blacklist.regex=.*\\.internal

audit.enable=false
audit.group.regex=audit-.*
audit.group.rename=audit-copy
";

const YAML: &str = r"
migration:
  targets: [orders, audit]
loops: 3
interval.ms: 10
require.stable: false
orders:
  group:
    regex: 'app-orders-(\d+)'
    rename: 'migrated-orders-${1}'
  topic:
    regex: 'orders\.(.*)'
    rename: 'archived.${1}'
    blacklist:
      regex: '.*\.internal'
audit:
  enable: false
  group:
    regex: 'audit-.*'
    rename: audit-copy
";

fn assert_orders_config(config: &MigrationConfig) {
    assert_eq!(config.loops, LoopCount::Bounded(3));
    assert_eq!(config.interval, Duration::from_millis(10));
    assert!(!config.require_stable);

    let names: Vec<&str> = config.sets.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["orders", "audit"]);

    let orders = &config.sets[0];
    assert!(orders.enabled);
    let group = orders.group.as_ref().unwrap();
    assert_eq!(group.pattern.as_str(), r"app-orders-(\d+)");
    assert_eq!(group.template.as_str(), "migrated-orders-${1}");
    assert_eq!(orders.topic.pattern.as_str(), r"orders\.(.*)");
    assert!(orders.topic_blacklist.as_ref().unwrap().is_full_match("orders.internal"));
    assert!(orders.group_blacklist.is_none());

    assert!(!config.sets[1].enabled);
}

#[test]
fn test_properties_file() {
    let file = write_file(".properties", PROPERTIES);
    let config = MigrationConfig::from_file(file.path()).unwrap();
    assert_orders_config(&config);
}

#[test]
fn test_yaml_file() {
    let file = write_file(".yaml", YAML);
    let config = MigrationConfig::from_file(file.path()).unwrap();
    assert_orders_config(&config);
}

#[test]
fn test_empty_targets_file() {
    let file = write_file(".properties", "loops=5\n");
    let config = MigrationConfig::from_file(file.path()).unwrap();
    assert!(!config.has_targets());
}

#[test]
fn test_invalid_template_in_file() {
    let file = write_file(
        ".properties",
        "migration.targets=s\ns.group.regex=g\ns.group.rename=h-${99999999999999999999999}\n",
    );
    let config = MigrationConfig::from_file(file.path()).unwrap();
    assert!(matches!(
        config.sets[0].invalid.as_deref(),
        Some(ConfigError::InvalidTemplate { .. })
    ));
}

#[test]
fn test_yaml_root_must_be_a_mapping() {
    let file = write_file(".yml", "- orders\n- audit\n");
    assert!(matches!(
        MigrationConfig::from_file(file.path()),
        Err(ConfigError::NotAMapping(_))
    ));
}

#[test]
fn test_client_config_file() {
    let file = write_file(
        ".yaml",
        r"
kafka:
  bootstrap_servers: ['kafka-1:9092', 'kafka-2:9092']
  request_timeout_ms: 5000
logging:
  level: debug
  json: true
metrics:
  enabled: true
  address: '127.0.0.1:9191'
",
    );
    let config = ClientConfig::from_file(file.path()).unwrap();
    assert_eq!(config.kafka.bootstrap_servers.len(), 2);
    assert_eq!(config.kafka.request_timeout(), Duration::from_secs(5));
    assert_eq!(config.logging.level, "debug");
    assert!(config.logging.json);
    assert!(config.metrics.enabled);
    assert_eq!(config.metrics.address, "127.0.0.1:9191");
}

#[tokio::test]
async fn test_file_config_drives_migration() {
    let file = write_file(".properties", PROPERTIES);
    let config = MigrationConfig::from_file(file.path()).unwrap();

    let admin = MockAdmin::new();
    let source: GroupOffsets = [
        (TopicPartition::new("orders.us", 0), 100),
        (TopicPartition::new("orders.internal", 0), 9),
    ]
    .into_iter()
    .collect();
    admin.set_offsets("app-orders-1", source);
    admin.set_offsets("audit-1", [(TopicPartition::new("audit", 0), 1)].into_iter().collect());

    let reports = Scheduler::new(config).run(&admin).await;

    assert_eq!(reports.len(), 3);
    assert_eq!(reports.iter().map(|r| r.offsets_written).sum::<usize>(), 1);
    assert_eq!(
        admin.committed("migrated-orders-1"),
        Some([(TopicPartition::new("archived.us", 0), 100)].into_iter().collect())
    );
    assert_eq!(admin.committed("audit-copy"), None);
    assert_eq!(admin.fetch_stability(), vec![false; 3]);
}

#[test]
fn test_demo_configs_agree() {
    let demos = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos");
    let properties = MigrationConfig::from_file(demos.join("migration.properties")).unwrap();
    let yaml = MigrationConfig::from_file(demos.join("migration.yaml")).unwrap();

    for config in [&properties, &yaml] {
        assert_eq!(config.loops, LoopCount::Unbounded);
        assert_eq!(config.interval, Duration::from_secs(5));
        let names: Vec<&str> = config.sets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["orders", "payments"]);
        assert!(config.sets[1].group_blacklist.as_ref().unwrap().is_full_match("payments-test-1"));
    }
    assert_eq!(
        properties.sets[0].group.as_ref().unwrap().pattern.as_str(),
        yaml.sets[0].group.as_ref().unwrap().pattern.as_str()
    );

    let client = ClientConfig::from_file(demos.join("client.yaml")).unwrap();
    assert_eq!(client.kafka.bootstrap_servers, vec!["localhost:9092"]);
}
