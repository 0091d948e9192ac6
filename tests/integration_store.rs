use nsplane::config::{StoreBackend, StoreConfig};
use nsplane::registry::ResourceRegistries;
use nsplane::storage::{InMemoryResourceLog, LogBackedStore, ResourceLog};
use nsplane::types::{KafkaStream, Namespace};
use nsplane::NsPlaneError;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn file_config(dir: &std::path::Path) -> StoreConfig {
    StoreConfig {
        backend: StoreBackend::File,
        data_dir: dir.to_path_buf(),
        poll_interval_ms: 20,
        ..StoreConfig::default()
    }
}

#[tokio::test]
async fn test_restart_rebuilds_identical_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let config = file_config(dir.path());

    let before = {
        let registries = ResourceRegistries::open(&config).await.unwrap();
        for i in 0..20 {
            let ns = Namespace::new(format!("ns{}", i), "local", format!("user{}", i));
            registries.namespaces.create(ns).await.unwrap();
        }
        for i in (0..20).step_by(3) {
            let ns = registries.namespaces.find_by_name(&format!("ns{}", i)).unwrap().unwrap();
            registries.namespaces.delete(&ns).await.unwrap();
        }
        let mut renamed = registries.namespaces.find_by_name("ns1").unwrap().unwrap();
        renamed.spec.kafka_user = "renamed".to_string();
        registries.namespaces.create(renamed).await.unwrap();
        registries
            .streams
            .create(KafkaStream::new("ns1-stream", "ns1", "local"))
            .await
            .unwrap();

        let snapshot = registries.namespaces.store().entries().unwrap();
        registries.shutdown();
        snapshot
    };

    for _ in 0..2 {
        let registries = ResourceRegistries::open(&config).await.unwrap();
        assert_eq!(registries.namespaces.store().entries().unwrap(), before);
        assert_eq!(
            registries.namespaces.find_by_name("ns1").unwrap().unwrap().kafka_user(),
            "renamed"
        );
        assert_eq!(registries.streams.find_all().unwrap().len(), 1);
        registries.shutdown();
    }
}

#[tokio::test]
async fn test_corrupt_record_stops_the_store() {
    let log = Arc::new(InMemoryResourceLog::new("ns4kafka.namespaces"));
    let config = StoreConfig {
        backend: StoreBackend::Memory,
        poll_interval_ms: 20,
        ..StoreConfig::default()
    };
    let store: Arc<LogBackedStore<Namespace>> =
        LogBackedStore::open(log.clone() as Arc<dyn ResourceLog>, &config).await.unwrap();

    store.put("ns1", Namespace::new("ns1", "local", "user1")).await.unwrap();
    log.append_raw("ns2", Some(b"{not json".to_vec()));

    let reason = tokio::time::timeout(Duration::from_secs(2), store.wait_fatal())
        .await
        .unwrap();
    assert!(reason.contains("decode"), "{}", reason);

    let read = store.get("ns1").unwrap_err();
    assert!(read.is_fatal());
    let write = store
        .put("ns3", Namespace::new("ns3", "local", "user3"))
        .await
        .unwrap_err();
    assert!(matches!(write, NsPlaneError::StoreFatal { .. }));
}

#[test]
fn test_shipped_config_is_valid() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/nsplane.toml");
    let config = nsplane::Config::from_file(path).unwrap();
    config.validate().unwrap();
    assert_eq!(config.clusters.len(), 2);
    assert!(!config.cluster("prod").unwrap().drop_unsynced_acls);
}
