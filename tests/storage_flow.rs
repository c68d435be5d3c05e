//! End-to-end flows through the library: binding, upload, commit, delete.

use std::sync::Arc;

use bytes::Bytes;
use dvstore::catalog::{Catalog, DatasetId, NodeRef};
use dvstore::config::{Config, ConfigProvider, StaticConfig};
use dvstore::drivers::{DriverConfig, DriverRegistry, Principal};
use dvstore::ingest::{Checksum, ChecksumAlgorithm, CommitRequest, FileMetadata, IngestService};
use dvstore::ledger::FileLedger;
use dvstore::observability::Metrics;
use dvstore::storage::{MemoryObjectClient, ObjectStoreClient, StorageError};
use dvstore::upload::{SessionTable, UploadCoordinator};
use dvstore::ErrorKind;
use tempfile::TempDir;

struct Harness {
    catalog: Catalog,
    registry: Arc<DriverRegistry>,
    coordinator: UploadCoordinator,
    ingest: IngestService,
    _dir: TempDir,
}

fn harness_with(registry: DriverRegistry, config: &Config, dir: TempDir) -> Harness {
    let registry = Arc::new(registry);
    let metrics = Arc::new(Metrics::new());
    let sessions = Arc::new(SessionTable::new());
    let coordinator = UploadCoordinator::new(
        registry.clone(),
        config.upload.clone(),
        sessions.clone(),
        metrics.clone(),
    );
    let ingest = IngestService::new(
        registry.clone(),
        FileLedger::open(dir.path().join("ledger")).unwrap(),
        sessions,
        config.upload.verify_size,
        metrics,
    );
    Harness {
        catalog: Catalog::new(),
        registry,
        coordinator,
        ingest,
        _dir: dir,
    }
}

fn config_from_toml(dir: &TempDir, extra: &str) -> Config {
    let text = format!(
        r#"
[storage]
files_root = "{}"

[storage.drivers.minio1]
label = "MinIO"
kind = "memory"
bucket = "mybucket"

[storage.drivers.localstack1]
label = "LocalStack"
kind = "memory"
bucket = "mybucket"
{extra}
"#,
        dir.path().join("files").display()
    );
    let config: Config = toml::from_str(&text).unwrap();
    StaticConfig::new(config).load().unwrap()
}

fn dataset(h: &mut Harness, alias: &str, pid: &str, label: Option<&str>) -> DatasetId {
    let collection = h.catalog.create_collection(alias, h.catalog.root()).unwrap();
    if let Some(label) = label {
        h.registry
            .set_collection_binding(&Principal::Superuser, &mut h.catalog, collection, label)
            .unwrap();
    }
    h.catalog.create_dataset(collection, pid.parse().unwrap()).unwrap()
}

#[tokio::test]
async fn test_scenario_ingest_through_server_then_delete() {
    let dir = TempDir::new().unwrap();
    let config = config_from_toml(&dir, "");
    let registry = DriverRegistry::from_config(&config, Arc::new(Metrics::new()))
        .await
        .unwrap();
    let mut h = harness_with(registry, &config, dir);
    let id = dataset(&mut h, "scenario-a", "doi:10.5072/FK2/AAAAAA", Some("MinIO"));
    let target = h.registry.dataset_target(&h.catalog, id).unwrap();

    let record = h
        .ingest
        .ingest_bytes(&target, Bytes::from_static(b"a"), FileMetadata::named("a.txt"))
        .await
        .unwrap();

    let sid = record.storage_identifier.to_string();
    assert!(sid.starts_with("minio1://mybucket:"), "{sid}");
    assert!(record.object_key.starts_with("10.5072/FK2/AAAAAA/"));
    assert_eq!(record.checksum.algorithm, ChecksumAlgorithm::Sha256);

    let client = &target.driver.client;
    assert_eq!(client.get(&record.object_key).await.unwrap(), Bytes::from_static(b"a"));

    h.ingest.delete_file(record.id).await.unwrap();
    assert!(matches!(
        client.get(&record.object_key).await,
        Err(StorageError::NotFound(_))
    ));
    assert_eq!(
        h.ingest.get_file(record.id).unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[tokio::test]
async fn test_scenario_direct_upload_commit_then_delete() {
    let dir = TempDir::new().unwrap();
    let config = config_from_toml(&dir, "");
    let backend = Arc::new(MemoryObjectClient::new("mybucket"));
    let registry = DriverRegistry::new("local")
        .with_driver(
            DriverConfig::file("local", "Local", dir.path().join("local")),
            Arc::new(dvstore::storage::LocalObjectClient::open(dir.path().join("local")).unwrap()),
        )
        .with_driver(
            DriverConfig::memory("localstack1", "LocalStack", "mybucket"),
            backend.clone(),
        );
    let mut h = harness_with(registry, &config, dir);
    let id = dataset(&mut h, "scenario-b", "doi:10.5072/FK2/BBBBBB", Some("LocalStack"));
    let target = h.registry.dataset_target(&h.catalog, id).unwrap();

    let session = h
        .coordinator
        .request_upload_urls(&target, Some(1_000_000_000))
        .await
        .unwrap();
    assert!(!session.is_multipart());
    assert_eq!(session.part_size, 1_000_000_000);
    let url = session.single_url().unwrap().to_string();

    backend
        .put_presigned(&url, Bytes::from_static(b"foobar"))
        .await
        .unwrap();

    let record = h
        .ingest
        .commit_remote_file(
            &target,
            CommitRequest {
                storage_identifier: session.storage_identifier.to_string(),
                // Size comes from the URL request, as the client never sends one
                declared_size: None,
                checksum: Checksum::new(ChecksumAlgorithm::Sha1, "123456"),
                metadata: FileMetadata::named("foobar.txt"),
            },
        )
        .await
        .unwrap();

    assert_eq!(record.storage_identifier, session.storage_identifier);
    assert_eq!(record.size_bytes, 1_000_000_000);
    assert!(
        record
            .storage_identifier
            .to_string()
            .starts_with("localstack1://mybucket:")
    );
    assert_eq!(
        backend.get(&record.object_key).await.unwrap(),
        Bytes::from_static(b"foobar")
    );

    h.ingest.delete_file(record.id).await.unwrap();
    assert!(matches!(
        backend.get(&record.object_key).await,
        Err(StorageError::NotFound(_))
    ));
    assert_eq!(
        h.ingest.get_file(record.id).unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[tokio::test]
async fn test_commit_without_size_creates_no_record() {
    let dir = TempDir::new().unwrap();
    let config = config_from_toml(&dir, "");
    let backend = Arc::new(MemoryObjectClient::new("mybucket"));
    let registry = DriverRegistry::new("minio1").with_driver(
        DriverConfig::memory("minio1", "MinIO", "mybucket"),
        backend.clone(),
    );
    let mut h = harness_with(registry, &config, dir);
    let id = dataset(&mut h, "nosize", "doi:10.5072/FK2/CCCCCC", None);
    let target = h.registry.dataset_target(&h.catalog, id).unwrap();

    backend
        .put(&target.object_key("k1"), Bytes::from_static(b"foobar"))
        .await
        .unwrap();
    let err = h
        .ingest
        .commit_remote_file(
            &target,
            CommitRequest {
                storage_identifier: "minio1://mybucket:k1".into(),
                declared_size: None,
                checksum: Checksum::new(ChecksumAlgorithm::Md5, "abcdef"),
                metadata: FileMetadata::named("f.txt"),
            },
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(h.ingest.ledger().stats().unwrap().file_count, 0);
}

#[tokio::test]
async fn test_commit_against_other_driver_conflicts() {
    let dir = TempDir::new().unwrap();
    let config = config_from_toml(&dir, "");
    let registry = DriverRegistry::new("minio1")
        .with_driver(
            DriverConfig::memory("minio1", "MinIO", "mybucket"),
            Arc::new(MemoryObjectClient::new("mybucket")),
        )
        .with_driver(
            DriverConfig::memory("localstack1", "LocalStack", "mybucket"),
            Arc::new(MemoryObjectClient::new("mybucket")),
        );
    let mut h = harness_with(registry, &config, dir);
    let id = dataset(&mut h, "conflict", "doi:10.5072/FK2/DDDDDD", Some("MinIO"));
    let target = h.registry.dataset_target(&h.catalog, id).unwrap();

    let err = h
        .ingest
        .commit_remote_file(
            &target,
            CommitRequest {
                storage_identifier: "localstack1://mybucket:k1".into(),
                declared_size: Some(6),
                checksum: Checksum::new(ChecksumAlgorithm::Sha1, "123456"),
                metadata: FileMetadata::named("f.txt"),
            },
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(h.ingest.ledger().stats().unwrap().file_count, 0);
}

#[tokio::test]
async fn test_dataset_binding_overrides_collection() {
    let dir = TempDir::new().unwrap();
    let config = config_from_toml(&dir, "");
    let registry = DriverRegistry::from_config(&config, Arc::new(Metrics::new()))
        .await
        .unwrap();
    let mut h = harness_with(registry, &config, dir);
    let id = dataset(&mut h, "precedence", "doi:10.5072/FK2/EEEEEE", Some("MinIO"));

    let resolve = |h: &Harness| {
        h.registry
            .resolve(&h.catalog, NodeRef::Dataset(id))
            .unwrap()
            .id()
            .to_string()
    };
    assert_eq!(resolve(&h), "minio1");

    h.registry
        .set_dataset_binding(&Principal::Superuser, &mut h.catalog, id, "LocalStack")
        .unwrap();
    assert_eq!(resolve(&h), "localstack1");

    h.registry
        .clear_dataset_binding(&Principal::Superuser, &mut h.catalog, id)
        .unwrap();
    assert_eq!(resolve(&h), "minio1");
}

#[tokio::test]
async fn test_multipart_upload_end_to_end() {
    let dir = TempDir::new().unwrap();
    let config = config_from_toml(
        &dir,
        r#"
[upload]
multipart_threshold = "10MiB"
min_part_size = "5MiB"
"#,
    );
    let backend = Arc::new(MemoryObjectClient::new("mybucket"));
    let registry = DriverRegistry::new("localstack1").with_driver(
        DriverConfig::memory("localstack1", "LocalStack", "mybucket"),
        backend.clone(),
    );
    let mut h = harness_with(registry, &config, dir);
    let id = dataset(&mut h, "multipart", "doi:10.5072/FK2/FFFFFF", None);
    let target = h.registry.dataset_target(&h.catalog, id).unwrap();

    let part = 5 * 1024 * 1024;
    let size = 2 * part as u64 + 3;
    let session = h
        .coordinator
        .request_upload_urls(&target, Some(size))
        .await
        .unwrap();
    assert!(session.is_multipart());
    assert_eq!(session.urls.len(), 3);

    let mut parts = Vec::new();
    for (index, url) in session.urls.iter().enumerate() {
        let len = if index < 2 { part } else { 3 };
        let e_tag = backend
            .put_presigned(&url.url, Bytes::from(vec![index as u8; len]))
            .await
            .unwrap();
        parts.push(dvstore::storage::CompletedPart {
            part_number: url.part_number,
            e_tag,
        });
    }
    parts.reverse();

    let upload_id = session.upload_id.clone().unwrap();
    h.coordinator
        .complete_multipart(&target, &session.storage_identifier, &upload_id, parts)
        .await
        .unwrap();
    assert_eq!(backend.pending_uploads().await, 0);

    let record = h
        .ingest
        .commit_remote_file(
            &target,
            CommitRequest {
                storage_identifier: session.storage_identifier.to_string(),
                declared_size: None,
                checksum: Checksum::new(ChecksumAlgorithm::Md5, "0123abcd"),
                metadata: FileMetadata::named("big.bin"),
            },
        )
        .await
        .unwrap();
    assert_eq!(record.size_bytes, size);
}

#[tokio::test]
async fn test_concurrent_sessions_never_share_identifiers() {
    let dir = TempDir::new().unwrap();
    let config = config_from_toml(&dir, "");
    let registry = DriverRegistry::new("minio1").with_driver(
        DriverConfig::memory("minio1", "MinIO", "mybucket"),
        Arc::new(MemoryObjectClient::new("mybucket")),
    );
    let mut h = harness_with(registry, &config, dir);
    let id = dataset(&mut h, "concurrent", "doi:10.5072/FK2/GGGGGG", None);
    let target = h.registry.dataset_target(&h.catalog, id).unwrap();

    let coordinator = Arc::new(h.coordinator);
    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..16 {
        let coordinator = coordinator.clone();
        let target = target.clone();
        tasks.spawn(async move {
            coordinator
                .request_upload_urls(&target, Some(6))
                .await
                .unwrap()
                .storage_identifier
        });
    }

    let mut seen = std::collections::HashSet::new();
    while let Some(identifier) = tasks.join_next().await {
        assert!(seen.insert(identifier.unwrap()));
    }
    assert_eq!(seen.len(), 16);
    assert_eq!(coordinator.sessions().len(), 16);
}
