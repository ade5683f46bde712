mod common;

use common::{fixture, mock_factory, MockReader};
use conduit_query::{BackendKind, DataError, ReaderState, RuntimeOverrides};
use conduit_readers::ConnectionFactory;
use serde_json::json;
use std::sync::atomic::Ordering;

fn built_config(
    factory: &ConnectionFactory,
    kind: BackendKind,
    env: &str,
    overrides: &RuntimeOverrides,
) -> conduit_query::ConfigMap {
    let reader = factory.build(kind, env, overrides).unwrap();
    let mock = reader.downcast_ref::<MockReader>().unwrap();
    mock.config.values().clone()
}

#[test]
fn test_resolved_keys_are_whitelisted() {
    let fixture = fixture();
    let (factory, _) = mock_factory(&fixture);

    for (env, kind) in [
        ("DEV", BackendKind::Postgres),
        ("PROD", BackendKind::Postgres),
        ("PROD", BackendKind::Oracle),
        ("PROD", BackendKind::S3),
    ] {
        let filtered = factory.resolve(kind, env).unwrap();
        let whitelist = factory.registry().get(kind).unwrap().filter.whitelist();
        assert!(
            filtered.values.keys().all(|k| whitelist.contains(&k.as_str())),
            "{} {} leaked a key",
            env,
            kind
        );
    }

    let dev = factory.resolve(BackendKind::Postgres, "DEV").unwrap();
    assert!(!dev.values.contains_key("application_name"));
    assert!(!dev.values.contains_key("colour"));
}

#[test]
fn test_missing_password_names_password() {
    let fixture = fixture();
    let (factory, _) = mock_factory(&fixture);

    let err = factory
        .build(BackendKind::Postgres, "QA", &RuntimeOverrides::new())
        .err()
        .unwrap();
    assert!(matches!(err, DataError::Validation { .. }));
    assert_eq!(err.missing_fields(), ["password"]);
}

#[test]
fn test_missing_environment_and_block() {
    let fixture = fixture();
    let (factory, _) = mock_factory(&fixture);

    assert!(matches!(
        factory.resolve(BackendKind::Postgres, "STAGING"),
        Err(DataError::Configuration(_))
    ));
    // Flat DEV block is a postgres block
    assert!(matches!(
        factory.resolve(BackendKind::Oracle, "DEV"),
        Err(DataError::Configuration(_))
    ));
}

#[test]
fn test_overrides_win_and_file_values_survive() {
    let fixture = fixture();
    let (factory, _) = mock_factory(&fixture);

    let overrides = RuntimeOverrides::new()
        .set("host", "override-db")
        .set("password", serde_json::Value::Null)
        .set("bucket", "ignored-for-postgres");
    let values = built_config(&factory, BackendKind::Postgres, "DEV", &overrides);

    assert_eq!(values["host"], "override-db");
    assert_eq!(values["password"], "dev-password");
    assert_eq!(values["database"], "hr");
    assert!(!values.contains_key("bucket"));
}

#[test]
fn test_nested_pooling_is_replaced_whole() {
    let fixture = fixture();
    let (factory, _) = mock_factory(&fixture);

    let overrides = RuntimeOverrides::new().set("pooling", json!({"maxconn": 10}));
    let values = built_config(&factory, BackendKind::Postgres, "DEV", &overrides);
    assert_eq!(values["pooling"], json!({"maxconn": 10}));
}

#[test]
fn test_unknown_backend_name() {
    let fixture = fixture();
    let (factory, _) = mock_factory(&fixture);

    let err = factory
        .build_by_name("mongodb", "DEV", &RuntimeOverrides::new())
        .err()
        .unwrap();
    assert!(matches!(err, DataError::UnsupportedBackend(_)));
}

#[tokio::test]
async fn test_build_does_not_connect_and_connect_is_idempotent() {
    let fixture = fixture();
    let (factory, pools_created) = mock_factory(&fixture);

    let reader = factory
        .build(BackendKind::Oracle, "PROD", &RuntimeOverrides::new())
        .unwrap();
    assert_eq!(reader.state().await, ReaderState::Uninitialized);
    assert_eq!(pools_created.load(Ordering::SeqCst), 0);

    let mock = reader.downcast_ref::<MockReader>().unwrap();
    let first = mock.pool().await.unwrap();
    let second = mock.pool().await.unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &second));
    let id = reader.connect().await.unwrap();
    assert_eq!(reader.connect().await.unwrap(), id);
    assert_eq!(pools_created.load(Ordering::SeqCst), 1);

    // a second reader gets its own pool
    let other = factory
        .build(BackendKind::Oracle, "PROD", &RuntimeOverrides::new())
        .unwrap();
    assert_ne!(other.connect().await.unwrap(), id);
    assert_eq!(pools_created.load(Ordering::SeqCst), 2);
    other.close().await.unwrap();

    reader.close().await.unwrap();
    reader.close().await.unwrap();
    assert_eq!(reader.state().await, ReaderState::Closed);
    assert!(matches!(
        reader.connect().await,
        Err(DataError::ClosedReader(_))
    ));
}

#[test]
fn test_builtin_readers_construct_without_connecting() {
    let fixture = fixture();
    let factory = ConnectionFactory::from_path(&fixture.path).unwrap();

    for kind in BackendKind::ALL {
        let reader = factory
            .build(kind, "PROD", &RuntimeOverrides::new())
            .unwrap();
        assert_eq!(reader.backend(), kind);
    }

    let postgres = factory
        .build(BackendKind::Postgres, "PROD", &RuntimeOverrides::new())
        .unwrap();
    assert_eq!(postgres.default_query(), Some("SELECT * FROM emp"));
}
