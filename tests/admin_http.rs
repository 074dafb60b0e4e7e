//! End-to-end checks through the admin HTTP API and the SDK client.

use sdk_rust::ConfigClient;

mod common;

#[tokio::test]
async fn test_round_trip_over_http() {
    let (service, _) = common::service();
    let (addr, shutdown) = common::start_admin_server(service.clone()).await;
    let client = ConfigClient::new(&format!("http://{addr}"));

    let reply = client.set("network", "http.port", 1024).await.unwrap();
    assert!(!reply.ok);
    assert_eq!(reply.error_kind.as_deref(), Some("invalid_value"));

    let reply = client.set("network", "http.port", 1025).await.unwrap();
    assert!(reply.ok);
    let reply = client.get("network", "http.port").await.unwrap();
    assert_eq!(reply.value.as_deref(), Some("1025"));

    let reply = client.set("gpu", "search_devices", "gpu0").await.unwrap();
    assert!(reply.ok);
    let reply = client.set("gpu", "search_devices", "gpu10000").await.unwrap();
    assert!(!reply.ok);

    let reply = client.set("general", "timezone", "UTC++8").await.unwrap();
    assert!(!reply.ok);
    let reply = client.set("general", "timezone", "UTC+8").await.unwrap();
    assert!(reply.ok);

    let reply = client.set("wal", "enable", false).await.unwrap();
    assert!(reply.ok);
    assert_eq!(service.get("wal", "enable").unwrap(), "false");

    shutdown.trigger();
}

#[tokio::test]
async fn test_names_are_matched_verbatim_over_http() {
    let (service, _) = common::service();
    let (addr, shutdown) = common::start_admin_server(service).await;
    let client = ConfigClient::new(&format!("http://{addr}"));

    for (category, key, kind) in [
        ("cache ", "cache_size", "unknown_category"),
        ("Cache", "cache_size", "unknown_category"),
        ("cache", "cache_size ", "unknown_key"),
        ("cache", "Cache_size", "unknown_key"),
        ("network", "bind.port", "read_only"),
    ] {
        let reply = client.set(category, key, "19530").await.unwrap();
        assert!(!reply.ok, "{category:?}.{key:?}");
        assert_eq!(reply.error_kind.as_deref(), Some(kind), "{category:?}.{key:?}");
    }

    shutdown.trigger();
}

#[tokio::test]
async fn test_health_and_dump() {
    let (service, _) = common::service();
    let (addr, shutdown) = common::start_admin_server(service.clone()).await;
    let client = ConfigClient::new(&format!("http://{addr}"));

    service.set("metric", "enable", "on").unwrap();

    let health = client.health().await.unwrap();
    assert_eq!(health.status, "ok");
    assert_eq!(health.revision, 1);

    let dump = client.dump().await.unwrap();
    assert_eq!(dump.revision, 1);
    assert_eq!(dump.entries.len(), service.registry().len());
    let metric = dump
        .entries
        .iter()
        .find(|e| e.category == "metric" && e.key == "enable")
        .unwrap();
    assert_eq!(metric.value, "on");
    assert_eq!(metric.value_type, "boolean");

    shutdown.trigger();
}
