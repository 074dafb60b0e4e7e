//! Get/set behavior of the config service as seen by a transport.

use runtime_config::config::{ConfigReply, ErrorKind, HostFacts, RawValue};

mod common;

const GIB: u64 = 1 << 30;

#[test]
fn test_every_field_is_gettable_before_any_set() {
    let (service, _) = common::service();
    for entry in service.dump() {
        let reply = ConfigReply::from_get(service.get(entry.category.as_str(), &entry.key));
        assert!(reply.ok, "{}.{}", entry.category, entry.key);
        assert_eq!(reply.value.as_deref(), Some(entry.default.as_str()));
    }
}

#[test]
fn test_malformed_names_are_rejected_for_get_and_set() {
    let (service, _) = common::service();
    let categories = ["Cache_config", "cache config", "cache_Config", "cacheconfig", "Cache", "cache ", ""];
    let keys = ["Cpu_cache_size", "cpu cache_size", "cpucachecapacity", "Cache_size", "cache_size ", ""];

    for category in categories {
        assert_eq!(service.get(category, "cache_size").unwrap_err().kind(), ErrorKind::UnknownCategory);
        assert_eq!(
            service.set(category, "cache_size", "4GB").unwrap_err().kind(),
            ErrorKind::UnknownCategory
        );
    }
    for key in keys {
        assert_eq!(service.get("cache", key).unwrap_err().kind(), ErrorKind::UnknownKey);
        assert_eq!(service.set("cache", key, "4GB").unwrap_err().kind(), ErrorKind::UnknownKey);
    }
    for key in ["Enable", "enable ", "disable", "true"] {
        assert!(service.get("gpu", key).is_err());
    }
    // Valid key, wrong category.
    assert_eq!(service.get("network", "cache_size").unwrap_err().kind(), ErrorKind::UnknownKey);
    assert_eq!(service.revision(), 0);
}

#[test]
fn test_cache_sizes_alternate_without_drift() {
    let (service, _) = common::service();
    for _ in 0..20 {
        service.set("cache", "cache_size", "4GB").unwrap();
        assert_eq!(service.get("cache", "cache_size").unwrap(), "4GB");
        service.set("cache", "cache_size", "2GB").unwrap();
        assert_eq!(service.get("cache", "cache_size").unwrap(), "2GB");

        service.set("cache", "insert_buffer_size", "1GB").unwrap();
        assert_eq!(service.get("cache", "insert_buffer_size").unwrap(), "1GB");
        service.set("cache", "insert_buffer_size", "2GB").unwrap();
        assert_eq!(service.get("cache", "insert_buffer_size").unwrap(), "2GB");
    }
}

#[test]
fn test_cache_larger_than_memory_is_rejected() {
    let (service, _) = common::service_with(HostFacts {
        total_memory_bytes: 32 * GIB,
        ..HostFacts::default()
    });

    assert!(service.set("cache", "cache_size", "33GB").is_err());
    assert!(service.set("cache", "insert_buffer_size", "33GB").is_err());
    // Each fits alone, together they do not.
    assert!(service.set("cache", "cache_size", "31GB").is_ok());
    assert!(service.set("cache", "insert_buffer_size", "2GB").is_err());
    assert_eq!(service.get("cache", "cache_size").unwrap(), "31GB");
    assert_eq!(service.get("cache", "insert_buffer_size").unwrap(), "1GB");
}

#[test]
fn test_size_values_reject_whitespace_and_signs() {
    let (service, _) = common::service();
    for bad in ["-1GB", "1\n", "1\t", "1 GB", "1.5GB", "GB", "4XB"] {
        assert!(service.set("cache", "cache_size", bad).is_err(), "{bad:?}");
    }
    assert!(service.set("cache", "cache_size", -1).is_err());

    // Bare magnitudes use the field's unit.
    service.set("gpu", "cache_size", 1).unwrap();
    assert_eq!(service.get("gpu", "cache_size").unwrap(), "1");
    assert_eq!(
        service.get_typed("gpu", "cache_size").unwrap().as_bytes(),
        Some(GIB)
    );
}

#[test]
fn test_preload_collection_accepts_any_string() {
    let (service, _) = common::service();
    for value in ["", "collection_a", "a,b,c"] {
        service.set("cache", "preload_collection", value).unwrap();
        assert_eq!(service.get("cache", "preload_collection").unwrap(), value);
    }
}

#[test]
fn test_gpu_search_threshold() {
    let (service, _) = common::service();
    service.set("gpu", "gpu_search_threshold", 2000).unwrap();
    assert_eq!(service.get("gpu", "gpu_search_threshold").unwrap(), "2000");

    let invalid = [
        RawValue::Int(-1),
        RawValue::from("1000\n"),
        RawValue::from("1000\t"),
        RawValue::from("1000.0"),
        RawValue::Float(1000.35),
    ];
    for value in invalid {
        assert!(service.set("gpu", "gpu_search_threshold", value.clone()).is_err(), "{value:?}");
    }
    assert_eq!(service.get("gpu", "gpu_search_threshold").unwrap(), "2000");
}

#[test]
fn test_gpu_devices_depend_on_host() {
    let (service, host) = common::service_with(HostFacts {
        gpu_device_count: 2,
        ..HostFacts::default()
    });

    service.set("gpu", "search_devices", "gpu0").unwrap();
    service.set("gpu", "build_index_devices", "gpu1").unwrap();
    for bad in ["gpu10000", "gpu2", "gpu-1", "gpu 0", "-gpu0", "gpu22,gpu44", "gpu0,gpu1", "cpu0", "0"] {
        assert!(service.set("gpu", "search_devices", bad).is_err(), "{bad:?}");
    }
    assert_eq!(service.get("gpu", "search_devices").unwrap(), "gpu0");

    // A GPU disappearing is seen by the next validation.
    host.update(|f| f.gpu_device_count = 1);
    assert!(service.set("gpu", "search_devices", "gpu1").is_err());
}

#[test]
fn test_gpu_booleans() {
    let (service, _) = common::service();
    for (key, value) in [("enable", "true"), ("cache.enable", "false"), ("enable", "Off")] {
        service.set("gpu", key, value).unwrap();
        assert_eq!(service.get("gpu", key).unwrap(), value);
    }
    for bad in [RawValue::Int(-1), RawValue::Int(-2), RawValue::Int(100), RawValue::from("disable")] {
        assert!(service.set("gpu", "enable", bad).is_err());
    }
}

#[test]
fn test_network_ports() {
    let (service, _) = common::service();

    assert!(service.set("network", "http.port", 1024).is_err());
    service.set("network", "http.port", 1025).unwrap();
    assert_eq!(service.get("network", "http.port").unwrap(), "1025");

    service.set("network", "http.port", 65534).unwrap();
    assert!(service.set("network", "http.port", 65535).is_err());
    for bad in [RawValue::from("19121 "), RawValue::from("True"), RawValue::Bool(true), RawValue::Int(-1)] {
        assert!(service.set("network", "http.port", bad).is_err());
    }
    assert_eq!(service.get("network", "http.port").unwrap(), "65534");

    assert_eq!(
        service.set("network", "bind.port", 19531).unwrap_err().kind(),
        ErrorKind::ReadOnly
    );
}

#[test]
fn test_network_addresses() {
    let (service, _) = common::service();
    service.set("network", "bind.address", "127.0.0.1").unwrap();
    service.set("metric", "address", "::1").unwrap();
    for bad in ["localhost", "256.0.0.1", "127.0.0.1 "] {
        assert!(service.set("network", "bind.address", bad).is_err(), "{bad:?}");
    }
}

#[test]
fn test_timezones() {
    let (service, _) = common::service();
    for good in ["UTC", "UTC+0", "UTC+14", "UTC-0", "UTC-12", "UTC+8"] {
        service.set("general", "timezone", good).unwrap();
        assert_eq!(service.get("general", "timezone").unwrap(), good);
    }
    for bad in ["UTC++8", "utc+8", "GMT+8", "UTC+15", "UTC-13", "UTC+", "UTC 8"] {
        assert!(service.set("general", "timezone", bad).is_err(), "{bad:?}");
    }
}

#[test]
fn test_storage_and_wal() {
    let (service, _) = common::service();

    service.set("storage", "path", "/data/milvus").unwrap();
    service.set("storage", "auto_flush_interval", "2").unwrap();
    service.set("storage", "file_cleanup_timeout", "30s").unwrap();
    for bad in ["-1", "1.5", "invalid", "1+2", "0"] {
        assert!(service.set("storage", "auto_flush_interval", bad).is_err(), "{bad:?}");
    }
    assert!(service.set("storage", "file_cleanup_timeout", "2h").is_err());

    service.set("wal", "recovery_error_ignore", "yes").unwrap();
    service.set("wal", "buffer_size", "128MB").unwrap();
    service.set("wal", "buffer_size", 512).unwrap();
    assert_eq!(service.get_typed("wal", "buffer_size").unwrap().as_bytes(), Some(512 << 20));
    assert!(service.set("wal", "buffer_size", "32MB").is_err());
    assert!(service.set("wal", "buffer_size", "8GB").is_err());
}

#[test]
fn test_interleaved_invalid_sets_keep_last_valid_value() {
    let (service, _) = common::service();
    service.set("metric", "port", 9100).unwrap();
    for _ in 0..5 {
        assert!(service.set("metric", "port", 80).is_err());
        assert_eq!(service.get("metric", "port").unwrap(), "9100");
        service.set("metric", "port", 9101).unwrap();
        assert!(service.set("metric", "port", "abc").is_err());
        assert_eq!(service.get("metric", "port").unwrap(), "9101");
        service.set("metric", "port", 9100).unwrap();
    }
}

#[test]
fn test_replies_carry_only_ok_and_kind() {
    let (service, _) = common::service();

    let reply = ConfigReply::from_set(service.set("general", "timezone", "UTC++8"));
    assert!(!reply.ok);
    assert_eq!(reply.error_kind, Some(ErrorKind::InvalidValue));

    let reply = ConfigReply::from_set(service.set("general", "timezone", "UTC+8"));
    assert!(reply.ok);
    assert_eq!(reply.error_kind, None);

    let reply = ConfigReply::from_get(service.get("general", "timezone"));
    assert_eq!(reply.value.as_deref(), Some("UTC+8"));
}
