//! Unit tests for GcConfig

use memory_manager::{ConfigError, GcConfig, Heap};
use std::time::Duration;

#[test]
fn test_full_json_document() {
    let config = GcConfig::from_json(
        r#"{
            "max_objects": 5000,
            "background": true,
            "collect_interval_ms": 250,
            "mark_batch": 64
        }"#,
    )
    .unwrap();

    assert_eq!(config.max_objects, 5000);
    assert!(config.background);
    assert!(config.is_bounded());
    assert_eq!(config.collect_interval(), Duration::from_millis(250));
    assert_eq!(config.mark_batch, 64);
}

#[test]
fn test_json_round_trip_through_serde() {
    let config = GcConfig {
        max_objects: 10,
        ..GcConfig::default()
    };
    let json = serde_json::to_string(&config).unwrap();
    assert_eq!(GcConfig::from_json(&json).unwrap(), config);
}

#[test]
fn test_invalid_json_error_message() {
    let err = GcConfig::from_json("{ \"max_objects\": -1 }").unwrap_err();
    assert!(matches!(err, ConfigError::Json(_)));
    assert!(err.to_string().starts_with("invalid GC configuration"));
}

#[test]
fn test_heap_keeps_config() {
    let config = GcConfig {
        max_objects: 7,
        mark_batch: 1,
        ..GcConfig::default()
    };
    let heap = Heap::with_config(config.clone());
    assert_eq!(heap.config(), &config);

    // a batch of one still drains the whole graph
    let list = {
        let items: Vec<_> = (0..5).map(|i| heap.allocate_fixnum(i).unwrap()).collect();
        heap.allocate_list(&items[..1]).unwrap()
    };
    let stats = heap.collect_garbage();
    assert_eq!(stats.last_reclaimed, 4);
    assert_eq!(list.car().unwrap().fixnum().unwrap(), 0);
}
