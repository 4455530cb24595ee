//! End-to-end mirroring scenarios over the in-memory backend

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use objmirror_core::config::{Config, MirrorsSection, Resource, RuleSetSection};
use objmirror_core::event::{handle_event, Event};
use objmirror_core::notify::{MemNotifier, NotificationTarget};
use objmirror_core::storage::StorageRegistry;
use objmirror_core::{MirrorService, Request, Rule};

fn config_with_rules(rules: Vec<Rule>) -> Config {
    Config {
        mirrors: MirrorsSection::Rules(rules),
        meta_url: None,
        time_window_secs: None,
        source_scheme: None,
    }
}

async fn service_with_rules(
    storage: &Arc<StorageRegistry>,
    rules: Vec<Rule>,
) -> (MirrorService, Arc<MemNotifier>) {
    let notifier = Arc::new(MemNotifier::new());
    let service = MirrorService::new(&config_with_rules(rules), storage.clone(), notifier.clone())
        .await
        .unwrap();
    (service, notifier)
}

#[tokio::test]
async fn test_simple_mirror() {
    let storage = Arc::new(StorageRegistry::with_defaults());
    storage
        .upload("mem://src/a.txt", b"hello\n".to_vec())
        .await
        .unwrap();
    let (service, _) = service_with_rules(&storage, vec![Rule::simple("mem://src", "mem://dst")]).await;

    let response = service.mirror(Request::new("mem://src/a.txt")).await;

    assert_eq!(response.status, "ok");
    assert_eq!(response.file_size, 6);
    assert_eq!(response.destination_urls, vec!["mem://dst/a.txt"]);
    assert_eq!(
        storage.download("mem://dst/a.txt").await.unwrap(),
        b"hello\n"
    );
}

#[tokio::test]
async fn test_gzip_transform() {
    let storage = Arc::new(StorageRegistry::with_defaults());
    let payload = vec![0u8; 1024 * 1024];
    storage
        .upload("mem://src/big.bin", payload.clone())
        .await
        .unwrap();

    let mut rule = Rule::simple("mem://src", "mem://dst");
    rule.compression = objmirror_core::config::Compression::Gzip;
    let (service, _) = service_with_rules(&storage, vec![rule]).await;

    let response = service.mirror(Request::new("mem://src/big.bin")).await;
    assert_eq!(response.status, "ok");
    assert_eq!(response.file_size, payload.len() as u64);
    assert_eq!(response.destination_urls, vec!["mem://dst/big.bin.gz"]);

    let compressed = storage.download("mem://dst/big.bin.gz").await.unwrap();
    assert!(compressed.len() < payload.len());
    let mut decoder = flate2::read::GzDecoder::new(compressed.as_slice());
    let mut restored = Vec::new();
    decoder.read_to_end(&mut restored).unwrap();
    assert_eq!(restored, payload);
}

#[tokio::test]
async fn test_partition_by_line_count() {
    let storage = Arc::new(StorageRegistry::with_defaults());
    let source = b"L1\nL2\nL3\nL4\nL5\nL6\nL7\n".to_vec();
    storage
        .upload("mem://src/lines.txt", source.clone())
        .await
        .unwrap();

    let mut rule = Rule::simple("mem://src", "mem://dst");
    rule.destination_template = Some("mem://dst/out-$mod{3}.txt".to_string());
    rule.split = Some(objmirror_core::config::SplitConfig {
        lines: Some(3),
        bytes: None,
    });
    let (service, _) = service_with_rules(&storage, vec![rule]).await;

    let response = service.mirror(Request::new("mem://src/lines.txt")).await;
    assert_eq!(response.status, "ok");
    assert_eq!(response.destination_urls.len(), 3);

    let part0 = storage.download("mem://dst/out-000.txt").await.unwrap();
    let part1 = storage.download("mem://dst/out-001.txt").await.unwrap();
    let part2 = storage.download("mem://dst/out-002.txt").await.unwrap();
    assert_eq!(part0, b"L1\nL2\nL3\n");
    assert_eq!(part1, b"L4\nL5\nL6\n");
    assert_eq!(part2, b"L7\n");

    let mut joined = part0;
    joined.extend(part1);
    joined.extend(part2);
    assert_eq!(joined, source);
}

#[tokio::test]
async fn test_move_suppressed_on_partial_failure() {
    let storage = Arc::new(StorageRegistry::with_defaults());
    storage
        .upload("mem://src/keep.txt", b"precious\n".to_vec())
        .await
        .unwrap();

    // The second destination uses an unregistered scheme, so its write
    // fails while the first succeeds.
    let mut rule = Rule::simple("mem://src", "mem://dst1");
    rule.destinations = vec![Resource::new("gs://dst2")];
    rule.move_source = true;
    let (service, _) = service_with_rules(&storage, vec![rule]).await;

    let response = service.mirror(Request::new("mem://src/keep.txt")).await;

    assert_eq!(response.status, "error");
    assert!(response.error.as_deref().unwrap().contains("gs://dst2"));
    assert_eq!(response.destination_urls, vec!["mem://dst1/keep.txt"]);
    // Source survives: delete-after-copy requires every destination.
    assert!(storage.exists("mem://src/keep.txt").await.unwrap());
    assert!(storage.exists("mem://dst1/keep.txt").await.unwrap());
}

#[tokio::test]
async fn test_move_deletes_source_on_full_success() {
    let storage = Arc::new(StorageRegistry::with_defaults());
    storage
        .upload("mem://src/gone.txt", b"bye\n".to_vec())
        .await
        .unwrap();

    let mut rule = Rule::simple("mem://src", "mem://dst");
    rule.move_source = true;
    let (service, _) = service_with_rules(&storage, vec![rule]).await;

    let response = service.mirror(Request::new("mem://src/gone.txt")).await;

    assert_eq!(response.status, "ok");
    assert!(!storage.exists("mem://src/gone.txt").await.unwrap());
    assert!(storage.exists("mem://dst/gone.txt").await.unwrap());
    assert_eq!(
        response.moved.get("mem://src/gone.txt"),
        Some(&"mem://dst/gone.txt".to_string())
    );
}

#[tokio::test]
async fn test_hot_reload_routes_to_new_destination() {
    let storage = Arc::new(StorageRegistry::with_defaults());
    let rules_v1 = r#"[{"source": {"url": "mem://src"}, "destination": {"url": "mem://dst-a"}}]"#;
    storage
        .upload("mem://rules/mirror.json", rules_v1.as_bytes().to_vec())
        .await
        .unwrap();

    let config = Config {
        mirrors: MirrorsSection::Set(RuleSetSection {
            base_url: Some("mem://rules".to_string()),
            check_in_ms: 0,
            rules: Vec::new(),
        }),
        meta_url: None,
        time_window_secs: None,
        source_scheme: None,
    };
    let notifier = Arc::new(MemNotifier::new());
    let service = MirrorService::new(&config, storage.clone(), notifier)
        .await
        .unwrap();

    storage
        .upload("mem://src/one.txt", b"1".to_vec())
        .await
        .unwrap();
    let response = service.mirror(Request::new("mem://src/one.txt")).await;
    assert_eq!(response.destination_urls, vec!["mem://dst-a/one.txt"]);

    // Replace the rule file; the next event observes the change.
    let rules_v2 =
        r#"[{"source": {"url": "mem://src"}, "destination": {"url": "mem://dst-b-other"}}]"#;
    storage
        .upload("mem://rules/mirror.json", rules_v2.as_bytes().to_vec())
        .await
        .unwrap();

    storage
        .upload("mem://src/two.txt", b"2".to_vec())
        .await
        .unwrap();
    let response = service.mirror(Request::new("mem://src/two.txt")).await;
    assert_eq!(response.destination_urls, vec!["mem://dst-b-other/two.txt"]);
    assert!(storage.exists("mem://dst-b-other/two.txt").await.unwrap());
}

#[tokio::test]
async fn test_no_match_is_noop() {
    let storage = Arc::new(StorageRegistry::with_defaults());
    let (service, _) = service_with_rules(&storage, vec![Rule::simple("mem://src", "mem://dst")]).await;

    let response = service.mirror(Request::new("mem://elsewhere/a.txt")).await;
    assert_eq!(response.status, "noop");
    assert!(response.destination_urls.is_empty());
}

#[tokio::test]
async fn test_vanished_source_is_noop_with_not_found() {
    let storage = Arc::new(StorageRegistry::with_defaults());
    let (service, _) = service_with_rules(&storage, vec![Rule::simple("mem://src", "mem://dst")]).await;

    let response = service.mirror(Request::new("mem://src/ghost.txt")).await;
    assert_eq!(response.status, "noop");
    assert!(response.not_found_error.is_some());
}

#[tokio::test]
async fn test_checksum_skip_avoids_rewrite() {
    let storage = Arc::new(StorageRegistry::with_defaults());
    storage
        .upload("mem://src/same.txt", b"identical".to_vec())
        .await
        .unwrap();
    storage
        .upload("mem://dst/same.txt", b"identical".to_vec())
        .await
        .unwrap();

    let mut rule = Rule::simple("mem://src", "mem://dst");
    rule.checksum_skip = true;
    let (service, _) = service_with_rules(&storage, vec![rule]).await;

    let response = service.mirror(Request::new("mem://src/same.txt")).await;
    assert_eq!(response.status, "ok");
    assert!(response.checksum_skip);
    assert!(response.destination_urls.is_empty());
    assert_eq!(
        response.copied.get("mem://src/same.txt"),
        Some(&"mem://src/same.txt".to_string())
    );
}

#[tokio::test]
async fn test_notification_published_after_write() {
    let storage = Arc::new(StorageRegistry::with_defaults());
    storage
        .upload("mem://src/n.txt", b"notify\n".to_vec())
        .await
        .unwrap();

    let mut rule = Rule::simple("mem://src", "mem://dst");
    rule.name = Some("notifying".to_string());
    rule.notification = Some(NotificationTarget {
        target: "topic-objects".to_string(),
        attributes: HashMap::new(),
    });
    let (service, notifier) = service_with_rules(&storage, vec![rule]).await;

    let request = Request::new("mem://src/n.txt")
        .with_attributes(HashMap::from([("origin".to_string(), "test".to_string())]));
    let response = service.mirror(request).await;

    assert_eq!(response.status, "ok");
    assert_eq!(response.message_ids.len(), 1);
    let messages = notifier.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].target, "topic-objects");
    assert_eq!(messages[0].body["url"], "mem://src/n.txt");
    assert_eq!(messages[0].body["rule_id"], "notifying");
    assert_eq!(messages[0].attributes.get("origin"), Some(&"test".to_string()));
    assert_eq!(
        response.invoked.get("mem://src/n.txt"),
        Some(&messages[0].id)
    );
}

#[tokio::test]
async fn test_schema_violation_surfaces_as_schema_error() {
    let storage = Arc::new(StorageRegistry::with_defaults());
    storage
        .upload(
            "mem://src/bad.ndjson",
            b"{\"id\":\"not-a-number\"}\n".to_vec(),
        )
        .await
        .unwrap();

    let mut rule = Rule::simple("mem://src", "mem://dst");
    rule.codec = objmirror_core::config::RecordCodec::SchemaCoerce;
    rule.schema = Some(objmirror_core::config::Schema {
        fields: vec![objmirror_core::config::SchemaField {
            name: "id".to_string(),
            kind: objmirror_core::config::FieldKind::Integer,
        }],
    });
    let (service, _) = service_with_rules(&storage, vec![rule]).await;

    let response = service.mirror(Request::new("mem://src/bad.ndjson")).await;
    assert_eq!(response.status, "error");
    assert!(response.schema_error.is_some());
}

#[tokio::test]
async fn test_ndjson_to_csv_end_to_end() {
    let storage = Arc::new(StorageRegistry::with_defaults());
    storage
        .upload(
            "mem://src/events.ndjson",
            b"{\"id\":1,\"kind\":\"put\"}\n{\"id\":2,\"kind\":\"del\"}\n".to_vec(),
        )
        .await
        .unwrap();

    let mut rule = Rule::simple("mem://src", "mem://dst");
    rule.codec = objmirror_core::config::RecordCodec::NdjsonToCsv;
    let (service, _) = service_with_rules(&storage, vec![rule]).await;

    let response = service.mirror(Request::new("mem://src/events.ndjson")).await;
    assert_eq!(response.status, "ok");
    assert_eq!(response.destination_urls, vec!["mem://dst/events.csv"]);
    assert_eq!(
        storage.download("mem://dst/events.csv").await.unwrap(),
        b"id,kind\n1,put\n2,del\n"
    );
}

#[tokio::test]
async fn test_event_handler_wraps_response_errors() {
    let storage = Arc::new(StorageRegistry::with_defaults());
    storage
        .upload("mem://src/x.txt", b"x".to_vec())
        .await
        .unwrap();
    // A destination on an unregistered scheme makes the transfer fail.
    let (service, _) = service_with_rules(&storage, vec![Rule::simple("mem://src", "gs://dst")]).await;

    let err = handle_event(&service, Event::new("mem://src/x.txt"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("mem://src/x.txt"));

    // A clean mirror returns the response.
    let (service, _) = service_with_rules(&storage, vec![Rule::simple("mem://src", "mem://dst")]).await;
    let response = handle_event(&service, Event::new("mem://src/x.txt"))
        .await
        .unwrap();
    assert_eq!(response.status, "ok");
}

#[tokio::test]
async fn test_multiple_matching_rules_all_fire() {
    let storage = Arc::new(StorageRegistry::with_defaults());
    storage
        .upload("mem://src/multi.txt", b"fanout".to_vec())
        .await
        .unwrap();
    let (service, _) = service_with_rules(
        &storage,
        vec![
            Rule::simple("mem://src", "mem://dst-a"),
            Rule::simple("mem://src", "mem://dst-b"),
        ],
    )
    .await;

    let response = service.mirror(Request::new("mem://src/multi.txt")).await;
    assert_eq!(response.status, "ok");
    assert_eq!(response.total_rules, 2);
    let mut urls = response.destination_urls.clone();
    urls.sort();
    assert_eq!(urls, vec!["mem://dst-a/multi.txt", "mem://dst-b/multi.txt"]);
}

#[tokio::test]
async fn test_nested_source_path_preserved() {
    let storage = Arc::new(StorageRegistry::with_defaults());
    storage
        .upload("mem://src/incoming/2026/a.txt", b"deep".to_vec())
        .await
        .unwrap();
    let (service, _) =
        service_with_rules(&storage, vec![Rule::simple("mem://src", "mem://dst")]).await;

    let response = service
        .mirror(Request::new("mem://src/incoming/2026/a.txt"))
        .await;
    assert_eq!(
        response.destination_urls,
        vec!["mem://dst/incoming/2026/a.txt"]
    );
}
