use serde_json::{json, Map, Value};
use simflow_core::ids::{ItemId, ItemType};
use simflow_core::status::EntityStatus;
use simflow_model::JobRecord;
use simflow_platform::{matches_filter, JsonMetadataOperations};

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

fn record(item_type: ItemType, parent: Option<ItemId>, tags: &[(&str, &str)]) -> JobRecord {
    let mut record = JobRecord::new(ItemId::new(), item_type);
    record.parent_id = parent;
    record.name = format!("{item_type}-record");
    record.tags = tags
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    record
}

#[test]
fn dump_then_load_returns_the_record() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let store = JsonMetadataOperations::new(dir.path(), None);
    let entity_dir = dir.path().join("s_suite");
    let mut original = record(ItemType::Suite, None, &[("owner", "lab")]);
    original.status = EntityStatus::Running;
    original.directory = Some(entity_dir.display().to_string());
    original.extra.insert("custom".to_string(), json!({"k": [1, 2]}));

    store.dump(&entity_dir, &original).expect("dump");
    let loaded = store.load(&entity_dir).expect("load");
    assert_eq!(loaded, original);
}

#[test]
fn replace_keeps_system_fields_and_merge_keeps_user_fields() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let store = JsonMetadataOperations::new(dir.path(), None);
    let entity_dir = dir.path().join("s_suite");
    let original = record(ItemType::Suite, None, &[("a", "1")]);
    store.dump(&entity_dir, &original).expect("dump");

    store
        .update(&entity_dir, object(json!({"note": "first"})), false)
        .expect("merge");
    let merged = store.load_value(&entity_dir).expect("load merged");
    assert_eq!(merged["note"], json!("first"));
    assert_eq!(merged["tags"], json!({"a": "1"}));

    store
        .update(&entity_dir, object(json!({"note": "second"})), true)
        .expect("replace");
    let replaced = object(store.load_value(&entity_dir).expect("load replaced"));
    assert_eq!(replaced["note"], json!("second"));
    assert_eq!(replaced["id"], json!(original.id.to_string()));
    assert_eq!(replaced["item_type"], json!("suite"));
    assert!(!replaced.contains_key("tags"));
    assert!(!replaced.contains_key("name"));

    store.clear(&entity_dir).expect("clear");
    let cleared = object(store.load_value(&entity_dir).expect("load cleared"));
    assert!(!cleared.contains_key("note"));
    assert!(cleared.contains_key("id"));
    let reloaded = store.load(&entity_dir).expect("cleared record still parses");
    assert_eq!(reloaded.id, original.id);
}

#[test]
fn get_all_and_filter_walk_the_layout() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let store = JsonMetadataOperations::new(dir.path(), None);
    let suite = record(ItemType::Suite, None, &[]);
    let suite_dir = dir.path().join("s_one");
    store.dump(&suite_dir, &suite).expect("suite");
    let experiment = record(ItemType::Experiment, Some(suite.id), &[]);
    let experiment_dir = suite_dir.join("e_one");
    store.dump(&experiment_dir, &experiment).expect("experiment");

    let mut sims = Vec::new();
    for (index, tags) in [
        vec![("a", "0"), ("kind", "x")],
        vec![("a", "1")],
        vec![("a", "2"), ("kind", "x")],
    ]
    .iter()
    .enumerate()
    {
        let sim = record(ItemType::Simulation, Some(experiment.id), tags);
        store
            .dump(&experiment_dir.join(format!("sim{index}")), &sim)
            .expect("simulation");
        sims.push(sim);
    }

    assert_eq!(store.get_all(ItemType::Suite).expect("suites").len(), 1);
    assert_eq!(store.get_all(ItemType::Experiment).expect("experiments").len(), 1);
    assert_eq!(store.get_all(ItemType::Simulation).expect("sims").len(), 3);
    assert_eq!(
        store
            .get_children(&experiment_dir, ItemType::Simulation)
            .expect("children")
            .len(),
        3
    );

    let by_parent = store
        .filter(
            ItemType::Simulation,
            &object(json!({"parent_id": experiment.id.to_string()})),
            &object(json!({"kind": "x"})),
            None,
            true,
        )
        .expect("filter");
    assert_eq!(by_parent.len(), 2);

    let key_exists = store
        .filter(ItemType::Simulation, &Map::new(), &object(json!({"kind": null})), None, true)
        .expect("filter key exists");
    assert_eq!(key_exists.len(), 2);

    let explicit_null = store
        .filter(ItemType::Simulation, &Map::new(), &object(json!({"kind": null})), None, false)
        .expect("filter explicit null");
    assert!(explicit_null.is_empty());

    let by_id = store
        .filter(
            ItemType::Simulation,
            &object(json!({"id": sims[1].id.to_string()})),
            &Map::new(),
            None,
            true,
        )
        .expect("filter by id");
    assert_eq!(by_id.len(), 1);
    assert_eq!(by_id[0]["tags"]["a"], json!("1"));
}

#[test]
fn null_filters_distinguish_missing_and_null() {
    let document = object(json!({"platform_id": null, "name": "n"}));
    assert!(matches_filter(&document, &object(json!({"platform_id": null})), true));
    assert!(matches_filter(&document, &object(json!({"platform_id": null})), false));
    assert!(matches_filter(&document, &object(json!({"name": null})), true));
    assert!(!matches_filter(&document, &object(json!({"name": null})), false));
    assert!(!matches_filter(&document, &object(json!({"missing": null})), true));
    assert!(matches_filter(&document, &Map::new(), false));
}

#[test]
fn long_paths_fail_before_any_write() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let limit = dir.path().as_os_str().len() + 12;
    let store = JsonMetadataOperations::new(dir.path(), Some(limit));
    let entity_dir = dir.path().join("a-directory-name-well-past-the-limit");
    let err = store
        .dump(&entity_dir, &record(ItemType::Suite, None, &[]))
        .expect_err("too long");
    assert_eq!(err.kind(), "PathTooLong");
    assert_eq!(err.info().context.get("limit"), Some(&limit.to_string()));
    assert!(!entity_dir.exists());
}
