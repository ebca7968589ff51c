//! Catalog Module Tests
//!
//! ## Test Scopes
//! - **Loading**: valid v1 and v2 descriptions, version detection, defaults.
//! - **Validation**: exhaustive error collection with field paths.
//! - **Derived views**: local slices, node lists, replica host rewrites.
//! - **Store**: snapshot swaps, persistence and reload.

#[cfg(test)]
mod tests {
    use crate::catalog::*;
    use serde_json::{Value, json};
    use std::path::PathBuf;

    fn v1_catalog() -> Value {
        json!({
            "effective_date": "2013-09-29T00:00:00Z",
            "farms": {
                "localhost:23003/test": { "device": "." },
                "localhost:23004/test": { "device": "/var/lib/node" }
            },
            "zones": ["localhost:23003/test", ["localhost:23004/test"]],
            "datasets": {
                "Default": {
                    "workers": 2,
                    "number_of_partitions": 2,
                    "number_of_replicas": 2,
                    "date_range": "infinity",
                    "partition_key": "_key",
                    "plugins": ["groonga", "crud"],
                    "ring": {
                        "localhost:23041": {
                            "weight": 50,
                            "partitions": {
                                "2013-09-30": ["localhost:23003/test.001"],
                                "2013-09-29": ["localhost:23003/test.000", "localhost:23004/test.000"]
                            }
                        },
                        "localhost:23042": {
                            "weight": 50,
                            "partitions": {
                                "2013-09-29": ["localhost:23004/test.002"]
                            }
                        }
                    }
                }
            }
        })
    }

    fn v2_catalog() -> Value {
        json!({
            "version": 2,
            "effectiveDate": "2014-02-28T00:00:00Z",
            "datasets": {
                "Default": {
                    "nWorkers": 4,
                    "plugins": ["groonga", "crud", "search"],
                    "replicas": [
                        {
                            "dimension": "_key",
                            "slices": [
                                { "label": "slice000", "weight": 50, "volume": { "address": "h1:10031/droonga.000" } },
                                { "label": "slice001", "weight": 50, "volume": { "address": "h1:10031/droonga.001" } }
                            ]
                        }
                    ]
                }
            }
        })
    }

    // ============================================================
    // TEST 1: Loading valid catalogs
    // ============================================================

    #[test]
    fn test_load_v1_catalog() {
        let model = load(&v1_catalog()).expect("valid v1 catalog");

        assert_eq!(model.version(), CatalogVersion::V1);
        assert_eq!(model.farms().len(), 2);

        let dataset = model.dataset("Default").expect("dataset");
        assert_eq!(dataset.workers, 2);
        assert_eq!(dataset.partition_key(), "_key");
        assert_eq!(dataset.replica_count(), 2);
        assert_eq!(dataset.hosts, vec!["localhost".to_string()]);

        let DatasetLayout::Ring(ring) = &dataset.layout else {
            panic!("v1 datasets use a ring layout");
        };
        // Range keys are sorted regardless of declaration order
        let ranges: Vec<&str> = ring.members[0]
            .partitions
            .iter()
            .map(|partition| partition.range.as_str())
            .collect();
        assert_eq!(ranges, vec!["2013-09-29", "2013-09-30"]);
        assert!(ring.continuum.is_some());
    }

    #[test]
    fn test_load_v2_catalog_with_defaults() {
        let mut raw = v2_catalog();
        raw["datasets"]["Default"]["replicas"][0]
            .as_object_mut()
            .unwrap()
            .remove("dimension");
        let slices = raw["datasets"]["Default"]["replicas"][0]["slices"]
            .as_array_mut()
            .unwrap();
        slices[1].as_object_mut().unwrap().remove("label");
        slices[1].as_object_mut().unwrap().remove("weight");

        let model = load(&raw).expect("valid v2 catalog");
        assert_eq!(model.version(), CatalogVersion::V2);

        let dataset = model.dataset("Default").unwrap();
        assert_eq!(dataset.workers, 4);
        let DatasetLayout::Replicas(replicas) = &dataset.layout else {
            panic!("v2 datasets use a replica layout");
        };
        assert_eq!(replicas[0].dimension, "_key");
        assert_eq!(replicas[0].slices[1].label, "slice001");
        assert_eq!(replicas[0].slices[1].weight, 1.0);
    }

    #[test]
    fn test_detect_version() {
        assert_eq!(detect_version(&v1_catalog()).unwrap(), CatalogVersion::V1);
        assert_eq!(detect_version(&v2_catalog()).unwrap(), CatalogVersion::V2);
        assert_eq!(
            detect_version(&json!({"version": 1})).unwrap(),
            CatalogVersion::V1
        );

        let error = detect_version(&json!({"version": 3})).unwrap_err();
        assert!(matches!(
            error.validation_errors(),
            [ValidationError::UnsupportedValue { .. }]
        ));

        let error = detect_version(&json!([])).unwrap_err();
        assert_eq!(error.validation_errors()[0].path(), "$");
    }

    #[test]
    fn test_single_partition_dataset_has_no_continuum() {
        let mut raw = v1_catalog();
        raw["datasets"]["Default"]["number_of_partitions"] = json!(1);

        let model = load(&raw).unwrap();
        let DatasetLayout::Ring(ring) = &model.dataset("Default").unwrap().layout else {
            panic!("ring layout expected");
        };
        assert!(ring.continuum.is_none());
        assert_eq!(ring.member_for("anything").unwrap().name, "localhost:23041");
    }

    // ============================================================
    // TEST 2: Exhaustive validation
    // ============================================================

    #[test]
    fn test_three_defects_yield_three_errors() {
        let mut raw = v1_catalog();
        raw.as_object_mut().unwrap().remove("effective_date");
        raw["datasets"]["Default"]["workers"] = json!(-1);
        raw["zones"] = json!([
            "localhost:23003/test",
            "localhost:23004/test",
            "localhost:29999/unknown"
        ]);

        let error = load(&raw).unwrap_err();
        let errors = error.validation_errors();

        assert_eq!(errors.len(), 3, "errors: {:?}", errors);
        assert!(errors.contains(&ValidationError::MissingRequiredParameter {
            path: "effective_date".to_string()
        }));
        assert!(errors.contains(&ValidationError::NegativeNumber {
            path: "datasets.Default.workers".to_string(),
            value: -1.0
        }));
        assert!(errors.contains(&ValidationError::UnknownFarmInZones {
            farm: "localhost:29999/unknown".to_string()
        }));
    }

    #[test]
    fn test_type_and_range_errors_carry_paths() {
        let mut raw = v1_catalog();
        raw["effective_date"] = json!("not a date");
        raw["datasets"]["Default"]["number_of_partitions"] = json!(0);
        raw["datasets"]["Default"]["partition_key"] = json!("_id");
        raw["datasets"]["Default"]["ring"]["localhost:23042"]["weight"] = json!("heavy");

        let error = load(&raw).unwrap_err();
        let paths: Vec<&str> = error.validation_errors().iter().map(|e| e.path()).collect();

        assert!(paths.contains(&"effective_date"));
        assert!(paths.contains(&"datasets.Default.number_of_partitions"));
        assert!(paths.contains(&"datasets.Default.partition_key"));
        assert!(paths.contains(&"datasets.Default.ring.localhost:23042.weight"));
        assert_eq!(paths.len(), 4);
    }

    #[test]
    fn test_partition_address_cross_references() {
        let mut raw = v1_catalog();
        raw["datasets"]["Default"]["ring"]["localhost:23042"]["partitions"]["2013-09-29"] =
            json!(["localhost:29999/test.000", "localhost:23004/test."]);

        let error = load(&raw).unwrap_err();
        let errors = error.validation_errors();

        assert_eq!(errors.len(), 2, "errors: {:?}", errors);
        assert!(matches!(
            &errors[0],
            ValidationError::UnknownFarmForPartition { address, .. } if address == "localhost:29999/test.000"
        ));
        assert!(matches!(
            &errors[1],
            ValidationError::MissingDatabaseName { address, .. } if address == "localhost:23004/test."
        ));
    }

    #[test]
    fn test_broken_farm_entry_is_still_a_declared_farm() {
        let mut raw = v1_catalog();
        // Zoned and referenced by both ring members, but has no device
        raw["farms"]["localhost:23004/test"] = json!({});

        let error = load(&raw).unwrap_err();
        let errors = error.validation_errors();

        assert_eq!(
            errors,
            &[ValidationError::MissingRequiredParameter {
                path: "farms.localhost:23004/test.device".to_string()
            }],
            "errors: {:?}",
            errors
        );
    }

    #[test]
    fn test_non_object_farm_entry_reports_one_error() {
        let mut raw = v1_catalog();
        raw["farms"]["localhost:23004/test"] = json!("disk");

        let error = load(&raw).unwrap_err();

        assert_eq!(error.validation_errors().len(), 1);
        assert_eq!(error.validation_errors()[0].path(), "farms.localhost:23004/test");
    }

    #[test]
    fn test_unzoned_farm_is_reported() {
        let mut raw = v1_catalog();
        raw["zones"] = json!(["localhost:23003/test"]);

        let error = load(&raw).unwrap_err();
        assert_eq!(
            error.validation_errors(),
            &[ValidationError::FarmNotZoned {
                farm: "localhost:23004/test".to_string()
            }]
        );
    }

    #[test]
    fn test_v2_validation_errors() {
        let mut raw = v2_catalog();
        raw["datasets"]["Default"]["nWorkers"] = json!(-2);
        raw["datasets"]["Default"]["replicas"][0]["slices"][0]["volume"] = json!({});
        raw["datasets"]["Default"]["replicas"][0]["slices"][1]["volume"]["address"] =
            json!("h1:10031/droonga");

        let error = load(&raw).unwrap_err();
        let paths: Vec<&str> = error.validation_errors().iter().map(|e| e.path()).collect();

        assert_eq!(
            paths,
            vec![
                "datasets.Default.nWorkers",
                "datasets.Default.replicas[0].slices[0].volume.address",
                "datasets.Default.replicas[0].slices[1].volume.address",
            ]
        );
    }

    #[test]
    fn test_zero_total_weight_is_rejected() {
        let mut raw = v2_catalog();
        raw["datasets"]["Default"]["replicas"][0]["slices"][0]["weight"] = json!(0);
        raw["datasets"]["Default"]["replicas"][0]["slices"][1]["weight"] = json!(0);

        let error = load(&raw).unwrap_err();
        assert!(matches!(
            error.validation_errors(),
            [ValidationError::ZeroTotalWeight { .. }]
        ));
    }

    #[test]
    fn test_validation_error_message_lists_every_problem() {
        let error = load(&json!({"farms": {}, "zones": [], "datasets": {}})).unwrap_err();
        let message = error.to_string();

        assert!(message.contains("1 problems"));
        assert!(message.contains("effective_date"));
    }

    // ============================================================
    // TEST 3: Derived views
    // ============================================================

    #[test]
    fn test_all_nodes_sorted_and_unique() {
        let v1 = load(&v1_catalog()).unwrap();
        assert_eq!(
            v1.all_nodes(),
            vec!["localhost:23003/test".to_string(), "localhost:23004/test".to_string()]
        );

        let v2 = load(&v2_catalog()).unwrap();
        assert_eq!(v2.all_nodes(), vec!["h1:10031/droonga".to_string()]);
    }

    #[test]
    fn test_slices_for_farm() {
        let model = loader::load_with_base(&v1_catalog(), Some(PathBuf::from("/etc/cluster"))).unwrap();

        let local = model.slices_for("localhost:23004/test");
        let databases: Vec<PathBuf> = local.iter().map(|slice| slice.database.clone()).collect();
        assert_eq!(
            databases,
            vec![
                PathBuf::from("/var/lib/node/000/db"),
                PathBuf::from("/var/lib/node/002/db"),
            ]
        );
        assert!(local.iter().all(|slice| slice.dataset == "Default"));

        let relative = model.slices_for("localhost:23003/test");
        assert_eq!(relative[0].database, PathBuf::from("/etc/cluster/./000/db"));

        assert!(model.slices_for("unknown:1/x").is_empty());
    }

    #[test]
    fn test_dataset_for_host() {
        let model = load(&v2_catalog()).unwrap();
        assert_eq!(model.dataset_for_host("h1").unwrap().name, "Default");
        assert!(model.dataset_for_host("h9").is_none());
    }

    #[test]
    fn test_address_helpers() {
        assert_eq!(address_host("h1:10031/droonga.000"), "h1");
        assert_eq!(
            replace_address_host("h1:10031/droonga.000", "h2"),
            "h2:10031/droonga.000"
        );
        assert_eq!(
            split_address("h1:10031/droonga.000"),
            ("h1:10031/droonga", "000")
        );
        assert_eq!(split_address("h1:10031/droonga"), ("h1:10031/droonga", ""));
    }

    #[test]
    fn test_with_replica_hosts_rewrites_replicas() {
        let model = load(&v2_catalog()).unwrap();

        let updated = model
            .with_replica_hosts("Default", &["h1".to_string(), "h2".to_string(), "h2".to_string()])
            .unwrap();

        let dataset = updated.dataset("Default").unwrap();
        assert_eq!(dataset.hosts, vec!["h1".to_string(), "h2".to_string()]);
        assert_eq!(dataset.replica_count(), 2);
        assert_eq!(
            dataset.addresses(),
            vec![
                "h1:10031/droonga.000",
                "h1:10031/droonga.001",
                "h2:10031/droonga.000",
                "h2:10031/droonga.001",
            ]
        );

        // The original snapshot is untouched
        assert_eq!(model.dataset("Default").unwrap().hosts, vec!["h1".to_string()]);
    }

    #[test]
    fn test_with_replica_hosts_rejects_v1_and_unknown_dataset() {
        let v1 = load(&v1_catalog()).unwrap();
        assert!(matches!(
            v1.with_replica_hosts("Default", &["h1".to_string()]),
            Err(CatalogError::Unsupported(_))
        ));

        let v2 = load(&v2_catalog()).unwrap();
        assert!(matches!(
            v2.with_replica_hosts("Missing", &["h1".to_string()]),
            Err(CatalogError::UnknownDataset(_))
        ));
    }

    #[test]
    fn test_reserialized_catalog_loads_identically() {
        let model = load(&v1_catalog()).unwrap();
        let text = serde_json::to_string(model.to_json()).unwrap();
        let reloaded = load(&serde_json::from_str(&text).unwrap()).unwrap();

        let before = model.dataset("Default").unwrap();
        let after = reloaded.dataset("Default").unwrap();
        assert_eq!(before.addresses(), after.addresses());
        assert_eq!(model.effective_date(), reloaded.effective_date());
    }

    // ============================================================
    // TEST 4: CatalogStore
    // ============================================================

    #[tokio::test]
    async fn test_store_swaps_snapshots() {
        let store = CatalogStore::new(load(&v2_catalog()).unwrap());
        let before = store.current();
        let mut updates = store.subscribe();

        store
            .modify(|current| current.with_replica_hosts("Default", &["h3".to_string()]))
            .unwrap();

        assert!(updates.has_changed().unwrap());
        assert_eq!(store.current().dataset("Default").unwrap().hosts, vec!["h3".to_string()]);
        // Readers holding the old snapshot keep their view
        assert_eq!(before.dataset("Default").unwrap().hosts, vec!["h1".to_string()]);
    }

    #[tokio::test]
    async fn test_store_failed_modify_keeps_current() {
        let store = CatalogStore::new(load(&v2_catalog()).unwrap());
        let mut updates = store.subscribe();

        let result = store.modify(|current| current.with_replica_hosts("Missing", &[]));

        assert!(result.is_err());
        assert!(!updates.has_changed().unwrap());
        assert_eq!(store.current().dataset("Default").unwrap().hosts, vec!["h1".to_string()]);
    }

    #[tokio::test]
    async fn test_store_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, serde_json::to_string_pretty(&v2_catalog()).unwrap()).unwrap();

        let store = CatalogStore::open(&path).unwrap();
        store
            .modify(|current| {
                current.with_replica_hosts("Default", &["h1".to_string(), "h2".to_string()])
            })
            .unwrap();

        let on_disk = load_file(&path).unwrap();
        assert_eq!(
            on_disk.dataset("Default").unwrap().hosts,
            vec!["h1".to_string(), "h2".to_string()]
        );

        // A broken file on disk does not replace the current snapshot
        std::fs::write(&path, "{ not json").unwrap();
        assert!(store.reload().is_err());
        assert_eq!(store.current().dataset("Default").unwrap().replica_count(), 2);

        std::fs::write(&path, serde_json::to_string(&v2_catalog()).unwrap()).unwrap();
        let reloaded = store.reload().unwrap();
        assert_eq!(reloaded.dataset("Default").unwrap().replica_count(), 1);
    }

    #[test]
    fn test_load_file_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_file(&dir.path().join("missing.json"));
        assert!(matches!(result, Err(CatalogError::Io { .. })));
    }
}
