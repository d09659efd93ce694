//! Selection of the dumps a table still needs
//!
//! The planner decides *which* dumps to process; the order of files within a
//! dump is left to [`FileOrderer`](super::FileOrderer).

use super::checkpoint::Checkpoint;
use super::index::ManifestIndex;
use crate::config::ReplicationMethod;

/// A dump selected for processing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedDump {
    /// Dump identifier
    pub dump_id: i64,
    /// Data files of the table in this dump, in manifest order
    pub files: Vec<String>,
}

/// Dumps to process for one table, ascending by dump id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// Selected dumps
    pub dumps: Vec<PlannedDump>,
}

impl SyncPlan {
    /// Whether nothing needs to be synced
    pub fn is_empty(&self) -> bool {
        self.dumps.is_empty()
    }

    /// Selected dump ids
    pub fn dump_ids(&self) -> Vec<i64> {
        self.dumps.iter().map(|d| d.dump_id).collect()
    }

    /// Total number of files across the plan
    pub fn file_count(&self) -> usize {
        self.dumps.iter().map(|d| d.files.len()).sum()
    }
}

/// Plans which dumps of a table to sync
pub struct SyncPlanner;

impl SyncPlanner {
    /// Select the dumps containing `table` with `dump_id >= checkpoint.sync_id`.
    ///
    /// The boundary is inclusive so a partially processed dump is visited
    /// again; its finished files are then skipped by modification time.
    /// Full-table replication keeps only the newest qualifying dump.
    pub fn plan(
        index: &ManifestIndex,
        table: &str,
        checkpoint: &Checkpoint,
        method: ReplicationMethod,
    ) -> SyncPlan {
        let mut dumps: Vec<PlannedDump> = index
            .dumps_with_table(table)
            .filter(|(dump_id, _)| *dump_id >= checkpoint.sync_id)
            .map(|(dump_id, manifest)| PlannedDump {
                dump_id,
                files: manifest.files.clone(),
            })
            .collect();

        if method == ReplicationMethod::FullTable {
            dumps = dumps.pop().into_iter().collect();
        }

        tracing::debug!(
            table,
            sync_id = checkpoint.sync_id,
            method = method.as_str(),
            dumps = ?dumps.iter().map(|d| d.dump_id).collect::<Vec<_>>(),
            "Planned sync"
        );

        SyncPlan { dumps }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::manifest::{Manifest, TableManifest};
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn index_of(entries: &[(i64, &str)]) -> ManifestIndex {
        let mut dumps: BTreeMap<i64, Vec<&str>> = BTreeMap::new();
        for (dump_id, table) in entries {
            dumps.entry(*dump_id).or_default().push(*table);
        }
        ManifestIndex::from_manifests(dumps.into_iter().map(|(dump_id, tables)| Manifest {
            dump_id,
            tables: tables
                .into_iter()
                .map(|name| {
                    (
                        name.to_string(),
                        TableManifest {
                            name: name.to_string(),
                            columns: Default::default(),
                            files: vec![format!("s3://b/sync_{}/{}/part-00000-x.avro", dump_id, name)],
                            incremental: None,
                        },
                    )
                })
                .collect(),
        }))
    }

    #[test]
    fn test_first_run_selects_single_dump() {
        let raw = r#"{"dump_id": 100, "tables": {"orders": {
            "files": ["s3://b/sync_100/orders/part-00000-x.avro"], "columns": ["id"]}}}"#;
        let manifest = Manifest::from_slice("m.json", raw.as_bytes()).unwrap();
        let index = ManifestIndex::from_manifests(vec![manifest]);

        let plan = SyncPlanner::plan(
            &index,
            "orders",
            &Checkpoint::start(),
            ReplicationMethod::Incremental,
        );
        assert_eq!(
            plan.dumps,
            vec![PlannedDump {
                dump_id: 100,
                files: vec!["s3://b/sync_100/orders/part-00000-x.avro".to_string()],
            }]
        );
    }

    #[test]
    fn test_full_table_keeps_latest_dump() {
        let index = index_of(&[(50, "orders"), (100, "orders")]);
        let plan = SyncPlanner::plan(
            &index,
            "orders",
            &Checkpoint::start(),
            ReplicationMethod::FullTable,
        );
        assert_eq!(plan.dump_ids(), vec![100]);
    }

    #[test]
    fn test_checkpoint_boundary_is_inclusive() {
        let index = index_of(&[(99, "orders"), (100, "orders"), (101, "orders")]);
        let plan = SyncPlanner::plan(
            &index,
            "orders",
            &Checkpoint::new(100, None),
            ReplicationMethod::Incremental,
        );
        assert_eq!(plan.dump_ids(), vec![100, 101]);
        assert_eq!(plan.file_count(), 2);
    }

    #[test]
    fn test_absent_table_contributes_nothing() {
        let index = index_of(&[(1, "users"), (2, "sessions"), (3, "users")]);
        let plan = SyncPlanner::plan(
            &index,
            "users",
            &Checkpoint::start(),
            ReplicationMethod::Incremental,
        );
        assert_eq!(plan.dump_ids(), vec![1, 3]);

        let none = SyncPlanner::plan(
            &index,
            "pageviews",
            &Checkpoint::start(),
            ReplicationMethod::FullTable,
        );
        assert!(none.is_empty());
    }

    proptest! {
        #[test]
        fn prop_plan_respects_checkpoint(
            ids in proptest::collection::btree_set(0i64..500, 0..30),
            sync_id in 0i64..500,
            full_table in any::<bool>(),
        ) {
            let dumps: Vec<(i64, &str)> = ids.iter().map(|id| (*id, "t")).collect();
            let index = index_of(&dumps);
            let method = if full_table { ReplicationMethod::FullTable } else { ReplicationMethod::Incremental };
            let plan = SyncPlanner::plan(&index, "t", &Checkpoint::new(sync_id, None), method);
            let planned = plan.dump_ids();

            prop_assert!(planned.iter().all(|id| *id >= sync_id));
            prop_assert!(planned.windows(2).all(|w| w[0] < w[1]));

            let qualifying: Vec<i64> = ids.iter().copied().filter(|id| *id >= sync_id).collect();
            if full_table {
                prop_assert!(planned.len() <= 1);
                prop_assert_eq!(planned.first().copied(), qualifying.last().copied());
            } else {
                prop_assert_eq!(planned, qualifying);
            }
        }
    }
}
