//! Registry of every table file across all known dumps

use super::manifest::{Manifest, TableManifest};
use std::collections::BTreeMap;

/// Internal metadata table present in every dump; never a data table
pub const EVENT_METADATA_TABLE: &str = "_event_metadata";

/// `dump_id -> table_name -> TableManifest`
///
/// Built once per run and read-only afterwards. When two manifests declare
/// the same dump id, the one merged last wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestIndex {
    dumps: BTreeMap<i64, BTreeMap<String, TableManifest>>,
}

impl ManifestIndex {
    /// Fold manifests into an index
    pub fn from_manifests<I>(manifests: I) -> Self
    where
        I: IntoIterator<Item = Manifest>,
    {
        let dumps = manifests
            .into_iter()
            .map(|manifest| {
                let tables = manifest
                    .tables
                    .into_iter()
                    .filter(|(name, _)| name != EVENT_METADATA_TABLE)
                    .collect();
                (manifest.dump_id, tables)
            })
            .collect();
        Self { dumps }
    }

    /// Number of dumps
    pub fn len(&self) -> usize {
        self.dumps.len()
    }

    /// Whether no dump is known
    pub fn is_empty(&self) -> bool {
        self.dumps.is_empty()
    }

    /// All dump ids, ascending
    pub fn dump_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.dumps.keys().copied()
    }

    /// Tables of one dump
    pub fn tables(&self, dump_id: i64) -> Option<&BTreeMap<String, TableManifest>> {
        self.dumps.get(&dump_id)
    }

    /// One table in one dump
    pub fn table(&self, dump_id: i64, table: &str) -> Option<&TableManifest> {
        self.dumps.get(&dump_id).and_then(|tables| tables.get(table))
    }

    /// Every dump containing `table`, ascending by dump id
    pub fn dumps_with_table<'a>(
        &'a self,
        table: &'a str,
    ) -> impl Iterator<Item = (i64, &'a TableManifest)> + 'a {
        self.dumps
            .iter()
            .filter_map(move |(dump_id, tables)| tables.get(table).map(|t| (*dump_id, t)))
    }

    /// The dump whose column lists describe the schema of each table
    pub fn sample_dump(&self) -> Option<(i64, &BTreeMap<String, TableManifest>)> {
        self.dumps.iter().next().map(|(id, tables)| (*id, tables))
    }
}
