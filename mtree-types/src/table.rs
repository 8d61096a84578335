//! Table definition consumed by the write path.

use crate::ids::TableId;
use arrow::datatypes::SchemaRef;
use mtree_result::{Error, Result};
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

/// Name of the boolean column marking a row as a delete of its unique key.
pub const DELETE_FLAG_COLUMN_NAME: &str = "_delete_flag_";

/// How rows sharing a unique key are ordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionMode {
    /// Arrival order: the later row wins.
    Implicit,
    /// An unsigned integer column; `0` carries no version information.
    Column(String),
    /// The partition value itself (first partition column, as `UInt64`).
    PartitionValue,
}

/// Cluster key of a bucketed table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterByDefinition {
    pub columns: Vec<String>,
    pub total_buckets: u64,
    /// Bumped whenever the table is re-clustered, invalidating the bucket
    /// layout of parts written before.
    pub definition_version: u64,
}

/// The parts of a table definition the write path needs.
#[derive(Debug, Clone)]
pub struct TableMetadata {
    pub table_id: TableId,
    pub name: String,
    pub schema: SchemaRef,
    pub partition_by: Vec<String>,
    pub cluster_by: Option<ClusterByDefinition>,
    pub unique_key: Vec<String>,
    pub version: VersionMode,
    pub partition_level_unique_keys: bool,
    /// Columns rewritten by the dictionary encoder before a bucketed part is
    /// finalized.
    pub bucket_encoded_columns: Vec<String>,
}

impl TableMetadata {
    pub fn new(table_id: TableId, name: impl Into<String>, schema: SchemaRef) -> Self {
        Self {
            table_id,
            name: name.into(),
            schema,
            partition_by: Vec::new(),
            cluster_by: None,
            unique_key: Vec::new(),
            version: VersionMode::Implicit,
            partition_level_unique_keys: false,
            bucket_encoded_columns: Vec::new(),
        }
    }

    pub fn with_partition_by(mut self, columns: &[&str]) -> Self {
        self.partition_by = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_cluster_by(mut self, columns: &[&str], total_buckets: u64) -> Self {
        self.cluster_by = Some(ClusterByDefinition {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            total_buckets,
            definition_version: 0,
        });
        self
    }

    pub fn with_unique_key(mut self, columns: &[&str]) -> Self {
        self.unique_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_version(mut self, version: VersionMode) -> Self {
        self.version = version;
        self
    }

    pub fn with_partition_level_unique_keys(mut self, enabled: bool) -> Self {
        self.partition_level_unique_keys = enabled;
        self
    }

    pub fn with_bucket_encoded_columns(mut self, columns: &[&str]) -> Self {
        self.bucket_encoded_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Re-cluster the table: parts written under the previous definition no
    /// longer match [`TableMetadata::table_definition_hash`].
    pub fn recluster(mut self) -> Self {
        if let Some(cluster) = self.cluster_by.as_mut() {
            cluster.definition_version += 1;
        }
        self
    }

    #[inline]
    pub fn has_unique_key(&self) -> bool {
        !self.unique_key.is_empty()
    }

    #[inline]
    pub fn is_bucketed(&self) -> bool {
        self.cluster_by.is_some()
    }

    pub fn explicit_version_column(&self) -> Option<&str> {
        match &self.version {
            VersionMode::Column(name) => Some(name.as_str()),
            _ => None,
        }
    }

    #[inline]
    pub fn partition_value_as_version(&self) -> bool {
        matches!(self.version, VersionMode::PartitionValue)
    }

    /// Whether in-batch dedup must run on each partition sub-batch instead of
    /// on the whole batch.
    ///
    /// Partition-level keys only collide inside one partition. When versions
    /// come from the partition value they are unknown until the batch is
    /// split. Otherwise dedup runs first so the split cannot reorder rows of
    /// the same key.
    pub fn dedup_after_partitioning(&self) -> bool {
        self.partition_level_unique_keys || self.partition_value_as_version()
    }

    /// Bucket locks are only sound when buckets are derived from exactly the
    /// unique key, so one key always lands in one bucket.
    pub fn cluster_by_same_as_unique_key(&self) -> bool {
        match &self.cluster_by {
            Some(cluster) => self.has_unique_key() && cluster.columns == self.unique_key,
            None => false,
        }
    }

    /// Identity of the clustering definition; parts written under a different
    /// definition carry a different hash.
    pub fn table_definition_hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.table_id.hash(&mut hasher);
        if let Some(cluster) = &self.cluster_by {
            cluster.columns.hash(&mut hasher);
            cluster.total_buckets.hash(&mut hasher);
            cluster.definition_version.hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Index of `name` in the schema, or an argument error.
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.schema.index_of(name).map_err(|_| {
            Error::InvalidArgumentError(format!(
                "column '{}' not found in table '{}'",
                name, self.name
            ))
        })
    }
}
