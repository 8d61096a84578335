//! Choosing the lock granularity of an upsert.

use mtree_types::{DedupScope, LockRequest, Part, TableMetadata, UNBUCKETED};
use std::collections::BTreeSet;

/// Derives the dedup scope of a set of new parts and checks whether the
/// existing parts inside it agree with a bucket-level lock.
pub struct LockScopeResolver<'a> {
    table: &'a TableMetadata,
}

impl<'a> LockScopeResolver<'a> {
    pub fn new(table: &'a TableMetadata) -> Self {
        Self { table }
    }

    /// Scope covering every key `new_parts` can collide with.
    ///
    /// Bucket scope is chosen only when every new part was written under the
    /// table's current clustering and the cluster key is the unique key.
    /// `force_normal` falls back to partition or table scope.
    pub fn resolve_scope(&self, new_parts: &[Part], force_normal: bool) -> DedupScope {
        let table = self.table;
        let expected_hash = table.table_definition_hash();
        let bucket_level = !force_normal
            && table.cluster_by_same_as_unique_key()
            && new_parts.iter().all(|part| {
                part.bucket_number() != UNBUCKETED
                    && part.table_definition_hash == expected_hash
            });

        match (bucket_level, table.partition_level_unique_keys) {
            (true, true) => DedupScope::PartitionDedupWithBucket(
                new_parts
                    .iter()
                    .map(|p| (p.info.partition_id.clone(), p.bucket_number()))
                    .collect(),
            ),
            (true, false) => DedupScope::TableDedupWithBucket(
                new_parts.iter().map(Part::bucket_number).collect(),
            ),
            (false, true) => DedupScope::PartitionDedup(
                new_parts
                    .iter()
                    .map(|p| p.info.partition_id.clone())
                    .collect::<BTreeSet<_>>(),
            ),
            (false, false) => DedupScope::TableDedup,
        }
    }

    /// Whether existing parts are all bucketed under the current clustering.
    ///
    /// A part left behind by an older clustering may hold any key in any
    /// bucket, which makes a bucket lock too narrow.
    pub fn check_bucket_parts(&self, visible: &[Part], staged: &[Part]) -> bool {
        let expected_hash = self.table.table_definition_hash();
        let invalid = visible.iter().chain(staged).find(|part| {
            part.bucket_number() == UNBUCKETED || part.table_definition_hash != expected_hash
        });
        match invalid {
            Some(part) => {
                tracing::debug!(
                    part = %part.info,
                    bucket = part.bucket_number(),
                    "[LOCK] part does not match current bucket layout"
                );
                false
            }
            None => true,
        }
    }

    pub fn lock_requests(&self, scope: &DedupScope) -> Vec<LockRequest> {
        scope.lock_requests(self.table.table_id)
    }
}
