//! Dedup scopes and the lock requests derived from them.

use crate::ids::{BucketNumber, TableId};
use crate::part::PartInfo;
use std::collections::BTreeSet;
use std::fmt;

/// Granularity at which an upsert locks and deduplicates.
///
/// The scope fixes both which locks are taken and which existing parts take
/// part in cross-part dedup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupScope {
    /// Unique keys are table-wide; lock the whole table.
    TableDedup,
    /// Unique keys are partition-local; lock each written partition.
    PartitionDedup(BTreeSet<String>),
    /// Table-wide unique keys clustered by the key; lock each written bucket.
    TableDedupWithBucket(BTreeSet<BucketNumber>),
    /// Partition-local unique keys clustered by the key; lock each
    /// `(partition, bucket)` pair.
    PartitionDedupWithBucket(BTreeSet<(String, BucketNumber)>),
}

impl DedupScope {
    #[inline]
    pub fn is_bucket_lock(&self) -> bool {
        matches!(
            self,
            DedupScope::TableDedupWithBucket(_) | DedupScope::PartitionDedupWithBucket(_)
        )
    }

    /// Whether an existing part falls inside this scope and must therefore
    /// participate in dedup.
    pub fn contains(&self, part: &PartInfo) -> bool {
        match self {
            DedupScope::TableDedup => true,
            DedupScope::PartitionDedup(partitions) => partitions.contains(&part.partition_id),
            DedupScope::TableDedupWithBucket(buckets) => buckets.contains(&part.bucket_number),
            DedupScope::PartitionDedupWithBucket(pairs) => {
                pairs.contains(&(part.partition_id.clone(), part.bucket_number))
            }
        }
    }

    /// Concrete lock requests for this scope on `table_id`.
    pub fn lock_requests(&self, table_id: TableId) -> Vec<LockRequest> {
        match self {
            DedupScope::TableDedup => vec![LockRequest::table(table_id)],
            DedupScope::PartitionDedup(partitions) => partitions
                .iter()
                .map(|p| LockRequest::partition(table_id, p.clone()))
                .collect(),
            DedupScope::TableDedupWithBucket(buckets) => buckets
                .iter()
                .map(|b| LockRequest::bucket(table_id, *b))
                .collect(),
            DedupScope::PartitionDedupWithBucket(pairs) => pairs
                .iter()
                .map(|(p, b)| LockRequest::partition_bucket(table_id, p.clone(), *b))
                .collect(),
        }
    }
}

impl fmt::Display for DedupScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DedupScope::TableDedup => write!(f, "TableDedup"),
            DedupScope::PartitionDedup(p) => write!(f, "PartitionDedup({p:?})"),
            DedupScope::TableDedupWithBucket(b) => write!(f, "TableDedupWithBucket({b:?})"),
            DedupScope::PartitionDedupWithBucket(pb) => {
                write!(f, "PartitionDedupWithBucket({pb:?})")
            }
        }
    }
}

/// One distributed lock to acquire.
///
/// `None` fields are wildcards: a table lock covers every partition and
/// bucket, a bucket lock without a partition covers that bucket in every
/// partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockRequest {
    pub table_id: TableId,
    pub partition: Option<String>,
    pub bucket: Option<BucketNumber>,
}

impl LockRequest {
    pub fn table(table_id: TableId) -> Self {
        Self {
            table_id,
            partition: None,
            bucket: None,
        }
    }

    pub fn partition(table_id: TableId, partition: String) -> Self {
        Self {
            table_id,
            partition: Some(partition),
            bucket: None,
        }
    }

    pub fn bucket(table_id: TableId, bucket: BucketNumber) -> Self {
        Self {
            table_id,
            partition: None,
            bucket: Some(bucket),
        }
    }

    pub fn partition_bucket(table_id: TableId, partition: String, bucket: BucketNumber) -> Self {
        Self {
            table_id,
            partition: Some(partition),
            bucket: Some(bucket),
        }
    }

    /// Two requests conflict when the key spaces they cover intersect.
    pub fn conflicts_with(&self, other: &LockRequest) -> bool {
        fn overlaps<T: PartialEq>(a: &Option<T>, b: &Option<T>) -> bool {
            match (a, b) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
        }

        self.table_id == other.table_id
            && overlaps(&self.partition, &other.partition)
            && overlaps(&self.bucket, &other.bucket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: TableId = TableId(1);

    #[test]
    fn table_lock_conflicts_with_everything_on_table() {
        let table = LockRequest::table(T);
        assert!(table.conflicts_with(&LockRequest::partition(T, "p".into())));
        assert!(table.conflicts_with(&LockRequest::bucket(T, 3)));
        assert!(!table.conflicts_with(&LockRequest::table(TableId(2))));
    }

    #[test]
    fn bucket_locks_are_disjoint_across_buckets() {
        let b3 = LockRequest::bucket(T, 3);
        assert!(!b3.conflicts_with(&LockRequest::bucket(T, 4)));
        assert!(b3.conflicts_with(&LockRequest::partition_bucket(T, "p".into(), 3)));
        assert!(
            !LockRequest::partition_bucket(T, "p".into(), 3)
                .conflicts_with(&LockRequest::partition_bucket(T, "q".into(), 3))
        );
    }

    #[test]
    fn scope_membership() {
        let part = PartInfo::new("p1", 3, 1, 1);
        let scope = DedupScope::PartitionDedupWithBucket(BTreeSet::from([("p1".to_string(), 3)]));
        assert!(scope.contains(&part));
        assert!(scope.is_bucket_lock());
        assert!(!DedupScope::PartitionDedup(BTreeSet::from(["p2".to_string()])).contains(&part));
        assert_eq!(scope.lock_requests(T).len(), 1);
    }
}
