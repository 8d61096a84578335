//! Who started a transaction, and what that means for committing it.

/// Origin of a worker-side transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkerSource {
    /// Ingest driven by a Kafka consumer.
    Kafka,
    /// The worker runs the client's initial query itself.
    InitialQuery,
    /// The transaction was opened by a server and forwarded to this worker.
    /// Committing it from here goes through `rpc_endpoint`.
    ServerForwarded { rpc_endpoint: Option<String> },
}

/// Transaction kind, resolved once when the write starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransactionKind {
    Server,
    Worker {
        source: WorkerSource,
        /// The transaction waits for an explicit external commit signal.
        explicit_commit: bool,
    },
}

/// What a plain insert does with its transaction once parts are written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlainCommitMode {
    /// Commit right away.
    Eager,
    /// Leave pending; the owner commits later.
    Deferred,
    /// Leave pending; this kind has no commit path from a plain insert.
    Unsupported,
}

impl TransactionKind {
    pub fn worker(source: WorkerSource) -> Self {
        TransactionKind::Worker {
            source,
            explicit_commit: false,
        }
    }

    pub fn plain_commit_mode(&self, disable_transaction_commit: bool) -> PlainCommitMode {
        match self {
            TransactionKind::Server if disable_transaction_commit => PlainCommitMode::Deferred,
            TransactionKind::Server => PlainCommitMode::Eager,
            TransactionKind::Worker {
                explicit_commit: true,
                ..
            } => PlainCommitMode::Deferred,
            TransactionKind::Worker { source, .. } => match source {
                WorkerSource::Kafka | WorkerSource::InitialQuery => PlainCommitMode::Eager,
                WorkerSource::ServerForwarded { .. } => PlainCommitMode::Unsupported,
            },
        }
    }

    /// RPC endpoint a forwarded worker transaction must commit through.
    ///
    /// `None` for kinds that commit locally.
    pub fn commit_endpoint(&self) -> Option<Option<&str>> {
        match self {
            TransactionKind::Worker {
                source: WorkerSource::ServerForwarded { rpc_endpoint },
                ..
            } => Some(rpc_endpoint.as_deref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_commit_modes() {
        assert_eq!(
            TransactionKind::Server.plain_commit_mode(false),
            PlainCommitMode::Eager
        );
        assert_eq!(
            TransactionKind::Server.plain_commit_mode(true),
            PlainCommitMode::Deferred
        );
        assert_eq!(
            TransactionKind::worker(WorkerSource::Kafka).plain_commit_mode(false),
            PlainCommitMode::Eager
        );
        let explicit = TransactionKind::Worker {
            source: WorkerSource::Kafka,
            explicit_commit: true,
        };
        assert_eq!(explicit.plain_commit_mode(false), PlainCommitMode::Deferred);
        let forwarded = TransactionKind::worker(WorkerSource::ServerForwarded {
            rpc_endpoint: Some("10.0.0.1:8124".into()),
        });
        assert_eq!(
            forwarded.plain_commit_mode(false),
            PlainCommitMode::Unsupported
        );
        assert_eq!(forwarded.commit_endpoint(), Some(Some("10.0.0.1:8124")));
        assert_eq!(TransactionKind::Server.commit_endpoint(), None);
    }
}
