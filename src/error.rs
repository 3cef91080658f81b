use thiserror::Error;

/// Errors from generation-guarded spatial index operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClusterError {
    /// A cluster id from a previous index generation was used after a
    /// rebuild. The caller should drop its cached view and re-query.
    #[error("stale index generation: held {held}, current {current}")]
    StaleGeneration { held: u64, current: u64 },

    /// The cluster id does not resolve within the current generation.
    #[error("no cluster with id {cluster_id} in the current index")]
    UnknownCluster { cluster_id: usize },
}

/// Errors from the detail fetch pipeline.
///
/// Individual per-feature failures are logged and excluded from the output
/// rather than surfaced here; these variants cover whole-batch outcomes only.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FetchError {
    /// A newer fetch superseded this one before it finished. Streamed
    /// partial results must not be applied.
    #[error("detail fetch superseded by a newer request")]
    Cancelled,

    /// Every feature in the batch failed to resolve or fetch.
    #[error("all {attempted} detail fetches failed")]
    AllFailed { attempted: usize },

    /// The detail API reported a transport-level failure.
    #[error("detail api error: {0}")]
    Api(String),
}
