//! Detail fetch pipeline: feature ids to enriched post records.
//!
//! Given a clicked leaf or a cluster's full leaf set, resolves each feature
//! id to a canonical content reference, fetches the content with a bounded
//! concurrency pool, and streams completed sub-batches back to the caller.
//! Individual failures are logged and excluded; partial results always beat
//! none.

use crate::cache::ImageCache;
use crate::error::FetchError;
use crate::feature::LngLat;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Canonical reference to a piece of content, author/permlink style.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentRef {
    pub author: String,
    pub permlink: String,
}

/// Content for one post as returned by the detail API. Knows nothing about
/// map positions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PostContent {
    pub title: String,
    pub body: String,
    pub image_url: Option<String>,
    pub created: DateTime<Utc>,
}

/// An enriched post record: detail API content joined back to the map
/// position the feature id was clicked at.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PostDetail {
    pub feature_id: String,
    pub reference: ContentRef,
    pub title: String,
    pub body: String,
    pub image_url: Option<String>,
    pub created: DateTime<Utc>,
    pub position: LngLat,
}

/// One unit of work for the pipeline: a feature id plus the coordinates to
/// propagate into the enriched record.
#[derive(Clone, Debug, PartialEq)]
pub struct DetailRequest {
    pub feature_id: String,
    pub position: LngLat,
}

/// The remote detail API, externally supplied.
///
/// Futures are not required to be `Send`; the whole subsystem runs on a
/// single event-loop thread.
#[allow(async_fn_in_trait)]
pub trait DetailApi {
    /// Resolve a feature id to its canonical content reference.
    /// `Ok(None)` means the id no longer resolves.
    async fn resolve(&self, feature_id: &str) -> Result<Option<ContentRef>, FetchError>;

    /// Fetch full content for a reference. `Ok(None)` means the content is
    /// gone.
    async fn fetch(&self, reference: &ContentRef) -> Result<Option<PostContent>, FetchError>;
}

/// Issues fetch tickets; a newer ticket supersedes all older ones.
///
/// A superseding click (new cluster selected while a fetch is in flight)
/// begins a new ticket, and the stale pipeline run notices before applying
/// any further results.
#[derive(Debug, Default)]
pub struct FetchCoordinator {
    current: AtomicU64,
}

impl FetchCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new fetch, invalidating every earlier ticket.
    pub fn begin(&self) -> FetchTicket {
        FetchTicket(self.current.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Whether the ticket is still the latest.
    pub fn is_current(&self, ticket: &FetchTicket) -> bool {
        self.current.load(Ordering::SeqCst) == ticket.0
    }
}

/// Opaque token for one pipeline run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FetchTicket(u64);

/// Pipeline tuning.
#[derive(Clone, Copy, Debug)]
pub struct FetchConfig {
    /// Maximum in-flight API calls
    pub concurrency: usize,

    /// Maximum completed fetches per progress callback
    pub progress_batch: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            concurrency: 10,
            progress_batch: 8,
        }
    }
}

/// Fetch enriched details for a set of features.
///
/// Stages: resolve every id to a content reference (bounded fan-out),
/// dedupe identical references keeping the first coordinate binding, then
/// fetch content (bounded fan-out) and hand each completed sub-batch to
/// `on_progress` as it lands, so a cluster with hundreds of leaves starts
/// rendering before the batch finishes. Image URLs are written into `cache`
/// as batches arrive, first write per key wins.
///
/// Individual failures are logged and skipped. The whole call fails only
/// when nothing succeeded ([`FetchError::AllFailed`]) or when a newer
/// ticket superseded this run ([`FetchError::Cancelled`]) - in the latter
/// case no further results are applied. The final list is sorted by content
/// recency, newest first.
pub async fn fetch_details<A, F>(
    api: &A,
    requests: Vec<DetailRequest>,
    ticket: FetchTicket,
    coordinator: &FetchCoordinator,
    cache: &mut ImageCache,
    config: &FetchConfig,
    mut on_progress: F,
) -> Result<Vec<PostDetail>, FetchError>
where
    A: DetailApi,
    F: FnMut(&[PostDetail]),
{
    if requests.is_empty() {
        return Ok(Vec::new());
    }

    let attempted = requests.len();

    // Stage 1: resolve ids to content references.
    let resolutions: Vec<Option<(DetailRequest, ContentRef)>> =
        futures::stream::iter(requests.into_iter().map(|request| async move {
            match api.resolve(&request.feature_id).await {
                Ok(Some(reference)) => Some((request, reference)),
                Ok(None) => {
                    warn!(feature_id = %request.feature_id, "feature id no longer resolves");
                    None
                }
                Err(err) => {
                    warn!(feature_id = %request.feature_id, %err, "resolution failed");
                    None
                }
            }
        }))
        .buffer_unordered(config.concurrency)
        .collect()
        .await;

    // Identical references collapse to one fetch; the first coordinate
    // binding wins.
    let mut seen = HashSet::new();
    let mut resolved = Vec::new();

    for (request, reference) in resolutions.into_iter().flatten() {
        if seen.insert(reference.clone()) {
            resolved.push((request, reference));
        }
    }

    if !coordinator.is_current(&ticket) {
        debug!("fetch superseded during resolution");
        return Err(FetchError::Cancelled);
    }

    // Stage 2: fetch content, streaming completed sub-batches.
    let mut batches = futures::stream::iter(resolved.into_iter().map(
        |(request, reference)| async move {
            match api.fetch(&reference).await {
                Ok(Some(content)) => Some(PostDetail {
                    feature_id: request.feature_id,
                    reference,
                    title: content.title,
                    body: content.body,
                    image_url: content.image_url,
                    created: content.created,
                    position: request.position,
                }),
                Ok(None) => {
                    warn!(author = %reference.author, permlink = %reference.permlink, "content is gone");
                    None
                }
                Err(err) => {
                    warn!(author = %reference.author, permlink = %reference.permlink, %err, "content fetch failed");
                    None
                }
            }
        },
    ))
    .buffer_unordered(config.concurrency)
    .ready_chunks(config.progress_batch.max(1));

    let mut posts: Vec<PostDetail> = Vec::new();

    while let Some(chunk) = batches.next().await {
        if !coordinator.is_current(&ticket) {
            debug!("fetch superseded mid-stream, dropping remaining batches");
            return Err(FetchError::Cancelled);
        }

        let batch: Vec<PostDetail> = chunk.into_iter().flatten().collect();
        if batch.is_empty() {
            continue;
        }

        for post in &batch {
            if let Some(url) = &post.image_url {
                cache.insert_if_absent(&post.feature_id, url);
            }
        }

        on_progress(&batch);
        posts.extend(batch);
    }

    if !coordinator.is_current(&ticket) {
        return Err(FetchError::Cancelled);
    }

    if posts.is_empty() {
        return Err(FetchError::AllFailed { attempted });
    }

    posts.sort_by(|a, b| b.created.cmp(&a.created).then(a.feature_id.cmp(&b.feature_id)));

    Ok(posts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;

    struct MockApi {
        refs: HashMap<String, ContentRef>,
        posts: HashMap<ContentRef, PostContent>,
    }

    impl MockApi {
        fn new() -> Self {
            MockApi {
                refs: HashMap::new(),
                posts: HashMap::new(),
            }
        }

        fn with_post(
            mut self,
            feature_id: &str,
            author: &str,
            permlink: &str,
            created: DateTime<Utc>,
            image_url: Option<&str>,
        ) -> Self {
            let reference = ContentRef {
                author: author.to_string(),
                permlink: permlink.to_string(),
            };
            self.refs.insert(feature_id.to_string(), reference.clone());
            self.posts.insert(
                reference,
                PostContent {
                    title: format!("{permlink} title"),
                    body: "...".to_string(),
                    image_url: image_url.map(str::to_string),
                    created,
                },
            );
            self
        }
    }

    impl DetailApi for MockApi {
        async fn resolve(&self, feature_id: &str) -> Result<Option<ContentRef>, FetchError> {
            if feature_id == "boom" {
                return Err(FetchError::Api("resolver down".to_string()));
            }
            Ok(self.refs.get(feature_id).cloned())
        }

        async fn fetch(&self, reference: &ContentRef) -> Result<Option<PostContent>, FetchError> {
            Ok(self.posts.get(reference).cloned())
        }
    }

    fn request(feature_id: &str, lng: f64, lat: f64) -> DetailRequest {
        DetailRequest {
            feature_id: feature_id.to_string(),
            position: LngLat::new(lng, lat),
        }
    }

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, d, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_partial_failure_yields_partial_results() {
        let api = MockApi::new()
            .with_post("id1", "alice", "beach-day", day(3), None)
            .with_post("id3", "carol", "street-food", day(9), None);

        let coordinator = FetchCoordinator::new();
        let ticket = coordinator.begin();
        let mut cache = ImageCache::default();
        let config = FetchConfig {
            concurrency: 10,
            progress_batch: 1,
        };

        let mut progress_sizes = Vec::new();
        let posts = fetch_details(
            &api,
            vec![
                request("id1", 1.0, 1.0),
                request("id2", 2.0, 2.0), // never resolves
                request("id3", 3.0, 3.0),
            ],
            ticket,
            &coordinator,
            &mut cache,
            &config,
            |batch| progress_sizes.push(batch.len()),
        )
        .await
        .unwrap();

        assert_eq!(posts.len(), 2);
        // Newest first
        assert_eq!(posts[0].feature_id, "id3");
        assert_eq!(posts[1].feature_id, "id1");
        // Coordinates propagate from the request
        assert_eq!(posts[0].position, LngLat::new(3.0, 3.0));

        // With a batch size of 1 the first progress call is a non-final subset.
        assert_eq!(progress_sizes, vec![1, 1]);
    }

    #[tokio::test]
    async fn test_duplicate_references_fetch_once() {
        // Two features backed by the same post
        let mut api = MockApi::new().with_post("id1", "alice", "beach-day", day(3), None);
        api.refs.insert(
            "id2".to_string(),
            ContentRef {
                author: "alice".to_string(),
                permlink: "beach-day".to_string(),
            },
        );

        let coordinator = FetchCoordinator::new();
        let ticket = coordinator.begin();
        let mut cache = ImageCache::default();

        let posts = fetch_details(
            &api,
            vec![request("id1", 1.0, 1.0), request("id2", 2.0, 2.0)],
            ticket,
            &coordinator,
            &mut cache,
            &FetchConfig::default(),
            |_| {},
        )
        .await
        .unwrap();

        assert_eq!(posts.len(), 1);
        // The first coordinate binding wins
        assert_eq!(posts[0].position, LngLat::new(1.0, 1.0));
    }

    #[tokio::test]
    async fn test_all_failed() {
        let api = MockApi::new();
        let coordinator = FetchCoordinator::new();
        let ticket = coordinator.begin();
        let mut cache = ImageCache::default();

        let result = fetch_details(
            &api,
            vec![request("missing", 0.0, 0.0), request("boom", 0.0, 0.0)],
            ticket,
            &coordinator,
            &mut cache,
            &FetchConfig::default(),
            |_| {},
        )
        .await;

        assert_eq!(result, Err(FetchError::AllFailed { attempted: 2 }));
    }

    #[tokio::test]
    async fn test_superseded_fetch_is_cancelled() {
        let api = MockApi::new().with_post("id1", "alice", "beach-day", day(3), None);
        let coordinator = FetchCoordinator::new();
        let ticket = coordinator.begin();
        let mut cache = ImageCache::default();

        // A newer click supersedes the ticket before the pipeline runs.
        let _newer = coordinator.begin();

        let mut progressed = false;
        let result = fetch_details(
            &api,
            vec![request("id1", 1.0, 1.0)],
            ticket,
            &coordinator,
            &mut cache,
            &FetchConfig::default(),
            |_| progressed = true,
        )
        .await;

        assert_eq!(result, Err(FetchError::Cancelled));
        assert!(!progressed, "stale results must not reach the caller");
    }

    #[tokio::test]
    async fn test_image_urls_land_in_cache_once() {
        let api = MockApi::new()
            .with_post("id1", "alice", "beach-day", day(3), Some("https://img/beach.jpg"));

        let coordinator = FetchCoordinator::new();
        let mut cache = ImageCache::default();
        cache.insert_if_absent("id1", "https://img/cached-earlier.jpg");

        let ticket = coordinator.begin();
        fetch_details(
            &api,
            vec![request("id1", 1.0, 1.0)],
            ticket,
            &coordinator,
            &mut cache,
            &FetchConfig::default(),
            |_| {},
        )
        .await
        .unwrap();

        // First write stays
        assert_eq!(cache.get("id1"), Some("https://img/cached-earlier.jpg"));
    }

    #[tokio::test]
    async fn test_empty_request_list() {
        let api = MockApi::new();
        let coordinator = FetchCoordinator::new();
        let ticket = coordinator.begin();
        let mut cache = ImageCache::default();

        let posts = fetch_details(
            &api,
            vec![],
            ticket,
            &coordinator,
            &mut cache,
            &FetchConfig::default(),
            |_| {},
        )
        .await
        .unwrap();

        assert!(posts.is_empty());
    }
}
