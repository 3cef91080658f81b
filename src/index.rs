//! Hierarchical greedy clustering over a static snapshot of point features.
//!
//! The index is rebuilt wholesale whenever the feature set changes; every
//! rebuild bumps a generation counter that invalidates all previously
//! issued cluster ids.

use crate::error::ClusterError;
use crate::feature::{LngLat, PointFeature};
use crate::kdtree::KdTree;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::f64::consts::PI;
use tracing::{debug, error};

/// Cluster ids pack the origin zoom into their low bits; this bounds the
/// usable zoom range to `0..=30`.
const ZOOM_ID_BITS: usize = 5;

/// Spatial index configuration.
///
/// `radius` and `extent` control how aggressively points merge into one
/// cluster at a given zoom; `min_zoom`/`max_zoom` bound when clustering is
/// active versus showing raw leaves. The defaults match the tuning the map
/// view ships with; none of these values is load-bearing beyond behavior
/// parity.
#[derive(Clone, Debug)]
pub struct IndexOptions {
    /// Min zoom level to generate clusters on
    pub min_zoom: u8,

    /// Max zoom level to cluster points on; above it queries return raw leaves
    pub max_zoom: u8,

    /// Minimum members to form a cluster
    pub min_points: usize,

    /// Cluster radius in pixels
    pub radius: f64,

    /// Tile extent in pixels (radius is relative to it)
    pub extent: f64,

    /// KD-tree leaf node size, affects performance only
    pub node_size: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        IndexOptions {
            min_zoom: 0,
            max_zoom: 16,
            min_points: 2,
            radius: 60.0,
            extent: 256.0,
            node_size: 64,
        }
    }
}

/// A synthetic node representing two or more merged features.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusterNode {
    /// Identifier valid only within the generation that issued it
    pub cluster_id: usize,

    /// Weighted center of the cluster's members
    pub position: LngLat,

    /// Number of features absorbed into this cluster
    pub point_count: usize,

    /// Abbreviated member count for display, e.g. `1.2k`
    pub point_count_abbreviated: String,
}

/// An individual feature not merged with others at the queried zoom.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeafNode {
    /// Id of the underlying feature
    pub feature_id: String,

    /// The feature's own position
    pub position: LngLat,
}

/// One node of a viewport query result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MapNode {
    Cluster(ClusterNode),
    Leaf(LeafNode),
}

impl MapNode {
    /// The node's geographic position.
    pub fn position(&self) -> LngLat {
        match self {
            MapNode::Cluster(cluster) => cluster.position,
            MapNode::Leaf(leaf) => leaf.position,
        }
    }
}

/// A viewport query result, tagged with the generation that produced it.
///
/// Cluster ids inside the view are meaningless once the index has been
/// rebuilt; interactions must present the generation back to the index and
/// handle [`ClusterError::StaleGeneration`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusterView {
    /// Index generation this view was computed against
    pub generation: u64,

    /// Clusters and leaves covering the queried bbox
    pub nodes: Vec<MapNode>,
}

/// A direct child of a cluster: either a smaller cluster or a single feature.
#[derive(Clone, Copy, Debug)]
enum Child {
    Cluster { id: usize, count: usize },
    Leaf { feature_index: usize },
}

/// Internal per-level point or cluster record.
#[derive(Clone, Copy, Debug)]
struct Entry {
    /// Spherical mercator x in [0..1]
    x: f64,

    /// Spherical mercator y in [0..1]
    y: f64,

    /// Lowest zoom this entry has been processed at; `u8::MAX` = never
    visited: u8,

    /// Feature index for leaves, encoded cluster id for clusters
    id: usize,

    /// Cluster this entry was absorbed into, if any
    parent: Option<usize>,

    /// Number of original features behind this entry
    count: usize,
}

/// One zoom level: the entries present at that zoom plus a KD-tree over
/// their positions.
#[derive(Clone, Debug, Default)]
struct Level {
    tree: KdTree,
    entries: Vec<Entry>,
}

impl Level {
    fn build(entries: Vec<Entry>, node_size: usize) -> Self {
        let points: Vec<(f64, f64)> = entries.iter().map(|e| (e.x, e.y)).collect();

        Level {
            tree: KdTree::build(&points, node_size),
            entries,
        }
    }
}

/// Viewport-driven clustering index over a snapshot of point features.
#[derive(Clone, Debug)]
pub struct SpatialIndex {
    /// Configuration settings
    options: IndexOptions,

    /// Bumped on every [`SpatialIndex::load`]
    generation: u64,

    /// One level per zoom, indexed by zoom; `max_zoom + 1` holds raw points
    levels: Vec<Level>,

    /// The loaded feature snapshot
    features: Vec<PointFeature>,

    /// Feature id to index lookup for single-leaf interactions
    feature_ids: HashMap<String, usize>,
}

impl SpatialIndex {
    /// Create an empty index with the given configuration.
    ///
    /// `max_zoom` is clamped to 30 because cluster ids encode the origin
    /// zoom in their low [`ZOOM_ID_BITS`] bits.
    pub fn new(mut options: IndexOptions) -> Self {
        options.max_zoom = options.max_zoom.min(30);

        let levels = vec![Level::default(); options.max_zoom as usize + 2];

        SpatialIndex {
            options,
            generation: 0,
            levels,
            features: vec![],
            feature_ids: HashMap::new(),
        }
    }

    /// The current index generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The loaded feature snapshot.
    pub fn features(&self) -> &[PointFeature] {
        &self.features
    }

    /// Look up a loaded feature by its id.
    pub fn feature_by_id(&self, id: &str) -> Option<&PointFeature> {
        self.feature_ids.get(id).map(|&i| &self.features[i])
    }

    /// Rebuild the index from a new feature snapshot.
    ///
    /// Synchronous O(n log n) CPU work: clusters points at `max_zoom`, then
    /// clusters those results at each lower zoom down to `min_zoom`, giving
    /// a cluster hierarchy across zoom levels. Returns the new generation;
    /// every previously issued cluster id is invalid from here on.
    ///
    /// Features with non-finite coordinates are dropped with a warning.
    ///
    /// # Arguments
    ///
    /// - `features`: The full feature snapshot; replaces the previous one.
    pub fn load(&mut self, features: Vec<PointFeature>) -> u64 {
        let min_zoom = self.options.min_zoom;
        let max_zoom = self.options.max_zoom;

        self.features = features;
        self.feature_ids = self
            .features
            .iter()
            .enumerate()
            .map(|(i, f)| (f.id.clone(), i))
            .collect();

        let mut base = Vec::with_capacity(self.features.len());

        for (i, feature) in self.features.iter().enumerate() {
            if !feature.longitude.is_finite() || !feature.latitude.is_finite() {
                error!(feature_id = %feature.id, "dropping feature with non-finite coordinates");
                continue;
            }

            base.push(Entry {
                x: lng_x(feature.longitude),
                y: lat_y(feature.latitude),
                visited: u8::MAX,
                id: i,
                parent: None,
                count: 1,
            });
        }

        self.levels[max_zoom as usize + 1] = Level::build(base, self.options.node_size);

        // Cluster points on max zoom, then cluster the results on the zoom
        // below, and so on down to min_zoom.
        for zoom in (min_zoom..=max_zoom).rev() {
            let (processed, next) = self.cluster_level(zoom);

            self.levels[zoom as usize + 1].entries = processed;
            self.levels[zoom as usize] = Level::build(next, self.options.node_size);
        }

        self.generation += 1;

        debug!(
            generation = self.generation,
            features = self.features.len(),
            "spatial index rebuilt"
        );

        self.generation
    }

    /// The minimal set of nodes covering all features within `bbox` at the
    /// given integer zoom.
    ///
    /// Deterministic for a fixed (generation, bbox, zoom).
    ///
    /// # Arguments
    ///
    /// - `bbox`: `[west, south, east, north]` in degrees. Longitudes may
    ///   exceed the world range or cross the antimeridian; latitudes are
    ///   clamped to ±90.
    /// - `zoom`: The zoom level, clamped to the configured `min_zoom`/`max_zoom`.
    pub fn query(&self, bbox: [f64; 4], zoom: u8) -> ClusterView {
        ClusterView {
            generation: self.generation,
            nodes: self.query_nodes(bbox, zoom),
        }
    }

    fn query_nodes(&self, bbox: [f64; 4], zoom: u8) -> Vec<MapNode> {
        let mut min_lng = ((((bbox[0] + 180.0) % 360.0) + 360.0) % 360.0) - 180.0;
        let min_lat = bbox[1].clamp(-90.0, 90.0);
        let mut max_lng = if bbox[2] == 180.0 {
            180.0
        } else {
            ((((bbox[2] + 180.0) % 360.0) + 360.0) % 360.0) - 180.0
        };
        let max_lat = bbox[3].clamp(-90.0, 90.0);

        if bbox[2] - bbox[0] >= 360.0 {
            min_lng = -180.0;
            max_lng = 180.0;
        } else if min_lng > max_lng {
            // Antimeridian crossing: split into two hemisphere queries
            let eastern = self.query_nodes([min_lng, min_lat, 180.0, max_lat], zoom);
            let western = self.query_nodes([-180.0, min_lat, max_lng, max_lat], zoom);

            return eastern.into_iter().chain(western).collect();
        }

        let level = &self.levels[self.limit_zoom(zoom)];
        let ids = level.tree.range(
            lng_x(min_lng),
            lat_y(max_lat),
            lng_x(max_lng),
            lat_y(min_lat),
        );

        let mut nodes = Vec::with_capacity(ids.len());

        for i in ids {
            let entry = &level.entries[i];

            if entry.count > 1 {
                nodes.push(MapNode::Cluster(ClusterNode {
                    cluster_id: entry.id,
                    position: LngLat::new(x_lng(entry.x), y_lat(entry.y)),
                    point_count: entry.count,
                    point_count_abbreviated: abbreviate_count(entry.count),
                }));
            } else if let Some(feature) = self.features.get(entry.id) {
                nodes.push(MapNode::Leaf(LeafNode {
                    feature_id: feature.id.clone(),
                    position: feature.position(),
                }));
            } else {
                // Entry/feature mismatch would mean a rebuild bug; degrade
                // to an empty slot rather than crashing the render loop.
                error!(entry_id = entry.id, "leaf entry without a backing feature");
            }
        }

        nodes
    }

    /// Every original feature absorbed into the given cluster, unpaged.
    ///
    /// Leaf counts are bounded by the dataset size and callers use the full
    /// list immediately, so there is no pagination.
    ///
    /// # Arguments
    ///
    /// - `generation`: The generation of the view the cluster id came from;
    ///   a mismatch fails with [`ClusterError::StaleGeneration`].
    /// - `cluster_id`: The id of the cluster to expand.
    pub fn leaves(
        &self,
        generation: u64,
        cluster_id: usize,
    ) -> Result<Vec<PointFeature>, ClusterError> {
        self.check_generation(generation)?;

        let mut features = Vec::new();
        self.collect_leaves(cluster_id, &mut features)?;

        Ok(features)
    }

    /// The minimum zoom at which the given cluster splits into two or more
    /// nodes; drives "zoom to expand" interactions.
    ///
    /// # Arguments
    ///
    /// - `generation`: The generation of the view the cluster id came from.
    /// - `cluster_id`: The id of the cluster to inspect.
    pub fn expansion_zoom(
        &self,
        generation: u64,
        cluster_id: usize,
    ) -> Result<u8, ClusterError> {
        self.check_generation(generation)?;

        if cluster_id < self.features.len() {
            return Err(ClusterError::UnknownCluster { cluster_id });
        }

        let mut cluster_id = cluster_id;
        // Origin zoom encodes creation zoom + 1; zero means the id was never
        // issued by this index.
        let origin_zoom = (cluster_id - self.features.len()) % (1 << ZOOM_ID_BITS);
        if origin_zoom == 0 {
            return Err(ClusterError::UnknownCluster { cluster_id });
        }

        let mut zoom = origin_zoom - 1;
        let mut first = true;

        while zoom <= self.options.max_zoom as usize {
            let children = match self.children(cluster_id) {
                Ok(children) => children,
                Err(err) if first => return Err(err),
                Err(_) => break,
            };

            first = false;
            zoom += 1;

            if children.len() != 1 {
                break;
            }

            cluster_id = match children[0] {
                Child::Cluster { id, .. } => id,
                Child::Leaf { .. } => break,
            };
        }

        Ok(zoom as u8)
    }

    /// Direct children of a cluster at the zoom it was created on.
    ///
    /// # Arguments
    ///
    /// - `cluster_id`: The encoded cluster id; its low bits carry the origin
    ///   zoom, the rest the entry index on that level.
    fn children(&self, cluster_id: usize) -> Result<Vec<Child>, ClusterError> {
        if cluster_id < self.features.len() {
            return Err(ClusterError::UnknownCluster { cluster_id });
        }

        let encoded = cluster_id - self.features.len();
        let origin_index = encoded >> ZOOM_ID_BITS;
        let origin_zoom = encoded % (1 << ZOOM_ID_BITS);

        let level = self
            .levels
            .get(origin_zoom)
            .ok_or(ClusterError::UnknownCluster { cluster_id })?;

        if origin_index >= level.entries.len() {
            return Err(ClusterError::UnknownCluster { cluster_id });
        }

        let r = self.options.radius
            / (self.options.extent * f64::powi(2.0, origin_zoom as i32 - 1));
        let origin = &level.entries[origin_index];
        let ids = level.tree.within(origin.x, origin.y, r);

        let mut children = Vec::new();

        for i in ids {
            let entry = &level.entries[i];

            if entry.parent == Some(cluster_id) {
                children.push(if entry.count > 1 {
                    Child::Cluster {
                        id: entry.id,
                        count: entry.count,
                    }
                } else {
                    Child::Leaf {
                        feature_index: entry.id,
                    }
                });
            }
        }

        if children.is_empty() {
            return Err(ClusterError::UnknownCluster { cluster_id });
        }

        Ok(children)
    }

    fn collect_leaves(
        &self,
        cluster_id: usize,
        out: &mut Vec<PointFeature>,
    ) -> Result<(), ClusterError> {
        for child in self.children(cluster_id)? {
            match child {
                Child::Cluster { id, .. } => self.collect_leaves(id, out)?,
                Child::Leaf { feature_index } => {
                    if let Some(feature) = self.features.get(feature_index) {
                        out.push(feature.clone());
                    }
                }
            }
        }

        Ok(())
    }

    /// Greedily merge entries of the level above `zoom` that fall within the
    /// configured radius of each other.
    ///
    /// Returns the processed entries for the level above (with parent links
    /// filled in) and the new entry set for `zoom`.
    ///
    /// # Arguments
    ///
    /// - `zoom`: The zoom level to produce entries for; its input is the
    ///   already-built level at `zoom + 1`.
    fn cluster_level(&self, zoom: u8) -> (Vec<Entry>, Vec<Entry>) {
        let level = &self.levels[zoom as usize + 1];
        let r = self.options.radius / (self.options.extent * f64::powi(2.0, zoom as i32));
        let mut entries = level.entries.clone();
        let mut next = Vec::new();

        for i in 0..entries.len() {
            // Already absorbed at this zoom
            if entries[i].visited <= zoom {
                continue;
            }

            entries[i].visited = zoom;

            let x = entries[i].x;
            let y = entries[i].y;
            let neighbor_ids = level.tree.within(x, y, r);

            let origin_count = entries[i].count;
            let mut count = origin_count;

            for &n in &neighbor_ids {
                if entries[n].visited > zoom {
                    count += entries[n].count;
                }
            }

            if count > origin_count && count >= self.options.min_points {
                let mut wx = x * origin_count as f64;
                let mut wy = y * origin_count as f64;

                // Encode origin index and zoom into the id, offset past the
                // feature index range
                let id = (i << ZOOM_ID_BITS) + (zoom as usize + 1) + self.features.len();

                for n in neighbor_ids {
                    if entries[n].visited <= zoom {
                        continue;
                    }

                    entries[n].visited = zoom;

                    wx += entries[n].x * entries[n].count as f64;
                    wy += entries[n].y * entries[n].count as f64;

                    entries[n].parent = Some(id);
                }

                entries[i].parent = Some(id);

                next.push(Entry {
                    x: wx / count as f64,
                    y: wy / count as f64,
                    visited: u8::MAX,
                    id,
                    parent: None,
                    count,
                });
            } else {
                // Not enough nearby weight; carry the entry through unchanged
                next.push(entries[i]);

                if count > 1 {
                    for n in neighbor_ids {
                        if entries[n].visited <= zoom {
                            continue;
                        }

                        entries[n].visited = zoom;
                        next.push(entries[n]);
                    }
                }
            }
        }

        (entries, next)
    }

    /// Effective level for a query zoom, honoring `min_zoom`/`max_zoom`.
    fn limit_zoom(&self, zoom: u8) -> usize {
        zoom.max(self.options.min_zoom)
            .min(self.options.max_zoom + 1) as usize
    }

    fn check_generation(&self, held: u64) -> Result<(), ClusterError> {
        if held == self.generation {
            Ok(())
        } else {
            Err(ClusterError::StaleGeneration {
                held,
                current: self.generation,
            })
        }
    }
}

/// Abbreviate a member count for marker labels, e.g. `842`, `1.2k`, `12k`.
///
/// # Arguments
///
/// - `count`: The number of features behind a cluster.
fn abbreviate_count(count: usize) -> String {
    if count >= 10_000 {
        format!("{}k", (count as f64 / 1000.0).round())
    } else if count >= 1000 {
        format!("{}k", (count as f64 / 100.0).round() / 10.0)
    } else {
        count.to_string()
    }
}

/// Longitude to spherical mercator in the [0..1] range.
///
/// # Arguments
///
/// - `lng`: The longitude in degrees.
fn lng_x(lng: f64) -> f64 {
    lng / 360.0 + 0.5
}

/// Latitude to spherical mercator in the [0..1] range, clamped at the poles.
///
/// # Arguments
///
/// - `lat`: The latitude in degrees.
fn lat_y(lat: f64) -> f64 {
    let sin = lat.to_radians().sin();
    let y = 0.5 - (0.25 * ((1.0 + sin) / (1.0 - sin)).ln()) / PI;

    y.clamp(0.0, 1.0)
}

/// Spherical mercator x back to longitude.
///
/// # Arguments
///
/// - `x`: The x coordinate in the [0..1] mercator range.
fn x_lng(x: f64) -> f64 {
    (x - 0.5) * 360.0
}

/// Spherical mercator y back to latitude.
///
/// # Arguments
///
/// - `y`: The y coordinate in the [0..1] mercator range.
fn y_lat(y: f64) -> f64 {
    let y2 = ((180.0 - y * 360.0) * PI) / 180.0;

    (360.0 * y2.exp().atan()) / PI - 90.0
}
