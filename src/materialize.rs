//! Converts a viewport query result into render-ready marker nodes.
//!
//! Pure and deterministic: the same [`ClusterView`] always materializes to
//! the same output, which keeps this step trivially testable.

use crate::feature::LngLat;
use crate::index::{ClusterView, MapNode};
use serde::{Deserialize, Serialize};

/// Discrete visual tier for a cluster, by member count.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeBucket {
    /// Fewer than 10 members
    Tiny,
    /// Fewer than 500 members
    Small,
    /// Fewer than 1000 members
    Medium,
    /// Fewer than 2000 members
    Large,
    /// 2000 members or more
    Huge,
}

impl SizeBucket {
    pub fn for_count(count: usize) -> Self {
        if count < 10 {
            SizeBucket::Tiny
        } else if count < 500 {
            SizeBucket::Small
        } else if count < 1000 {
            SizeBucket::Medium
        } else if count < 2000 {
            SizeBucket::Large
        } else {
            SizeBucket::Huge
        }
    }

    /// Index into a theme's gradient table.
    pub fn palette_index(self) -> usize {
        match self {
            SizeBucket::Tiny => 0,
            SizeBucket::Small => 1,
            SizeBucket::Medium => 2,
            SizeBucket::Large => 3,
            SizeBucket::Huge => 4,
        }
    }
}

/// Marker sizing parameters shared by all themes.
#[derive(Clone, Copy, Debug)]
pub struct MaterializeConfig {
    /// Pixel size of a single-member marker
    pub base_size: f64,

    /// Divisor for the sqrt growth term
    pub size_scale: f64,
}

impl Default for MaterializeConfig {
    fn default() -> Self {
        MaterializeConfig {
            base_size: 24.0,
            size_scale: 2.0,
        }
    }
}

/// A cluster marker with its computed visual attributes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusterMarker {
    pub cluster_id: usize,
    pub generation: u64,
    pub position: LngLat,
    pub point_count: usize,
    pub label: String,
    pub bucket: SizeBucket,
    pub size_px: u32,
}

/// A single-feature marker; passed through from the query unchanged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeafMarker {
    pub feature_id: String,
    pub position: LngLat,
}

/// Input to the marker renderer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RenderNode {
    Cluster(ClusterMarker),
    Leaf(LeafMarker),
}

impl RenderNode {
    pub fn position(&self) -> LngLat {
        match self {
            RenderNode::Cluster(cluster) => cluster.position,
            RenderNode::Leaf(leaf) => leaf.position,
        }
    }
}

/// Pixel size for a cluster of `count` members.
///
/// Marker area grows sub-linearly with membership so large clusters do not
/// dominate the viewport.
pub fn marker_size(count: usize, config: &MaterializeConfig) -> u32 {
    (config.base_size + (count as f64).sqrt() / config.size_scale).floor() as u32
}

/// Materialize a query result into render nodes.
pub fn materialize(view: &ClusterView, config: &MaterializeConfig) -> Vec<RenderNode> {
    view.nodes
        .iter()
        .map(|node| match node {
            MapNode::Cluster(cluster) => RenderNode::Cluster(ClusterMarker {
                cluster_id: cluster.cluster_id,
                generation: view.generation,
                position: cluster.position,
                point_count: cluster.point_count,
                label: cluster.point_count_abbreviated.clone(),
                bucket: SizeBucket::for_count(cluster.point_count),
                size_px: marker_size(cluster.point_count, config),
            }),
            MapNode::Leaf(leaf) => RenderNode::Leaf(LeafMarker {
                feature_id: leaf.feature_id.clone(),
                position: leaf.position,
            }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{ClusterNode, LeafNode};

    fn sample_view() -> ClusterView {
        ClusterView {
            generation: 3,
            nodes: vec![
                MapNode::Cluster(ClusterNode {
                    cluster_id: 1000,
                    position: LngLat::new(4.9, 52.37),
                    point_count: 1240,
                    point_count_abbreviated: "1.2k".to_string(),
                }),
                MapNode::Leaf(LeafNode {
                    feature_id: "post-7".to_string(),
                    position: LngLat::new(-74.0, 40.71),
                }),
            ],
        }
    }

    #[test]
    fn test_bucket_thresholds() {
        assert_eq!(SizeBucket::for_count(1), SizeBucket::Tiny);
        assert_eq!(SizeBucket::for_count(9), SizeBucket::Tiny);
        assert_eq!(SizeBucket::for_count(10), SizeBucket::Small);
        assert_eq!(SizeBucket::for_count(499), SizeBucket::Small);
        assert_eq!(SizeBucket::for_count(500), SizeBucket::Medium);
        assert_eq!(SizeBucket::for_count(999), SizeBucket::Medium);
        assert_eq!(SizeBucket::for_count(1000), SizeBucket::Large);
        assert_eq!(SizeBucket::for_count(1999), SizeBucket::Large);
        assert_eq!(SizeBucket::for_count(2000), SizeBucket::Huge);
    }

    #[test]
    fn test_marker_size_grows_sublinearly() {
        let config = MaterializeConfig::default();

        assert_eq!(marker_size(1, &config), 24);
        assert_eq!(marker_size(100, &config), 29);
        assert_eq!(marker_size(10_000, &config), 74);

        // Ten times the members, nowhere near ten times the size.
        let small = marker_size(100, &config);
        let large = marker_size(1000, &config);
        assert!(large < small * 10);
        assert!(large > small);
    }

    #[test]
    fn test_materialize_is_idempotent() {
        let view = sample_view();
        let config = MaterializeConfig::default();

        let first = materialize(&view, &config);
        let second = materialize(&view, &config);

        assert_eq!(first, second);
    }

    #[test]
    fn test_materialize_fields() {
        let nodes = materialize(&sample_view(), &MaterializeConfig::default());

        match &nodes[0] {
            RenderNode::Cluster(cluster) => {
                assert_eq!(cluster.generation, 3);
                assert_eq!(cluster.label, "1.2k");
                assert_eq!(cluster.bucket, SizeBucket::Large);
                assert_eq!(cluster.size_px, 41);
            }
            RenderNode::Leaf(_) => panic!("expected a cluster marker"),
        }

        match &nodes[1] {
            RenderNode::Leaf(leaf) => assert_eq!(leaf.feature_id, "post-7"),
            RenderNode::Cluster(_) => panic!("expected a leaf marker"),
        }
    }
}
