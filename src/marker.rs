//! Marker presentation and click semantics.
//!
//! One parameterized renderer covers the generic, food, and store marker
//! variants; themes only change the bucket-to-color mapping, icon, and
//! cluster shape. The click state machine and size formula are shared.

use crate::error::ClusterError;
use crate::feature::{LngLat, PointFeature};
use crate::index::SpatialIndex;
use crate::materialize::RenderNode;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::warn;

/// Pixel size of a single-feature pin.
const LEAF_SIZE_PX: u32 = 32;

/// Click-handling thresholds.
///
/// These match the shipped behavior and are tunable, not derived: a cluster
/// too large to usefully open as a detail list is reinterpreted as a
/// pan-and-zoom-in while the map is still zoomed out.
#[derive(Clone, Copy, Debug)]
pub struct InteractionConfig {
    /// Clusters above this member count zoom in instead of opening details
    pub max_clickable_cluster: usize,

    /// Zoom level at and above which clicks always open details
    pub zoom_instead_threshold: u8,

    /// How far a zoom-in click advances the zoom
    pub zoom_increment: u8,

    /// Ceiling for zoom-in clicks
    pub max_zoom: u8,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        InteractionConfig {
            max_clickable_cluster: 50,
            zoom_instead_threshold: 14,
            zoom_increment: 3,
            max_zoom: 16,
        }
    }
}

/// What a marker click resolves to.
#[derive(Clone, Debug, PartialEq)]
pub enum ClickAction {
    /// Re-center on the cluster and zoom in instead of opening details
    ZoomIn { center: LngLat, zoom: u8 },

    /// Open details for the cluster's full leaf set
    ShowCluster { cluster_id: usize, generation: u64 },

    /// Open details for a single feature
    ShowLeaf { feature_id: String },

    /// Nothing to do; the interaction referenced a stale generation
    Rejected,
}

/// Classify a marker click into an action.
///
/// A cluster with more than `max_clickable_cluster` members clicked while
/// `zoom < zoom_instead_threshold` becomes a pan-and-zoom-in; opening a
/// detail view for thousands of leaves is not useful, zooming is. Clicks
/// carrying a cluster id from a stale generation are rejected rather than
/// resolved against the wrong hierarchy.
pub fn classify_click(
    node: &RenderNode,
    zoom: u8,
    current_generation: u64,
    config: &InteractionConfig,
) -> ClickAction {
    match node {
        RenderNode::Leaf(leaf) => ClickAction::ShowLeaf {
            feature_id: leaf.feature_id.clone(),
        },
        RenderNode::Cluster(cluster) => {
            if cluster.generation != current_generation {
                warn!(
                    cluster_id = cluster.cluster_id,
                    held = cluster.generation,
                    current = current_generation,
                    "rejecting click against a stale cluster view"
                );
                return ClickAction::Rejected;
            }

            if cluster.point_count > config.max_clickable_cluster
                && zoom < config.zoom_instead_threshold
            {
                ClickAction::ZoomIn {
                    center: cluster.position,
                    zoom: zoom.saturating_add(config.zoom_increment).min(config.max_zoom),
                }
            } else {
                ClickAction::ShowCluster {
                    cluster_id: cluster.cluster_id,
                    generation: cluster.generation,
                }
            }
        }
    }
}

/// Map navigation surface handed down to marker handlers.
///
/// Replaces the window-global callback bridge the map view grew up with;
/// navigation is an explicit dependency instead of ambient state.
pub trait MapController {
    /// Re-center the map on a position.
    fn recenter(&mut self, position: LngLat);

    /// Set the zoom level.
    fn set_zoom(&mut self, zoom: u8);

    /// Visually highlight a position, e.g. the clicked pin.
    fn highlight(&mut self, position: LngLat);
}

/// Drive a classified click against the map and the detail view.
///
/// Errors never propagate: a stale or unknown cluster logs a warning and
/// the click is dropped, which at worst leaves the map as it was.
pub fn dispatch_click<C, F>(
    action: ClickAction,
    controller: &mut C,
    index: &SpatialIndex,
    on_details: F,
) where
    C: MapController + ?Sized,
    F: FnOnce(Vec<PointFeature>),
{
    match action {
        ClickAction::ZoomIn { center, zoom } => {
            controller.recenter(center);
            controller.set_zoom(zoom);
        }
        ClickAction::ShowCluster {
            cluster_id,
            generation,
        } => match index.leaves(generation, cluster_id) {
            Ok(leaves) if !leaves.is_empty() => on_details(leaves),
            Ok(_) => {}
            Err(err @ ClusterError::StaleGeneration { .. }) => {
                warn!(cluster_id, %err, "dropping click, index was rebuilt");
            }
            Err(err) => {
                warn!(cluster_id, %err, "dropping click on unresolvable cluster");
            }
        },
        ClickAction::ShowLeaf { feature_id } => match index.feature_by_id(&feature_id) {
            Some(feature) => {
                controller.highlight(feature.position());
                on_details(vec![feature.clone()]);
            }
            None => warn!(feature_id, "clicked feature is not in the current index"),
        },
        ClickAction::Rejected => {}
    }
}

/// Suppresses the synthetic click some host SDKs fire right after a touch
/// tap. Both pointer and touch events go through [`TapDebouncer::accept`];
/// an event landing within the window of the previous accepted one is a
/// duplicate.
#[derive(Debug)]
pub struct TapDebouncer {
    window: Duration,
    last: Option<Instant>,
}

impl TapDebouncer {
    pub fn new(window: Duration) -> Self {
        TapDebouncer { window, last: None }
    }

    /// Whether this event should be handled.
    pub fn accept(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last {
            if now.duration_since(last) < self.window {
                return false;
            }
        }

        self.last = Some(now);
        true
    }
}

impl Default for TapDebouncer {
    fn default() -> Self {
        TapDebouncer::new(Duration::from_millis(100))
    }
}

/// Cluster marker outline shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerShape {
    /// Circular "plate" cluster marker
    Circle,

    /// Rounded-rect "building" cluster marker
    RoundedRect,
}

/// Marker fill.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Fill {
    Solid(&'static str),
    Gradient(&'static str, &'static str),
}

/// Visual parameters for one marker family.
#[derive(Clone, Copy, Debug)]
pub struct MarkerTheme {
    pub name: &'static str,
    pub shape: MarkerShape,
    pub icon: Option<&'static str>,

    /// One gradient per [`SizeBucket`](crate::materialize::SizeBucket) tier
    pub cluster_gradients: [(&'static str, &'static str); 5],

    pub leaf_color: &'static str,
}

impl MarkerTheme {
    /// Default pin styling for mixed travel posts.
    pub fn generic() -> Self {
        MarkerTheme {
            name: "generic",
            shape: MarkerShape::Circle,
            icon: None,
            cluster_gradients: [
                ("#51bbd6", "#3399cc"),
                ("#6ecc39", "#4caf2e"),
                ("#f1f075", "#e8d54a"),
                ("#f28cb1", "#e36497"),
                ("#e55e5e", "#c93030"),
            ],
            leaf_color: "#3887be",
        }
    }

    /// Food review pins: circular plates, warm palette.
    pub fn food() -> Self {
        MarkerTheme {
            name: "food",
            shape: MarkerShape::Circle,
            icon: Some("utensils"),
            cluster_gradients: [
                ("#ffd54f", "#ffb300"),
                ("#ffb74d", "#f57c00"),
                ("#ff8a65", "#e64a19"),
                ("#f06292", "#c2185b"),
                ("#e53935", "#b71c1c"),
            ],
            leaf_color: "#f57c00",
        }
    }

    /// Store pins: rounded-rect buildings, cool palette.
    pub fn store() -> Self {
        MarkerTheme {
            name: "store",
            shape: MarkerShape::RoundedRect,
            icon: Some("storefront"),
            cluster_gradients: [
                ("#80cbc4", "#26a69a"),
                ("#4db6ac", "#00897b"),
                ("#26a69a", "#00695c"),
                ("#00897b", "#004d40"),
                ("#00695c", "#00332b"),
            ],
            leaf_color: "#00897b",
        }
    }
}

/// A fully resolved marker for the map host to place at a position.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MarkerView {
    pub position: LngLat,
    pub size_px: u32,
    pub shape: MarkerShape,
    pub fill: Fill,
    pub icon: Option<&'static str>,

    /// Abbreviated member count, absent on single pins
    pub label: Option<String>,
}

/// Resolve a render node against a theme.
///
/// Stateless: size and bucket were computed during materialization, the
/// theme only supplies colors, shape, and icon.
pub fn render(node: &RenderNode, theme: &MarkerTheme) -> MarkerView {
    match node {
        RenderNode::Cluster(cluster) => {
            let (from, to) = theme.cluster_gradients[cluster.bucket.palette_index()];

            MarkerView {
                position: cluster.position,
                size_px: cluster.size_px,
                shape: theme.shape,
                fill: Fill::Gradient(from, to),
                icon: theme.icon,
                label: Some(cluster.label.clone()),
            }
        }
        RenderNode::Leaf(leaf) => MarkerView {
            position: leaf.position,
            size_px: LEAF_SIZE_PX,
            shape: MarkerShape::Circle,
            fill: Fill::Solid(theme.leaf_color),
            icon: theme.icon,
            label: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materialize::{ClusterMarker, LeafMarker, SizeBucket};

    fn cluster_marker(point_count: usize, generation: u64) -> RenderNode {
        RenderNode::Cluster(ClusterMarker {
            cluster_id: 4321,
            generation,
            position: LngLat::new(13.4, 52.5),
            point_count,
            label: point_count.to_string(),
            bucket: SizeBucket::for_count(point_count),
            size_px: 30,
        })
    }

    #[test]
    fn test_large_cluster_zooms_instead_of_opening() {
        let config = InteractionConfig::default();
        let node = cluster_marker(51, 1);

        let action = classify_click(&node, 13, 1, &config);

        assert_eq!(
            action,
            ClickAction::ZoomIn {
                center: LngLat::new(13.4, 52.5),
                zoom: 16,
            }
        );
    }

    #[test]
    fn test_same_cluster_at_threshold_zoom_opens_details() {
        let config = InteractionConfig::default();
        let node = cluster_marker(51, 1);

        let action = classify_click(&node, 14, 1, &config);

        assert_eq!(
            action,
            ClickAction::ShowCluster {
                cluster_id: 4321,
                generation: 1,
            }
        );
    }

    #[test]
    fn test_cluster_at_count_threshold_opens_details() {
        let config = InteractionConfig::default();
        let node = cluster_marker(50, 1);

        assert_eq!(
            classify_click(&node, 13, 1, &config),
            ClickAction::ShowCluster {
                cluster_id: 4321,
                generation: 1,
            }
        );
    }

    #[test]
    fn test_zoom_in_clamps_to_max_zoom() {
        let config = InteractionConfig::default();
        let node = cluster_marker(5000, 1);

        match classify_click(&node, 13, 1, &config) {
            ClickAction::ZoomIn { zoom, .. } => assert_eq!(zoom, 16),
            other => panic!("expected zoom-in, got {other:?}"),
        }
    }

    #[test]
    fn test_stale_generation_click_is_rejected() {
        let config = InteractionConfig::default();
        let node = cluster_marker(51, 1);

        assert_eq!(classify_click(&node, 13, 2, &config), ClickAction::Rejected);
    }

    #[test]
    fn test_leaf_click() {
        let config = InteractionConfig::default();
        let node = RenderNode::Leaf(LeafMarker {
            feature_id: "post-9".to_string(),
            position: LngLat::new(0.0, 0.0),
        });

        assert_eq!(
            classify_click(&node, 16, 7, &config),
            ClickAction::ShowLeaf {
                feature_id: "post-9".to_string(),
            }
        );
    }

    #[test]
    fn test_tap_debouncer_swallows_synthetic_click() {
        let mut debouncer = TapDebouncer::new(Duration::from_millis(100));
        let tap = Instant::now();

        assert!(debouncer.accept(tap));
        // Host fires a synthetic click 30ms after the touch tap.
        assert!(!debouncer.accept(tap + Duration::from_millis(30)));
        assert!(debouncer.accept(tap + Duration::from_millis(150)));
    }

    #[test]
    fn test_themes_share_click_semantics() {
        // Themes are visual only; the same node renders to the same size
        // under every theme.
        let node = cluster_marker(600, 1);

        let generic = render(&node, &MarkerTheme::generic());
        let food = render(&node, &MarkerTheme::food());
        let store = render(&node, &MarkerTheme::store());

        assert_eq!(generic.size_px, food.size_px);
        assert_eq!(food.size_px, store.size_px);
        assert_eq!(store.shape, MarkerShape::RoundedRect);
        assert_eq!(generic.shape, MarkerShape::Circle);
        assert_eq!(generic.label.as_deref(), Some("600"));
    }

    #[test]
    fn test_leaf_render_has_no_label() {
        let node = RenderNode::Leaf(LeafMarker {
            feature_id: "post-1".to_string(),
            position: LngLat::new(2.35, 48.85),
        });

        let view = render(&node, &MarkerTheme::food());

        assert_eq!(view.label, None);
        assert_eq!(view.fill, Fill::Solid("#f57c00"));
        assert_eq!(view.size_px, LEAF_SIZE_PX);
    }
}
