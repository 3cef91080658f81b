//! Viewport-driven geospatial clustering for map-based travel content.
//!
//! The map view of a travel-content app renders tens of thousands of
//! geo-tagged posts. This crate indexes the visible point features, groups
//! them into hierarchical clusters as a function of zoom level and screen
//! bounds, and decides per cluster whether a click should zoom in or fetch
//! and surface full post details.
//!
//! The flow, leaf-first:
//!
//! 1. [`ViewportTracker`] turns the map host's bounds-changed events into
//!    padded [`ViewportState`]s.
//! 2. [`SpatialIndex`] holds a generation-tagged snapshot of all
//!    [`PointFeature`]s and answers per-viewport [`ClusterView`] queries.
//! 3. [`materialize`] converts a view into sized and bucketed
//!    [`RenderNode`]s.
//! 4. [`render`] resolves nodes against a [`MarkerTheme`];
//!    [`classify_click`] and [`dispatch_click`] implement the
//!    zoom-in-versus-details click semantics via a [`MapController`].
//! 5. [`group_by_location`] is the coarser exact-coordinate aggregation for
//!    same-venue pin stacks.
//! 6. [`fetch_details`] streams enriched post records for clicked features
//!    with bounded concurrency and partial-failure tolerance.
//!
//! The map host, the post-location API, and the detail API are externally
//! supplied collaborators; see [`DetailApi`] for the latter's contract.

#![forbid(unsafe_code)]

mod cache;
mod error;
mod feature;
mod fetch;
mod grouping;
mod index;
mod kdtree;
mod marker;
mod materialize;
mod viewport;

pub use cache::ImageCache;
pub use error::{ClusterError, FetchError};
pub use feature::{features_from_geojson, LngLat, PointFeature};
pub use fetch::{
    fetch_details, ContentRef, DetailApi, DetailRequest, FetchConfig, FetchCoordinator,
    FetchTicket, PostContent, PostDetail,
};
pub use grouping::{group_by_location, CoordinateGroup, DensityTier};
pub use index::{ClusterNode, ClusterView, IndexOptions, LeafNode, MapNode, SpatialIndex};
pub use marker::{
    classify_click, dispatch_click, render, ClickAction, Fill, InteractionConfig, MapController,
    MarkerShape, MarkerTheme, MarkerView, TapDebouncer,
};
pub use materialize::{
    marker_size, materialize, ClusterMarker, LeafMarker, MaterializeConfig, RenderNode, SizeBucket,
};
pub use viewport::{BoundsDebouncer, RawBounds, ViewportState, ViewportTracker};
