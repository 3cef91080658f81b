//! Exact-location grouping for dense same-coordinate point sets.
//!
//! Independent of the hierarchical clusterer and much coarser: two features
//! share a group iff their coordinates are identical after truncation to
//! 6 decimal places (~0.11m). Used where duplicate-venue density matters
//! more than screen proximity, e.g. many independent store reviews pinned
//! to one address.

use crate::feature::PointFeature;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Micro-degrees per degree; 6 decimal places of coordinate precision.
const PRECISION: f64 = 1e6;

/// Features sharing one exact (truncated) location.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoordinateGroup {
    /// `[longitude, latitude]` truncated to 6 decimal places
    pub coordinates: [f64; 2],

    /// Number of member features
    pub count: usize,

    /// Ids of the member features, in input order
    pub member_ids: Vec<String>,
}

/// Discrete visual weight for a same-location group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DensityTier {
    Single,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl DensityTier {
    pub fn for_count(count: usize) -> Self {
        match count {
            0 | 1 => DensityTier::Single,
            2..=3 => DensityTier::Low,
            4..=10 => DensityTier::Medium,
            11..=25 => DensityTier::High,
            _ => DensityTier::VeryHigh,
        }
    }

    /// Marker size multiplier relative to a single pin.
    pub fn size_scale(self) -> f64 {
        match self {
            DensityTier::Single => 1.0,
            DensityTier::Low => 1.15,
            DensityTier::Medium => 1.3,
            DensityTier::High => 1.5,
            DensityTier::VeryHigh => 1.75,
        }
    }

    /// Index into a theme's gradient table.
    pub fn palette_index(self) -> usize {
        match self {
            DensityTier::Single => 0,
            DensityTier::Low => 1,
            DensityTier::Medium => 2,
            DensityTier::High => 3,
            DensityTier::VeryHigh => 4,
        }
    }
}

/// Truncate a coordinate to whole micro-degrees.
fn to_micro(value: f64) -> i64 {
    (value * PRECISION).trunc() as i64
}

/// Group features by their truncated coordinates.
///
/// Exact-match grouping, not radius-based: the key is the coordinate pair
/// truncated to 6 decimal places. Output order is deterministic (by
/// coordinate key); member ids keep input order within each group.
pub fn group_by_location(features: &[PointFeature]) -> Vec<CoordinateGroup> {
    let mut groups: BTreeMap<(i64, i64), Vec<String>> = BTreeMap::new();

    for feature in features {
        groups
            .entry((to_micro(feature.longitude), to_micro(feature.latitude)))
            .or_default()
            .push(feature.id.clone());
    }

    groups
        .into_iter()
        .map(|((lng, lat), member_ids)| CoordinateGroup {
            coordinates: [lng as f64 / PRECISION, lat as f64 / PRECISION],
            count: member_ids.len(),
            member_ids,
        })
        .collect()
}
