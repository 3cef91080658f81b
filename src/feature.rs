use geojson::{feature::Id, FeatureCollection, Value};
use serde::{Deserialize, Serialize};
use serde_json::Map;
use tracing::warn;

/// A geographic position with longitude as the first axis.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LngLat {
    /// Longitude in degrees, positive east
    pub lng: f64,

    /// Latitude in degrees, positive north
    pub lat: f64,
}

impl LngLat {
    /// Create a new position from longitude and latitude in degrees.
    pub fn new(lng: f64, lat: f64) -> Self {
        LngLat { lng, lat }
    }
}

/// A single geo-tagged post as delivered by the post-location API.
///
/// Features are immutable once loaded; when filter parameters change the
/// whole set is reloaded and the spatial index rebuilt, there is no
/// incremental mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PointFeature {
    /// Stable identifier of the post behind this pin
    pub id: String,

    /// Longitude in degrees
    pub longitude: f64,

    /// Latitude in degrees
    pub latitude: f64,

    /// Arbitrary metadata passed through unchanged from the API
    #[serde(default)]
    pub properties: Map<String, serde_json::Value>,
}

impl PointFeature {
    /// Create a feature with empty metadata.
    pub fn new(id: impl Into<String>, longitude: f64, latitude: f64) -> Self {
        PointFeature {
            id: id.into(),
            longitude,
            latitude,
            properties: Map::new(),
        }
    }

    /// The feature's position as a [`LngLat`].
    pub fn position(&self) -> LngLat {
        LngLat::new(self.longitude, self.latitude)
    }
}

/// Convert a GeoJSON feature collection from the post-location API into
/// point features.
///
/// Features without a point geometry, without a usable id, or with
/// non-finite coordinates are skipped with a warning; the map degrades to
/// rendering the rest.
pub fn features_from_geojson(collection: FeatureCollection) -> Vec<PointFeature> {
    let mut features = Vec::with_capacity(collection.features.len());

    for feature in collection.features {
        let coordinates = match feature.geometry.as_ref().map(|g| &g.value) {
            Some(Value::Point(coordinates)) if coordinates.len() >= 2 => coordinates.clone(),
            _ => {
                warn!("skipping feature without a point geometry");
                continue;
            }
        };

        if !coordinates[0].is_finite() || !coordinates[1].is_finite() {
            warn!("skipping feature with non-finite coordinates");
            continue;
        }

        let properties = feature.properties.clone().unwrap_or_default();

        let id = match feature.id {
            Some(Id::String(id)) => id,
            Some(Id::Number(id)) => id.to_string(),
            None => match properties.get("id") {
                Some(serde_json::Value::String(id)) => id.clone(),
                Some(serde_json::Value::Number(id)) => id.to_string(),
                _ => {
                    warn!("skipping feature without an id");
                    continue;
                }
            },
        };

        features.push(PointFeature {
            id,
            longitude: coordinates[0],
            latitude: coordinates[1],
            properties,
        });
    }

    features
}
