//! Tracks the map host's visible bounds and zoom, producing padded query
//! viewports for the spatial index.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Pixel size of one map tile, used to convert padding pixels to degrees.
const TILE_SIZE: f64 = 256.0;

/// Raw bounds as reported by the map host, unpadded.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawBounds {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
    pub zoom: u8,
}

/// A padded query viewport: `[west, south, east, north]` plus integer zoom.
///
/// Longitude is intentionally not clamped to the world range; the spatial
/// index handles antimeridian wraparound itself.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewportState {
    pub bbox: [f64; 4],
    pub zoom: u8,
}

impl ViewportState {
    /// The full world extent at zoom 0, the state callers start from while
    /// the map host cannot yet report bounds.
    pub fn world() -> Self {
        ViewportState {
            bbox: [-180.0, -90.0, 180.0, 90.0],
            zoom: 0,
        }
    }
}

/// Observes bounds-changed events from the map host and emits padded
/// viewport states.
///
/// Padding keeps features just outside the visible frame in the query
/// result, so panning does not pop markers in at the edges.
#[derive(Clone, Debug)]
pub struct ViewportTracker {
    padding_px: f64,
    current: ViewportState,
}

impl ViewportTracker {
    pub fn new(padding_px: f64) -> Self {
        ViewportTracker {
            padding_px,
            current: ViewportState::world(),
        }
    }

    /// The last emitted state, or the world extent before the first event.
    pub fn current(&self) -> ViewportState {
        self.current
    }

    /// Process one bounds-changed event.
    ///
    /// Returns `None` without touching the current state when the host is
    /// not yet laid out (`raw` is `None`); that is a transient condition,
    /// not an error, and queries are simply deferred.
    pub fn observe(&mut self, raw: Option<RawBounds>) -> Option<ViewportState> {
        let raw = raw?;

        let degrees_per_pixel = 360.0 / (f64::powi(2.0, raw.zoom as i32) * TILE_SIZE);
        let padding = degrees_per_pixel * self.padding_px;

        let state = ViewportState {
            bbox: [
                raw.west - padding,
                (raw.south - padding).max(-90.0),
                raw.east + padding,
                (raw.north + padding).min(90.0),
            ],
            zoom: raw.zoom,
        };

        self.current = state;

        Some(state)
    }
}

/// Trailing-edge coalescer for bounds-changed events.
///
/// The host can fire bounds changes faster than re-querying is worth; only
/// the last event inside the window survives. Driven by explicit instants
/// so it needs no timer and stays testable.
#[derive(Debug)]
pub struct BoundsDebouncer {
    window: Duration,
    pending: Option<RawBounds>,
    deadline: Option<Instant>,
}

impl BoundsDebouncer {
    pub fn new(window: Duration) -> Self {
        BoundsDebouncer {
            window,
            pending: None,
            deadline: None,
        }
    }

    /// Record an event; supersedes any pending one and restarts the window.
    pub fn submit(&mut self, bounds: RawBounds, now: Instant) {
        self.pending = Some(bounds);
        self.deadline = Some(now + self.window);
    }

    /// Take the pending event once its window has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<RawBounds> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                self.pending.take()
            }
            _ => None,
        }
    }
}

impl Default for BoundsDebouncer {
    fn default() -> Self {
        BoundsDebouncer::new(Duration::from_millis(50))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padding_in_degrees() {
        let mut tracker = ViewportTracker::new(64.0);
        let state = tracker
            .observe(Some(RawBounds {
                west: 4.0,
                south: 52.0,
                east: 5.0,
                north: 53.0,
                zoom: 10,
            }))
            .unwrap();

        // 360 / (2^10 * 256) * 64 degrees of padding on every edge
        let padding = 360.0 / (1024.0 * 256.0) * 64.0;

        assert_eq!(state.zoom, 10);
        assert!((state.bbox[0] - (4.0 - padding)).abs() < 1e-12);
        assert!((state.bbox[1] - (52.0 - padding)).abs() < 1e-12);
        assert!((state.bbox[2] - (5.0 + padding)).abs() < 1e-12);
        assert!((state.bbox[3] - (53.0 + padding)).abs() < 1e-12);
    }

    #[test]
    fn test_latitude_clamped_longitude_not() {
        let mut tracker = ViewportTracker::new(100.0);
        let state = tracker
            .observe(Some(RawBounds {
                west: -180.0,
                south: -90.0,
                east: 180.0,
                north: 90.0,
                zoom: 0,
            }))
            .unwrap();

        assert_eq!(state.bbox[1], -90.0);
        assert_eq!(state.bbox[3], 90.0);
        // Longitude runs past the world edge; the index handles wraparound.
        assert!(state.bbox[0] < -180.0);
        assert!(state.bbox[2] > 180.0);
    }

    #[test]
    fn test_host_not_ready() {
        let mut tracker = ViewportTracker::new(64.0);

        assert_eq!(tracker.observe(None), None);
        assert_eq!(tracker.current(), ViewportState::world());
    }

    #[test]
    fn test_debouncer_keeps_last_event() {
        let mut debouncer = BoundsDebouncer::new(Duration::from_millis(50));
        let start = Instant::now();

        let first = RawBounds {
            west: 0.0,
            south: 0.0,
            east: 1.0,
            north: 1.0,
            zoom: 5,
        };
        let second = RawBounds { zoom: 6, ..first };

        debouncer.submit(first, start);
        assert_eq!(debouncer.poll(start + Duration::from_millis(10)), None);

        // A newer event restarts the window and replaces the pending one.
        debouncer.submit(second, start + Duration::from_millis(20));
        assert_eq!(debouncer.poll(start + Duration::from_millis(60)), None);
        assert_eq!(
            debouncer.poll(start + Duration::from_millis(70)),
            Some(second)
        );
        assert_eq!(debouncer.poll(start + Duration::from_millis(200)), None);
    }
}
