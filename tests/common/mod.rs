use waymark::{IndexOptions, PointFeature};

/// Route crate logs through the test harness so degraded-path warnings show
/// up in failing test output. Safe to call from every test; only the first
/// call installs the subscriber.
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[allow(dead_code)]
pub fn get_options(radius: f64, extent: f64, min_zoom: u8, max_zoom: u8) -> IndexOptions {
    IndexOptions {
        radius,
        extent,
        min_zoom,
        max_zoom,
        min_points: 2,
        node_size: 64,
    }
}

/// Deterministic pseudo-random posts spread across the world.
#[allow(dead_code)]
pub fn scatter_posts(count: usize) -> Vec<PointFeature> {
    let mut seed: u64 = 0x9E37_79B9_7F4A_7C15;
    let mut next = move || {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        (seed >> 33) as f64 / (u32::MAX >> 1) as f64
    };

    (0..count)
        .map(|i| {
            let lng = next() * 360.0 - 180.0;
            let lat = next() * 130.0 - 65.0;
            PointFeature::new(format!("post-{i}"), lng, lat)
        })
        .collect()
}

/// Posts packed into one city block, guaranteed to cluster at low zooms.
#[allow(dead_code)]
pub fn dense_posts(count: usize, lng: f64, lat: f64) -> Vec<PointFeature> {
    (0..count)
        .map(|i| {
            let offset = i as f64 * 0.0001;
            PointFeature::new(format!("dense-{i}"), lng + offset, lat + offset)
        })
        .collect()
}
