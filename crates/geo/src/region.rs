//! Region membership

use minerscope_common::{BoundingBox, GeoRecord};

/// Inclusive containment. NaN coordinates are never inside.
pub fn in_region(lat: f64, lon: f64, bbox: &BoundingBox) -> bool {
    if lat.is_nan() || lon.is_nan() {
        return false;
    }
    (bbox.lat_min..=bbox.lat_max).contains(&lat) && (bbox.lon_min..=bbox.lon_max).contains(&lon)
}

/// A record without both coordinates is outside every region.
pub fn record_in_region(record: &GeoRecord, bbox: &BoundingBox) -> bool {
    record
        .coordinates()
        .map_or(false, |(lat, lon)| in_region(lat, lon, bbox))
}
