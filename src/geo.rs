// src/geo.rs
//! Great-circle distance and display formatting for hike figures

/// Mean Earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance in meters between two lat/lon pairs (degrees)
pub fn haversine_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let lat1 = lat1.to_radians();
    let lat2 = lat2.to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * c
}

/// Format a distance as kilometers, e.g. "3.42 km"
pub fn format_distance(meters: f64) -> String {
    if !meters.is_finite() {
        return "--".to_string();
    }
    format!("{:.2} km", meters / 1000.0)
}

/// Format a duration as "1h 2m 3s", dropping the hour part when zero
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else {
        format!("{}m {}s", minutes, secs)
    }
}

/// Format pace as minutes per kilometer, e.g. "12:30 /km"
pub fn format_pace(meters: f64, seconds: u64) -> String {
    if meters <= 0.0 || seconds == 0 || !meters.is_finite() {
        return "--".to_string();
    }

    let minutes_per_km = seconds as f64 / 60.0 / (meters / 1000.0);
    let mut mins = minutes_per_km.floor() as u64;
    let mut secs = ((minutes_per_km - mins as f64) * 60.0).round() as u64;
    if secs == 60 {
        mins += 1;
        secs = 0;
    }

    format!("{}:{:02} /km", mins, secs)
}

/// Offset a coordinate by a number of meters north and east.
///
/// Small-distance approximation, good enough for building test tracks and
/// replay fixtures.
pub fn offset_meters(lat: f64, lon: f64, north: f64, east: f64) -> (f64, f64) {
    let d_lat = north / EARTH_RADIUS_M;
    let d_lon = east / (EARTH_RADIUS_M * lat.to_radians().cos());
    (lat + d_lat.to_degrees(), lon + d_lon.to_degrees())
}
