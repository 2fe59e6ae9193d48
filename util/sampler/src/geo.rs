use bevy::math::DVec2;

/// Mean radius of the earth in metres.
pub const EARTH_RADIUS_METRES: f64 = 6371e3;

/// Great circle distance in metres between two (longitude, latitude) points given in degrees.
pub fn haversine_distance(a: DVec2, b: DVec2, planet_radius: f64) -> f64 {
	let lat_a = a.y.to_radians();
	let lat_b = b.y.to_radians();
	let delta_lat = (b.y - a.y).to_radians();
	let delta_lon = (b.x - a.x).to_radians();

	let h = (delta_lat / 2.0).sin().powi(2)
		+ lat_a.cos() * lat_b.cos() * (delta_lon / 2.0).sin().powi(2);

	2.0 * planet_radius * h.sqrt().min(1.0).asin()
}

/// The (longitude, latitude) deltas in degrees needed to travel `distance` metres from `origin`
/// along a parallel and along a meridian respectively.
pub fn haversine_delta_degrees(origin: DVec2, distance: f64, planet_radius: f64) -> DVec2 {
	let angular = distance / planet_radius;
	let delta_lat = angular.to_degrees();

	let cos_lat = origin.y.to_radians().cos();
	let delta_lon = if cos_lat.abs() < 1e-12 {
		// at the poles every longitude is the same point
		180.0
	} else {
		let s = ((angular / 2.0).sin() / cos_lat).clamp(-1.0, 1.0);
		(2.0 * s.asin()).to_degrees()
	};

	DVec2::new(delta_lon, delta_lat)
}
