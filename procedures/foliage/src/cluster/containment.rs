use super::feature::Polygon;
use bevy::math::DVec2;

/// Decides whether a point lies inside a feature's geometry. Called from worker threads.
pub trait RegionContainment: Send + Sync {
	fn contains(&self, polygon: &Polygon, point: DVec2) -> bool;
}

/// Ray casting with the even-odd rule. A closing vertex equal to the first is allowed.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvenOddContainment;

impl RegionContainment for EvenOddContainment {
	fn contains(&self, polygon: &Polygon, point: DVec2) -> bool {
		let bounds = polygon.bounds();
		if point.cmplt(bounds.min).any() || point.cmpgt(bounds.max).any() {
			return false;
		}

		let ring = polygon.exterior();
		let mut inside = false;
		let mut j = ring.len() - 1;
		for i in 0..ring.len() {
			let (a, b) = (ring[i], ring[j]);
			if (a.y > point.y) != (b.y > point.y) {
				let crossing = (b.x - a.x) * (point.y - a.y) / (b.y - a.y) + a.x;
				if point.x < crossing {
					inside = !inside;
				}
			}
			j = i;
		}
		inside
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn polygon(points: &[(f64, f64)]) -> Polygon {
		match Polygon::new(points.iter().map(|(x, y)| DVec2::new(*x, *y)).collect()) {
			Some(polygon) => polygon,
			None => panic!("test polygon is degenerate"),
		}
	}

	#[test]
	fn test_square() {
		let square = polygon(&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0), (0.0, 0.0)]);
		let containment = EvenOddContainment;

		assert!(containment.contains(&square, DVec2::new(5.0, 5.0)));
		assert!(containment.contains(&square, DVec2::new(0.5, 9.5)));
		assert!(!containment.contains(&square, DVec2::new(-0.5, 5.0)));
		assert!(!containment.contains(&square, DVec2::new(5.0, 10.5)));
		assert!(!containment.contains(&square, DVec2::new(50.0, 50.0)));
	}

	#[test]
	fn test_concave() {
		// an L with the upper right quadrant cut away
		let l_shape = polygon(&[(0.0, 0.0), (10.0, 0.0), (10.0, 5.0), (5.0, 5.0), (5.0, 10.0), (0.0, 10.0)]);
		let containment = EvenOddContainment;

		assert!(containment.contains(&l_shape, DVec2::new(2.0, 8.0)));
		assert!(containment.contains(&l_shape, DVec2::new(8.0, 2.0)));
		assert!(!containment.contains(&l_shape, DVec2::new(8.0, 8.0)));
	}

	#[test]
	fn test_triangle_in_geographic_degrees() {
		let triangle = polygon(&[(13.40, 52.50), (13.42, 52.50), (13.41, 52.52)]);
		let containment = EvenOddContainment;

		assert!(containment.contains(&triangle, DVec2::new(13.41, 52.505)));
		assert!(!containment.contains(&triangle, DVec2::new(13.401, 52.519)));
	}
}
