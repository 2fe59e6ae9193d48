use bevy::prelude::IVec2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn splitmix64(mut z: u64) -> u64 {
	z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
	z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
	z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
	z ^ (z >> 31)
}

/// Generator for a single sample, keyed by the foliage seed, the tile (or feature) it belongs to
/// and the sample's index, so the result does not depend on evaluation order.
pub fn sample_rng(seed: u64, coord: IVec2, index: u64) -> ChaCha8Rng {
	let coord = ((coord.x as u32 as u64) << 32) | coord.y as u32 as u64;
	let key = splitmix64(splitmix64(splitmix64(seed) ^ coord) ^ index);
	ChaCha8Rng::seed_from_u64(key)
}
