//! Reproducible choice of calibration sample points.

use geo::Point;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Up to `size` of `points`, chosen with a seeded RNG and kept in input order.
pub fn sample_points(points: &[Point<f64>], size: usize, seed: u64) -> Vec<Point<f64>> {
    if size >= points.len() {
        return points.to_vec();
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut picked = rand::seq::index::sample(&mut rng, points.len(), size).into_vec();
    picked.sort_unstable();
    picked.into_iter().map(|i| points[i]).collect()
}
