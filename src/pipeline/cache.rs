//! Caller-owned coefficient cache for repeated alignments against the same
//! configurations.

use crate::pipeline::{HarmonicCoefficients, HarmonicTransform, PointSet};
use crate::Result;
use nalgebra::Vector3;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// A cached coefficient set with the inputs it was computed from
#[derive(Debug)]
struct CacheEntry {
    fingerprint: String,
    positions: Vec<Vector3<f64>>,
    labels: Vec<u32>,
    coefficients: Arc<HarmonicCoefficients>,
}

impl CacheEntry {
    fn matches(&self, fingerprint: &str, points: &PointSet) -> bool {
        self.fingerprint == fingerprint
            && self.labels == points.labels()
            && self.positions.len() == points.len()
            && self
                .positions
                .iter()
                .zip(points.positions())
                .all(|(a, b)| a.iter().zip(b.iter()).all(|(x, y)| x.to_bits() == y.to_bits()))
    }
}

/// Coefficients bucketed by an `xxh64` hash of coordinates, labels and the
/// transform parameters; a hit also compares the stored inputs
#[derive(Debug, Default)]
pub struct CoefficientCache {
    buckets: HashMap<u64, Vec<CacheEntry>>,
    hits: usize,
    misses: usize,
}

impl CoefficientCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Content hash of a configuration under a transform.
    pub fn key(transform: &dyn HarmonicTransform, points: &PointSet) -> u64 {
        Self::hash(&transform.fingerprint(), points)
    }

    fn hash(fingerprint: &str, points: &PointSet) -> u64 {
        let mut bytes = Vec::with_capacity(fingerprint.len() + points.len() * 28 + 8);
        bytes.extend_from_slice(fingerprint.as_bytes());
        bytes.extend_from_slice(&(points.len() as u64).to_le_bytes());
        for (p, label) in points.positions().iter().zip(points.labels()) {
            for c in p.iter() {
                bytes.extend_from_slice(&c.to_bits().to_le_bytes());
            }
            bytes.extend_from_slice(&label.to_le_bytes());
        }
        xxhash_rust::xxh64::xxh64(&bytes, 0)
    }

    pub fn get_or_compute(
        &mut self,
        transform: &dyn HarmonicTransform,
        points: &PointSet,
    ) -> Result<Arc<HarmonicCoefficients>> {
        let fingerprint = transform.fingerprint();
        let key = Self::hash(&fingerprint, points);
        if let Some(found) = self.lookup(key, &fingerprint, points) {
            self.hits += 1;
            trace!(key, "Coefficient cache hit");
            return Ok(found);
        }

        let computed = Arc::new(transform.compute_coefficients(points)?);
        self.misses += 1;
        let bucket = self.buckets.entry(key).or_default();
        if !bucket.is_empty() {
            debug!(key, colliding = bucket.len(), "Coefficient cache hash collision");
        }
        bucket.push(CacheEntry {
            fingerprint,
            positions: points.positions().to_vec(),
            labels: points.labels().to_vec(),
            coefficients: Arc::clone(&computed),
        });
        debug!(
            key,
            transform = transform.name(),
            entries = self.len(),
            "Cached new coefficients"
        );
        Ok(computed)
    }

    fn lookup(&self, key: u64, fingerprint: &str, points: &PointSet) -> Option<Arc<HarmonicCoefficients>> {
        self.buckets
            .get(&key)?
            .iter()
            .find(|entry| entry.matches(fingerprint, points))
            .map(|entry| Arc::clone(&entry.coefficients))
    }

    pub fn get(&self, transform: &dyn HarmonicTransform, points: &PointSet) -> Option<Arc<HarmonicCoefficients>> {
        let fingerprint = transform.fingerprint();
        self.lookup(Self::hash(&fingerprint, points), &fingerprint, points)
    }

    /// Drop the entry for one configuration; returns whether it was present.
    pub fn invalidate(&mut self, transform: &dyn HarmonicTransform, points: &PointSet) -> bool {
        let fingerprint = transform.fingerprint();
        let key = Self::hash(&fingerprint, points);
        let Some(bucket) = self.buckets.get_mut(&key) else {
            return false;
        };
        let before = bucket.len();
        bucket.retain(|entry| !entry.matches(&fingerprint, points));
        let removed = bucket.len() < before;
        if bucket.is_empty() {
            self.buckets.remove(&key);
        }
        removed
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn misses(&self) -> usize {
        self.misses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::{PeriodicFourier, SphericalHarmonics};
    use crate::config::{PeriodicConfig, SphericalConfig};
    use crate::geometry::PeriodicBox;

    fn points() -> PointSet {
        PointSet::from_coords(&[[0.1, 0.2, 0.3], [1.0, 1.5, 0.5]], vec![0, 1]).unwrap()
    }

    fn spherical() -> SphericalHarmonics {
        SphericalHarmonics::new(&SphericalConfig {
            jmax: 3,
            ..SphericalConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_second_lookup_hits() {
        let transform = spherical();
        let mut cache = CoefficientCache::new();
        let first = cache.get_or_compute(&transform, &points()).unwrap();
        let second = cache.get_or_compute(&transform, &points()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_key_depends_on_content_and_parameters() {
        let transform = spherical();
        let moved = points()
            .with_positions(vec![
                nalgebra::Vector3::new(0.1, 0.2, 0.3),
                nalgebra::Vector3::new(1.0, 1.5, 0.50001),
            ])
            .unwrap();
        assert_ne!(
            CoefficientCache::key(&transform, &points()),
            CoefficientCache::key(&transform, &moved)
        );

        let relabelled = PointSet::from_coords(&[[0.1, 0.2, 0.3], [1.0, 1.5, 0.5]], vec![0, 0]).unwrap();
        assert_ne!(
            CoefficientCache::key(&transform, &points()),
            CoefficientCache::key(&transform, &relabelled)
        );

        let periodic = PeriodicFourier::new(PeriodicBox::cubic(3.0).unwrap(), &PeriodicConfig::default()).unwrap();
        assert_ne!(
            CoefficientCache::key(&transform, &points()),
            CoefficientCache::key(&periodic, &points())
        );
    }

    #[test]
    fn test_colliding_key_does_not_return_other_configuration() {
        let transform = spherical();
        let mut cache = CoefficientCache::new();
        let original = cache.get_or_compute(&transform, &points()).unwrap();

        // File the coefficients of a different configuration under the same key
        let other = PointSet::from_coords(&[[2.0, 0.0, 0.0], [0.0, 2.0, 0.0]], vec![0, 1]).unwrap();
        let key = CoefficientCache::key(&transform, &points());
        let bucket = cache.buckets.get_mut(&key).unwrap();
        bucket[0].positions = other.positions().to_vec();

        let recomputed = cache.get_or_compute(&transform, &points()).unwrap();
        assert!(!Arc::ptr_eq(&original, &recomputed));
        assert_eq!(cache.hits(), 0);
        assert_eq!(cache.misses(), 2);
        assert_eq!(cache.len(), 2);
        assert!(Arc::ptr_eq(&cache.get(&transform, &points()).unwrap(), &recomputed));
    }

    #[test]
    fn test_invalidate_and_clear() {
        let transform = spherical();
        let mut cache = CoefficientCache::new();
        cache.get_or_compute(&transform, &points()).unwrap();
        assert!(cache.get(&transform, &points()).is_some());
        assert!(cache.invalidate(&transform, &points()));
        assert!(!cache.invalidate(&transform, &points()));
        assert!(cache.is_empty());

        cache.get_or_compute(&transform, &points()).unwrap();
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.misses(), 2);
    }
}
