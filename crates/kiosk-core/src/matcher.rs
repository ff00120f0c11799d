//! Nearest-neighbor identity matching against the registry.

use crate::registry::Registry;
use crate::types::{FeatureVector, MatchResult};

/// Strategy for comparing a probe vector against the known-customer registry.
pub trait Matcher {
    fn compare(&self, probe: &FeatureVector, registry: &Registry, tolerance: f32) -> MatchResult;
}

/// Euclidean nearest-neighbor matcher.
///
/// Scans every enrolled vector. The minimum distance wins; on exact ties the
/// vector enrolled first wins. A match is accepted only when the minimum is
/// strictly below `tolerance`.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &FeatureVector, registry: &Registry, tolerance: f32) -> MatchResult {
        if probe.dimension() != registry.dimension() || !probe.is_finite() {
            return MatchResult::Unmatched;
        }

        let mut best_dist = f32::INFINITY;
        let mut best_customer: Option<usize> = None;

        for enrollment in registry.enrollments() {
            let dist = probe.distance(&enrollment.vector);
            // Strict `<` keeps the first-enrolled vector on exact ties.
            if dist < best_dist {
                best_dist = dist;
                best_customer = Some(enrollment.customer);
            }
        }

        match best_customer {
            Some(idx) if best_dist < tolerance => MatchResult::Matched {
                customer_id: registry.customer_at(idx).customer_id.clone(),
                distance_score: best_dist,
            },
            _ => MatchResult::Unmatched,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::KnownCustomer;

    fn registry(entries: &[(&str, &[&[f32]])]) -> Registry {
        let customers = entries.iter().map(|(id, vectors)| KnownCustomer {
            customer_id: id.to_string(),
            display_name: id.to_string(),
            vectors: vectors
                .iter()
                .map(|v| FeatureVector::new(v.to_vec()))
                .collect(),
            phone_number: None,
        });
        Registry::build(3, customers)
    }

    #[test]
    fn test_exact_probe_matches_with_zero_distance() {
        let reg = registry(&[("alice", &[&[0.1, 0.2, 0.3]]), ("bob", &[&[0.9, 0.9, 0.9]])]);
        let probe = FeatureVector::new(vec![0.1, 0.2, 0.3]);
        let result = EuclideanMatcher.compare(&probe, &reg, 0.5);
        assert_eq!(
            result,
            MatchResult::Matched { customer_id: "alice".into(), distance_score: 0.0 }
        );
    }

    #[test]
    fn test_probe_beyond_tolerance_is_unmatched() {
        let reg = registry(&[("alice", &[&[0.0, 0.0, 0.0]])]);
        let probe = FeatureVector::new(vec![1.0, 1.0, 1.0]);
        assert_eq!(EuclideanMatcher.compare(&probe, &reg, 0.5), MatchResult::Unmatched);
    }

    #[test]
    fn test_distance_equal_to_tolerance_is_unmatched() {
        let reg = registry(&[("alice", &[&[0.0, 0.0, 0.0]])]);
        let probe = FeatureVector::new(vec![0.5, 0.0, 0.0]);
        assert_eq!(EuclideanMatcher.compare(&probe, &reg, 0.5), MatchResult::Unmatched);
    }

    #[test]
    fn test_best_vector_across_all_customers() {
        // Bob's second vector is the nearest; all entries must be scanned.
        let reg = registry(&[
            ("alice", &[&[1.0, 0.0, 0.0]]),
            ("bob", &[&[0.0, 1.0, 0.0], &[0.0, 0.0, 0.95]]),
        ]);
        let probe = FeatureVector::new(vec![0.0, 0.0, 1.0]);
        match EuclideanMatcher.compare(&probe, &reg, 0.5) {
            MatchResult::Matched { customer_id, distance_score } => {
                assert_eq!(customer_id, "bob");
                assert!((distance_score - 0.05).abs() < 1e-5);
            }
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn test_exact_tie_prefers_first_enrolled() {
        let reg = registry(&[("first", &[&[1.0, 0.0, 0.0]]), ("second", &[&[-1.0, 0.0, 0.0]])]);
        let probe = FeatureVector::new(vec![0.0, 0.0, 0.0]);
        let result = EuclideanMatcher.compare(&probe, &reg, 2.0);
        assert_eq!(
            result,
            MatchResult::Matched { customer_id: "first".into(), distance_score: 1.0 }
        );
    }

    #[test]
    fn test_dimension_mismatch_and_empty_registry() {
        let reg = registry(&[("alice", &[&[0.0, 0.0, 0.0]])]);
        let short = FeatureVector::new(vec![0.0, 0.0]);
        assert_eq!(EuclideanMatcher.compare(&short, &reg, 10.0), MatchResult::Unmatched);

        let empty = Registry::build(3, Vec::new());
        let probe = FeatureVector::new(vec![0.0, 0.0, 0.0]);
        assert_eq!(EuclideanMatcher.compare(&probe, &empty, 10.0), MatchResult::Unmatched);
    }
}
