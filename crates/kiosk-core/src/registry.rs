//! In-memory registry of known customers.
//!
//! Built once at startup and shared read-only (behind `Arc`) by the sensing
//! loop and every visit task.

use crate::types::{FeatureVector, KnownCustomer};
use std::collections::HashMap;

/// Flattened enrollment entry: (customer index, enrolled vector).
#[derive(Debug, Clone)]
pub(crate) struct Enrollment {
    pub(crate) customer: usize,
    pub(crate) vector: FeatureVector,
}

/// Immutable set of known customers with all enrolled vectors in
/// enrollment order.
#[derive(Debug, Clone)]
pub struct Registry {
    dimension: usize,
    customers: Vec<KnownCustomer>,
    by_id: HashMap<String, usize>,
    enrollments: Vec<Enrollment>,
}

impl Registry {
    /// Build a registry, skipping customers whose entries violate the
    /// vector contract (wrong dimension, non-finite values, no vectors,
    /// duplicate id).
    pub fn build(dimension: usize, customers: impl IntoIterator<Item = KnownCustomer>) -> Self {
        let mut registry = Self {
            dimension,
            customers: Vec::new(),
            by_id: HashMap::new(),
            enrollments: Vec::new(),
        };

        for customer in customers {
            if let Err(reason) = registry.validate(&customer) {
                tracing::warn!(
                    customer_id = %customer.customer_id,
                    reason,
                    "skipping registry entry"
                );
                continue;
            }

            let idx = registry.customers.len();
            for vector in &customer.vectors {
                registry.enrollments.push(Enrollment {
                    customer: idx,
                    vector: vector.clone(),
                });
            }
            registry.by_id.insert(customer.customer_id.clone(), idx);
            registry.customers.push(customer);
        }

        tracing::info!(
            customers = registry.customers.len(),
            vectors = registry.enrollments.len(),
            dimension,
            "registry loaded"
        );

        registry
    }

    fn validate(&self, customer: &KnownCustomer) -> Result<(), &'static str> {
        if customer.vectors.is_empty() {
            return Err("no enrolled vectors");
        }
        if self.by_id.contains_key(&customer.customer_id) {
            return Err("duplicate customer id");
        }
        if customer.vectors.iter().any(|v| v.dimension() != self.dimension) {
            return Err("enrolled vector dimension mismatch");
        }
        if customer.vectors.iter().any(|v| !v.is_finite()) {
            return Err("enrolled vector contains non-finite values");
        }
        Ok(())
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.customers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.customers.is_empty()
    }

    /// Total enrolled vectors across all customers.
    pub fn vector_count(&self) -> usize {
        self.enrollments.len()
    }

    pub fn get(&self, customer_id: &str) -> Option<&KnownCustomer> {
        self.by_id.get(customer_id).map(|&idx| &self.customers[idx])
    }

    pub fn customers(&self) -> &[KnownCustomer] {
        &self.customers
    }

    pub(crate) fn enrollments(&self) -> &[Enrollment] {
        &self.enrollments
    }

    pub(crate) fn customer_at(&self, idx: usize) -> &KnownCustomer {
        &self.customers[idx]
    }
}
