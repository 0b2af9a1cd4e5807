//! Read-only collaborators: the resource catalog and the display exchange rate

use rental_api::ExchangeRate;
use rental_config::{Policy, Resource};
use rental_util::ResourceId;
use std::collections::HashMap;

/// Source of rentable resources and their hourly rates
pub trait Catalog: Send + Sync {
    /// Look up a resource by id, active or not
    fn lookup(&self, id: &ResourceId) -> Option<Resource>;

    /// All resources in display order
    fn list(&self) -> Vec<Resource>;
}

/// Source of the display-currency conversion rate
pub trait RateSource: Send + Sync {
    fn rate(&self) -> Option<ExchangeRate>;
}

/// Catalog loaded from the `[[resources]]` configuration tables
#[derive(Debug, Clone, Default)]
pub struct ConfigCatalog {
    order: Vec<ResourceId>,
    resources: HashMap<ResourceId, Resource>,
}

impl ConfigCatalog {
    pub fn new(resources: impl IntoIterator<Item = Resource>) -> Self {
        let mut catalog = Self::default();
        for resource in resources {
            if catalog.resources.contains_key(&resource.id) {
                continue;
            }
            catalog.order.push(resource.id.clone());
            catalog.resources.insert(resource.id.clone(), resource);
        }
        catalog
    }

    pub fn from_policy(policy: &Policy) -> Self {
        Self::new(policy.resources.iter().cloned())
    }
}

impl Catalog for ConfigCatalog {
    fn lookup(&self, id: &ResourceId) -> Option<Resource> {
        self.resources.get(id).cloned()
    }

    fn list(&self) -> Vec<Resource> {
        self.order
            .iter()
            .filter_map(|id| self.resources.get(id).cloned())
            .collect()
    }
}

/// Rate fixed at configuration time
#[derive(Debug, Clone, Default)]
pub struct FixedRate(pub Option<ExchangeRate>);

impl RateSource for FixedRate {
    fn rate(&self) -> Option<ExchangeRate> {
        self.0.clone()
    }
}
