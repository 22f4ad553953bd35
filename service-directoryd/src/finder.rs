use std::collections::BTreeSet;
use shared::types::{Api, MobilityType, Mode, ServiceRecord};
use crate::registry::ServiceRegistry;

/// Search criteria. An empty set switches its filter off.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    /// Matches services offering at least one of these modes
    pub modes: BTreeSet<Mode>,
    /// Matches services implementing all of these APIs
    pub apis: BTreeSet<Api>,
    /// Matches services with at least one of these mobility types
    pub mobility_types: BTreeSet<MobilityType>,
    /// Matches services whose id equals one of these, ignoring case
    pub service_ids: BTreeSet<String>,
    pub exclude_inactive: bool,
}

impl SearchQuery {
    fn matches(&self, service: &ServiceRecord) -> bool {
        (self.modes.is_empty() || !self.modes.is_disjoint(&service.modes))
            && (self.apis.is_empty() || self.apis.is_subset(&service.apis))
            && (self.mobility_types.is_empty()
                || !self.mobility_types.is_disjoint(&service.mobility_types))
            && (self.service_ids.is_empty()
                || self
                    .service_ids
                    .iter()
                    .any(|id| eq_ignore_case(id, &service.id)))
    }
}

/// Services matching every filter of `query`, sorted by id
pub fn search(registry: &ServiceRegistry, query: &SearchQuery) -> Vec<ServiceRecord> {
    let mut found: Vec<ServiceRecord> = registry
        .stream_all(query.exclude_inactive)
        .filter(|service| query.matches(service))
        .collect();

    found.sort_by(|a, b| a.id.cmp(&b.id));
    found
}

/// Case-insensitive equality over full Unicode lowercase mappings
fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}
