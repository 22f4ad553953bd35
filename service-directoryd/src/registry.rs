use dashmap::DashMap;
use thiserror::Error;
use shared::types::{ActivityState, ServiceRecord};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Service with id [{0}] not found")]
    NotFound(String),

    #[error("{0}")]
    InvalidArgument(String),
}

/// A record together with its activity state.
/// Keeping both in one entry means neither can exist without the other.
#[derive(Debug, Clone)]
struct Registration {
    service: ServiceRecord,
    state: ActivityState,
}

/// In-memory registry of mobility services and their activity states.
///
/// Entries are sharded, so marking one service never waits on another.
/// The lazy `stream_*` iterators hold shard read guards while alive; collect
/// them before mutating the registry from the same task.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    entries: DashMap<String, Registration>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Snapshot of every registered service, active or not
    pub fn get_all(&self) -> Vec<ServiceRecord> {
        self.stream_all(false).collect()
    }

    pub fn get_by_id(&self, id: &str) -> Result<ServiceRecord, RegistryError> {
        self.entries
            .get(id)
            .map(|entry| entry.service.clone())
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Insert or overwrite a service. Its state starts out active.
    pub fn register(&self, service: ServiceRecord) -> Result<ServiceRecord, RegistryError> {
        if service.id.trim().is_empty() {
            return Err(RegistryError::InvalidArgument(
                "The provided service does not have an id.".to_string(),
            ));
        }

        tracing::info!(service_id = %service.id, "Registering mobility service");

        self.entries.insert(
            service.id.clone(),
            Registration {
                service: service.clone(),
                state: ActivityState::active(),
            },
        );

        Ok(service)
    }

    /// Replace a registered service and mark it active.
    /// The stored id is always `id`, whatever the record carries.
    pub fn update(&self, id: &str, mut service: ServiceRecord) -> Result<ServiceRecord, RegistryError> {
        let mut entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        tracing::info!(service_id = %id, "Updating registered service");

        service.id = id.to_string();
        entry.service = service.clone();
        entry.state.mark_active();

        Ok(service)
    }

    pub fn delete(&self, id: &str) {
        if self.entries.remove(id).is_some() {
            tracing::info!(service_id = %id, "Deleted service");
        }
    }

    pub fn delete_all(&self) {
        tracing::info!(count = self.entries.len(), "Deleting all registered services");
        self.entries.clear();
    }

    /// Lazily yield registered services, optionally only the active ones
    pub fn stream_all(&self, exclude_inactive: bool) -> impl Iterator<Item = ServiceRecord> + '_ {
        self.entries
            .iter()
            .filter(move |entry| !exclude_inactive || entry.state.active)
            .map(|entry| entry.service.clone())
    }

    /// Lazily yield every service paired with its current state
    pub fn stream_service_states(&self) -> impl Iterator<Item = (ServiceRecord, ActivityState)> + '_ {
        self.entries
            .iter()
            .map(|entry| (entry.service.clone(), entry.state))
    }

    pub fn get_service_state(&self, id: &str) -> Option<ActivityState> {
        self.entries.get(id).map(|entry| entry.state)
    }

    /// Unknown services are reported inactive
    pub fn is_active(&self, id: &str) -> bool {
        self.entries
            .get(id)
            .map(|entry| entry.state.active)
            .unwrap_or(false)
    }

    /// Set the activity flag of a registered service; unknown ids are ignored
    pub fn set_active(&self, id: &str, value: bool) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            if entry.state.active != value {
                tracing::debug!(service_id = %id, active = value, "Service activity changed");
            }
            entry.state.set_active(value);
        }
    }

    pub fn mark_active(&self, id: &str) {
        self.set_active(id, true);
    }

    pub fn mark_inactive(&self, id: &str) {
        self.set_active(id, false);
    }
}
