use std::collections::BTreeSet;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Transport modality a service can move people with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    Walk,
    Bicycle,
    Car,
    Bus,
    Tram,
    Subway,
    Rail,
    Ferry,
    CableCar,
    CableTram,
    Gondola,
    Funicular,
    Airplane,
    Transit,
}

/// Interface contract a service implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Api {
    PlanningApi,
    BookingApi,
    CredentialsApi,
    PaymentApi,
}

/// Business model a service operates under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MobilityType {
    FreeRide,
    RideHailing,
    RideSharing,
    CarSharing,
    BikeSharing,
    ScooterSharing,
    PublicTransport,
}

/// A registered mobility service.
/// This is the canonical data model used by the directory daemon, its API,
/// and the `/service-info` answer every registered service gives.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRecord {
    /// Unique identifier, e.g. "legendary-service-1"
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub provider: String,

    #[serde(default)]
    pub name: String,

    /// Base URL; probes go to `{service_url}/service-info`
    #[serde(default)]
    pub service_url: String,

    /// Operating area, free text
    #[serde(default)]
    pub area: String,

    #[serde(default)]
    pub modes: BTreeSet<Mode>,

    #[serde(default)]
    pub apis: BTreeSet<Api>,

    #[serde(default)]
    pub mobility_types: BTreeSet<MobilityType>,
}

/// A required field of a `ServiceRecord` is missing or blank.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{field} must not be blank")]
pub struct ValidationError {
    /// Field name as it appears in JSON
    pub field: &'static str,
}

impl ServiceRecord {
    /// Check the fields a record cannot be registered without.
    /// The error names the first offending field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let required = [
            ("id", &self.id),
            ("provider", &self.provider),
            ("name", &self.name),
            ("serviceUrl", &self.service_url),
        ];

        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ValidationError { field });
            }
        }

        Ok(())
    }
}

/// Reachability of a registered service as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityState {
    pub active: bool,

    /// Time of the most recent mark, explicit or from a probe
    pub last_update: DateTime<Utc>,
}

impl ActivityState {
    pub fn new(active: bool) -> Self {
        Self {
            active,
            last_update: Utc::now(),
        }
    }

    pub fn active() -> Self {
        Self::new(true)
    }

    pub fn set_active(&mut self, value: bool) {
        self.active = value;
        self.last_update = Utc::now();
    }

    pub fn mark_active(&mut self) {
        self.set_active(true);
    }

    pub fn mark_inactive(&mut self) {
        self.set_active(false);
    }
}
