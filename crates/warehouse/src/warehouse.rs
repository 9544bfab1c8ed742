use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{EngineError, EngineResult, Entity, WarehouseId};

use crate::geo::GeoPoint;

/// Operational status of a warehouse. Only `Active` warehouses take part in selection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WarehouseStatus {
    Active,
    Inactive,
    Maintenance,
}

impl WarehouseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarehouseStatus::Active => "ACTIVE",
            WarehouseStatus::Inactive => "INACTIVE",
            WarehouseStatus::Maintenance => "MAINTENANCE",
        }
    }

    pub fn parse(s: &str) -> EngineResult<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(WarehouseStatus::Active),
            "INACTIVE" => Ok(WarehouseStatus::Inactive),
            "MAINTENANCE" => Ok(WarehouseStatus::Maintenance),
            other => Err(EngineError::invalid(format!("unknown warehouse status '{other}'"))),
        }
    }
}

impl core::fmt::Display for WarehouseStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const MAX_CODE_LEN: usize = 32;

/// Normalize a warehouse code: trimmed, upper-cased, `[A-Z0-9_-]{1,32}`.
pub fn normalize_code(code: &str) -> EngineResult<String> {
    let code = code.trim().to_ascii_uppercase();
    if code.is_empty() {
        return Err(EngineError::invalid("warehouse code cannot be empty"));
    }
    if code.len() > MAX_CODE_LEN {
        return Err(EngineError::invalid(format!(
            "warehouse code longer than {MAX_CODE_LEN} characters"
        )));
    }
    if !code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(EngineError::invalid(format!(
            "warehouse code '{code}' contains characters outside [A-Z0-9_-]"
        )));
    }
    Ok(code)
}

/// Registration input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewWarehouse {
    pub code: String,
    pub name: String,
    pub location: Option<GeoPoint>,
    pub priority: i32,
    pub capacity: i64,
}

impl NewWarehouse {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            location: None,
            priority: 0,
            capacity: 0,
        }
    }

    pub fn with_location(mut self, location: GeoPoint) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_capacity(mut self, capacity: i64) -> Self {
        self.capacity = capacity;
        self
    }
}

/// Mutable metadata of a warehouse. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WarehouseProfile {
    pub name: Option<String>,
    pub location: Option<GeoPoint>,
    pub priority: Option<i32>,
    pub capacity: Option<i64>,
}

/// A physical warehouse.
///
/// The code is unique and never changes; warehouses are never deleted, only
/// moved to `Inactive`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: WarehouseId,
    pub code: String,
    pub name: String,
    pub status: WarehouseStatus,
    pub location: Option<GeoPoint>,
    /// Higher is preferred when distances tie.
    pub priority: i32,
    pub capacity: i64,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Warehouse {
    type Id = WarehouseId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Warehouse {
    /// Validate registration input and build an `Inactive` warehouse.
    pub fn register(id: WarehouseId, input: NewWarehouse, now: DateTime<Utc>) -> EngineResult<Self> {
        let code = normalize_code(&input.code)?;
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(EngineError::invalid("warehouse name cannot be empty"));
        }
        if input.capacity < 0 {
            return Err(EngineError::invalid("capacity cannot be negative"));
        }

        Ok(Self {
            id,
            code,
            name,
            status: WarehouseStatus::Inactive,
            location: input.location,
            priority: input.priority,
            capacity: input.capacity,
            version: 1,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_active(&self) -> bool {
        self.status == WarehouseStatus::Active
    }

    /// Apply a profile update, returning the new state.
    pub fn with_profile(&self, profile: WarehouseProfile, now: DateTime<Utc>) -> EngineResult<Self> {
        let mut next = self.clone();
        if let Some(name) = profile.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(EngineError::invalid("warehouse name cannot be empty"));
            }
            next.name = name;
        }
        if let Some(location) = profile.location {
            next.location = Some(location);
        }
        if let Some(priority) = profile.priority {
            next.priority = priority;
        }
        if let Some(capacity) = profile.capacity {
            if capacity < 0 {
                return Err(EngineError::invalid("capacity cannot be negative"));
            }
            next.capacity = capacity;
        }
        next.version += 1;
        next.updated_at = now;
        Ok(next)
    }

    /// Move to `status`. Activation requires a location, since selection ranks by distance.
    pub fn with_status(&self, status: WarehouseStatus, now: DateTime<Utc>) -> EngineResult<Self> {
        if status == WarehouseStatus::Active && self.location.is_none() {
            return Err(EngineError::invalid(format!(
                "warehouse {} has no location and cannot be activated",
                self.code
            )));
        }
        let mut next = self.clone();
        next.status = status;
        next.version += 1;
        next.updated_at = now;
        Ok(next)
    }
}

/// List filter for the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarehouseFilter {
    pub status: Option<WarehouseStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockflow_core::ErrorKind;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn registration_defaults_to_inactive_with_normalized_code() {
        let w = Warehouse::register(WarehouseId::new(), NewWarehouse::new("  sh-01 ", "Shanghai"), now())
            .unwrap();
        assert_eq!(w.code, "SH-01");
        assert_eq!(w.status, WarehouseStatus::Inactive);
        assert!(!w.is_active());
    }

    #[test]
    fn rejects_bad_codes() {
        let long = "X".repeat(MAX_CODE_LEN + 1);
        for code in ["", "   ", "has space", "ä-1", long.as_str()] {
            let err = normalize_code(code).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "code {code:?}");
        }
    }

    #[test]
    fn activation_requires_location() {
        let w = Warehouse::register(WarehouseId::new(), NewWarehouse::new("BJ", "Beijing"), now())
            .unwrap();
        let err = w.with_status(WarehouseStatus::Active, now()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let located = w
            .with_profile(
                WarehouseProfile {
                    location: Some(GeoPoint::new(39.9, 116.4).unwrap()),
                    ..Default::default()
                },
                now(),
            )
            .unwrap();
        let active = located.with_status(WarehouseStatus::Active, now()).unwrap();
        assert!(active.is_active());
        assert_eq!(active.version, 3);
    }

    #[test]
    fn profile_rejects_negative_capacity() {
        let w = Warehouse::register(WarehouseId::new(), NewWarehouse::new("GZ", "Guangzhou"), now())
            .unwrap();
        let err = w
            .with_profile(
                WarehouseProfile {
                    capacity: Some(-1),
                    ..Default::default()
                },
                now(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!(WarehouseStatus::parse("maintenance").unwrap(), WarehouseStatus::Maintenance);
        assert!(WarehouseStatus::parse("closed").is_err());
    }
}
