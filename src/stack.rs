// MIT License - Copyright (c) 2026 Peter Wright
// Unit registry

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PlcError, Result};

/// Stack-wide unit identifier. Configured units use ids starting at 1.
pub type UnitId = u32;

/// Alias accepted wherever a unit id is expected, meaning "this board".
///
/// Calls addressed to it never leave the process.
pub const LOCAL_UNIT: UnitId = 0;

/// One controller board of the installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackUnit {
    pub id: UnitId,
    pub name: String,
    pub ip: String,
    pub port: u16,
}

impl StackUnit {
    pub fn new(id: UnitId, name: impl Into<String>, ip: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            name: name.into(),
            ip: ip.into(),
            port,
        }
    }

    /// `ip:port` of the unit's RPC server.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// Registry of all known units, including the local one.
///
/// Populated at configuration time and read-only afterwards.
#[derive(Debug, Clone)]
pub struct Stack {
    units: Vec<StackUnit>,
    by_name: HashMap<String, usize>,
    by_id: HashMap<UnitId, usize>,
    local: UnitId,
}

impl Stack {
    /// Create an empty registry for the board identified by `local`.
    pub fn new(local: UnitId) -> Self {
        Self {
            units: Vec::new(),
            by_name: HashMap::new(),
            by_id: HashMap::new(),
            local,
        }
    }

    /// Register a unit. Names and ids must be unique across the stack.
    pub fn add(&mut self, unit: StackUnit) -> Result<()> {
        if unit.id == LOCAL_UNIT {
            return Err(PlcError::config(format!(
                "stack unit \"{}\" uses reserved id {}",
                unit.name, LOCAL_UNIT
            )));
        }
        if self.by_name.contains_key(&unit.name) {
            return Err(PlcError::DuplicateUnitName { name: unit.name });
        }
        if self.by_id.contains_key(&unit.id) {
            return Err(PlcError::DuplicateUnitId { id: unit.id });
        }

        info!("Add Stack unit: \"{}\" ({}) at {}", unit.name, unit.id, unit.addr());
        let idx = self.units.len();
        self.by_name.insert(unit.name.clone(), idx);
        self.by_id.insert(unit.id, idx);
        self.units.push(unit);
        Ok(())
    }

    pub fn resolve_by_name(&self, name: &str) -> Option<&StackUnit> {
        self.by_name.get(name).map(|&idx| &self.units[idx])
    }

    /// Look a unit up by id; [`LOCAL_UNIT`] resolves to the local board's record.
    pub fn resolve_by_id(&self, id: UnitId) -> Option<&StackUnit> {
        let id = if id == LOCAL_UNIT { self.local } else { id };
        self.by_id.get(&id).map(|&idx| &self.units[idx])
    }

    /// Whether a user-supplied unit name is known.
    pub fn is_known_name(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Id of the board this process runs on.
    pub fn local_id(&self) -> UnitId {
        self.local
    }

    /// Whether calls to `id` are served in-process.
    pub fn is_local(&self, id: UnitId) -> bool {
        id == LOCAL_UNIT || id == self.local
    }

    /// Units in registration order.
    pub fn units(&self) -> impl Iterator<Item = &StackUnit> {
        self.units.iter()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}
