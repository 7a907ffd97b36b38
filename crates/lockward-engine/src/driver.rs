//! Driver metadata and entry-point discovery.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use lockward_ir::Program;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Malformed driver metadata: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("No routine is tagged with the init role '{role}'")]
    NoInitRole { role: String },
    #[error("Init routine '{routine}' (role '{role}') has no body in the program")]
    MissingInitRoutine { role: String, routine: String },
}

/// Driver metadata: group name, then role tag, then routine name.
///
/// ```json
/// { "pci_driver": { "probe": "nic_probe", "remove": "nic_remove" } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DriverInfo {
    groups: IndexMap<String, IndexMap<String, String>>,
}

/// Init routine plus the entry points to pair, in metadata order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    pub init_routine: String,
    pub entry_points: Vec<String>,
}

impl DriverInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(text: &str) -> Result<Self, MetadataError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn with_role(
        mut self,
        group: impl Into<String>,
        role: impl Into<String>,
        routine: impl Into<String>,
    ) -> Self {
        self.groups
            .entry(group.into())
            .or_default()
            .insert(role.into(), routine.into());
        self
    }

    /// Every (group, role, routine) triple in metadata order.
    pub fn roles(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.groups.iter().flat_map(|(group, roles)| {
            roles
                .iter()
                .map(move |(role, routine)| (group.as_str(), role.as_str(), routine.as_str()))
        })
    }

    /// First routine tagged with `role`.
    pub fn init_routine(&self, role: &str) -> Option<&str> {
        self.roles()
            .find(|(_, r, _)| *r == role)
            .map(|(_, _, routine)| routine)
    }

    /// Locate the init routine and the entry points present in `program`.
    pub fn discover(&self, program: &Program, init_role: &str) -> Result<Discovery, DiscoveryError> {
        let init = self
            .init_routine(init_role)
            .ok_or_else(|| DiscoveryError::NoInitRole {
                role: init_role.to_string(),
            })?;
        let has_body = program
            .routine_by_name(init)
            .map(|r| r.has_body())
            .unwrap_or(false);
        if !has_body {
            return Err(DiscoveryError::MissingInitRoutine {
                role: init_role.to_string(),
                routine: init.to_string(),
            });
        }

        let mut entry_points: IndexSet<String> = IndexSet::new();
        for (group, role, routine) in self.roles() {
            if routine == init {
                continue;
            }
            match program.routine_by_name(routine) {
                Some(r) if r.has_body() => {
                    entry_points.insert(routine.to_string());
                }
                _ => warn!(group, role, routine, "Entry point not defined in program, skipping"),
            }
        }
        debug!(init, entry_points = entry_points.len(), "Entry points discovered");

        Ok(Discovery {
            init_routine: init.to_string(),
            entry_points: entry_points.into_iter().collect(),
        })
    }
}
