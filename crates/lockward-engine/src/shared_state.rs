//! Shared-state analysis seam.
//!
//! Region discovery is external; the pipeline only asks which memory regions
//! an entry point (or a pair of them) touches.

use indexmap::IndexSet;
use serde::Serialize;
use std::fmt;

use lockward_ir::graph::reachable_routines;
use lockward_ir::{Expr, InstrKind, Program};

/// Opaque identifier of a shared memory region, e.g. `$M.0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MemoryRegion(pub String);

impl MemoryRegion {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub trait SharedStateAnalyser {
    /// Regions accessed by `entry_point`, in a stable order.
    fn regions_of(&self, program: &Program, entry_point: &str) -> Vec<MemoryRegion>;

    /// Regions both entry points access, in `ep1`'s order.
    fn pair_regions(&self, program: &Program, ep1: &str, ep2: &str) -> Vec<MemoryRegion> {
        let other: IndexSet<MemoryRegion> = self.regions_of(program, ep2).into_iter().collect();
        self.regions_of(program, ep1)
            .into_iter()
            .filter(|r| other.contains(r))
            .collect()
    }

    /// Sets of offset expressions known to address the same location.
    fn matched_accesses(&self) -> Vec<Vec<Expr>> {
        Vec::new()
    }
}

/// Collects the regions of every access reachable from the entry point.
#[derive(Debug, Clone, Default)]
pub struct AccessScanAnalyser {
    matched: Vec<Vec<Expr>>,
}

impl AccessScanAnalyser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_matched_accesses(mut self, matched: Vec<Vec<Expr>>) -> Self {
        self.matched = matched;
        self
    }
}

impl SharedStateAnalyser for AccessScanAnalyser {
    fn regions_of(&self, program: &Program, entry_point: &str) -> Vec<MemoryRegion> {
        let Some(root) = program.find_routine(entry_point) else {
            return Vec::new();
        };
        let mut regions: IndexSet<MemoryRegion> = IndexSet::new();
        for id in reachable_routines(program, root) {
            for instr in program.routine(id).instrs() {
                if let InstrKind::Access(access) = &instr.kind {
                    regions.insert(MemoryRegion::new(access.region.clone()));
                }
            }
        }
        regions.into_iter().collect()
    }

    fn matched_accesses(&self) -> Vec<Vec<Expr>> {
        self.matched.clone()
    }
}
