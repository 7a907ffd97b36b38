use serde::Serialize;
use std::fmt;

/// Direction of a memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum AccessKind {
    Read,
    Write,
}

impl AccessKind {
    pub const ALL: [AccessKind; 2] = [AccessKind::Write, AccessKind::Read];

    /// Upper-case tag used in generated variable names.
    pub fn tag(self) -> &'static str {
        match self {
            AccessKind::Read => "READ",
            AccessKind::Write => "WRITE",
        }
    }
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessKind::Read => write!(f, "read"),
            AccessKind::Write => write!(f, "write"),
        }
    }
}

/// Typed metadata attached to declarations, routines and instructions.
///
/// Printed as `{:attr ...}` attributes for the verifier's reporting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Decoration {
    /// Ask the verifier to snapshot state under this name.
    CaptureState(String),
    /// The memory region an assertion or capture refers to.
    Resource(String),
    /// Marks a race-checking obligation.
    RaceChecking,
    /// Existential boolean discovered by the refinement loop.
    Existential,
    /// Synthetic pairwise checking routine.
    Checker,
    /// Routine is inlined at its call sites and carries no contract of its own.
    Inline,
    /// Has-occurred / offset state written by access instrumentation.
    AccessChecking,
    /// Instruction emitted to record an access of `kind` to `region`.
    AccessLog { kind: AccessKind, region: String },
}

impl Decoration {
    pub fn is_access_log(&self) -> bool {
        matches!(self, Decoration::AccessLog { .. })
    }
}

impl fmt::Display for Decoration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decoration::CaptureState(name) => write!(f, "{{:captureState \"{name}\"}}"),
            Decoration::Resource(region) => write!(f, "{{:resource \"{region}\"}}"),
            Decoration::RaceChecking => write!(f, "{{:race_checking}}"),
            Decoration::Existential => write!(f, "{{:existential true}}"),
            Decoration::Checker => write!(f, "{{:checker}}"),
            Decoration::Inline => write!(f, "{{:inline 1}}"),
            Decoration::AccessChecking => write!(f, "{{:access_checking}}"),
            Decoration::AccessLog { kind, region } => {
                write!(f, "{{:access_log \"{kind}\", \"{region}\"}}")
            }
        }
    }
}
