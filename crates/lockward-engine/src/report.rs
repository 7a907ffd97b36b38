use serde::Serialize;
use sha2::{Digest, Sha256};

/// Wall-clock time of one pass, optionally for one entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassProfile {
    pub pass: String,
    pub entry_point: Option<String>,
    pub elapsed_ms: u128,
}

/// Summary of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    pub init_routine: String,
    pub entry_points: Vec<String>,
    pub locks: Vec<String>,
    pub memory_regions: Vec<String>,
    pub instrumentation_regions: usize,
    pub instrumentation_instrs: usize,
    pub pair_checkers: Vec<String>,
    pub race_assertions: usize,
    pub slicing_changes: usize,
    pub existentials: usize,
    pub pass_profiles: Vec<PassProfile>,
    /// SHA-256 of the printed program.
    pub fingerprint: String,
}

impl PipelineReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_of_empty_input() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn report_serializes_profiles() {
        let report = PipelineReport {
            pass_profiles: vec![PassProfile {
                pass: "slicing".into(),
                entry_point: Some("remove".into()),
                elapsed_ms: 3,
            }],
            ..PipelineReport::default()
        };
        let json = report.to_json().unwrap();
        assert!(json.contains("\"pass\": \"slicing\""));
        assert!(json.contains("\"entry_point\": \"remove\""));
    }
}
