//! Scan-to-scan diff computation (spec §4.4 step 7 / §8 property 2).

use std::collections::HashSet;

use serde::Serialize;

use crate::ingest::envelope::NormalizedFinding;

#[derive(Clone, Debug, Default, Serialize)]
pub struct ScanDiff {
    pub new: Vec<NormalizedFindingDto>,
    pub fixed: Vec<NormalizedFindingDto>,
    pub persistent: Vec<NormalizedFindingDto>,
    pub new_count: usize,
    pub fixed_count: usize,
    pub persistent_count: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct NormalizedFindingDto {
    pub cve_id: String,
    pub package_name: String,
    pub package_version: String,
}

impl From<&NormalizedFinding> for NormalizedFindingDto {
    fn from(f: &NormalizedFinding) -> Self {
        Self {
            cve_id: f.cve_id.clone(),
            package_name: f.package_name.clone(),
            package_version: f.package_version.clone(),
        }
    }
}

/// `previous` is empty for a first-ever scan, in which case every current
/// finding is `new` and there is nothing to mark fixed.
pub fn compute_diff(
    previous: &[NormalizedFinding],
    current: &[NormalizedFinding],
) -> ScanDiff {
    let previous_set: HashSet<&NormalizedFinding> = previous.iter().collect();
    let current_set: HashSet<&NormalizedFinding> = current.iter().collect();

    let new: Vec<NormalizedFindingDto> = current_set
        .iter()
        .filter(|f| !previous_set.contains(*f))
        .map(|f| NormalizedFindingDto::from(*f))
        .collect();
    let fixed: Vec<NormalizedFindingDto> = previous_set
        .iter()
        .filter(|f| !current_set.contains(*f))
        .map(|f| NormalizedFindingDto::from(*f))
        .collect();
    let persistent: Vec<NormalizedFindingDto> = current_set
        .iter()
        .filter(|f| previous_set.contains(*f))
        .map(|f| NormalizedFindingDto::from(*f))
        .collect();

    ScanDiff {
        new_count: new.len(),
        fixed_count: fixed.len(),
        persistent_count: persistent.len(),
        new,
        fixed,
        persistent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(cve: &str) -> NormalizedFinding {
        NormalizedFinding {
            cve_id: cve.to_string(),
            package_name: "openssl".to_string(),
            package_version: "1.1.1".to_string(),
        }
    }

    #[test]
    fn first_scan_is_all_new() {
        let diff = compute_diff(&[], &[finding("CVE-1"), finding("CVE-2")]);
        assert_eq!(diff.new_count, 2);
        assert_eq!(diff.fixed_count, 0);
        assert_eq!(diff.persistent_count, 0);
    }

    #[test]
    fn partitions_are_disjoint_and_cover_union() {
        let previous = vec![finding("CVE-1"), finding("CVE-2")];
        let current = vec![finding("CVE-2"), finding("CVE-3")];
        let diff = compute_diff(&previous, &current);
        assert_eq!(diff.new_count, 1);
        assert_eq!(diff.fixed_count, 1);
        assert_eq!(diff.persistent_count, 1);
    }
}
