use crate::error::{AnalysisError, Result};
use crate::model::Mutant;
use regex::Regex;
use std::collections::BTreeSet;
use std::fs;
use std::ops::RangeInclusive;
use std::path::Path;

/// Coverage written by an instrumented program during a coverage run.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CoverageReport {
    pub covered: BTreeSet<Mutant>,
    /// One message per line that could not be read as an id or a range.
    pub rejected: Vec<String>,
}

impl CoverageReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Reads a coverage file. Each line is either a single mutant id (`12`) or
/// an inclusive range (`12-15`); blank lines are ignored. Malformed lines are
/// collected in [`CoverageReport::rejected`] without discarding the rest, so
/// only I/O failures are errors.
pub fn read_coverage_file(coverage_file_path: &Path) -> Result<CoverageReport> {
    let content = fs::read_to_string(coverage_file_path)?;
    scan_coverage(&content)
}

pub fn scan_coverage(content: &str) -> Result<CoverageReport> {
    let entry_pattern = Regex::new(r"^(\d+)(?:\s*-\s*(\d+))?$")?;
    let mut report = CoverageReport::default();

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_entry(&entry_pattern, line, index + 1) {
            // Id 0 is the coverage selection itself, never a mutant.
            Ok(range) => report.covered.extend(range.filter_map(Mutant::new)),
            Err(err) => report.rejected.push(err.to_string()),
        }
    }

    Ok(report)
}

fn parse_entry(pattern: &Regex, line: &str, line_number: usize) -> Result<RangeInclusive<u32>> {
    let captures = pattern.captures(line).ok_or_else(|| {
        AnalysisError::Coverage(format!("Malformed entry '{}' on line {}", line, line_number))
    })?;

    let invalid_id = || {
        AnalysisError::Coverage(format!("Invalid mutant id '{}' on line {}", line, line_number))
    };
    let from: u32 = captures[1].parse().map_err(|_| invalid_id())?;
    let to: u32 = match captures.get(2) {
        Some(to) => to.as_str().parse().map_err(|_| invalid_id())?,
        None => from,
    };

    if to < from {
        return Err(AnalysisError::Coverage(format!(
            "Descending range '{}' on line {}",
            line, line_number
        )));
    }
    Ok(from..=to)
}
