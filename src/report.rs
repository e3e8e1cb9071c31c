use crate::error::Result;
use crate::killmap::KillMap;
use crate::model::{Mutant, TestCase};
use crate::mutants_log::MutantsLog;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs;
use std::path::Path;
use tracing::info;

pub const CSV_SEPARATOR: char = ',';
pub const CSV_ID_HEADER: &str = "Mutant#";

/// How tests are named in CSV column headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CsvColumns {
    /// Method name only.
    #[default]
    Short,
    /// `<class>#<method>`.
    Canonical,
}

impl CsvColumns {
    fn header(self, test: &TestCase) -> String {
        match self {
            CsvColumns::Short => test.method().to_string(),
            CsvColumns::Canonical => test.canonical_name(),
        }
    }
}

/// Renders the kill matrix as CSV: a `Mutant#` column followed by one 0/1
/// column per test, one row per mutant in id order.
pub fn render_csv(kill_map: &KillMap, columns: CsvColumns) -> String {
    let matrix = kill_map.to_matrix();

    let mut header = String::from(CSV_ID_HEADER);
    for test in matrix.tests() {
        header.push(CSV_SEPARATOR);
        header.push_str(&columns.header(test));
    }

    let mut out = header;
    out.push('\n');
    for (index, row) in matrix.as_rows().iter().enumerate() {
        out.push_str(&(index + 1).to_string());
        for cell in row {
            out.push(CSV_SEPARATOR);
            out.push(if *cell == 1 { '1' } else { '0' });
        }
        out.push('\n');
    }
    out
}

/// Writes the CSV to `path`. Fails only if the file cannot be written; the
/// kill map is untouched either way.
pub fn export_csv(kill_map: &KillMap, path: &Path, columns: CsvColumns) -> Result<()> {
    fs::write(path, render_csv(kill_map, columns))?;
    info!(path = %path.display(), "kill matrix written");
    Ok(())
}

/// Where a mutant stands after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutantStatus {
    /// At least one test killed it.
    Killed,
    /// Reached by some test but never detected.
    Survived,
    /// No test reached it.
    Uncovered,
}

pub fn mutant_status(kill_map: &KillMap, mutant: Mutant) -> MutantStatus {
    if kill_map.is_mutant_killed(mutant) {
        MutantStatus::Killed
    } else if kill_map.is_mutant_covered(mutant) {
        MutantStatus::Survived
    } else {
        MutantStatus::Uncovered
    }
}

/// Orderings for listing mutants. All but `Id` group by status and fall
/// back to ascending id within a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MutantOrder {
    #[default]
    Id,
    /// Killed, then survived, then uncovered.
    KilledFirst,
    /// Survived, then uncovered, then killed: the mutants that need new tests.
    SurvivedFirst,
    /// Uncovered, then survived, then killed.
    UncoveredFirst,
}

impl MutantOrder {
    fn rank(self, status: MutantStatus) -> u8 {
        use MutantStatus::*;
        match (self, status) {
            (MutantOrder::Id, _) => 0,
            (MutantOrder::KilledFirst, Killed) => 0,
            (MutantOrder::KilledFirst, Survived) => 1,
            (MutantOrder::KilledFirst, Uncovered) => 2,
            (MutantOrder::SurvivedFirst, Survived) => 0,
            (MutantOrder::SurvivedFirst, Uncovered) => 1,
            (MutantOrder::SurvivedFirst, Killed) => 2,
            (MutantOrder::UncoveredFirst, Uncovered) => 0,
            (MutantOrder::UncoveredFirst, Survived) => 1,
            (MutantOrder::UncoveredFirst, Killed) => 2,
        }
    }

    pub fn compare(self, kill_map: &KillMap, a: Mutant, b: Mutant) -> Ordering {
        let rank_a = self.rank(mutant_status(kill_map, a));
        let rank_b = self.rank(mutant_status(kill_map, b));
        rank_a.cmp(&rank_b).then(a.cmp(&b))
    }
}

/// All mutants `1..=N` in the requested order.
pub fn ordered_mutants(kill_map: &KillMap, order: MutantOrder) -> Vec<Mutant> {
    let mut mutants: Vec<Mutant> = Mutant::range(kill_map.mutant_count()).collect();
    mutants.sort_by(|a, b| order.compare(kill_map, *a, *b));
    mutants
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub mutants: usize,
    pub tests: usize,
    pub killed: usize,
    pub survived: usize,
    pub uncovered: usize,
    pub mutation_score: f64,
    pub complete: bool,
}

pub fn summarize(kill_map: &KillMap) -> Summary {
    let mut summary = Summary {
        mutants: kill_map.mutant_count(),
        tests: kill_map.tests().len(),
        killed: 0,
        survived: 0,
        uncovered: 0,
        mutation_score: kill_map.mutation_score(),
        complete: kill_map.is_complete(),
    };
    for mutant in Mutant::range(summary.mutants) {
        match mutant_status(kill_map, mutant) {
            MutantStatus::Killed => summary.killed += 1,
            MutantStatus::Survived => summary.survived += 1,
            MutantStatus::Uncovered => summary.uncovered += 1,
        }
    }
    summary
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MutantInfo {
    pub id: u32,
    pub status: MutantStatus,
    pub source_line: Option<u32>,
    pub killed_by: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub date: String,
    pub summary: Summary,
    pub tests: Vec<String>,
    pub failing_baselines: Vec<String>,
    pub matrix: Vec<Vec<u8>>,
    pub mutants: Vec<MutantInfo>,
    pub fingerprint: String,
}

impl AnalysisReport {
    pub fn build(kill_map: &KillMap, log: Option<&MutantsLog>, order: MutantOrder) -> Self {
        let now: DateTime<Local> = Local::now();
        let matrix = kill_map.to_matrix();
        let tests = kill_map.tests();

        let mutants = ordered_mutants(kill_map, order)
            .into_iter()
            .map(|mutant| MutantInfo {
                id: mutant.id(),
                status: mutant_status(kill_map, mutant),
                source_line: log.and_then(|log| log.line_number(mutant)),
                killed_by: tests
                    .iter()
                    .filter(|test| matrix.cell(mutant, test) == Some(1))
                    .map(TestCase::canonical_name)
                    .collect(),
            })
            .collect();

        AnalysisReport {
            date: now.format("%d/%m/%Y %H:%M:%S").to_string(),
            summary: summarize(kill_map),
            tests: tests.iter().map(TestCase::canonical_name).collect(),
            failing_baselines: kill_map
                .failing_baselines()
                .iter()
                .map(TestCase::canonical_name)
                .collect(),
            matrix: matrix.as_rows().to_vec(),
            mutants,
            fingerprint: kill_map.fingerprint(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json_content = serde_json::to_string_pretty(self)?;
        fs::write(path, json_content)?;
        info!(path = %path.display(), "report written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Outcome;
    use tempfile::tempdir;

    fn m(id: u32) -> Mutant {
        Mutant::new(id).unwrap()
    }

    fn t(name: &str) -> TestCase {
        TestCase::new("Suite", name)
    }

    /// Mutants 1 and 2 killed, 3 covered but alive, 4 uncovered.
    fn kill_map() -> KillMap {
        let mut map = KillMap::with_mutant_count(4);
        for id in 1..=4 {
            map.put(m(id), t("A"), Outcome::Alive);
            map.put(m(id), t("B"), Outcome::Alive);
        }
        map.put(m(1), t("A"), Outcome::Killed);
        map.put(m(2), t("B"), Outcome::Killed);
        for id in [1, 2, 3] {
            map.record_coverage(m(id));
        }
        map
    }

    fn example() -> KillMap {
        let mut map = KillMap::with_mutant_count(3);
        for (id, name, outcome) in [
            (1, "A", Outcome::Killed),
            (2, "A", Outcome::Alive),
            (3, "A", Outcome::Alive),
            (1, "B", Outcome::Alive),
            (2, "B", Outcome::Killed),
            (3, "B", Outcome::Alive),
        ] {
            map.put(m(id), t(name), outcome);
        }
        map
    }

    #[test]
    fn test_render_csv() {
        let csv = render_csv(&example(), CsvColumns::Short);
        assert_eq!(csv, "Mutant#,A,B\n1,1,0\n2,0,1\n3,0,0\n");

        let canonical = render_csv(&example(), CsvColumns::Canonical);
        assert!(canonical.starts_with("Mutant#,Suite#A,Suite#B\n"));
    }

    #[test]
    fn test_render_csv_empty() {
        assert_eq!(render_csv(&KillMap::new(), CsvColumns::Short), "Mutant#\n");
    }

    #[test]
    fn test_export_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("killMatrix.csv");
        export_csv(&example(), &path, CsvColumns::Short).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().next(), Some("Mutant#,A,B"));
        for line in content.lines() {
            assert!(!line.ends_with(CSV_SEPARATOR));
        }

        let missing = dir.path().join("no/such/dir/killMatrix.csv");
        assert!(export_csv(&example(), &missing, CsvColumns::Short).is_err());
    }

    #[test]
    fn test_statuses_and_summary() {
        let map = kill_map();
        assert_eq!(mutant_status(&map, m(1)), MutantStatus::Killed);
        assert_eq!(mutant_status(&map, m(3)), MutantStatus::Survived);
        assert_eq!(mutant_status(&map, m(4)), MutantStatus::Uncovered);

        let summary = summarize(&map);
        assert_eq!(summary.mutants, 4);
        assert_eq!(summary.tests, 2);
        assert_eq!((summary.killed, summary.survived, summary.uncovered), (2, 1, 1));
        assert_eq!(summary.mutation_score, 0.5);
        assert!(summary.complete);
    }

    #[test]
    fn test_mutant_orders() {
        let map = kill_map();
        let ids = |order| -> Vec<u32> {
            ordered_mutants(&map, order).into_iter().map(Mutant::id).collect()
        };
        assert_eq!(ids(MutantOrder::Id), vec![1, 2, 3, 4]);
        assert_eq!(ids(MutantOrder::KilledFirst), vec![1, 2, 3, 4]);
        assert_eq!(ids(MutantOrder::SurvivedFirst), vec![3, 4, 1, 2]);
        assert_eq!(ids(MutantOrder::UncoveredFirst), vec![4, 3, 1, 2]);
    }

    #[test]
    fn test_report_serialization() {
        let map = kill_map();
        let log = MutantsLog::parse("1:AOR:F@f:10:x\n2:AOR:F@f:11:y\n3:AOR:F@f:12:z\n4:AOR:F@f:20:w\n");
        let report = AnalysisReport::build(&map, Some(&log), MutantOrder::SurvivedFirst);

        assert_eq!(report.mutants[0].id, 3);
        assert_eq!(report.mutants[0].source_line, Some(12));
        assert_eq!(report.tests, vec!["Suite#A", "Suite#B"]);
        let killed_one = report.mutants.iter().find(|info| info.id == 1).unwrap();
        assert_eq!(killed_one.killed_by, vec!["Suite#A"]);

        let dir = tempdir().unwrap();
        let path = dir.path().join("report.json");
        report.save(&path).unwrap();
        let loaded: AnalysisReport =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.summary, report.summary);
        assert_eq!(loaded.matrix, map.to_matrix().as_rows().to_vec());
        assert_eq!(loaded.fingerprint, map.fingerprint());
    }
}
