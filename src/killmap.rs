//! Kill map and kill matrix.
//!
//! The kill map is the sparse record of which test killed which mutant. It is
//! backed by hash maps, indexed by mutant then test, for cheap upserts and
//! lookups while the scheduler fills it in; every read that exposes an order (iteration, matrix, reports) sorts
//! mutants by id and tests by canonical name at that point.

use crate::model::{Mutant, Outcome, TestCase, WorkOrder};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet};

#[derive(Debug, Clone, Default)]
pub struct KillMap {
    outcomes: HashMap<Mutant, HashMap<TestCase, Outcome>>,
    tests: HashSet<TestCase>,
    covered: HashSet<Mutant>,
    failing_baselines: HashSet<TestCase>,
    declared_mutants: usize,
}

impl KillMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// A kill map for a run over mutants `1..=mutant_count`.
    pub fn with_mutant_count(mutant_count: usize) -> Self {
        Self {
            declared_mutants: mutant_count,
            ..Self::default()
        }
    }

    /// Inserts or replaces the outcome for `(mutant, test)` and returns the
    /// previous one.
    pub fn put(&mut self, mutant: Mutant, test: TestCase, outcome: Outcome) -> Option<Outcome> {
        if !self.tests.contains(&test) {
            self.tests.insert(test.clone());
        }
        self.outcomes.entry(mutant).or_default().insert(test, outcome)
    }

    pub fn get(&self, mutant: Mutant, test: &TestCase) -> Option<Outcome> {
        self.outcomes.get(&mutant)?.get(test).copied()
    }

    /// Number of stored (mutant, test) associations.
    pub fn size(&self) -> usize {
        self.outcomes.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Registers a test that was part of the run even if no outcome was
    /// stored for it (e.g. when there are no mutants).
    pub fn register_test(&mut self, test: TestCase) {
        self.tests.insert(test);
    }

    pub fn record_coverage(&mut self, mutant: Mutant) {
        self.covered.insert(mutant);
    }

    pub fn record_failing_baseline(&mut self, test: TestCase) {
        self.failing_baselines.insert(test);
    }

    /// Number of mutants N: the declared count, or the highest id seen if a
    /// larger one was put.
    pub fn mutant_count(&self) -> usize {
        let highest = self.outcomes.keys().map(|m| m.id() as usize).max().unwrap_or(0);
        self.declared_mutants.max(highest)
    }

    /// Mutants that have at least one stored outcome, ascending.
    pub fn mutants(&self) -> Vec<Mutant> {
        let mut mutants: Vec<Mutant> = self.outcomes.keys().copied().collect();
        mutants.sort_unstable();
        mutants
    }

    /// Tests of the run, by canonical name.
    pub fn tests(&self) -> Vec<TestCase> {
        let mut tests: Vec<TestCase> = self.tests.iter().cloned().collect();
        tests.sort();
        tests
    }

    pub fn covered_mutants(&self) -> BTreeSet<Mutant> {
        self.covered.iter().copied().collect()
    }

    /// Tests whose unmutated run did not pass.
    pub fn failing_baselines(&self) -> Vec<TestCase> {
        let mut tests: Vec<TestCase> = self.failing_baselines.iter().cloned().collect();
        tests.sort();
        tests
    }

    /// All associations in work-order order.
    pub fn entries(&self) -> Vec<(WorkOrder, Outcome)> {
        let mut entries: Vec<(WorkOrder, Outcome)> = self
            .outcomes
            .iter()
            .flat_map(|(mutant, row)| {
                row.iter()
                    .map(move |(test, outcome)| (WorkOrder::new(*mutant, test.clone()), *outcome))
            })
            .collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// True when every mutant in `1..=N` has an outcome for every test.
    pub fn is_complete(&self) -> bool {
        // Rows only ever hold registered tests, so a full row has T entries.
        let tests = self.tests.len();
        Mutant::range(self.mutant_count())
            .all(|m| self.outcomes.get(&m).map_or(0, HashMap::len) == tests)
    }

    pub fn is_mutant_killed(&self, mutant: Mutant) -> bool {
        self.outcomes
            .get(&mutant)
            .is_some_and(|row| row.values().any(|outcome| outcome.is_killed()))
    }

    /// Whether any coverage run reached `mutant`. Tracked apart from the
    /// outcomes: an uncovered mutant and a covered survivor are both `Alive`.
    pub fn is_mutant_covered(&self, mutant: Mutant) -> bool {
        self.covered.contains(&mutant)
    }

    pub fn killed_count(&self) -> usize {
        Mutant::range(self.mutant_count())
            .filter(|m| self.is_mutant_killed(*m))
            .count()
    }

    /// Fraction of mutants killed by at least one test; 0 without mutants.
    pub fn mutation_score(&self) -> f64 {
        let total = self.mutant_count();
        if total == 0 {
            return 0.0;
        }
        self.killed_count() as f64 / total as f64
    }

    /// Dense N × T view: rows are mutants by id, columns are tests by
    /// canonical name, and a cell is 1 iff the test killed the mutant.
    pub fn to_matrix(&self) -> KillMatrix {
        let rows = self.mutant_count();
        let tests = self.tests();
        if rows == 0 || tests.is_empty() {
            return KillMatrix::default();
        }

        let column: HashMap<&TestCase, usize> =
            tests.iter().enumerate().map(|(i, t)| (t, i)).collect();
        let mut cells = vec![vec![0u8; tests.len()]; rows];
        for (mutant, row) in &self.outcomes {
            for (test, outcome) in row {
                if outcome.is_killed() {
                    cells[mutant.index()][column[test]] = 1;
                }
            }
        }

        KillMatrix { tests, cells }
    }

    /// SHA-256 over the ordered content of the map. Two runs over the same
    /// mutants, tests and deterministic executor produce the same value.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("mutants={}\n", self.mutant_count()).as_bytes());
        for (order, outcome) in self.entries() {
            hasher.update(
                format!("{},{},{}\n", order.mutant, order.test, outcome.as_str()).as_bytes(),
            );
        }
        for mutant in self.covered_mutants() {
            hasher.update(format!("covered={}\n", mutant).as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Dense kill matrix derived from a [`KillMap`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KillMatrix {
    tests: Vec<TestCase>,
    cells: Vec<Vec<u8>>,
}

impl KillMatrix {
    pub fn rows(&self) -> usize {
        self.cells.len()
    }

    pub fn columns(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Column headers, sorted by canonical name.
    pub fn tests(&self) -> &[TestCase] {
        &self.tests
    }

    pub fn column_of(&self, test: &TestCase) -> Option<usize> {
        self.tests.binary_search(test).ok()
    }

    pub fn row(&self, mutant: Mutant) -> Option<&[u8]> {
        self.cells.get(mutant.index()).map(Vec::as_slice)
    }

    pub fn cell(&self, mutant: Mutant, test: &TestCase) -> Option<u8> {
        let column = self.column_of(test)?;
        self.row(mutant).map(|row| row[column])
    }

    pub fn as_rows(&self) -> &[Vec<u8>] {
        &self.cells
    }

    pub fn is_mutant_killed(&self, mutant: Mutant) -> bool {
        self.row(mutant).is_some_and(|row| row.contains(&1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(id: u32) -> Mutant {
        Mutant::new(id).unwrap()
    }

    fn t(name: &str) -> TestCase {
        TestCase::new("Suite", name)
    }

    fn example() -> KillMap {
        let mut map = KillMap::with_mutant_count(3);
        map.put(m(1), t("A"), Outcome::Killed);
        map.put(m(2), t("A"), Outcome::Alive);
        map.put(m(3), t("A"), Outcome::Alive);
        map.put(m(1), t("B"), Outcome::Alive);
        map.put(m(2), t("B"), Outcome::Killed);
        map.put(m(3), t("B"), Outcome::Alive);
        for id in [1, 2, 3] {
            map.record_coverage(m(id));
        }
        map
    }

    #[test]
    fn test_put_is_upsert() {
        let mut map = KillMap::new();
        assert_eq!(map.put(m(1), t("A"), Outcome::Alive), None);
        assert_eq!(map.put(m(1), t("A"), Outcome::Killed), Some(Outcome::Alive));
        assert_eq!(map.size(), 1);
        assert_eq!(map.get(m(1), &t("A")), Some(Outcome::Killed));
        assert_eq!(map.get(m(2), &t("A")), None);
    }

    #[test]
    fn test_lookup_by_canonical_name() {
        let mut map = KillMap::with_mutant_count(1);
        map.put(m(1), TestCase::new("Outer#Inner", "run"), Outcome::Killed);
        assert_eq!(map.get(m(1), &TestCase::new("Outer", "Inner#run")), Some(Outcome::Killed));
        map.put(m(1), TestCase::new("Outer", "Inner#run"), Outcome::Alive);
        assert_eq!(map.size(), 1);
        assert_eq!(map.tests().len(), 1);
        assert!(map.is_complete());
        assert!(!map.is_mutant_killed(m(1)));
    }

    #[test]
    fn test_matrix_matches_map() {
        let map = example();
        let matrix = map.to_matrix();
        assert_eq!(matrix.as_rows(), &[vec![1u8, 0], vec![0, 1], vec![0, 0]]);
        for mutant in Mutant::range(3) {
            for test in map.tests() {
                let killed = map.get(mutant, &test) == Some(Outcome::Killed);
                assert_eq!(matrix.cell(mutant, &test), Some(u8::from(killed)));
            }
            assert_eq!(matrix.is_mutant_killed(mutant), map.is_mutant_killed(mutant));
        }
        assert!(!matrix.is_mutant_killed(m(9)));
        assert_eq!(matrix, map.to_matrix());
    }

    #[test]
    fn test_columns_sorted_regardless_of_insertion() {
        let mut map = KillMap::new();
        map.put(m(1), t("zeta"), Outcome::Killed);
        map.put(m(1), t("alpha"), Outcome::Alive);
        let matrix = map.to_matrix();
        assert_eq!(matrix.tests(), &[t("alpha"), t("zeta")]);
        assert_eq!(matrix.row(m(1)), Some(&[0u8, 1][..]));
    }

    #[test]
    fn test_empty_inputs() {
        let map = KillMap::new();
        assert!(map.to_matrix().is_empty());
        assert_eq!(map.mutation_score(), 0.0);
        assert!(map.is_complete());

        let mut no_mutants = KillMap::with_mutant_count(0);
        no_mutants.register_test(t("A"));
        assert!(no_mutants.to_matrix().is_empty());
        assert_eq!(no_mutants.mutation_score(), 0.0);

        let no_tests = KillMap::with_mutant_count(4);
        assert!(no_tests.to_matrix().is_empty());
        assert_eq!(no_tests.mutation_score(), 0.0);
    }

    #[test]
    fn test_predicates_and_score() {
        let map = example();
        assert!(map.is_mutant_killed(m(1)));
        assert!(map.is_mutant_killed(m(2)));
        assert!(!map.is_mutant_killed(m(3)));
        assert!(!map.is_mutant_killed(m(9)));
        assert!(map.is_mutant_covered(m(3)));
        assert!(!map.is_mutant_covered(m(9)));
        assert_eq!(map.killed_count(), 2);
        assert!((map.mutation_score() - 2.0 / 3.0).abs() < 1e-12);
        assert!(map.is_complete());
    }

    #[test]
    fn test_sparse_map_is_incomplete() {
        let mut map = KillMap::with_mutant_count(2);
        map.put(m(1), t("A"), Outcome::Alive);
        assert!(!map.is_complete());
        // Rows exist for every declared mutant even without outcomes.
        assert_eq!(map.to_matrix().rows(), 2);
    }

    #[test]
    fn test_entries_in_work_order_order() {
        let map = example();
        let keys: Vec<(u32, String)> = map
            .entries()
            .into_iter()
            .map(|(order, _)| (order.mutant.id(), order.test.method().to_string()))
            .collect();
        assert_eq!(keys[0], (1, "A".to_string()));
        assert_eq!(keys[1], (1, "B".to_string()));
        assert_eq!(keys[5], (3, "B".to_string()));
    }

    #[test]
    fn test_fingerprint_ignores_insertion_order() {
        let a = example();
        let mut b = KillMap::with_mutant_count(3);
        for id in [3, 2, 1] {
            b.record_coverage(m(id));
        }
        for (order, outcome) in a.entries().into_iter().rev() {
            b.put(order.mutant, order.test.clone(), outcome);
        }
        assert_eq!(a.fingerprint(), b.fingerprint());

        b.put(m(3), t("B"), Outcome::Killed);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
