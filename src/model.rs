//! Core value types: mutants, tests, work orders and outcomes.

use crate::error::{AnalysisError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::str::FromStr;

/// Separator between the declaring class and the method in a test's canonical name.
pub const TEST_SEPARATOR: char = '#';

/// A mutant, identified by its 1-based position in the mutants log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mutant(u32);

impl Mutant {
    /// Returns `None` for id 0, which is reserved for the coverage selection.
    pub fn new(id: u32) -> Option<Self> {
        (id > 0).then_some(Self(id))
    }

    pub fn id(self) -> u32 {
        self.0
    }

    /// Row of this mutant in a kill matrix.
    pub fn index(self) -> usize {
        (self.0 - 1) as usize
    }

    /// All mutants `1..=count`.
    pub fn range(count: usize) -> impl Iterator<Item = Mutant> {
        (1..=count as u32).map(Mutant)
    }
}

impl fmt::Display for Mutant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single test method, e.g. `triangle.TriangleTest#testEquilateral`.
///
/// Equality and ordering are defined on the canonical `<class>#<method>` form,
/// which is what fixes the column order of a kill matrix.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct TestCase {
    class: String,
    method: String,
}

impl TestCase {
    pub fn new(class: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            method: method.into(),
        }
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    /// The method name, used as the short column name in CSV exports.
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn canonical_name(&self) -> String {
        format!("{}{}{}", self.class, TEST_SEPARATOR, self.method)
    }

    /// Bytes of "class#method" without allocating.
    fn canonical_bytes(&self) -> impl Iterator<Item = u8> + '_ {
        self.class
            .bytes()
            .chain([TEST_SEPARATOR as u8])
            .chain(self.method.bytes())
    }

    fn cmp_canonical(&self, other: &Self) -> Ordering {
        self.canonical_bytes().cmp(other.canonical_bytes())
    }
}

impl PartialEq for TestCase {
    fn eq(&self, other: &Self) -> bool {
        self.cmp_canonical(other) == Ordering::Equal
    }
}

impl Hash for TestCase {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Byte by byte so that equal canonical forms hash alike whatever the
        // class/method split.
        for byte in self.canonical_bytes() {
            state.write_u8(byte);
        }
        state.write_usize(self.class.len() + 1 + self.method.len());
    }
}

impl PartialOrd for TestCase {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TestCase {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_canonical(other)
    }
}

impl fmt::Display for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.class, TEST_SEPARATOR, self.method)
    }
}

impl FromStr for TestCase {
    type Err = AnalysisError;

    /// Parses `Class#method`. The class may be empty for free-standing test
    /// functions, the method may not.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (class, method) = s
            .rsplit_once(TEST_SEPARATOR)
            .ok_or_else(|| AnalysisError::InvalidTestName(s.to_string()))?;
        if method.is_empty() {
            return Err(AnalysisError::InvalidTestName(s.to_string()));
        }
        Ok(TestCase::new(class, method))
    }
}

/// Reads a test list: one `Class#method` per line, blank lines and `//`
/// comments ignored.
pub fn read_test_list(path: &Path) -> Result<Vec<TestCase>> {
    parse_test_list(&fs::read_to_string(path)?)
}

pub fn parse_test_list(content: &str) -> Result<Vec<TestCase>> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("//"))
        .map(|line| line.parse::<TestCase>())
        .collect()
}

/// Key of the kill map: one mutant run against one test.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkOrder {
    pub mutant: Mutant,
    pub test: TestCase,
}

impl WorkOrder {
    pub fn new(mutant: Mutant, test: TestCase) -> Self {
        Self { mutant, test }
    }
}

/// Whether a test distinguished a mutant from the original program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Alive,
    Killed,
}

impl Outcome {
    pub fn is_killed(self) -> bool {
        matches!(self, Outcome::Killed)
    }

    /// Kill matrix cell value.
    pub fn as_cell(self) -> u8 {
        match self {
            Outcome::Alive => 0,
            Outcome::Killed => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Alive => "alive",
            Outcome::Killed => "killed",
        }
    }
}

impl FromStr for Outcome {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "alive" => Ok(Outcome::Alive),
            "killed" => Ok(Outcome::Killed),
            other => Err(AnalysisError::InvalidInput(format!(
                "Unknown outcome '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutant_zero_is_not_a_mutant() {
        assert!(Mutant::new(0).is_none());
        let m = Mutant::new(3).unwrap();
        assert_eq!(m.id(), 3);
        assert_eq!(m.index(), 2);
        assert_eq!(Mutant::range(3).map(Mutant::id).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_test_case_orders_by_canonical_name() {
        let a = TestCase::new("pkg.Alpha", "zeta");
        let b = TestCase::new("pkg.Alpha", "zz");
        let c = TestCase::new("pkg.AlphaTest", "a");
        // '#' sorts before 'T', so every Alpha method precedes AlphaTest.
        let mut tests = vec![c.clone(), b.clone(), a.clone()];
        tests.sort();
        assert_eq!(tests, vec![a, b, c]);
        assert_eq!(
            tests.iter().map(|t| t.canonical_name()).collect::<Vec<_>>(),
            {
                let mut names: Vec<String> = tests.iter().map(|t| t.to_string()).collect();
                names.sort();
                names
            }
        );
    }

    #[test]
    fn test_hash_follows_canonical_equality() {
        use std::collections::hash_map::DefaultHasher;

        fn hash_of(test: &TestCase) -> u64 {
            let mut hasher = DefaultHasher::new();
            test.hash(&mut hasher);
            hasher.finish()
        }

        // Same canonical name, different split.
        let a = TestCase::new("pkg.Outer#Inner", "run");
        let b = TestCase::new("pkg.Outer", "Inner#run");
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_eq!(hash_of(&a), hash_of(&a.clone()));
        assert_ne!(hash_of(&a), hash_of(&TestCase::new("pkg.Outer#Inner", "runs")));

        let mut set = std::collections::HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_parse_test_case() {
        let test: TestCase = "triangle.TriangleTest#testScalene".parse().unwrap();
        assert_eq!(test.class(), "triangle.TriangleTest");
        assert_eq!(test.method(), "testScalene");
        assert_eq!(test.canonical_name(), "triangle.TriangleTest#testScalene");

        assert!("noSeparator".parse::<TestCase>().is_err());
        assert!("Class#".parse::<TestCase>().is_err());
    }

    #[test]
    fn test_parse_test_list() {
        let tests = parse_test_list(
            "// triangle suite\ntriangle.TriangleTest#testA\n\n  triangle.TriangleTest#testB  \n",
        )
        .unwrap();
        assert_eq!(tests.len(), 2);
        assert_eq!(tests[1].method(), "testB");

        assert!(parse_test_list("valid#one\ninvalid\n").is_err());
    }

    #[test]
    fn test_work_order_ordering() {
        let t_a = TestCase::new("S", "A");
        let t_b = TestCase::new("S", "B");
        let m1 = Mutant::new(1).unwrap();
        let m2 = Mutant::new(2).unwrap();
        let mut orders = vec![
            WorkOrder::new(m2, t_a.clone()),
            WorkOrder::new(m1, t_b.clone()),
            WorkOrder::new(m1, t_a.clone()),
        ];
        orders.sort();
        assert_eq!(
            orders,
            vec![
                WorkOrder::new(m1, t_a.clone()),
                WorkOrder::new(m1, t_b),
                WorkOrder::new(m2, t_a),
            ]
        );
    }

    #[test]
    fn test_outcome_round_trips_through_str() {
        assert_eq!("killed".parse::<Outcome>().unwrap(), Outcome::Killed);
        assert_eq!(Outcome::Alive.as_str().parse::<Outcome>().unwrap(), Outcome::Alive);
        assert!("dead".parse::<Outcome>().is_err());
    }
}
