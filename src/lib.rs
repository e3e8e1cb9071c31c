//! # Killmap
//!
//! Coverage-pruned mutation analysis that records, for every mutant and every
//! test, whether the test kills the mutant.
//!
//! This library provides functionality to:
//! - Run each test once with coverage instrumentation to learn which mutants it reaches
//! - Re-run the test against each covered mutant, under a timeout derived from the baseline
//! - Aggregate the outcomes into a kill map and a dense kill matrix
//! - Export the matrix as CSV, write JSON reports and persist runs in SQLite
//!
//! ## Example
//!
//! ```rust,no_run
//! use killmap::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let executor = ShellExecutor::new("./run-test.sh {class} {method}");
//!     let scheduler = Scheduler::new(executor, AnalysisConfig::default())?;
//!
//!     let tests = vec![
//!         TestCase::new("triangle.TriangleTest", "testEquilateral"),
//!         TestCase::new("triangle.TriangleTest", "testScalene"),
//!     ];
//!     let kill_map = scheduler.run(120, &tests).await?;
//!
//!     println!("mutation score: {:.2}", kill_map.mutation_score());
//!     report::export_csv(&kill_map, "killMatrix.csv".as_ref(), CsvColumns::Short)?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coverage;
pub mod error;
pub mod executor;
pub mod killmap;
pub mod model;
pub mod mutants_log;
pub mod report;
pub mod scheduler;
pub mod selector;
pub mod store;

pub use error::{AnalysisError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{AnalysisConfig, BaselinePolicy};
    pub use crate::error::{AnalysisError, Result};
    pub use crate::executor::{ExecutionResult, FnExecutor, ShellExecutor, TestExecutor};
    pub use crate::killmap::{KillMap, KillMatrix};
    pub use crate::model::{Mutant, Outcome, TestCase};
    pub use crate::mutants_log::MutantsLog;
    pub use crate::report::{self, CsvColumns, MutantOrder, MutantStatus};
    pub use crate::scheduler::{CancelToken, Scheduler};
    pub use crate::selector::{ExecutionContext, MutantSelection};
}
