//! Coverage-pruned mutation analysis.
//!
//! For every test the scheduler runs the unmutated program once with
//! coverage enabled, then re-runs the test only for the mutants that run
//! reached. A mutant whose location the test never executes cannot change
//! the test's result, so it is recorded as alive without being run.

use crate::config::{AnalysisConfig, BaselinePolicy};
use crate::error::{AnalysisError, Result};
use crate::executor::{ExecutionResult, TestExecutor};
use crate::killmap::KillMap;
use crate::model::{Mutant, Outcome, TestCase};
use crate::selector::{ExecutionContext, MutantSelection};
use futures::stream::{self, StreamExt};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Cooperative cancellation flag, checked between tests and between mutants.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of running a test against a mutant, given the test's result on
/// the unmutated program. A mutant run that hangs or crashes counts as
/// detected.
pub fn classify(baseline: &ExecutionResult, mutant: &ExecutionResult) -> Outcome {
    if mutant.is_abnormal() || mutant.success != baseline.success {
        Outcome::Killed
    } else {
        Outcome::Alive
    }
}

/// Reorders `tests` with a seeded shuffle. The analysis result does not
/// depend on test order; this is a way to demonstrate it.
pub fn shuffle_tests(tests: &mut [TestCase], seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    tests.shuffle(&mut rng);
}

/// Everything learned about one test.
#[derive(Debug)]
struct TestRow {
    test: TestCase,
    baseline: ExecutionResult,
    covered: BTreeSet<Mutant>,
    outcomes: Vec<(Mutant, Outcome)>,
}

pub struct Scheduler<E> {
    executor: E,
    config: AnalysisConfig,
    cancel: CancelToken,
}

impl<E: TestExecutor> Scheduler<E> {
    pub fn new(executor: E, config: AnalysisConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            executor,
            config,
            cancel: CancelToken::new(),
        })
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Analyses mutants `1..=mutant_count` against `tests`.
    ///
    /// Hanging or crashing mutant runs are folded into `Killed` outcomes.
    /// Errors are configuration problems (duplicate tests, or a failing
    /// baseline under [`BaselinePolicy::Reject`]). A cancelled run returns the
    /// partial kill map.
    pub async fn run(&self, mutant_count: usize, tests: &[TestCase]) -> Result<KillMap> {
        let mut seen = HashSet::with_capacity(tests.len());
        if let Some(duplicate) = tests.iter().find(|test| !seen.insert(*test)) {
            return Err(AnalysisError::InvalidInput(format!(
                "Test {} appears more than once",
                duplicate
            )));
        }

        let mut kill_map = KillMap::with_mutant_count(mutant_count);
        for test in tests {
            kill_map.register_test(test.clone());
        }

        if mutant_count == 0 || tests.is_empty() {
            info!(mutants = mutant_count, tests = tests.len(), "nothing to analyse");
            return Ok(kill_map);
        }

        let jobs = if self.config.jobs > 1 && !self.executor.is_isolated() {
            warn!(
                jobs = self.config.jobs,
                "executor shares state between runs; analysing tests sequentially"
            );
            1
        } else {
            self.config.jobs
        };

        info!(mutants = mutant_count, tests = tests.len(), jobs, "starting analysis");

        let mut rows = stream::iter(tests)
            .map(|test| self.analyze_test(mutant_count, test))
            .buffer_unordered(jobs);

        let mut finished = 0;
        while let Some(row) = rows.next().await {
            let row = row?;
            finished += 1;
            let killed = row.outcomes.iter().filter(|(_, o)| o.is_killed()).count();
            info!(
                test = %row.test,
                baseline = row.baseline.describe(),
                covered = row.covered.len(),
                killed,
                "[{}/{}] analysed",
                finished,
                tests.len()
            );
            merge_row(&mut kill_map, row);
        }

        if self.cancel.is_cancelled() {
            warn!(
                stored = kill_map.size(),
                expected = mutant_count * tests.len(),
                "analysis cancelled; kill map is partial"
            );
        }

        Ok(kill_map)
    }

    async fn analyze_test(&self, mutant_count: usize, test: &TestCase) -> Result<TestRow> {
        let mut row = TestRow {
            test: test.clone(),
            baseline: ExecutionResult::passed(),
            covered: BTreeSet::new(),
            outcomes: Vec::new(),
        };
        if self.cancel.is_cancelled() {
            return Ok(row);
        }

        let context = ExecutionContext::new(MutantSelection::Coverage);
        let started = Instant::now();
        let baseline = self
            .execute(test, context.clone(), self.config.baseline_timeout())
            .await;
        let nominal = started.elapsed();

        let reported = context.covered_mutants();
        context.reset_coverage();
        let covered: BTreeSet<Mutant> = reported
            .iter()
            .copied()
            .filter(|m| m.index() < mutant_count)
            .collect();
        if covered.len() != reported.len() {
            warn!(
                %test,
                ignored = reported.len() - covered.len(),
                "coverage reported mutant ids beyond the mutants log"
            );
        }

        if !baseline.success {
            match self.config.baseline_policy {
                BaselinePolicy::Reject => {
                    return Err(AnalysisError::FailingBaseline {
                        test: test.to_string(),
                        reason: baseline.describe().to_string(),
                    });
                }
                BaselinePolicy::Compare => {
                    warn!(%test, baseline = baseline.describe(), "baseline did not pass; comparing mutants against it");
                }
            }
        }

        let budget = self.config.mutant_timeout(nominal);
        debug!(%test, nominal_ms = nominal.as_millis() as u64, budget_ms = budget.as_millis() as u64, "baseline done");

        row.baseline = baseline;
        for mutant in Mutant::range(mutant_count) {
            if self.cancel.is_cancelled() {
                break;
            }
            let outcome = if covered.contains(&mutant) {
                let context = ExecutionContext::new(MutantSelection::Mutant(mutant));
                let result = self.execute(test, context, budget).await;
                let outcome = classify(&baseline, &result);
                debug!(%test, %mutant, result = result.describe(), outcome = outcome.as_str(), "mutant run");
                outcome
            } else {
                Outcome::Alive
            };
            row.outcomes.push((mutant, outcome));
        }
        row.covered = covered;

        Ok(row)
    }

    async fn execute(&self, test: &TestCase, context: ExecutionContext, budget: Duration) -> ExecutionResult {
        let selection = context.selection();
        match timeout(budget, self.executor.run(test, context)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(%test, %selection, budget_ms = budget.as_millis() as u64, "run timed out");
                ExecutionResult::timed_out()
            }
        }
    }
}

fn merge_row(kill_map: &mut KillMap, row: TestRow) {
    for mutant in &row.covered {
        kill_map.record_coverage(*mutant);
    }
    if !row.baseline.success {
        kill_map.record_failing_baseline(row.test.clone());
    }
    for (mutant, outcome) in row.outcomes {
        kill_map.put(mutant, row.test.clone(), outcome);
    }
}
