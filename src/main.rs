use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use killmap::config::{AnalysisConfig, BaselinePolicy};
use killmap::error::{AnalysisError, Result};
use killmap::executor::ShellExecutor;
use killmap::killmap::KillMap;
use killmap::model::{read_test_list, Mutant, TestCase};
use killmap::mutants_log::MutantsLog;
use killmap::report::{self, AnalysisReport, CsvColumns, MutantOrder, MutantStatus};
use killmap::scheduler::{shuffle_tests, CancelToken, Scheduler};
use killmap::store;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "killmap")]
#[command(version)]
#[command(about = "Coverage-pruned mutation analysis producing a per-test kill matrix")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OrderArg {
    /// Ascending mutant id
    Id,
    /// Killed, survived, uncovered
    Killed,
    /// Survived, uncovered, killed
    Survived,
    /// Uncovered, survived, killed
    Uncovered,
}

impl From<OrderArg> for MutantOrder {
    fn from(order: OrderArg) -> Self {
        match order {
            OrderArg::Id => MutantOrder::Id,
            OrderArg::Killed => MutantOrder::KilledFirst,
            OrderArg::Survived => MutantOrder::SurvivedFirst,
            OrderArg::Uncovered => MutantOrder::UncoveredFirst,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run every test against every mutant it covers and build the kill matrix
    Analyze {
        /// Mutants log; mutant N is the N-th non-empty line
        #[arg(short, long, default_value = "mutants.log")]
        mutants_log: PathBuf,

        /// File listing tests to run, one <class>#<method> per line
        #[arg(long, conflicts_with = "test")]
        tests: Option<PathBuf>,

        /// Test to run as <class>#<method> (repeatable)
        #[arg(long)]
        test: Vec<String>,

        /// Command running one test; may use {test}, {class} and {method}
        #[arg(short, long)]
        command: String,

        /// Directory the test command runs in
        #[arg(long)]
        working_dir: Option<PathBuf>,

        /// JSON file with analysis settings; flags below override it
        #[arg(long)]
        config: Option<PathBuf>,

        /// Multiplier on the baseline running time bounding each mutant run
        #[arg(long)]
        timeout_factor: Option<u32>,

        /// Minimum time budget per mutant run, in milliseconds
        #[arg(long)]
        timeout_floor_ms: Option<u64>,

        /// Maximum time budget per run, in seconds
        #[arg(long)]
        timeout_ceiling_secs: Option<u64>,

        /// Number of tests analysed concurrently
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Abort when a test fails without any mutant enabled
        #[arg(long)]
        reject_failing_baseline: bool,

        /// Shuffle the test order with this seed
        #[arg(long)]
        shuffle_seed: Option<u64>,

        /// Write the kill matrix as CSV
        #[arg(long, value_name = "PATH")]
        csv: Option<PathBuf>,

        /// Use <class>#<method> instead of the method name as CSV column headers
        #[arg(long)]
        canonical_names: bool,

        /// Write a JSON report
        #[arg(long, value_name = "PATH")]
        json: Option<PathBuf>,

        /// Store the run in a SQLite database (default: db/killmap.db)
        #[arg(long, value_name = "PATH")]
        sqlite: Option<Option<PathBuf>>,

        /// Fail when the mutation score is below this value (0.0 - 1.0)
        #[arg(long)]
        min_score: Option<f64>,

        /// Order used when listing mutants
        #[arg(long, value_enum, default_value = "survived")]
        order: OrderArg,
    },
    /// Report on a run stored in SQLite
    Report {
        /// SQLite database (default: db/killmap.db)
        #[arg(long, value_name = "PATH")]
        sqlite: Option<PathBuf>,

        /// Run ID stored in SQLite; lists the stored runs when omitted
        #[arg(long)]
        runid: Option<i64>,

        /// Mutants log used to attach source lines to the report
        #[arg(short, long)]
        mutants_log: Option<PathBuf>,

        /// Write the kill matrix as CSV
        #[arg(long, value_name = "PATH")]
        csv: Option<PathBuf>,

        /// Use <class>#<method> instead of the method name as CSV column headers
        #[arg(long)]
        canonical_names: bool,

        /// Write a JSON report
        #[arg(long, value_name = "PATH")]
        json: Option<PathBuf>,

        /// Order used when listing mutants
        #[arg(long, value_enum, default_value = "survived")]
        order: OrderArg,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Analyze {
            mutants_log,
            tests,
            test,
            command,
            working_dir,
            config,
            timeout_factor,
            timeout_floor_ms,
            timeout_ceiling_secs,
            jobs,
            reject_failing_baseline,
            shuffle_seed,
            csv,
            canonical_names,
            json,
            sqlite,
            min_score,
            order,
        } => {
            let mut config = match config {
                Some(path) => AnalysisConfig::from_json_file(&path)?,
                None => AnalysisConfig::default(),
            };
            if let Some(factor) = timeout_factor {
                config = config.with_timeout_factor(factor);
            }
            if let Some(ms) = timeout_floor_ms {
                config = config.with_timeout_floor(Duration::from_millis(ms));
            }
            if let Some(secs) = timeout_ceiling_secs {
                config = config.with_timeout_ceiling(Duration::from_secs(secs));
            }
            if let Some(jobs) = jobs {
                config = config.with_jobs(jobs);
            }
            if reject_failing_baseline {
                config = config.with_baseline_policy(BaselinePolicy::Reject);
            }

            if let Some(min) = min_score {
                if !(0.0..=1.0).contains(&min) {
                    return Err(AnalysisError::InvalidInput(
                        "--min-score must be between 0 and 1".to_string(),
                    ));
                }
            }

            let log = MutantsLog::from_path(&mutants_log)?;
            let mut tests = collect_tests(tests, test)?;
            if let Some(seed) = shuffle_seed {
                shuffle_tests(&mut tests, seed);
            }

            let db_path = sqlite.map(|path| path.unwrap_or_else(|| PathBuf::from(store::DEFAULT_DB_PATH)));
            if let Some(ref path) = db_path {
                store::check_db(path)?;
            }

            let mut executor = ShellExecutor::new(command);
            if let Some(dir) = working_dir {
                executor = executor.with_working_dir(dir);
            }

            let cancel = CancelToken::new();
            let signal_token = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received; stopping after the current executions");
                    signal_token.cancel();
                }
            });

            println!("* {} MUTANTS x {} TESTS *", log.len(), tests.len());
            let scheduler = Scheduler::new(executor, config)?.with_cancel_token(cancel);
            let kill_map = scheduler.run(log.len(), &tests).await?;

            let order = MutantOrder::from(order);
            print_summary(&kill_map, Some(&log), order);
            write_outputs(&kill_map, Some(&log), csv, canonical_names, json, order)?;

            if let Some(ref path) = db_path {
                let run_id = store::store_run(path, &kill_map)?;
                println!("Stored as run {} in {}", run_id, path.display());
            }

            if let Some(min) = min_score {
                let score = kill_map.mutation_score();
                if score < min {
                    return Err(AnalysisError::InvalidInput(format!(
                        "Mutation score {:.2}% is below the minimum {:.2}%",
                        score * 100.0,
                        min * 100.0
                    )));
                }
            }
        }
        Commands::Report {
            sqlite,
            runid,
            mutants_log,
            csv,
            canonical_names,
            json,
            order,
        } => {
            let db_path = sqlite.unwrap_or_else(|| PathBuf::from(store::DEFAULT_DB_PATH));
            if !db_path.exists() {
                return Err(AnalysisError::InvalidInput(format!(
                    "Database {} does not exist",
                    db_path.display()
                )));
            }
            store::check_db(&db_path)?;

            let Some(run_id) = runid else {
                for run in store::list_runs(&db_path)? {
                    println!(
                        "{}\t{}\t{} mutants\t{}\t{}",
                        run.id, run.created_at, run.mutant_count, run.tool_version, run.fingerprint
                    );
                }
                return Ok(());
            };

            let log = mutants_log.as_deref().map(MutantsLog::from_path).transpose()?;
            let kill_map = store::load_run(&db_path, run_id)?;
            let order = MutantOrder::from(order);
            print_summary(&kill_map, log.as_ref(), order);
            write_outputs(&kill_map, log.as_ref(), csv, canonical_names, json, order)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("killmap={}", level)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn collect_tests(list: Option<PathBuf>, names: Vec<String>) -> Result<Vec<TestCase>> {
    let tests = match list {
        Some(path) => read_test_list(&path)?,
        None => names
            .iter()
            .map(|name| name.parse::<TestCase>())
            .collect::<Result<Vec<TestCase>>>()?,
    };
    if tests.is_empty() {
        return Err(AnalysisError::InvalidInput(
            "No tests given; use --tests or --test".to_string(),
        ));
    }
    Ok(tests)
}

fn print_summary(kill_map: &KillMap, log: Option<&MutantsLog>, order: MutantOrder) {
    let summary = report::summarize(kill_map);

    let listed: Vec<Mutant> = report::ordered_mutants(kill_map, order)
        .into_iter()
        .filter(|mutant| report::mutant_status(kill_map, *mutant) != MutantStatus::Killed)
        .collect();
    if !listed.is_empty() {
        println!("\nNot killed:");
        for mutant in listed {
            let status = report::mutant_status(kill_map, mutant);
            match log.and_then(|log| log.line_number(mutant)) {
                Some(line) => println!("  {} ({:?}, line {})", mutant, status, line),
                None => println!("  {} ({:?})", mutant, status),
            }
        }
    }

    for test in kill_map.failing_baselines() {
        println!("Baseline failed: {}", test);
    }

    println!(
        "\nKILLED: {}  SURVIVED: {}  UNCOVERED: {}",
        summary.killed, summary.survived, summary.uncovered
    );
    if !summary.complete {
        println!("Kill map is partial ({} of {} cells)", kill_map.size(), summary.mutants * summary.tests);
    }
    println!("MUTATION SCORE: {:.2}%", summary.mutation_score * 100.0);
}

fn write_outputs(
    kill_map: &KillMap,
    log: Option<&MutantsLog>,
    csv: Option<PathBuf>,
    canonical_names: bool,
    json: Option<PathBuf>,
    order: MutantOrder,
) -> Result<()> {
    if let Some(path) = csv {
        let columns = if canonical_names {
            CsvColumns::Canonical
        } else {
            CsvColumns::Short
        };
        // A failed export leaves the analysis results valid.
        if let Err(err) = report::export_csv(kill_map, &path, columns) {
            error!(path = %path.display(), error = %err, "could not write kill matrix");
        }
    }

    if let Some(path) = json {
        save_report(kill_map, log, order, &path)?;
    }
    Ok(())
}

fn save_report(kill_map: &KillMap, log: Option<&MutantsLog>, order: MutantOrder, path: &Path) -> Result<()> {
    AnalysisReport::build(kill_map, log, order).save(path)?;
    println!("Report written to {}", path.display());
    Ok(())
}
