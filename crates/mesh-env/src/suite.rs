//! Running many cases against one shared environment.
//!
//! A [`Suite`] owns the process's only [`EnvironmentManager`]. Every case
//! receives the same [`SharedEnvironment`], built on first use, and the
//! environment is torn down exactly once after the last case, whether cases
//! passed, failed or panicked.
//!
//! Test binaries declared with `harness = false` hand their `main` to
//! [`Suite::main`], which keeps one runtime alive for the whole process so
//! child processes spawned by the first case stay owned by a live runtime
//! until teardown.
//!
//! ```rust,no_run
//! use std::process::ExitCode;
//! use mesh_env::{EnvironmentConfig, EnvironmentManager, Suite, SuiteArgs};
//!
//! fn main() -> ExitCode {
//!     Suite::new(EnvironmentManager::new(EnvironmentConfig::from_env()))
//!         .case("registry_is_seeded", |env| async move {
//!             assert!(env.registry().contains("hello.default.svc.cluster.local"));
//!         })
//!         .main(SuiteArgs::from_env())
//! }
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use metrics::counter;
use tracing::{error, info};

use crate::manager::{EnvironmentManager, SharedEnvironment};

type CaseFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type CaseFn = Box<dyn Fn(Arc<SharedEnvironment>) -> CaseFuture + Send + Sync>;

struct Case {
    name: String,
    needs_proxy: bool,
    run: CaseFn,
}

/// Result of a single case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The case returned normally.
    Passed,
    /// The case panicked or its environment could not be started.
    Failed(String),
    /// An earlier startup failure made the environment unusable.
    Skipped(String),
}

/// Outcomes of a suite run, in case order.
#[derive(Debug, Clone, Default)]
pub struct SuiteReport {
    /// Case name and outcome.
    pub results: Vec<(String, Outcome)>,
}

impl SuiteReport {
    /// Number of passed cases.
    #[must_use]
    pub fn passed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Passed))
    }

    /// Number of failed cases.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed(_)))
    }

    /// Number of skipped cases.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Skipped(_)))
    }

    /// Whether no case failed or was skipped.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.skipped() == 0
    }

    /// The outcome recorded for `name`.
    #[must_use]
    pub fn outcome(&self, name: &str) -> Option<&Outcome> {
        self.results.iter().find(|(n, _)| n == name).map(|(_, o)| o)
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.results.iter().filter(|(_, o)| pred(o)).count()
    }
}

/// Command-line options understood by [`Suite::main`].
///
/// Accepts the flags `cargo test` forwards to test binaries. Flags that do
/// not apply are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuiteArgs {
    /// Only run cases whose name contains this.
    pub filter: Option<String>,
    /// Run cases of an ignored suite (`--ignored`, `--include-ignored`).
    pub run_ignored: bool,
    /// Print case names and exit (`--list`).
    pub list: bool,
}

impl SuiteArgs {
    /// Parse the current process's arguments.
    #[must_use]
    pub fn from_env() -> Self {
        Self::parse(std::env::args().skip(1))
    }

    /// Parse arguments, excluding the program name.
    pub fn parse<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut parsed = Self::default();
        let mut args = args.into_iter().map(Into::into);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--ignored" | "--include-ignored" => parsed.run_ignored = true,
                "--list" => parsed.list = true,
                // Flags that take a separate value.
                "--format" | "--logfile" | "--test-threads" | "--skip" | "--color" | "-Z" => {
                    args.next();
                }
                flag if flag.starts_with('-') => {}
                filter => {
                    if parsed.filter.is_none() {
                        parsed.filter = Some(filter.to_string());
                    }
                }
            }
        }
        parsed
    }
}

/// A group of cases sharing one environment.
pub struct Suite {
    manager: Arc<EnvironmentManager>,
    cases: Vec<Case>,
    ignored: Option<String>,
}

impl fmt::Debug for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suite")
            .field("manager", &self.manager)
            .field("cases", &self.cases.iter().map(|c| &c.name).collect::<Vec<_>>())
            .field("ignored", &self.ignored)
            .finish()
    }
}

impl Suite {
    /// A suite whose cases all share `manager`'s environment.
    pub fn new(manager: EnvironmentManager) -> Self {
        Self {
            manager: Arc::new(manager),
            cases: Vec::new(),
            ignored: None,
        }
    }

    /// The shared manager.
    #[must_use]
    pub fn manager(&self) -> &Arc<EnvironmentManager> {
        &self.manager
    }

    /// Skip the suite unless `--ignored` or `--include-ignored` is given.
    #[must_use]
    pub fn ignore(mut self, reason: impl Into<String>) -> Self {
        self.ignored = Some(reason.into());
        self
    }

    /// Add a case that needs the control plane and registry only.
    #[must_use]
    pub fn case<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Arc<SharedEnvironment>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.push(name.into(), false, f)
    }

    /// Add a case that also needs the proxy running.
    #[must_use]
    pub fn proxy_case<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Arc<SharedEnvironment>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.push(name.into(), true, f)
    }

    fn push<F, Fut>(mut self, name: String, needs_proxy: bool, f: F) -> Self
    where
        F: Fn(Arc<SharedEnvironment>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cases.push(Case {
            name,
            needs_proxy,
            run: Box::new(move |env| Box::pin(f(env))),
        });
        self
    }

    /// Case names, in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.cases.iter().map(|c| c.name.as_str())
    }

    /// Run every case whose name contains `filter`, then tear down.
    ///
    /// Cases run one after another. A panicking case fails on its own; an
    /// environment startup failure fails the case that hit it and skips the
    /// rest. Teardown always runs, once, before this returns.
    pub async fn run(self, filter: Option<&str>) -> SuiteReport {
        let mut report = SuiteReport::default();
        let mut fatal: Option<String> = None;

        for case in self
            .cases
            .iter()
            .filter(|c| filter.map_or(true, |f| c.name.contains(f)))
        {
            if let Some(reason) = &fatal {
                report.results.push((case.name.clone(), Outcome::Skipped(reason.clone())));
                continue;
            }

            let env = if case.needs_proxy {
                self.manager.with_proxy().await
            } else {
                self.manager.get().await
            };
            let env = match env {
                Ok(env) => env,
                Err(e) => {
                    error!(case = %case.name, error = %e, "environment unavailable");
                    if e.is_fatal_to_run() {
                        fatal = Some(format!("environment failed to start: {e}"));
                    }
                    report.results.push((case.name.clone(), Outcome::Failed(e.to_string())));
                    continue;
                }
            };

            let start = Instant::now();
            let outcome = match tokio::spawn((case.run)(env)).await {
                Ok(()) => Outcome::Passed,
                Err(e) if e.is_panic() => Outcome::Failed(panic_message(e.into_panic())),
                Err(e) => Outcome::Failed(e.to_string()),
            };
            let label = match &outcome {
                Outcome::Passed => "passed",
                Outcome::Failed(_) => "failed",
                Outcome::Skipped(_) => "skipped",
            };
            counter!("harness_suite_cases_total", "outcome" => label).increment(1);
            info!(case = %case.name, outcome = label, elapsed = ?start.elapsed(), "case finished");
            report.results.push((case.name.clone(), outcome));
        }

        self.manager.teardown().await;
        report
    }

    /// Run the suite as a test binary's `main`.
    ///
    /// Builds one multi-threaded runtime that lives until the process exits,
    /// runs the selected cases, tears down, and prints a libtest-style
    /// summary.
    pub fn main(self, args: SuiteArgs) -> ExitCode {
        let filter = args.filter.as_deref();
        let selected: Vec<String> = self
            .names()
            .filter(|n| filter.map_or(true, |f| n.contains(f)))
            .map(str::to_string)
            .collect();

        if args.list {
            for name in &selected {
                println!("{name}: test");
            }
            return ExitCode::SUCCESS;
        }

        println!("\nrunning {} tests", selected.len());
        if let Some(reason) = self.ignored.as_deref().filter(|_| !args.run_ignored) {
            for name in &selected {
                println!("test {name} ... ignored, {reason}");
            }
            println!(
                "\ntest result: ok. 0 passed; 0 failed; {} ignored\n",
                selected.len()
            );
            return ExitCode::SUCCESS;
        }

        let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(e) => {
                eprintln!("cannot start runtime: {e}");
                return ExitCode::FAILURE;
            }
        };
        let report = runtime.block_on(self.run(filter));

        for (name, outcome) in &report.results {
            match outcome {
                Outcome::Passed => println!("test {name} ... ok"),
                Outcome::Failed(why) => println!("test {name} ... FAILED\n    {why}"),
                Outcome::Skipped(why) => println!("test {name} ... skipped, {why}"),
            }
        }
        let verdict = if report.is_success() { "ok" } else { "FAILED" };
        println!(
            "\ntest result: {verdict}. {} passed; {} failed; {} skipped\n",
            report.passed(),
            report.failed(),
            report.skipped()
        );

        if report.is_success() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "case panicked".to_string()
    }
}
