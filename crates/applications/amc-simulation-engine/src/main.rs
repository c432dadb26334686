//! AMC Simulation Engine CLI
//!
//! Loads a task set, runs the AMC-RTB analysis and, if the task set is
//! schedulable, simulates the LO-mode and HI-triggering scenarios.
//!
//! Exit status: 0 on success, 2 when the analysis rejects the task set,
//! 1 on any error, including malformed command-line arguments.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use amc_core::{TaskId, TaskSet, Time};
use amc_simulation_engine::{
    analysis::{AnalysisConfig, AnalysisReport, CarryIn, DEFAULT_MAX_ITERATIONS, Verdict, analyze},
    generator::{GeneratorConfig, TaskSetGenerator, WcetMap},
    pipeline::{RunConfig, RunOutcome, run},
    simulator::{Overrun, SimulationOutcome},
};

/// Exit status when the analysis rejects the task set
const EXIT_UNSCHEDULABLE: u8 = 2;

/// Exit status for errors, usage errors included
const EXIT_FAILURE: u8 = 1;

#[derive(Parser, Debug)]
#[command(name = "amc-sim", version)]
#[command(about = "AMC-RTB schedulability analysis and mode-switch simulation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze a task set and simulate both scenarios if it is schedulable
    Run {
        /// Task-set JSON file
        #[arg(short, long, env = "AMC_TASKSET", default_value = "task_set.json")]
        taskset: PathBuf,

        /// Simulation end time (defaults to the hyperperiod)
        #[arg(long, env = "AMC_HORIZON")]
        horizon: Option<Time>,

        /// Id of the HI task whose job overruns its LO budget
        #[arg(long)]
        overrun_task: Option<u32>,

        /// Release index (0-based) of the overrunning job
        #[arg(long, default_value_t = 0)]
        overrun_job: u64,

        /// Execution demand of the overrunning job (defaults to its C(HI))
        #[arg(long, requires = "overrun_task")]
        overrun_demand: Option<Time>,

        #[command(flatten)]
        analysis: AnalysisArgs,

        /// Print the full event traces
        #[arg(long)]
        show_trace: bool,

        /// Output JSON file path (optional)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run the schedulability analysis only
    Analyze {
        /// Task-set JSON file
        #[arg(short, long, env = "AMC_TASKSET", default_value = "task_set.json")]
        taskset: PathBuf,

        #[command(flatten)]
        analysis: AnalysisArgs,

        /// Output JSON file path (optional)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate a task set from measured WCETs
    Generate {
        /// WCET JSON file mapping benchmark name to cycles
        #[arg(short, long, default_value = "wcet_data.json")]
        wcet: PathBuf,

        /// Task-set JSON file to write
        #[arg(short, long, default_value = "task_set.json")]
        output: PathBuf,

        /// Seed for reproducible generation
        #[arg(long, env = "AMC_SEED")]
        seed: Option<u64>,

        /// Probability of a task being HI-criticality
        #[arg(long, default_value_t = 0.4)]
        hi_probability: f64,

        /// Minimum period / WCET factor
        #[arg(long, default_value_t = 10.0)]
        period_factor_min: f64,

        /// Maximum period / WCET factor
        #[arg(long, default_value_t = 20.0)]
        period_factor_max: f64,

        /// Minimum C(HI) / C(LO) factor
        #[arg(long, default_value_t = 1.5)]
        hi_factor_min: f64,

        /// Maximum C(HI) / C(LO) factor
        #[arg(long, default_value_t = 2.0)]
        hi_factor_max: f64,
    },
}

#[derive(Args, Debug)]
struct AnalysisArgs {
    /// Window bounding LO carry-in during the mode transition
    #[arg(long, value_enum, default_value_t = CarryInArg::Interferer)]
    carry_in: CarryInArg,

    /// Fixed-point iteration cap per task
    #[arg(long, default_value_t = DEFAULT_MAX_ITERATIONS)]
    max_iterations: usize,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CarryInArg {
    /// ceil(R_lo(j)/T_j) * C_lo(j)
    Interferer,
    /// ceil(R_lo(i)/T_j) * C_lo(j)
    Analyzed,
}

impl From<&AnalysisArgs> for AnalysisConfig {
    fn from(args: &AnalysisArgs) -> Self {
        AnalysisConfig {
            max_iterations: args.max_iterations,
            carry_in: match args.carry_in {
                CarryInArg::Interferer => CarryIn::Interferer,
                CarryInArg::Analyzed => CarryIn::AnalyzedTask,
            },
        }
    }
}

fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "amc_sim=info,amc_simulation_engine=info,amc_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(usage_status(&err));
        }
    };

    match execute(cli.command) {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            eprintln!("❌ Error: {err:#}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

/// Map a clap parse result to an exit status; help and version are not failures.
///
/// clap itself exits with 2 on usage errors, which would collide with
/// [`EXIT_UNSCHEDULABLE`].
fn usage_status(err: &clap::Error) -> u8 {
    if err.use_stderr() { EXIT_FAILURE } else { 0 }
}

fn execute(command: Commands) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Run {
            taskset,
            horizon,
            overrun_task,
            overrun_job,
            overrun_demand,
            analysis,
            show_trace,
            output,
        } => {
            let task_set = load_task_set(&taskset)?;
            let config = RunConfig {
                analysis: AnalysisConfig::from(&analysis),
                horizon,
                overrun: overrun_task.map(|id| Overrun {
                    task: TaskId(id),
                    job: overrun_job,
                    demand: overrun_demand,
                }),
            };

            println!("--- Schedulability analysis (AMC-RTB) ---\n");
            let outcome = run(&task_set, &config).context("simulation aborted")?;
            print_analysis(&task_set, outcome.analysis());

            if let RunOutcome::Simulated {
                lo_mode,
                hi_triggering,
                ..
            } = &outcome
            {
                print_simulation(lo_mode, show_trace);
                if let Some(hi) = hi_triggering {
                    print_simulation(hi, show_trace);
                }
            }

            if let Some(path) = output {
                write_json(&path, &outcome)?;
            }

            if outcome.is_rejected() {
                println!("\n⏹️  Analysis rejected the task set; simulation not started.");
                return Ok(ExitCode::from(EXIT_UNSCHEDULABLE));
            }
            println!("\n✅ Simulation complete!\n");
            Ok(ExitCode::SUCCESS)
        }

        Commands::Analyze {
            taskset,
            analysis,
            output,
        } => {
            let task_set = load_task_set(&taskset)?;
            let report = analyze(&task_set, &AnalysisConfig::from(&analysis));
            print_analysis(&task_set, &report);

            if let Some(path) = output {
                write_json(&path, &report)?;
            }

            if report.is_schedulable() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(EXIT_UNSCHEDULABLE))
            }
        }

        Commands::Generate {
            wcet,
            output,
            seed,
            hi_probability,
            period_factor_min,
            period_factor_max,
            hi_factor_min,
            hi_factor_max,
        } => {
            let json = fs::read_to_string(&wcet)
                .with_context(|| format!("failed to read WCET data {}", wcet.display()))?;
            let wcets: WcetMap = serde_json::from_str(&json)
                .with_context(|| format!("failed to parse WCET data {}", wcet.display()))?;

            let mut generator = TaskSetGenerator::new(GeneratorConfig {
                hi_probability,
                period_factor: (period_factor_min, period_factor_max),
                hi_factor: (hi_factor_min, hi_factor_max),
                seed,
            })?;
            let records = generator.generate(&wcets)?;
            write_json(&output, &records)?;

            println!("✅ Task set generated with {} tasks and saved to '{}'.", records.len(), output.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_task_set(path: &Path) -> anyhow::Result<TaskSet> {
    let task_set = TaskSet::load(path)
        .with_context(|| format!("failed to load task set {}", path.display()))?;
    info!(tasks = task_set.len(), path = %path.display(), "task set loaded");
    Ok(task_set)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    println!("\nWriting results to {}...", path.display());
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    println!("  Results saved");
    Ok(())
}

fn print_analysis(task_set: &TaskSet, report: &AnalysisReport) {
    let show = |v: Option<Time>| v.map_or_else(|| "-".to_string(), |t| t.to_string());

    println!(
        "{:<6} {:<14} {:>4} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}",
        "Task", "Name", "Crit", "T", "D", "C(LO)", "C(HI)", "R(LO)", "R(HI)", "R*"
    );
    println!("{}", "-".repeat(92));

    for (task, bounds) in task_set.iter().zip(&report.bounds) {
        println!(
            "{:<6} {:<14} {:>4} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}",
            task.id.to_string(),
            task.name,
            task.criticality().to_string(),
            task.period,
            task.deadline,
            task.wcet_lo,
            show(task.wcet_hi()),
            show(bounds.r_lo),
            show(bounds.r_hi),
            show(bounds.r_star),
        );
    }

    println!(
        "\nUtilization: LO {:.1}%, HI {:.1}%",
        report.utilization_lo * 100.0,
        report.utilization_hi * 100.0
    );
    println!("Carry-in window: {:?}\n", report.carry_in);

    for (label, verdict) in [
        ("LO mode", report.lo_mode),
        ("Stable HI mode", report.hi_stable),
        ("LO -> HI transition", report.transition),
    ] {
        match verdict {
            Verdict::Schedulable => println!("✅ {label:<20} schedulable"),
            Verdict::Unschedulable {
                task,
                bound,
                response_time,
                deadline,
                capped: false,
            } => println!(
                "❌ {label:<20} UNSCHEDULABLE: {task} {bound}={response_time} > D={deadline}"
            ),
            Verdict::Unschedulable {
                task,
                bound,
                response_time,
                deadline,
                capped: true,
            } => println!(
                "❌ {label:<20} UNSCHEDULABLE: {task} {bound} did not converge within the iteration cap (last {response_time}, D={deadline})"
            ),
            Verdict::NotEvaluated => println!("⏹️  {label:<20} not evaluated"),
        }
    }
}

fn print_simulation(outcome: &SimulationOutcome, show_trace: bool) {
    println!(
        "\n--- {} scenario (horizon {}) ---",
        outcome.scenario.name(),
        outcome.horizon
    );

    let stats = &outcome.stats;
    println!(
        "Released {}, completed {}, discarded {}, preemptions {}, deadline misses {}",
        stats.released, stats.completed, stats.discarded, stats.preemptions, stats.deadline_misses
    );
    match stats.mode_switch {
        Some(switch) => println!("‼️  Criticality switch at t={} (trigger {})", switch.time, switch.trigger),
        None => println!("Mode stayed {}", outcome.final_mode),
    }
    for (task, response) in &stats.max_response {
        println!("  {task}: max observed response time {response}");
    }

    if show_trace {
        println!("\n{}", outcome.trace);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(args: &[&str]) -> u8 {
        match Cli::try_parse_from(args) {
            Ok(_) => 0,
            Err(err) => usage_status(&err),
        }
    }

    #[test]
    fn test_usage_errors_do_not_collide_with_rejection() {
        assert_eq!(status(&["amc-sim", "run", "--horizon", "abc"]), EXIT_FAILURE);
        assert_eq!(status(&["amc-sim", "run", "--overrun-demand", "3"]), EXIT_FAILURE);
        assert_eq!(status(&["amc-sim", "frobnicate"]), EXIT_FAILURE);
        assert_eq!(status(&["amc-sim"]), EXIT_FAILURE);
        assert_ne!(EXIT_FAILURE, EXIT_UNSCHEDULABLE);
    }

    #[test]
    fn test_help_and_version_succeed() {
        assert_eq!(status(&["amc-sim", "--help"]), 0);
        assert_eq!(status(&["amc-sim", "--version"]), 0);
        assert_eq!(status(&["amc-sim", "run", "--help"]), 0);
    }

    #[test]
    fn test_valid_arguments_parse() {
        let cli = Cli::try_parse_from(["amc-sim", "run", "--horizon", "40", "--overrun-task", "1"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Run { horizon: Some(40), overrun_task: Some(1), .. }
        ));
    }
}
