//! Analysis-then-simulation run over one task set
//!
//! The analyzer gates the simulator: a rejected task set is never simulated.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use amc_core::{Result, TaskSet, Time};

use crate::analysis::{AnalysisConfig, AnalysisReport, analyze};
use crate::simulator::{Overrun, SimulationConfig, SimulationOutcome, simulate};

/// Parameters of a full run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    pub analysis: AnalysisConfig,
    pub horizon: Option<Time>,
    /// Designated overrun; defaults to the first job of the highest-priority
    /// HI task that has room to overrun
    pub overrun: Option<Overrun>,
}

/// What a run produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Analysis rejected the task set; nothing was simulated
    Rejected { analysis: AnalysisReport },
    /// Analysis passed and both scenarios were simulated
    Simulated {
        analysis: AnalysisReport,
        lo_mode: SimulationOutcome,
        /// Absent when the task set has no HI task able to overrun
        hi_triggering: Option<SimulationOutcome>,
    },
}

impl RunOutcome {
    pub fn analysis(&self) -> &AnalysisReport {
        match self {
            RunOutcome::Rejected { analysis } | RunOutcome::Simulated { analysis, .. } => analysis,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, RunOutcome::Rejected { .. })
    }
}

/// Analyze, then simulate the LO-mode and HI-triggering scenarios
pub fn run(task_set: &TaskSet, config: &RunConfig) -> Result<RunOutcome> {
    let analysis = analyze(task_set, &config.analysis);
    if !analysis.is_schedulable() {
        info!("analysis rejected the task set, simulation skipped");
        return Ok(RunOutcome::Rejected { analysis });
    }

    let lo_config = SimulationConfig {
        horizon: config.horizon,
        ..SimulationConfig::lo_mode()
    };
    let lo_mode = simulate(task_set, &lo_config)?;

    let hi_triggering = match config.overrun.or_else(|| default_overrun(task_set)) {
        Some(overrun) => {
            let hi_config = SimulationConfig {
                horizon: config.horizon,
                ..SimulationConfig::hi_triggering(overrun)
            };
            Some(simulate(task_set, &hi_config)?)
        }
        None => {
            warn!("no HI task can overrun its LO budget, HI-triggering scenario skipped");
            None
        }
    };

    Ok(RunOutcome::Simulated {
        analysis,
        lo_mode,
        hi_triggering,
    })
}

/// First job of the highest-priority HI task with `wcet_hi > wcet_lo`
pub fn default_overrun(task_set: &TaskSet) -> Option<Overrun> {
    task_set
        .iter()
        .find(|t| t.wcet_hi().is_some_and(|c| c > t.wcet_lo))
        .map(|t| Overrun::first_job_of(t.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use amc_core::{Task, TaskId};

    #[test]
    fn test_schedulable_set_is_simulated_twice() {
        let set = TaskSet::new(vec![
            Task::hi(1, 10, 10, 2, 4, 0),
            Task::lo(2, 20, 20, 5, 1),
        ])
        .unwrap();
        let outcome = run(&set, &RunConfig::default()).unwrap();

        let RunOutcome::Simulated { lo_mode, hi_triggering, .. } = outcome else {
            panic!("expected simulation");
        };
        assert_eq!(lo_mode.stats.mode_switch, None);
        let hi = hi_triggering.unwrap();
        assert_eq!(hi.stats.mode_switch.map(|s| s.trigger.task), Some(TaskId(1)));
    }

    #[test]
    fn test_unschedulable_set_is_not_simulated() {
        let set = TaskSet::new(vec![Task::lo(1, 4, 4, 3, 0), Task::lo(2, 8, 8, 3, 1)]).unwrap();
        let outcome = run(&set, &RunConfig::default()).unwrap();

        assert!(outcome.is_rejected());
        assert!(!outcome.analysis().is_schedulable());
    }

    #[test]
    fn test_default_overrun_skips_tasks_without_slack() {
        let set = TaskSet::new(vec![
            Task::hi(1, 10, 10, 2, 2, 0),
            Task::hi(2, 20, 20, 2, 3, 1),
        ])
        .unwrap();
        assert_eq!(default_overrun(&set), Some(Overrun::first_job_of(TaskId(2))));

        let lo_only = TaskSet::new(vec![Task::lo(1, 10, 10, 2, 0)]).unwrap();
        assert_eq!(default_overrun(&lo_only), None);

        let outcome = run(&lo_only, &RunConfig::default()).unwrap();
        assert!(matches!(outcome, RunOutcome::Simulated { hi_triggering: None, .. }));
    }
}
