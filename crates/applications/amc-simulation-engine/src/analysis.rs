//! Response-time analysis for fixed-priority mixed-criticality scheduling
//!
//! Three bounds per task, each the least fixed point of a worst-case
//! interference recurrence:
//! - `R_lo`: every task, LO budgets, all higher-priority interferers
//! - `R_hi`: HI tasks only, HI budgets, HI higher-priority interferers
//! - `R*`:   HI tasks only, AMC-RTB transition bound. HI interferers are
//!   iterated with HI budgets; each LO interferer adds one fixed burst
//!   bounded by a LO response time.
//!
//! Every recurrence is bounded by the task's deadline: once a candidate
//! exceeds it the task is unschedulable and the analysis stops.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use amc_core::{Task, TaskId, TaskSet, Time};

/// Default cap on fixed-point iterations for a single task
pub const DEFAULT_MAX_ITERATIONS: usize = 1_000_000;

/// Window used to bound the carry-in of LO interferers in the transition bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CarryIn {
    /// `ceil(R_lo(j) / T_j) * C_lo(j)`: each LO interferer's own LO bound
    #[default]
    Interferer,
    /// `ceil(R_lo(i) / T_j) * C_lo(j)`: the LO bound of the task under analysis
    AnalyzedTask,
}

/// Analyzer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub max_iterations: usize,
    pub carry_in: CarryIn,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            carry_in: CarryIn::default(),
        }
    }
}

/// A higher-priority task's contribution: `ceil(x / period) * wcet`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interferer {
    pub period: Time,
    pub wcet: Time,
}

impl Interferer {
    pub fn new(period: Time, wcet: Time) -> Self {
        Interferer { period, wcet }
    }

    /// Worst-case demand released in a window of length `x`
    pub fn demand(&self, x: Time) -> Time {
        x.div_ceil(self.period).saturating_mul(self.wcet)
    }
}

/// Outcome of a fixed-point search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FixedPoint {
    /// Least fixed point, within the deadline
    Converged(Time),
    /// First candidate beyond the deadline (or last one when the cap was hit)
    Exceeded(Time),
}

impl FixedPoint {
    pub fn value(&self) -> Time {
        match *self {
            FixedPoint::Converged(r) | FixedPoint::Exceeded(r) => r,
        }
    }

    pub fn converged(&self) -> Option<Time> {
        match *self {
            FixedPoint::Converged(r) => Some(r),
            FixedPoint::Exceeded(_) => None,
        }
    }
}

/// `R = base + sum_j ceil(R / T_j) * C_j`, searched from `R = base` upwards
#[derive(Debug, Clone)]
pub struct Recurrence {
    base: Time,
    interferers: Vec<Interferer>,
    deadline: Time,
}

impl Recurrence {
    pub fn new(base: Time, interferers: Vec<Interferer>, deadline: Time) -> Self {
        Recurrence {
            base,
            interferers,
            deadline,
        }
    }

    /// Right-hand side of the recurrence for candidate `x`
    pub fn step(&self, x: Time) -> Time {
        self.interferers
            .iter()
            .fold(self.base, |acc, j| acc.saturating_add(j.demand(x)))
    }

    /// Candidate sequence `base, step(base), ...`.
    ///
    /// Ends after the fixed point or after the first candidate that
    /// exceeds the deadline, whichever comes first.
    pub fn candidates(&self) -> Candidates<'_> {
        Candidates {
            recurrence: self,
            next: Some(self.base),
        }
    }

    /// Solve with at most `max_iterations` evaluations of the right-hand side
    pub fn solve(&self, max_iterations: usize) -> FixedPoint {
        let mut r = self.base;
        if r > self.deadline {
            return FixedPoint::Exceeded(r);
        }

        for _ in 0..max_iterations {
            let next = self.step(r);
            if next == r {
                return FixedPoint::Converged(r);
            }
            if next > self.deadline {
                return FixedPoint::Exceeded(next);
            }
            r = next;
        }

        FixedPoint::Exceeded(r)
    }
}

/// Iterator over the candidate values of a [`Recurrence`]
pub struct Candidates<'a> {
    recurrence: &'a Recurrence,
    next: Option<Time>,
}

impl Iterator for Candidates<'_> {
    type Item = Time;

    fn next(&mut self) -> Option<Time> {
        let current = self.next?;
        self.next = if current > self.recurrence.deadline {
            None
        } else {
            let stepped = self.recurrence.step(current);
            (stepped != current).then_some(stepped)
        };
        Some(current)
    }
}

/// Which response-time bound a verdict refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bound {
    Lo,
    HiStable,
    Transition,
}

impl std::fmt::Display for Bound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Bound::Lo => write!(f, "R(LO)"),
            Bound::HiStable => write!(f, "R(HI)"),
            Bound::Transition => write!(f, "R*"),
        }
    }
}

/// Verdict for one analysis scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Schedulable,
    Unschedulable {
        task: TaskId,
        bound: Bound,
        response_time: Time,
        deadline: Time,
        /// The iteration cap stopped the search before `response_time` passed the deadline
        #[serde(default)]
        capped: bool,
    },
    /// An earlier scenario already rejected the task set
    NotEvaluated,
}

impl Verdict {
    pub fn is_schedulable(&self) -> bool {
        matches!(self, Verdict::Schedulable)
    }
}

/// Response-time bounds of one task; `None` where not applicable or not reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseTimeBounds {
    pub task: TaskId,
    pub r_lo: Option<Time>,
    pub r_hi: Option<Time>,
    pub r_star: Option<Time>,
}

/// Analyzer output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub bounds: Vec<ResponseTimeBounds>, // Priority order
    pub lo_mode: Verdict,
    pub hi_stable: Verdict,
    pub transition: Verdict,
    pub carry_in: CarryIn,
    pub utilization_lo: f64,
    pub utilization_hi: f64,
}

impl AnalysisReport {
    /// All three scenarios passed
    pub fn is_schedulable(&self) -> bool {
        self.lo_mode.is_schedulable()
            && self.hi_stable.is_schedulable()
            && self.transition.is_schedulable()
    }

    /// First violated scenario, in evaluation order
    pub fn first_failure(&self) -> Option<Verdict> {
        [self.lo_mode, self.hi_stable, self.transition]
            .into_iter()
            .find(|v| matches!(v, Verdict::Unschedulable { .. }))
    }

    pub fn bounds_for(&self, task: TaskId) -> Option<&ResponseTimeBounds> {
        self.bounds.iter().find(|b| b.task == task)
    }
}

/// Run the three-scenario AMC-RTB analysis.
///
/// Scenarios are evaluated LO, then stable HI, then transition; the first
/// offending task (in priority order) stops the analysis.
pub fn analyze(task_set: &TaskSet, config: &AnalysisConfig) -> AnalysisReport {
    let mut report = AnalysisReport {
        bounds: task_set
            .iter()
            .map(|t| ResponseTimeBounds {
                task: t.id,
                r_lo: None,
                r_hi: None,
                r_star: None,
            })
            .collect(),
        lo_mode: Verdict::NotEvaluated,
        hi_stable: Verdict::NotEvaluated,
        transition: Verdict::NotEvaluated,
        carry_in: config.carry_in,
        utilization_lo: task_set.utilization_lo(),
        utilization_hi: task_set.utilization_hi(),
    };

    report.lo_mode = analyze_lo_mode(task_set, config, &mut report.bounds);
    if !report.lo_mode.is_schedulable() {
        return report;
    }

    report.hi_stable = analyze_hi_stable(task_set, config, &mut report.bounds);
    if !report.hi_stable.is_schedulable() {
        return report;
    }

    report.transition = analyze_transition(task_set, config, &mut report.bounds);
    if report.is_schedulable() {
        info!("task set is schedulable under AMC-RTB");
    }
    report
}

/// `R_lo(i) = C_lo(i) + sum_{j in hp(i)} ceil(R_lo(i)/T_j) * C_lo(j)`
fn analyze_lo_mode(
    task_set: &TaskSet,
    config: &AnalysisConfig,
    bounds: &mut [ResponseTimeBounds],
) -> Verdict {
    for (pos, task) in task_set.iter().enumerate() {
        let interferers = task_set
            .higher_priority(pos)
            .iter()
            .map(|hp| Interferer::new(hp.period, hp.wcet_lo))
            .collect();

        let result = Recurrence::new(task.wcet_lo, interferers, task.deadline)
            .solve(config.max_iterations);

        match result {
            FixedPoint::Converged(r) => {
                debug!(task = %task.id, r_lo = r, deadline = task.deadline, "LO bound");
                bounds[pos].r_lo = Some(r);
            }
            FixedPoint::Exceeded(r) => {
                return unschedulable(task, Bound::Lo, r);
            }
        }
    }
    Verdict::Schedulable
}

/// `R_hi(i) = C_hi(i) + sum_{j in hp(i), HI} ceil(R_hi(i)/T_j) * C_hi(j)`
fn analyze_hi_stable(
    task_set: &TaskSet,
    config: &AnalysisConfig,
    bounds: &mut [ResponseTimeBounds],
) -> Verdict {
    for (pos, task) in task_set.iter().enumerate() {
        let Some(wcet_hi) = task.wcet_hi() else {
            continue;
        };

        let interferers = hi_interferers(task_set.higher_priority(pos));
        let result = Recurrence::new(wcet_hi, interferers, task.deadline)
            .solve(config.max_iterations);

        match result {
            FixedPoint::Converged(r) => {
                debug!(task = %task.id, r_hi = r, deadline = task.deadline, "stable HI bound");
                bounds[pos].r_hi = Some(r);
            }
            FixedPoint::Exceeded(r) => {
                return unschedulable(task, Bound::HiStable, r);
            }
        }
    }
    Verdict::Schedulable
}

/// `R*(i) = C_hi(i) + sum_{j in hp(i), HI} ceil(R*(i)/T_j) * C_hi(j) + LO carry-in`
///
/// The LO carry-in is computed once from LO bounds and never re-iterated
/// against the growing `R*(i)`.
fn analyze_transition(
    task_set: &TaskSet,
    config: &AnalysisConfig,
    bounds: &mut [ResponseTimeBounds],
) -> Verdict {
    for (pos, task) in task_set.iter().enumerate() {
        let Some(wcet_hi) = task.wcet_hi() else {
            continue;
        };

        let hp = task_set.higher_priority(pos);
        let mut carry_in: Time = 0;
        for (hp_pos, lo) in hp.iter().enumerate().filter(|(_, t)| !t.is_hi()) {
            let window = match config.carry_in {
                CarryIn::Interferer => bounds[hp_pos].r_lo,
                CarryIn::AnalyzedTask => bounds[pos].r_lo,
            };
            // LO bounds are complete once the LO scenario passed
            let Some(window) = window else {
                return unschedulable(task, Bound::Transition, Time::MAX);
            };
            carry_in = carry_in.saturating_add(Interferer::new(lo.period, lo.wcet_lo).demand(window));
        }

        let base = wcet_hi.saturating_add(carry_in);
        let result = Recurrence::new(base, hi_interferers(hp), task.deadline)
            .solve(config.max_iterations);

        match result {
            FixedPoint::Converged(r) => {
                debug!(task = %task.id, r_star = r, carry_in, deadline = task.deadline, "transition bound");
                bounds[pos].r_star = Some(r);
            }
            FixedPoint::Exceeded(r) => {
                return unschedulable(task, Bound::Transition, r);
            }
        }
    }
    Verdict::Schedulable
}

fn hi_interferers(hp: &[Task]) -> Vec<Interferer> {
    hp.iter()
        .filter_map(|t| t.wcet_hi().map(|c| Interferer::new(t.period, c)))
        .collect()
}

fn unschedulable(task: &Task, bound: Bound, response_time: Time) -> Verdict {
    let capped = response_time <= task.deadline;
    info!(
        task = %task.id,
        %bound,
        response_time,
        deadline = task.deadline,
        capped,
        "task set unschedulable"
    );
    Verdict::Unschedulable {
        task: task.id,
        bound,
        response_time,
        deadline: task.deadline,
        capped,
    }
}
