//! Discrete-event simulator for fixed-priority preemptive AMC scheduling
//!
//! Simulated time jumps from one instant to the next; an instant is the
//! earliest of: a periodic release, the running job's completion, the
//! running HI job exhausting its LO budget, a pending absolute deadline.
//!
//! Within one instant the order is fixed:
//! releases (highest priority first) -> completion -> mode-switch check ->
//! deadline check -> dispatch decision.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};

use amc_core::{AmcError, Job, JobState, Priority, Result, Task, TaskId, TaskSet, Time};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::mode::{Mode, ModeController, ModeSwitch};
use crate::trace::{EventKind, SimulationTrace};

/// Job designated to overrun its LO budget in the HI-triggering scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overrun {
    pub task: TaskId,
    pub job: u64,             // 0-based release index
    pub demand: Option<Time>, // Defaults to the task's wcet_hi
}

impl Overrun {
    /// First job of `task`, demanding its full HI budget
    pub fn first_job_of(task: TaskId) -> Self {
        Overrun {
            task,
            job: 0,
            demand: None,
        }
    }
}

/// Which execution-time realization to simulate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    /// Every job consumes exactly its LO budget; the mode never switches
    LoMode,
    /// One designated HI job overruns its LO budget
    HiTriggering(Overrun),
}

impl Scenario {
    pub fn name(&self) -> &'static str {
        match self {
            Scenario::LoMode => "LO-mode",
            Scenario::HiTriggering(_) => "HI-triggering",
        }
    }
}

/// Simulator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// End of the run; defaults to the hyperperiod
    pub horizon: Option<Time>,
    pub scenario: Scenario,
}

impl SimulationConfig {
    pub fn lo_mode() -> Self {
        SimulationConfig {
            horizon: None,
            scenario: Scenario::LoMode,
        }
    }

    pub fn hi_triggering(overrun: Overrun) -> Self {
        SimulationConfig {
            horizon: None,
            scenario: Scenario::HiTriggering(overrun),
        }
    }

    pub fn with_horizon(self, horizon: Time) -> Self {
        SimulationConfig {
            horizon: Some(horizon),
            ..self
        }
    }
}

/// Summary counters of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationStats {
    pub released: usize,
    pub completed: usize,
    pub discarded: usize,
    pub deadline_misses: usize,
    pub preemptions: usize,
    pub mode_switch: Option<ModeSwitch>,
    /// Largest observed response time per task
    pub max_response: BTreeMap<TaskId, Time>,
}

/// Result of a simulation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationOutcome {
    pub scenario: Scenario,
    pub horizon: Time,
    pub final_mode: Mode,
    pub trace: SimulationTrace,
    pub stats: SimulationStats,
}

/// Pending periodic release, ordered for the min-heap
#[derive(Debug, Clone, Copy)]
struct PendingRelease {
    time: Time,
    priority: Priority,
    task: usize, // Position in the task set
    index: u64,
}

// Earliest time first, then highest priority (lowest rank)
impl Ord for PendingRelease {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.priority.cmp(&self.priority))
    }
}

impl PartialOrd for PendingRelease {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Eq for PendingRelease {}

impl PartialEq for PendingRelease {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.priority == other.priority
    }
}

/// Ready-set key: priority rank, then release index (older job first)
type ReadyKey = (Priority, u64);

/// All mutable state of one run, threaded through every handler
struct SimContext {
    now: Time,
    modes: ModeController,
    ready: BTreeMap<ReadyKey, Job>, // Ready and Running jobs
    running: Option<ReadyKey>,
    releases: BinaryHeap<PendingRelease>,
    trace: SimulationTrace,
    stats: SimulationStats,
}

impl SimContext {
    fn new() -> Self {
        SimContext {
            now: 0,
            modes: ModeController::new(),
            ready: BTreeMap::new(),
            running: None,
            releases: BinaryHeap::new(),
            trace: SimulationTrace::new(),
            stats: SimulationStats::default(),
        }
    }

    fn emit(&mut self, kind: EventKind) -> Result<()> {
        self.trace.push(self.now, kind)
    }

    fn running_job(&self) -> Result<Option<&Job>> {
        match self.running {
            None => Ok(None),
            Some(key) => self.ready.get(&key).map(Some).ok_or_else(|| {
                AmcError::inconsistency(self.now, "running job missing from the ready set")
            }),
        }
    }
}

/// Resolved overrun designation
#[derive(Debug, Clone, Copy)]
struct Designated {
    task: TaskId,
    job: u64,
    demand: Time,
}

/// Discrete-event simulator over one task set
pub struct Simulator<'a> {
    task_set: &'a TaskSet,
    scenario: Scenario,
    horizon: Time,
    designated: Option<Designated>,
}

impl<'a> Simulator<'a> {
    /// Create a simulator, checking the scenario against the task set
    pub fn new(task_set: &'a TaskSet, config: &SimulationConfig) -> Result<Self> {
        let horizon = match config.horizon {
            Some(h) => h,
            None => task_set.hyperperiod().unwrap_or_else(|| {
                warn!("hyperperiod overflows, simulating two largest periods instead");
                task_set.max_period().saturating_mul(2)
            }),
        };
        if horizon == 0 {
            return Err(AmcError::scenario("simulation horizon must be positive"));
        }

        let designated = match config.scenario {
            Scenario::LoMode => None,
            Scenario::HiTriggering(overrun) => {
                Some(resolve_overrun(task_set, &overrun, horizon)?)
            }
        };

        Ok(Simulator {
            task_set,
            scenario: config.scenario,
            horizon,
            designated,
        })
    }

    pub fn horizon(&self) -> Time {
        self.horizon
    }

    /// Run the simulation up to the horizon
    pub fn run(&self) -> Result<SimulationOutcome> {
        let mut ctx = SimContext::new();

        for (pos, task) in self.task_set.iter().enumerate() {
            ctx.releases.push(PendingRelease {
                time: 0,
                priority: task.priority,
                task: pos,
                index: 0,
            });
        }

        while let Some(next) = self.next_instant(&ctx)? {
            if next > self.horizon {
                break;
            }
            self.advance(&mut ctx, next)?;
            self.process_instant(&mut ctx)?;
        }

        debug!(
            scenario = self.scenario.name(),
            events = ctx.trace.len(),
            "simulation finished"
        );

        Ok(SimulationOutcome {
            scenario: self.scenario,
            horizon: self.horizon,
            final_mode: ctx.modes.mode(),
            trace: ctx.trace,
            stats: ctx.stats,
        })
    }

    /// Earliest instant at which something can happen
    fn next_instant(&self, ctx: &SimContext) -> Result<Option<Time>> {
        let mut next = ctx.releases.peek().map(|r| r.time);
        let mut consider = |t: Time| next = Some(next.map_or(t, |n| n.min(t)));

        if let Some(job) = ctx.running_job()? {
            consider(ctx.now.saturating_add(job.remaining_time));

            let task = self.task_of(job.id.task, ctx.now)?;
            if ctx.modes.mode() == Mode::Lo
                && task.is_hi()
                && job.executed < task.wcet_lo
                && job.demand > task.wcet_lo
            {
                consider(ctx.now + (task.wcet_lo - job.executed));
            }
        }

        if let Some(deadline) = ctx.ready.values().map(|j| j.absolute_deadline).min() {
            consider(deadline);
        }

        Ok(next)
    }

    /// Move simulated time forward, charging the running job
    fn advance(&self, ctx: &mut SimContext, to: Time) -> Result<()> {
        if to < ctx.now {
            return Err(AmcError::inconsistency(
                ctx.now,
                format!("next instant {to} lies in the past"),
            ));
        }
        let elapsed = to - ctx.now;
        if let Some(key) = ctx.running {
            let job = ctx.ready.get_mut(&key).ok_or_else(|| {
                AmcError::inconsistency(ctx.now, "running job missing from the ready set")
            })?;
            job.execute(elapsed);
        }
        ctx.now = to;
        Ok(())
    }

    fn process_instant(&self, ctx: &mut SimContext) -> Result<()> {
        while let Some(release) = ctx.releases.peek().copied() {
            if release.time > ctx.now {
                break;
            }
            if release.time < ctx.now {
                return Err(AmcError::inconsistency(
                    ctx.now,
                    format!("release scheduled at t={} was skipped", release.time),
                ));
            }
            ctx.releases.pop();
            self.on_release(ctx, release)?;
        }

        self.on_completion(ctx)?;
        self.check_mode_switch(ctx)?;
        self.check_deadlines(ctx)?;
        self.dispatch(ctx)
    }

    fn on_release(&self, ctx: &mut SimContext, release: PendingRelease) -> Result<()> {
        let task = &self.task_set.tasks()[release.task];

        let next_time = release.time.saturating_add(task.period);
        if next_time < self.horizon {
            ctx.releases.push(PendingRelease {
                time: next_time,
                index: release.index + 1,
                ..release
            });
        }

        if !ctx.modes.admits(task.criticality()) {
            debug!(task = %task.id, time = ctx.now, "release skipped in HI mode");
            return Ok(());
        }

        let demand = self.demand_of(task, release.index, &ctx.modes);
        let job = Job::new(task, release.index, ctx.now, demand);
        ctx.emit(EventKind::Release {
            job: job.id,
            deadline: job.absolute_deadline,
        })?;
        ctx.stats.released += 1;
        ctx.ready.insert((task.priority, release.index), job);
        Ok(())
    }

    fn on_completion(&self, ctx: &mut SimContext) -> Result<()> {
        let Some(key) = ctx.running else {
            return Ok(());
        };
        if !ctx.running_job()?.is_some_and(Job::is_finished) {
            return Ok(());
        }

        let Some(mut job) = ctx.ready.remove(&key) else {
            return Err(AmcError::inconsistency(ctx.now, "completed job vanished"));
        };
        ctx.running = None;
        job.state = JobState::Completed;

        let response_time = job.response_time(ctx.now);
        ctx.emit(EventKind::Complete {
            job: job.id,
            response_time,
        })?;
        ctx.stats.completed += 1;
        let worst = ctx.stats.max_response.entry(job.id.task).or_insert(0);
        *worst = (*worst).max(response_time);
        Ok(())
    }

    /// LO -> HI when the running HI job has used its LO budget and is not done
    fn check_mode_switch(&self, ctx: &mut SimContext) -> Result<()> {
        let Some(job) = ctx.running_job()? else {
            return Ok(());
        };
        let wcet_lo = self.task_of(job.id.task, ctx.now)?.wcet_lo;
        let job = job.clone();

        let Some(switch) = ctx.modes.observe(&job, wcet_lo, ctx.now) else {
            return Ok(());
        };
        ctx.stats.mode_switch = Some(switch);
        ctx.emit(EventKind::ModeSwitch {
            trigger: switch.trigger,
        })?;

        // Drop every admitted LO job in the same instant
        let discarded: Vec<ReadyKey> = ctx
            .ready
            .iter()
            .filter(|(_, j)| !ctx.modes.admits(j.criticality))
            .map(|(k, _)| *k)
            .collect();
        for key in discarded {
            if let Some(mut job) = ctx.ready.remove(&key) {
                job.state = JobState::Discarded;
                if ctx.running == Some(key) {
                    ctx.running = None;
                }
                ctx.emit(EventKind::Discard { job: job.id })?;
                ctx.stats.discarded += 1;
            }
        }
        Ok(())
    }

    /// Abandon every job whose absolute deadline has passed unfinished
    fn check_deadlines(&self, ctx: &mut SimContext) -> Result<()> {
        let now = ctx.now;
        let missed: Vec<ReadyKey> = ctx
            .ready
            .iter()
            .filter(|(_, j)| j.absolute_deadline <= now && !j.is_finished())
            .map(|(k, _)| *k)
            .collect();

        for key in missed {
            if let Some(mut job) = ctx.ready.remove(&key) {
                job.state = JobState::DeadlineMissed;
                if ctx.running == Some(key) {
                    ctx.running = None;
                }
                warn!(job = %job.id, deadline = job.absolute_deadline, time = now, "deadline miss");
                ctx.emit(EventKind::DeadlineMiss {
                    job: job.id,
                    deadline: job.absolute_deadline,
                })?;
                ctx.stats.deadline_misses += 1;
            }
        }
        Ok(())
    }

    /// Give the processor to the best-ranked ready job
    fn dispatch(&self, ctx: &mut SimContext) -> Result<()> {
        let best = ctx.ready.keys().next().copied();
        if best == ctx.running {
            return Ok(());
        }

        if let (Some(current), Some(next)) = (ctx.running, best) {
            let by = ctx.ready[&next].id;
            let job = ctx.ready.get_mut(&current).ok_or_else(|| {
                AmcError::inconsistency(ctx.now, "preempted job missing from the ready set")
            })?;
            job.state = JobState::Ready;
            let id = job.id;
            ctx.emit(EventKind::Preempt { job: id, by })?;
            ctx.stats.preemptions += 1;
        }

        ctx.running = best;
        if let Some(key) = best {
            let job = ctx.ready.get_mut(&key).ok_or_else(|| {
                AmcError::inconsistency(ctx.now, "dispatched job missing from the ready set")
            })?;
            job.state = JobState::Running;
            let id = job.id;
            ctx.emit(EventKind::Dispatch { job: id })?;
        }
        Ok(())
    }

    /// Execution demand of the `index`-th job of `task`
    fn demand_of(&self, task: &Task, index: u64, modes: &ModeController) -> Time {
        match self.designated {
            Some(d) if d.task == task.id && d.job == index => d.demand,
            Some(_) => modes.budget(task),
            None => task.wcet_lo,
        }
    }

    fn task_of(&self, id: TaskId, now: Time) -> Result<&'a Task> {
        self.task_set
            .get(id)
            .ok_or_else(|| AmcError::inconsistency(now, format!("job of unknown task {id}")))
    }
}

/// Simulate one scenario of a task set
pub fn simulate(task_set: &TaskSet, config: &SimulationConfig) -> Result<SimulationOutcome> {
    Simulator::new(task_set, config)?.run()
}

fn resolve_overrun(task_set: &TaskSet, overrun: &Overrun, horizon: Time) -> Result<Designated> {
    let task = task_set
        .get(overrun.task)
        .ok_or_else(|| AmcError::scenario(format!("unknown overrun task {}", overrun.task)))?;

    let Some(wcet_hi) = task.wcet_hi() else {
        return Err(AmcError::scenario(format!(
            "overrun task {} is LO-criticality",
            task.id
        )));
    };

    let demand = overrun.demand.unwrap_or(wcet_hi);
    if demand <= task.wcet_lo || demand > wcet_hi {
        return Err(AmcError::scenario(format!(
            "overrun demand {} of task {} must lie in ({}, {}]",
            demand, task.id, task.wcet_lo, wcet_hi
        )));
    }

    let release = overrun.job.checked_mul(task.period);
    if release.is_none_or(|r| r >= horizon) {
        return Err(AmcError::scenario(format!(
            "job {} of task {} is never released before the horizon {}",
            overrun.job, task.id, horizon
        )));
    }

    Ok(Designated {
        task: task.id,
        job: overrun.job,
        demand,
    })
}
