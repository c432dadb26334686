//! Task-set construction, validation and loading
//!
//! The task set is read-only once built. Tasks are stored in priority order,
//! so the higher-priority set of the task at position `i` is simply the
//! prefix `tasks[..i]`.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{AmcError, Result};
use crate::types::{Criticality, CriticalityLevel, Priority, Task, TaskId, Time};

/// Task record as exchanged in the task-set JSON file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub period: Time,
    pub deadline: Time,
    pub criticality: Criticality,
    pub wcet_lo: Time,
    #[serde(default)]
    pub wcet_hi: Option<Time>, // Required iff criticality is HI
    pub priority: Priority,
}

impl TaskRecord {
    /// Convert into a task, checking the per-record rules
    pub fn into_task(self) -> Result<Task> {
        let level = match (self.criticality, self.wcet_hi) {
            (Criticality::Hi, Some(wcet_hi)) => CriticalityLevel::Hi { wcet_hi },
            (Criticality::Hi, None) => {
                return Err(AmcError::malformed(format!(
                    "task {} is HI-criticality but has no wcet_hi",
                    self.id
                )));
            }
            (Criticality::Lo, None) => CriticalityLevel::Lo,
            (Criticality::Lo, Some(_)) => {
                return Err(AmcError::malformed(format!(
                    "task {} is LO-criticality but declares a wcet_hi",
                    self.id
                )));
            }
        };

        Ok(Task {
            id: TaskId(self.id),
            name: self.name.unwrap_or_else(|| format!("T{}", self.id)),
            period: self.period,
            deadline: self.deadline,
            wcet_lo: self.wcet_lo,
            priority: self.priority,
            level,
        })
    }
}

impl From<&Task> for TaskRecord {
    fn from(task: &Task) -> Self {
        TaskRecord {
            id: task.id.0,
            name: Some(task.name.clone()),
            period: task.period,
            deadline: task.deadline,
            criticality: task.criticality(),
            wcet_lo: task.wcet_lo,
            wcet_hi: task.wcet_hi(),
            priority: task.priority,
        }
    }
}

/// Ordered, validated collection of tasks
#[derive(Debug, Clone)]
pub struct TaskSet {
    tasks: Vec<Task>, // Sorted by ascending priority rank (highest priority first)
    index: HashMap<TaskId, usize>,
}

impl TaskSet {
    /// Build a task set, validating the task model
    pub fn new(mut tasks: Vec<Task>) -> Result<Self> {
        if tasks.is_empty() {
            return Err(AmcError::malformed("task set is empty"));
        }

        let mut ids = HashSet::new();
        let mut priorities = HashSet::new();

        for task in &tasks {
            validate_task(task)?;

            if !ids.insert(task.id) {
                return Err(AmcError::malformed(format!("duplicate task id {}", task.id)));
            }
            if !priorities.insert(task.priority) {
                return Err(AmcError::malformed(format!(
                    "duplicate priority {} (task {})",
                    task.priority, task.id
                )));
            }
            if task.deadline > task.period {
                warn!(
                    task = %task.id,
                    deadline = task.deadline,
                    period = task.period,
                    "deadline exceeds period"
                );
            }
        }

        tasks.sort_by_key(|t| t.priority);

        let index = tasks
            .iter()
            .enumerate()
            .map(|(pos, t)| (t.id, pos))
            .collect();

        debug!(tasks = tasks.len(), "task set built");

        Ok(TaskSet { tasks, index })
    }

    /// Build a task set from JSON records
    pub fn from_records(records: Vec<TaskRecord>) -> Result<Self> {
        let tasks = records
            .into_iter()
            .map(TaskRecord::into_task)
            .collect::<Result<Vec<_>>>()?;
        Self::new(tasks)
    }

    /// Parse a task set from a JSON array of task records
    pub fn from_json_str(json: &str) -> Result<Self> {
        let records: Vec<TaskRecord> = serde_json::from_str(json)?;
        Self::from_records(records)
    }

    /// Load a task set from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Records in priority order, suitable for writing back to JSON
    pub fn to_records(&self) -> Vec<TaskRecord> {
        self.tasks.iter().map(TaskRecord::from).collect()
    }

    /// Tasks in priority order (highest priority first)
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Task> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.index.get(&id).map(|&pos| &self.tasks[pos])
    }

    /// Position of a task in priority order
    pub fn position(&self, id: TaskId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    /// Tasks with strictly higher priority than the task at `pos`
    pub fn higher_priority(&self, pos: usize) -> &[Task] {
        &self.tasks[..pos.min(self.tasks.len())]
    }

    /// Highest-priority HI-criticality task, if any
    pub fn highest_priority_hi(&self) -> Option<&Task> {
        self.tasks.iter().find(|t| t.is_hi())
    }

    pub fn max_period(&self) -> Time {
        self.tasks.iter().map(|t| t.period).max().unwrap_or(0)
    }

    /// Least common multiple of all periods, `None` on overflow
    pub fn hyperperiod(&self) -> Option<Time> {
        self.tasks
            .iter()
            .try_fold(1, |acc: Time, t| lcm(acc, t.period))
    }

    /// Total LO-mode utilization of all tasks
    pub fn utilization_lo(&self) -> f64 {
        self.tasks.iter().map(Task::utilization_lo).sum()
    }

    /// Total HI-mode utilization of the HI tasks
    pub fn utilization_hi(&self) -> f64 {
        self.tasks.iter().map(Task::utilization_hi).sum()
    }
}

impl<'a> IntoIterator for &'a TaskSet {
    type Item = &'a Task;
    type IntoIter = std::slice::Iter<'a, Task>;

    fn into_iter(self) -> Self::IntoIter {
        self.tasks.iter()
    }
}

fn validate_task(task: &Task) -> Result<()> {
    let positive = [
        ("period", task.period),
        ("deadline", task.deadline),
        ("wcet_lo", task.wcet_lo),
    ];
    for (field, value) in positive {
        if value == 0 {
            return Err(AmcError::malformed(format!(
                "task {} has non-positive {}",
                task.id, field
            )));
        }
    }

    if let CriticalityLevel::Hi { wcet_hi } = task.level {
        if wcet_hi == 0 {
            return Err(AmcError::malformed(format!(
                "task {} has non-positive wcet_hi",
                task.id
            )));
        }
        if wcet_hi < task.wcet_lo {
            return Err(AmcError::malformed(format!(
                "task {} has wcet_hi {} below wcet_lo {}",
                task.id, wcet_hi, task.wcet_lo
            )));
        }
    }

    Ok(())
}

fn gcd(mut a: Time, mut b: Time) -> Time {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn lcm(a: Time, b: Time) -> Option<Time> {
    (a / gcd(a, b)).checked_mul(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_task_json() -> &'static str {
        r#"[
            {"id": 2, "name": "B", "period": 20, "deadline": 20, "criticality": "LO",
             "wcet_lo": 5, "wcet_hi": null, "priority": 1},
            {"id": 1, "name": "A", "period": 10, "deadline": 10, "criticality": "HI",
             "wcet_lo": 2, "wcet_hi": 4, "priority": 0}
        ]"#
    }

    #[test]
    fn test_load_sorts_by_priority() {
        let set = TaskSet::from_json_str(two_task_json()).unwrap();

        assert_eq!(set.len(), 2);
        assert_eq!(set.tasks()[0].name, "A");
        assert_eq!(set.tasks()[1].name, "B");
        assert_eq!(set.position(TaskId(2)), Some(1));
        assert_eq!(set.get(TaskId(1)).unwrap().wcet_hi(), Some(4));
        assert_eq!(set.get(TaskId(9)), None);
    }

    #[test]
    fn test_higher_priority_prefix() {
        let set = TaskSet::from_json_str(two_task_json()).unwrap();

        assert!(set.higher_priority(0).is_empty());
        let hp: Vec<TaskId> = set.higher_priority(1).iter().map(|t| t.id).collect();
        assert_eq!(hp, vec![TaskId(1)]);
    }

    #[test]
    fn test_missing_wcet_hi_rejected() {
        let json = r#"[{"id": 1, "period": 10, "deadline": 10, "criticality": "HI",
                        "wcet_lo": 2, "priority": 0}]"#;
        let err = TaskSet::from_json_str(json).unwrap_err();
        assert!(matches!(err, AmcError::MalformedTaskSet(_)));
    }

    #[test]
    fn test_lo_task_with_wcet_hi_rejected() {
        let json = r#"[{"id": 1, "period": 10, "deadline": 10, "criticality": "LO",
                        "wcet_lo": 2, "wcet_hi": 3, "priority": 0}]"#;
        assert!(matches!(
            TaskSet::from_json_str(json),
            Err(AmcError::MalformedTaskSet(_))
        ));
    }

    #[test]
    fn test_duplicate_priority_rejected() {
        let tasks = vec![Task::lo(1, 10, 10, 1, 0), Task::lo(2, 20, 20, 1, 0)];
        let err = TaskSet::new(tasks).unwrap_err();
        assert!(err.to_string().contains("duplicate priority"));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let tasks = vec![Task::lo(1, 10, 10, 1, 0), Task::lo(1, 20, 20, 1, 1)];
        let err = TaskSet::new(tasks).unwrap_err();
        assert!(err.to_string().contains("duplicate task id"));
    }

    #[test]
    fn test_zero_wcet_rejected() {
        assert!(TaskSet::new(vec![Task::lo(1, 10, 10, 0, 0)]).is_err());
        assert!(TaskSet::new(vec![Task::lo(1, 0, 10, 1, 0)]).is_err());
        assert!(TaskSet::new(vec![Task::hi(1, 10, 10, 2, 1, 0)]).is_err());
        assert!(TaskSet::new(Vec::new()).is_err());
    }

    #[test]
    fn test_hyperperiod_and_utilization() {
        let set = TaskSet::new(vec![
            Task::hi(1, 10, 10, 2, 4, 0),
            Task::lo(2, 15, 15, 3, 1),
            Task::lo(3, 6, 6, 1, 2),
        ])
        .unwrap();

        assert_eq!(set.hyperperiod(), Some(30));
        assert_eq!(set.max_period(), 15);
        assert!((set.utilization_lo() - (0.2 + 0.2 + 1.0 / 6.0)).abs() < 1e-9);
        assert!((set.utilization_hi() - 0.4).abs() < 1e-9);
        assert_eq!(set.highest_priority_hi().map(|t| t.id), Some(TaskId(1)));
    }

    #[test]
    fn test_hyperperiod_overflow() {
        let set = TaskSet::new(vec![
            Task::lo(1, u64::MAX - 1, u64::MAX - 1, 1, 0),
            Task::lo(2, u64::MAX - 2, u64::MAX - 2, 1, 1),
        ])
        .unwrap();
        assert_eq!(set.hyperperiod(), None);
    }

    #[test]
    fn test_records_roundtrip_preserves_names() {
        let set = TaskSet::from_json_str(two_task_json()).unwrap();
        let records = set.to_records();
        assert_eq!(records[0].name.as_deref(), Some("A"));
        assert_eq!(records[1].wcet_hi, None);
        let again = TaskSet::from_records(records).unwrap();
        assert_eq!(again.tasks(), set.tasks());
    }
}
