//! Synthetic mixed-criticality task sets from measured WCETs
//!
//! Each benchmark becomes one implicit-deadline task:
//! - criticality drawn from a Bernoulli trial
//! - period = WCET scaled by a uniform factor
//! - C(HI) = C(LO) scaled by a uniform factor (HI tasks only)
//!
//! Priorities are assigned deadline-monotonically.

use std::collections::BTreeMap;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Bernoulli, Distribution, Uniform};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use amc_core::{AmcError, Criticality, Result, TaskRecord, Time};

/// Measured WCET per benchmark name
pub type WcetMap = BTreeMap<String, Time>;

/// Generator parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub hi_probability: f64,
    pub period_factor: (f64, f64),
    pub hi_factor: (f64, f64),
    pub seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            hi_probability: 0.4,
            period_factor: (10.0, 20.0),
            hi_factor: (1.5, 2.0),
            seed: None,
        }
    }
}

/// Task-set generator
pub struct TaskSetGenerator {
    config: GeneratorConfig,
    rng: StdRng,
}

impl TaskSetGenerator {
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        validate(&config)?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(TaskSetGenerator { config, rng })
    }

    /// Generate task records from a WCET map.
    ///
    /// Benchmarks are taken in ascending WCET order; zero-WCET entries are
    /// skipped. Ids are 1-based in that order, priorities 0-based in
    /// deadline-monotonic order.
    pub fn generate(&mut self, wcets: &WcetMap) -> Result<Vec<TaskRecord>> {
        let is_hi = Bernoulli::new(self.config.hi_probability)
            .map_err(|e| AmcError::config(format!("invalid HI probability: {e}")))?;
        let period_factor = Uniform::new_inclusive(self.config.period_factor.0, self.config.period_factor.1);
        let hi_factor = Uniform::new_inclusive(self.config.hi_factor.0, self.config.hi_factor.1);

        let mut benchmarks: Vec<(&String, Time)> = wcets.iter().map(|(n, &c)| (n, c)).collect();
        benchmarks.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));

        let mut records = Vec::with_capacity(benchmarks.len());
        for (i, (name, wcet_lo)) in benchmarks.into_iter().enumerate() {
            if wcet_lo == 0 {
                warn!(benchmark = %name, "skipping benchmark with zero WCET");
                continue;
            }

            let id = u32::try_from(i + 1)
                .map_err(|_| AmcError::config("too many benchmarks for 32-bit task ids"))?;
            let hi = is_hi.sample(&mut self.rng);
            let period = scale(wcet_lo, period_factor.sample(&mut self.rng)).max(wcet_lo);
            let wcet_hi = hi.then(|| scale(wcet_lo, hi_factor.sample(&mut self.rng)).max(wcet_lo));

            records.push(TaskRecord {
                id,
                name: Some(capitalize(name)),
                period,
                deadline: period,
                criticality: if hi { Criticality::Hi } else { Criticality::Lo },
                wcet_lo,
                wcet_hi,
                priority: 0,
            });
        }

        assign_deadline_monotonic(&mut records);

        let utilization: f64 = records
            .iter()
            .map(|r| r.wcet_lo as f64 / r.period as f64)
            .sum();
        info!(tasks = records.len(), utilization_lo = utilization, "task set generated");
        if utilization > 1.0 {
            warn!(utilization_lo = utilization, "LO-mode utilization exceeds 100%, task set is likely unschedulable");
        }

        Ok(records)
    }
}

/// Ascending relative deadline, ties by id; ranks 0..n-1
pub fn assign_deadline_monotonic(records: &mut [TaskRecord]) {
    records.sort_by(|a, b| a.deadline.cmp(&b.deadline).then_with(|| a.id.cmp(&b.id)));
    for (rank, record) in records.iter_mut().enumerate() {
        record.priority = rank as u32;
    }
}

fn scale(value: Time, factor: f64) -> Time {
    (value as f64 * factor).floor() as Time
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn validate(config: &GeneratorConfig) -> Result<()> {
    if !(0.0..=1.0).contains(&config.hi_probability) {
        return Err(AmcError::config("HI probability must lie in [0, 1]"));
    }
    for (label, (lo, hi)) in [("period", config.period_factor), ("HI budget", config.hi_factor)] {
        if !(lo >= 1.0 && lo <= hi && hi.is_finite()) {
            return Err(AmcError::config(format!(
                "{label} factor range [{lo}, {hi}] must satisfy 1 <= min <= max"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use amc_core::TaskSet;

    fn wcets() -> WcetMap {
        [("qsort", 120), ("crc", 40), ("basicmath", 300), ("broken", 0)]
            .into_iter()
            .map(|(n, c)| (n.to_string(), c))
            .collect()
    }

    fn seeded(seed: u64) -> TaskSetGenerator {
        TaskSetGenerator::new(GeneratorConfig {
            seed: Some(seed),
            ..GeneratorConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_generated_set_is_valid() {
        let records = seeded(7).generate(&wcets()).unwrap();

        // Zero-WCET benchmark skipped
        assert_eq!(records.len(), 3);
        for r in &records {
            assert_eq!(r.deadline, r.period);
            assert!(r.period >= 10 * r.wcet_lo && r.period <= 20 * r.wcet_lo);
            match r.criticality {
                Criticality::Hi => {
                    let c_hi = r.wcet_hi.unwrap();
                    assert!(c_hi >= r.wcet_lo && c_hi <= 2 * r.wcet_lo);
                }
                Criticality::Lo => assert_eq!(r.wcet_hi, None),
            }
        }

        // Loads as a well-formed task set
        let set = TaskSet::from_records(records).unwrap();
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_ids_follow_wcet_order_and_names_capitalized() {
        let records = seeded(1).generate(&wcets()).unwrap();
        let crc = records.iter().find(|r| r.wcet_lo == 40).unwrap();
        let math = records.iter().find(|r| r.wcet_lo == 300).unwrap();

        // "broken" (0) takes id 1 before being skipped
        assert_eq!(crc.id, 2);
        assert_eq!(math.id, 4);
        assert_eq!(math.name.as_deref(), Some("Basicmath"));
    }

    #[test]
    fn test_priorities_are_deadline_monotonic() {
        let records = seeded(3).generate(&wcets()).unwrap();
        for (rank, pair) in records.windows(2).enumerate() {
            assert!(pair[0].deadline <= pair[1].deadline);
            assert_eq!(pair[0].priority, rank as u32);
        }
    }

    #[test]
    fn test_seed_is_reproducible() {
        let a = seeded(42).generate(&wcets()).unwrap();
        let b = seeded(42).generate(&wcets()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_probability_extremes() {
        let mut all_hi = TaskSetGenerator::new(GeneratorConfig {
            hi_probability: 1.0,
            seed: Some(5),
            ..GeneratorConfig::default()
        })
        .unwrap();
        let records = all_hi.generate(&wcets()).unwrap();
        assert!(records.iter().all(|r| r.criticality == Criticality::Hi));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let bad_probability = GeneratorConfig {
            hi_probability: 1.5,
            ..GeneratorConfig::default()
        };
        assert!(TaskSetGenerator::new(bad_probability).is_err());

        let bad_range = GeneratorConfig {
            period_factor: (5.0, 2.0),
            ..GeneratorConfig::default()
        };
        assert!(TaskSetGenerator::new(bad_range).is_err());
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("qsort"), "Qsort");
        assert_eq!(capitalize("CRC"), "Crc");
        assert_eq!(capitalize(""), "");
    }
}
