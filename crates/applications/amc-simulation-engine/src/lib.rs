//! AMC Simulation Engine
//!
//! Response-time analysis and discrete-event simulation of fixed-priority
//! preemptive scheduling under Adaptive Mixed Criticality (AMC-RTB).

pub mod analysis;
pub mod mode;
pub mod trace;
pub mod simulator;
pub mod generator;
pub mod pipeline;
