//! Workflow Definition Module
//!
//! Provides the declarative side of a workflow: templates as written in a
//! configuration file, and the building blocks used to expand them.
//!
//! # Structure
//!
//! - [`model`]: Configuration structures (cycles, tasks, data)
//! - [`parser`]: YAML loading and template-level checks
//! - [`parameters`]: Parameter dimensions and Cartesian expansion
//! - [`temporal`]: `when` guards and `target_cycle` references
//! - [`cycling`]: Cycle point enumeration

pub mod cycling;
pub mod model;
pub mod parameters;
pub mod parser;
pub mod temporal;

pub use cycling::{CyclePoint, Horizon};
pub use model::{
    Boundary, CycleConfig, CycleTaskConfig, DataItemConfig, OutputConfig, TargetRef, TaskConfig,
    WorkflowConfig,
};
pub use parameters::{Assignment, ParamRef, ParamValue, ParameterSpace};
pub use parser::{load_workflow, parse_workflow, save_workflow};
pub use temporal::{TargetCycle, TemporalSpec, When};
