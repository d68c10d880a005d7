//! CycleFlow - Cycling Workflow Graph Compiler
//!
//! Compiles declarative descriptions of repeating scientific computations
//! (task templates, data templates and time-windowed cycles) into a finite
//! graph of dated, parameterized task and data nodes. Cross-cycle
//! references, conditional inputs and ordering-only dependencies are all
//! resolved to exact node references.
//!
//! # Architecture
//!
//! The library is organized into four main modules:
//!
//! - [`calendar`]: ISO-8601 durations and calendar-aware date arithmetic
//! - [`workflow`]: Configuration model, YAML loading, parameters and cycles
//! - [`graph`]: Graph assembly, validation and rendering
//! - [`error`]: Configuration and loading errors
//!
//! # Example
//!
//! ```rust,no_run
//! use cycleflow::{compile, load_workflow, validate};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load a workflow from YAML
//!     let config = load_workflow("icon.yml")?;
//!
//!     // Expand cycles and parameters into a graph
//!     let graph = compile(&config)?;
//!
//!     // Check structural invariants
//!     let findings = validate(&graph);
//!     if !findings.is_clean() {
//!         eprintln!("{}", findings);
//!     }
//!
//!     for id in graph.task_order().map_err(|_| "dependency loop")? {
//!         println!("{}", graph.task(id).label());
//!     }
//!     Ok(())
//! }
//! ```

pub mod calendar;
pub mod error;
pub mod graph;
pub mod workflow;

// Re-export commonly used types
pub use calendar::Duration;
pub use error::{ConfigError, LoadError};
pub use graph::{compile, validate, Finding, FindingKind, Findings, Graph};
pub use workflow::model::WorkflowConfig;
pub use workflow::parser::{load_workflow, parse_workflow};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "CycleFlow";
