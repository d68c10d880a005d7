//! Duration/Calendar Module
//!
//! ISO-8601 duration parsing and calendar-aware date arithmetic. Every
//! other component does its time math through this module.
//!
//! - [`duration`]: the signed [`Duration`] type, parsing and `add`/`subtract`
//! - [`date`]: date-time parsing and the serde helpers used by the model

pub mod date;
pub mod duration;

pub use date::{format_datetime, parse_datetime};
pub use duration::{add, subtract, Duration};
