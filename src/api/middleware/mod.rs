//! API middleware stack.
//!
//! Execution order (outermost → innermost):
//! 1. Rate limiter, rejects early
//! 2. Audit logger, records method, path and status

pub mod audit;
pub mod rate;
