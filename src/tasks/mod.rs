//! Background Tasks Module
//!
//! Per-namespace tasks that run on timers, independently of callers.
//!
//! # Tasks
//! - Expiry sweeper: removes expired entries every tenth of the default TTL
//! - Auto-tuner: adjusts the size budget from the observed hit rate

mod sweeper;
mod tuner;

pub use sweeper::spawn_sweeper_task;
pub use tuner::spawn_tuning_task;
