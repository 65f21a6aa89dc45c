//! Periodic job scheduling on a bounded worker pool

pub mod job;

pub use job::{JobHandle, JobId, JobScheduler, Runnable, ScheduleError};
