//! Scheduled task service for PocketPaw — timer-driven cron/interval/one-shot
//! jobs that prompt the agent and optionally deliver the reply to a channel.

pub mod service;
pub mod types;

pub use service::{CronService, OnJobFn};
pub use types::{CronJob, CronJobState, CronPayload, CronSchedule, JobStatus, ScheduleKind};
