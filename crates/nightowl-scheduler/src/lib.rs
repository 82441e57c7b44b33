//! `nightowl-scheduler`: job stores, triggers and the scheduler service.
//!
//! # Overview
//!
//! The [`Scheduler`] owns a set of named [`JobStore`]s: the transient
//! `default` store and any number of durable [`SqliteJobStore`]s. Its firing
//! loop wakes every tick, fires each job whose next run time has arrived, and
//! computes the next one from the job's [`Trigger`]. Fired jobs are handed
//! off over an mpsc channel as [`FiredJob`]s.
//!
//! [`service::methods`] exposes job control over the `nightowl-rpc`
//! endpoint; [`SchedulerClient`] is the matching client. Both the in-process
//! scheduler and the client implement [`JobControl`].
//!
//! # Trigger kinds
//!
//! | Kind       | Behaviour                                                |
//! |------------|----------------------------------------------------------|
//! | `date`     | Single fire at an absolute UTC instant                   |
//! | `interval` | Repeat every weeks+days+hours+minutes+seconds, optional start/end |
//! | `cron`     | Per-field cron expressions incl. ISO week, optional start/end |

pub mod client;
pub mod control;
pub mod db;
pub mod engine;
pub mod error;
pub mod service;
pub mod store;
pub mod trigger;
pub mod types;

pub use client::SchedulerClient;
pub use control::{ControlError, ControlResult, JobControl};
pub use db::SqliteJobStore;
pub use engine::Scheduler;
pub use error::{Result, SchedulerError};
pub use store::{JobStore, MemoryJobStore};
pub use trigger::{Trigger, TriggerKind, TriggerSpec};
pub use types::{FiredJob, Job, JobChanges, JobInfo, NewJob};
