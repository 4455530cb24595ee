//! objmirror cron
//!
//! The periodic-scan coordinator: on each tick it lists every rule's source
//! within the configured time window, diffs the candidates against the
//! processed-object [`ledger::Ledger`], dispatches pending objects through a
//! bounded worker pool, and records successes so work is not duplicated
//! across ticks.
//!
//! One coordinator per ledger location: concurrent ticks against the same
//! `MetaURL` are an operator error, not something this crate prevents.

pub mod ledger;
mod pool;
pub mod service;
pub mod trigger;

pub use ledger::Ledger;
pub use service::{CronService, RuleMatches, TickReport, WORKER_LIMIT};
pub use trigger::{LocalTrigger, Trigger, TriggerRegistry};
