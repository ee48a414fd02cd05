//! Composition root: wires configuration, stores, task handlers, worker
//! pools and cron jobs into one running process.

pub mod app;
pub mod features;
