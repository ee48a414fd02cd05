//! Feature modules: each registers its handlers and crons here.

pub mod queue_sizes;
pub mod session_timeouts;

use std::sync::Arc;

use switchyard_infra::{CronScheduler, HandlerRegistry, RegistryError};

use crate::app::Collaborators;

pub fn register(
    registry: &mut HandlerRegistry,
    collaborators: &Collaborators,
) -> Result<(), RegistryError> {
    session_timeouts::register(registry, Arc::clone(&collaborators.sessions))?;
    Ok(())
}

pub fn start_crons(cron: &CronScheduler, collaborators: &Collaborators) {
    session_timeouts::start(cron, Arc::clone(&collaborators.sessions));
    queue_sizes::start(cron);
}
