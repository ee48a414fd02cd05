//! Per-instance cron logging the depth of every named queue.

use std::time::Duration;

use tracing::info;

use switchyard_infra::{CronScheduler, CronScope, Runtime};

use crate::app::{BATCH_QUEUE, HANDLER_QUEUE};

pub const CRON_NAME: &str = "queue_sizes";

const INTERVAL: Duration = Duration::from_secs(60);

/// Log and return the pending task count of each named queue.
pub async fn log_sizes(rt: &Runtime) -> anyhow::Result<Vec<(&'static str, usize)>> {
    let mut sizes = Vec::with_capacity(2);
    for queue in [BATCH_QUEUE, HANDLER_QUEUE] {
        let size = rt.queue.size(queue).await?;
        info!(queue, size, "queue size");
        sizes.push((queue, size));
    }
    Ok(sizes)
}

pub fn start(cron: &CronScheduler) {
    cron.start_cron(CRON_NAME, INTERVAL, CronScope::PerInstance, |rt| async move {
        log_sizes(&rt).await.map(|_| ())
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_core::{Priority, TenantId};
    use switchyard_infra::Config;

    #[tokio::test]
    async fn sizes_cover_every_named_queue() {
        let rt = Runtime::in_memory(Config::default());
        for tenant in [1, 2, 2] {
            rt.enqueue(BATCH_QUEUE, "import", TenantId::new(tenant), &(), Priority::Low)
                .await
                .unwrap();
        }

        let sizes = log_sizes(&rt).await.unwrap();
        assert_eq!(sizes, vec![(BATCH_QUEUE, 3), (HANDLER_QUEUE, 0)]);
    }
}
