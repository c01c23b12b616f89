//! Job monitor binary.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use aws_config::BehaviorVersion;
use tracing::{error, info};

use dsa_monitor::logging::init_tracing;
use dsa_monitor::metrics::init_metrics;
use dsa_monitor::{load_clusters, AutoScalingHistory, ClusterWatch, MonitorConfig, Tracker};
use dsa_queue::{ClusterQueues, SqsQueue, WorkQueue, WorkSubmitter};
use dsa_store::StatusStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();
    info!("Starting dsa-monitor {}", env!("CARGO_PKG_VERSION"));

    let config = MonitorConfig::from_env().context("loading monitor config")?;
    info!("Monitor config: {:?}", config);

    if config.metrics_enabled {
        init_metrics(&config.metrics_addr)?;
        info!("Metrics exporter listening on {}", config.metrics_addr);
    }

    let clusters = load_clusters(&config.clusters_file)
        .with_context(|| format!("loading clusters from {}", config.clusters_file.display()))?;

    let store = StatusStore::open_for_account(&config.db_dir, &config.account, config.reset_db)
        .context("opening job cache")?;
    info!("Job cache: {:?}", store.path());

    let sdk_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let sqs = aws_sdk_sqs::Client::new(&sdk_config);
    let scaling = AutoScalingHistory::new(aws_sdk_autoscaling::Client::new(&sdk_config));

    let mut tracker =
        Tracker::new(Arc::new(store), config.monitor_settings()).with_scaling(Arc::new(scaling));

    for resources in clusters {
        let queue = |url: &str| {
            Arc::new(SqsQueue::new(sqs.clone(), url).with_visibility_timeout(config.visibility_timeout))
        };
        let submitted = queue(&resources.submitted_queue);
        let queues = ClusterQueues::new(
            submitted.clone() as Arc<dyn WorkQueue>,
            queue(&resources.completed_queue),
            queue(&resources.failed_queue),
        );

        let mut watch = ClusterWatch::new(&resources.cluster, queues)
            .with_submitter(submitted as Arc<dyn WorkSubmitter>)
            .with_kind(resources.kind);
        if let Some(group) = &resources.auto_scaling_group {
            watch = watch.with_scaling_group(group);
        }

        info!(
            cluster = %resources.cluster,
            processor = resources.processor.as_deref().unwrap_or("-"),
            "Watching cluster"
        );
        tracker.watch(watch);
    }

    let handles = tracker.spawn_all()?;

    let mut ctrl_c = std::pin::pin!(tokio::signal::ctrl_c());
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Received shutdown signal");
                break;
            }
            _ = tokio::time::sleep(Duration::from_secs(1)) => {
                if handles.iter().all(|h| h.is_finished()) {
                    info!("All monitors finished");
                    break;
                }
            }
        }
    }

    for handle in &handles {
        handle.stop();
    }
    for handle in handles {
        let cluster = handle.cluster().to_string();
        match handle.stop_and_join(config.shutdown_timeout).await {
            Ok(outcome) => info!(
                cluster = %cluster,
                cycles = outcome.cycles,
                "Monitor stopped: {:?}", outcome.reason
            ),
            Err(e) => error!(cluster = %cluster, "Monitor did not stop cleanly: {}", e),
        }
    }

    info!("Monitor shutdown complete");
    Ok(())
}
