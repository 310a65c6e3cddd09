//! Periodic scheduler for consolidation cycles.
//!
//! Uses tokio-cron-scheduler to run a cycle at a fixed interval. A tick that
//! fires while a cycle is still running is skipped by the engine itself.

use std::sync::Arc;

use chrono::Utc;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tracing::{debug, error, info};

use super::engine::{ConsolidationEngine, ConsolidationReport};
use crate::config::EngineConfig;
use crate::error::EngraveResult;

/// Configuration for the consolidation scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between cycles in minutes (default: 60)
    pub interval_minutes: u64,
    /// Whether to run a cycle immediately on start (default: false)
    pub run_on_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 60,
            run_on_start: false,
        }
    }
}

impl SchedulerConfig {
    /// Create config with custom interval.
    pub fn with_interval(interval_minutes: u64) -> Self {
        Self {
            interval_minutes: interval_minutes.max(1), // Minimum 1 minute
            ..Default::default()
        }
    }

    /// Enable running a cycle immediately on start.
    pub fn with_run_on_start(mut self) -> Self {
        self.run_on_start = true;
        self
    }
}

impl From<&EngineConfig> for SchedulerConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            interval_minutes: config.consolidation_interval_minutes.max(1),
            run_on_start: config.consolidation_run_on_start,
        }
    }
}

fn log_report(report: &ConsolidationReport) {
    if report.skipped {
        debug!("Scheduled consolidation skipped, previous cycle still running");
        return;
    }
    info!(
        promoted = report.promoted.len(),
        demoted = report.demoted.len(),
        forgotten = report.forgotten.len(),
        links_pruned = report.links_pruned,
        errors = report.errors.len(),
        duration_ms = report.duration_ms,
        "Scheduled consolidation complete"
    );
}

/// Runs [`ConsolidationEngine::run_cycle`] in the background.
///
/// # Example
///
/// ```ignore
/// use engrave_core::{ConsolidationScheduler, EngineConfig, MemoryEngine, SchedulerConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let engine = MemoryEngine::in_memory(EngineConfig::default())?;
/// let mut scheduler =
///     ConsolidationScheduler::new(engine.consolidation(), SchedulerConfig::with_interval(5)).await?;
/// scheduler.start().await?;
/// // ...
/// scheduler.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct ConsolidationScheduler {
    scheduler: JobScheduler,
    engine: Arc<ConsolidationEngine>,
    config: SchedulerConfig,
}

impl ConsolidationScheduler {
    /// Create a new scheduler. Call `start()` to begin periodic execution.
    pub async fn new(
        engine: Arc<ConsolidationEngine>,
        config: SchedulerConfig,
    ) -> Result<Self, JobSchedulerError> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler,
            engine,
            config,
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Start the scheduler.
    pub async fn start(&self) -> Result<(), JobSchedulerError> {
        let engine = self.engine.clone();
        let interval_secs = self.config.interval_minutes * 60;

        let job = Job::new_repeated_async(
            std::time::Duration::from_secs(interval_secs),
            move |_uuid, _lock| {
                let engine = engine.clone();
                Box::pin(async move {
                    debug!("Starting scheduled consolidation");
                    match engine.run_cycle(Utc::now()).await {
                        Ok(report) => log_report(&report),
                        Err(e) => error!(error = %e, "Scheduled consolidation failed"),
                    }
                })
            },
        )?;

        self.scheduler.add(job).await?;

        if self.config.run_on_start {
            debug!("Running initial consolidation on start");
            match self.engine.run_cycle(Utc::now()).await {
                Ok(report) => log_report(&report),
                Err(e) => error!(error = %e, "Initial consolidation failed"),
            }
        }

        self.scheduler.start().await?;

        info!(
            interval_minutes = self.config.interval_minutes,
            "Consolidation scheduler started"
        );

        Ok(())
    }

    /// Stop the scheduler gracefully.
    pub async fn shutdown(&mut self) -> Result<(), JobSchedulerError> {
        info!("Shutting down consolidation scheduler");
        self.scheduler.shutdown().await
    }

    /// Run a cycle now, outside the schedule.
    pub async fn run_now(&self) -> EngraveResult<ConsolidationReport> {
        self.engine.run_cycle(Utc::now()).await
    }

    pub fn engine(&self) -> &Arc<ConsolidationEngine> {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_config_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.interval_minutes, 60);
        assert!(!config.run_on_start);
    }

    #[test]
    fn test_scheduler_config_with_interval() {
        let config = SchedulerConfig::with_interval(5);
        assert_eq!(config.interval_minutes, 5);

        let config_min = SchedulerConfig::with_interval(0);
        assert_eq!(config_min.interval_minutes, 1);
    }

    #[test]
    fn test_scheduler_config_from_engine_config() {
        let engine_config = EngineConfig {
            consolidation_interval_minutes: 0,
            consolidation_run_on_start: true,
            ..Default::default()
        };
        let config = SchedulerConfig::from(&engine_config);
        assert_eq!(config.interval_minutes, 1);
        assert!(config.run_on_start);
    }
}
