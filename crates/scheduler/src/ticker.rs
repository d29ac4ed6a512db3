use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;

use nerdy_engine::{ScanPipeline, TickReport};
use nerdy_milestones::MilestoneSource;
use nerdy_notifier::PushDelivery;

/// Source of the scan time handed to each tick.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Periodic trigger that runs one scan tick per interval.
pub struct ScanTicker<M, D, C = SystemClock> {
    pipeline: ScanPipeline<M, D>,
    interval: Duration,
    clock: C,
}

impl<M, D, C> ScanTicker<M, D, C>
where
    M: MilestoneSource,
    D: PushDelivery,
    C: Clock,
{
    pub fn new(pipeline: ScanPipeline<M, D>, interval: Duration, clock: C) -> Self {
        Self {
            pipeline,
            interval,
            clock,
        }
    }

    /// Run a single tick now.
    pub async fn run_once(&self) -> anyhow::Result<TickReport> {
        self.pipeline.run_tick(self.clock.now()).await
    }

    /// Tick until `shutdown` completes. Returns the number of ticks run.
    ///
    /// A failed tick is logged and the loop carries on; the next tick
    /// resumes from the stored watermark. Ticks missed while a slow tick was
    /// running are delayed rather than run back to back.
    pub async fn run<F>(&self, shutdown: F) -> usize
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Scan ticker started"
        );

        let mut ticks = 0;
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }

            ticks += 1;
            match self.run_once().await {
                Ok(report) if report.skipped => {}
                Ok(report) => {
                    if report.transient_drops > 0 || report.errors > 0 {
                        tracing::warn!(
                            transient_drops = report.transient_drops,
                            errors = report.errors,
                            "Scan tick finished with undelivered notifications"
                        );
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Scan tick failed");
                }
            }
        }

        tracing::info!(ticks, "Scan ticker stopped");
        ticks
    }
}
