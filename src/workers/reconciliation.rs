use crate::config::ReconcilerConfig;
use crate::services::PaymentService;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Background reconciler: periodically sweeps non-terminal payments whose
/// provider status has not been checked recently and pulls the current state.
///
/// The worker is stateless between cycles; the sweep cursor lives in each
/// row's `last_status_check_at`, so a restart loses nothing. A failed cycle
/// is logged and the next one runs on schedule.
pub struct ReconciliationWorker {
    service: Arc<PaymentService>,
    config: ReconcilerConfig,
}

impl ReconciliationWorker {
    pub fn new(service: Arc<PaymentService>, config: ReconcilerConfig) -> Self {
        Self { service, config }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let poll_interval = Duration::from_secs(self.config.poll_interval_seconds);
        info!(
            poll_interval_secs = self.config.poll_interval_seconds,
            older_than_minutes = self.config.older_than_minutes,
            batch_limit = self.config.batch_limit,
            "reconciliation worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("reconciliation worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(poll_interval) => {
                    self.run_cycle().await;
                }
            }
        }

        info!("reconciliation worker stopped");
    }

    async fn run_cycle(&self) {
        match self
            .service
            .check_pending_payments(None, self.config.older_than_minutes, self.config.batch_limit)
            .await
        {
            Ok(report) => {
                if report.checked > 0 {
                    info!(
                        checked = report.checked,
                        updated = report.updated,
                        errors = report.errors.len(),
                        "reconciliation cycle finished"
                    );
                }
                for error in &report.errors {
                    warn!(error = %error, "reconciliation error");
                }
            }
            Err(e) => {
                warn!(error = %e, "reconciliation cycle failed");
            }
        }
    }
}
