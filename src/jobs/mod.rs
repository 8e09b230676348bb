use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info};

pub mod tasks;

/// Job scheduler for background tasks
pub struct JobScheduler {
    context: Arc<crate::context::BansContext>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl JobScheduler {
    pub fn new(context: Arc<crate::context::BansContext>) -> Self {
        Self {
            context,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Start all background jobs
    pub fn start(self: &Arc<Self>) {
        info!("Starting background job scheduler");

        let handles = vec![
            tokio::spawn(Self::expiration_sweep_job(Arc::clone(self))),
            tokio::spawn(Self::health_check_job(Arc::clone(self))),
        ];
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(handles);

        info!("Background jobs started");
    }

    /// Stop every running job
    pub fn shutdown(&self) {
        let handles = std::mem::take(&mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in handles {
            handle.abort();
        }
        info!("Background jobs stopped");
    }

    /// Remove expired punishments (runs every sweep interval)
    async fn expiration_sweep_job(scheduler: Arc<Self>) {
        let period = Duration::from_secs(scheduler.context.config.jobs.sweep_interval_secs);
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            let expired = tasks::sweep_expired(&scheduler.context);
            if expired > 0 {
                info!("Expired {} punishments", expired);
            } else {
                debug!("Expiration sweep: nothing expired");
            }
        }
    }

    /// Health check job (runs every health check interval)
    async fn health_check_job(scheduler: Arc<Self>) {
        let period = Duration::from_secs(scheduler.context.config.jobs.health_check_secs.max(1));
        let mut interval = interval(period);

        loop {
            interval.tick().await;

            match tasks::health_check(&scheduler.context).await {
                Ok(_) => {
                    // Silent success - health is good
                }
                Err(e) => error!("Health check failed: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BansConfig;
    use crate::context::BansContext;
    use crate::platform::HeadlessPlatform;
    use crate::punishment::{Expiration, Operator, Punishment, PunishmentType, Subject};
    use chrono::Utc;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_sweep_job_expires_punishments() {
        let mut config = BansConfig::default();
        config.storage.database_url = "sqlite::memory:".to_string();
        config.jobs.sweep_interval_secs = 1;

        let ctx = Arc::new(
            BansContext::new(config, Arc::new(HeadlessPlatform))
                .await
                .unwrap(),
        );

        let subject = Subject::Player(Uuid::new_v4());
        let mute = Punishment::new(
            PunishmentType::Mute,
            subject,
            Operator::Console,
            "caps",
            Expiration::At(Utc::now() + chrono::Duration::milliseconds(200)),
        );
        ctx.enforcement.add_punishment(mute).unwrap();
        assert!(ctx.enforcement.is_muted(&subject));

        let scheduler = Arc::new(JobScheduler::new(Arc::clone(&ctx)));
        scheduler.start();

        // First tick fires immediately, the next one a second later
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!ctx.enforcement.is_muted(&subject));
        assert_eq!(ctx.enforcement.history(&subject).len(), 1);

        scheduler.shutdown();
        ctx.close().await;
    }
}
