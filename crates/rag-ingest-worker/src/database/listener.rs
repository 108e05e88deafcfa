use anyhow::Result;
use sqlx::postgres::PgListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::IngestJobNotification;
use crate::config::DatabaseConfig;

/// Latency optimization over the durable poll loop: wakes the claim
/// loop early when the API server inserts a job, instead of waiting out
/// the next poll tick. The worker never depends on a notification
/// actually arriving — `Repository::claim_next_job` is the source of
/// truth either way.
pub struct NotificationListener {
    config: DatabaseConfig,
    channel: String,
}

impl NotificationListener {
    pub fn new(config: DatabaseConfig, channel: String) -> Self {
        Self { config, channel }
    }

    pub async fn start(&self) -> Result<mpsc::UnboundedReceiver<IngestJobNotification>> {
        let (tx, rx) = mpsc::unbounded_channel();

        let url = self.config.url.clone();
        let channel_name = self.channel.clone();

        tokio::spawn(async move {
            info!("connecting ingest job listener");

            let mut listener = match PgListener::connect(&url).await {
                Ok(listener) => listener,
                Err(e) => {
                    error!(error = %e, "listener failed to connect");
                    return;
                }
            };

            if let Err(e) = listener.listen(&channel_name).await {
                error!(error = %e, "failed to LISTEN on channel");
                return;
            }

            info!(channel = %channel_name, "listening for ingest job notifications");

            loop {
                match listener.recv().await {
                    Ok(notification) => {
                        debug!(payload = notification.payload(), "received notification");
                        match serde_json::from_str::<IngestJobNotification>(notification.payload())
                        {
                            Ok(payload) => {
                                if tx.send(payload).is_err() {
                                    warn!("notification receiver dropped, stopping listener");
                                    break;
                                }
                            }
                            Err(e) => error!(error = %e, "failed to parse notification payload"),
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "listener connection error, stopping");
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }
}
