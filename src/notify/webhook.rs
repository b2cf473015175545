//! JSON webhook sink.

use super::{Notification, Notifier, NotifyError};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Posts each notification as a JSON body to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
    max_elapsed: Duration,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        Self {
            client: Client::new(),
            url,
            max_elapsed: Duration::from_secs(30),
        }
    }

    /// Cap on total retry time.
    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        debug!(kind = notification.kind(), url = %self.url, "Posting notification");
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        };

        retry(backoff, || async {
            let response = self
                .client
                .post(&self.url)
                .json(notification)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(NotifyError::NetworkError(e.to_string())))?;

            let status = response.status();
            if status == 429 || status.is_server_error() {
                return Err(backoff::Error::transient(NotifyError::HttpError {
                    status: status.as_u16(),
                    message: "Sink unavailable".to_string(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(NotifyError::HttpError {
                    status: status.as_u16(),
                    message: "Rejected by sink".to_string(),
                }));
            }
            Ok(())
        })
        .await
    }
}
