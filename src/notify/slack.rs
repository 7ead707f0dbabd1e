use super::Notifier;
use reqwest::Client;
use serde::Serialize;
use tokio::time::Duration;

const WEBHOOK_TIMEOUT_SECS: u64 = 10;

/// Posts messages to a Slack incoming webhook
#[derive(Clone)]
pub struct SlackNotifier {
    client: Client,
    webhook_url: String,
    username: String,
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    text: &'a str,
    username: &'a str,
}

impl SlackNotifier {
    pub fn new(webhook_url: impl Into<String>, username: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(WEBHOOK_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();

        Self {
            client,
            webhook_url: webhook_url.into(),
            username: username.into(),
        }
    }

    /// Deliver one message and wait for the result
    pub async fn post(&self, message: &str) -> Result<(), reqwest::Error> {
        let payload = WebhookPayload {
            text: message,
            username: &self.username,
        };

        self.client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}

impl Notifier for SlackNotifier {
    fn send_text(&self, message: &str) {
        let notifier = self.clone();
        let message = message.to_string();

        // Outside a runtime (e.g. during a panic hook) fall back to the log
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = notifier.post(&message).await {
                        tracing::warn!("Slack notification failed: {}", e);
                    }
                });
            }
            Err(_) => tracing::info!(target: "notify", "{}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_post_sends_text_and_username() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_body(Matcher::Json(serde_json::json!({
                "text": "LOGIC START!",
                "username": "fxbot",
            })))
            .with_status(200)
            .create_async()
            .await;

        let notifier = SlackNotifier::new(format!("{}/hook", server.url()), "fxbot");
        notifier.post("LOGIC START!").await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_post_surfaces_http_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/hook")
            .with_status(404)
            .create_async()
            .await;

        let notifier = SlackNotifier::new(format!("{}/hook", server.url()), "fxbot");
        assert!(notifier.post("hello").await.is_err());
    }
}
