use crate::error::{Error, Result};
use async_trait::async_trait;
use log::{error, info, warn};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::sleep;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, chat_id: &str, text: &str, markdown: bool) -> Result<()>;
}

/// Telegram Bot API `sendMessage`.
pub struct Telegram {
    client: reqwest::Client,
    endpoint: String,
    pause: Duration,
}

impl Telegram {
    pub fn new(api_url: &str, token: &str, pause: Duration) -> Result<Telegram> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Telegram {
            client,
            endpoint: format!("{}/bot{}/sendMessage", api_url.trim_end_matches('/'), token),
            pause,
        })
    }
}

#[async_trait]
impl Notifier for Telegram {
    async fn send(&self, chat_id: &str, text: &str, markdown: bool) -> Result<()> {
        sleep(self.pause).await;
        let mut payload = json!({
            "chat_id": chat_id,
            "text": text,
        });
        if markdown {
            payload["parse_mode"] = json!("Markdown");
        }
        let response = self.client.post(&self.endpoint).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Delivery(format!("status {}: {}", status, body)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    fn label(self) -> &'static str {
        match self {
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
        }
    }
}

/// Operator alerts, raised once a source has failed `threshold` times in a
/// row. A success resets the source's streak.
pub struct Alerter {
    channel: Option<(Arc<dyn Notifier>, String)>,
    threshold: u32,
    streaks: Mutex<HashMap<String, u32>>,
}

impl Alerter {
    pub fn new(channel: Option<(Arc<dyn Notifier>, String)>, threshold: u32) -> Alerter {
        Alerter {
            channel,
            threshold: threshold.max(1),
            streaks: Mutex::new(HashMap::new()),
        }
    }

    pub fn disabled() -> Alerter {
        Alerter::new(None, 1)
    }

    /// Counts a failure for `source`; returns `true` if this one raised an
    /// alert.
    pub async fn failure(
        &self,
        source: &str,
        severity: Severity,
        title: &str,
        detail: &str,
    ) -> bool {
        let streak = {
            let mut streaks = self.streaks.lock().unwrap_or_else(PoisonError::into_inner);
            let streak = streaks.entry(source.to_string()).or_insert(0);
            *streak += 1;
            *streak
        };
        if streak != self.threshold {
            return false;
        }
        let detail = if streak > 1 {
            format!("{} ({} consecutive failures)", detail, streak)
        } else {
            detail.to_string()
        };
        self.alert(severity, title, &detail).await;
        true
    }

    pub fn success(&self, source: &str) {
        self.streaks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(source);
    }

    /// Sends immediately, bypassing streak counting.
    pub async fn alert(&self, severity: Severity, title: &str, detail: &str) {
        let (notifier, chat_id) = match &self.channel {
            Some(channel) => channel,
            None => {
                warn!("Alert channel not configured; dropping alert: {}", title);
                return;
            }
        };
        let text = format!(
            "🚨 *{}*\n\n*{}*\n\n```\n{}\n```",
            severity.label(),
            title,
            detail
        );
        match notifier.send(chat_id, &text, true).await {
            Ok(()) => info!("Sent {} alert: {}", severity.label(), title),
            Err(e) => error!("Failed to send alert {:?}: {}", title, e),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Keeps every message instead of sending it.
    #[derive(Default)]
    pub(crate) struct Recorder {
        pub(crate) sent: Mutex<Vec<(String, String)>>,
        pub(crate) fail: bool,
    }

    impl Recorder {
        pub(crate) fn failing() -> Recorder {
            Recorder {
                fail: true,
                ..Recorder::default()
            }
        }

        pub(crate) fn messages(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for Recorder {
        async fn send(&self, chat_id: &str, text: &str, _markdown: bool) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((chat_id.to_string(), text.to_string()));
            if self.fail {
                return Err(Error::Delivery("recorder set to fail".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn telegram_posts_send_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .and(body_json(json!({"chat_id": "-100200", "text": "hello"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let telegram = Telegram::new(&server.uri(), "TOKEN", Duration::ZERO).unwrap();
        telegram.send("-100200", "hello", false).await.unwrap();
    }

    #[tokio::test]
    async fn telegram_rejection_is_a_delivery_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("chat not found"))
            .mount(&server)
            .await;

        let telegram = Telegram::new(&server.uri(), "TOKEN", Duration::ZERO).unwrap();
        let err = telegram.send("1", "hello", false).await.unwrap_err();
        assert!(matches!(err, Error::Delivery(ref msg) if msg.contains("chat not found")));
    }

    #[tokio::test]
    async fn alert_fires_once_at_threshold() {
        let recorder = Arc::new(Recorder::default());
        let channel: Arc<dyn Notifier> = recorder.clone();
        let alerter = Alerter::new(Some((channel, "ops".to_string())), 3);

        assert!(!alerter.failure("roster:Jet", Severity::Warning, "Roster", "down").await);
        assert!(!alerter.failure("roster:Jet", Severity::Warning, "Roster", "down").await);
        assert!(alerter.failure("roster:Jet", Severity::Warning, "Roster", "down").await);
        assert!(!alerter.failure("roster:Jet", Severity::Warning, "Roster", "down").await);

        let sent = recorder.messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "ops");
        assert!(sent[0].1.contains("*WARNING*"));
        assert!(sent[0].1.contains("3 consecutive failures"));
    }

    #[tokio::test]
    async fn success_resets_streak() {
        let recorder = Arc::new(Recorder::default());
        let channel: Arc<dyn Notifier> = recorder.clone();
        let alerter = Alerter::new(Some((channel, "ops".to_string())), 2);

        alerter.failure("session", Severity::Error, "Auth", "401").await;
        alerter.success("session");
        alerter.failure("session", Severity::Error, "Auth", "401").await;
        assert!(recorder.messages().is_empty());
        assert!(alerter.failure("session", Severity::Error, "Auth", "401").await);
    }

    #[tokio::test]
    async fn disabled_alerter_only_logs() {
        let alerter = Alerter::disabled();
        assert!(alerter.failure("session", Severity::Error, "Auth", "401").await);
    }
}
