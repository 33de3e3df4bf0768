use crate::config::WebhookSettings;
use callrelay_core::{CallOutcome, RelayError, RelayResult, TranscriptEntry};
use callrelay_session::Session;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

/// Final report posted when a call ends.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallReport {
    /// Person that was called.
    pub subject_id: String,
    /// Echo of the placement setting id.
    pub setting_id: Option<String>,
    /// When the media stream started, else when the call was placed.
    pub start_time: DateTime<Utc>,
    /// When teardown began.
    pub end_time: DateTime<Utc>,
    /// Normalized provider outcome.
    pub status: CallOutcome,
    /// 1 if the subject took part in the conversation, else 0.
    pub responded: u8,
    /// Speaker-tagged conversation.
    pub transcription: Transcription,
}

/// Transcript section of a [`CallReport`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcription {
    /// Language tag from the webhook settings.
    pub language: String,
    /// Entries in arrival order.
    pub full_text: Vec<TranscriptEntry>,
}

/// Outcome of a report delivery. Never an error: delivery is best effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// No webhook configured.
    Skipped,
    /// The endpoint answered 2xx.
    Delivered,
    /// Network failure or non-2xx answer.
    Failed,
}

/// Result of an observer-requested test delivery.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WebhookTestResult {
    /// Always `webhook.test.result`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Whether the endpoint answered 2xx.
    pub success: bool,
    /// Set on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Set on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

const TEST_RESULT_TYPE: &str = "webhook.test.result";

impl WebhookTestResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            kind: TEST_RESULT_TYPE,
            success: true,
            message: Some(message.into()),
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            kind: TEST_RESULT_TYPE,
            success: false,
            message: None,
            error: Some(error.into()),
        }
    }
}

/// Map the session's raw provider status to a reported outcome.
///
/// Unrecognized statuses report failed. When no status callback arrived, a
/// call whose media stream started counts as completed.
pub fn normalize_outcome(session: &Session) -> CallOutcome {
    match session.call_status.as_deref() {
        Some(raw) => CallOutcome::from_provider_status(raw).unwrap_or_else(|| {
            warn!(call_id = %session.call_id, status = %raw, "Unrecognized call status, reporting failed");
            CallOutcome::Failed
        }),
        None if session.stream_sid.is_some() => CallOutcome::Completed,
        None => CallOutcome::Failed,
    }
}

/// Build the final report for a session.
pub fn format_report(session: &Session, language: &str) -> CallReport {
    let status = normalize_outcome(session);
    let responded = session
        .responded
        .unwrap_or(!session.transcript.is_empty());

    CallReport {
        subject_id: session.config.subject_id.clone(),
        setting_id: session.config.setting_id.clone(),
        start_time: session.started_at.unwrap_or(session.created_at),
        end_time: session.ended_at.unwrap_or_else(callrelay_core::now),
        status,
        responded: u8::from(responded),
        transcription: Transcription {
            language: language.to_string(),
            full_text: session.transcript.clone(),
        },
    }
}

fn sample_transcript() -> Value {
    serde_json::json!([
        {"speaker": "agent", "text": "Hello! I'm calling to check in on you today."},
        {"speaker": "subject", "text": "Hello, nice to hear from you."},
        {"speaker": "agent", "text": "How many hours did you sleep last night?"},
        {"speaker": "subject", "text": "About seven hours."},
        {"speaker": "agent", "text": "That's good to hear. Have a lovely day!"}
    ])
}

/// Posts call reports. One attempt per report, no retry, no queue.
pub struct WebhookDispatcher {
    http: reqwest::Client,
    settings: WebhookSettings,
}

impl WebhookDispatcher {
    /// Build a dispatcher whose requests time out per `settings`.
    pub fn new(settings: WebhookSettings) -> Self {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Webhook client build failed, using defaults without timeout");
                reqwest::Client::new()
            });
        Self { http, settings }
    }

    /// Settings in use.
    pub fn settings(&self) -> &WebhookSettings {
        &self.settings
    }

    /// POST `payload` as JSON. Non-2xx answers are errors.
    pub async fn deliver<T: Serialize + ?Sized>(&self, url: &str, payload: &T) -> RelayResult<u16> {
        let resp = self
            .http
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| RelayError::Webhook(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(RelayError::Webhook(format!("endpoint answered {status}")))
        }
    }

    /// Deliver the final report of `call_id`, logging the outcome.
    pub async fn send_report(
        &self,
        call_id: &str,
        url: Option<&str>,
        report: &CallReport,
    ) -> DeliveryOutcome {
        let Some(url) = url.filter(|u| !u.trim().is_empty()) else {
            info!(call_id = %call_id, "No webhook configured, skipping report");
            return DeliveryOutcome::Skipped;
        };

        info!(
            call_id = %call_id,
            url = %url,
            status = report.status.as_str(),
            utterances = report.transcription.full_text.len(),
            "Sending call report"
        );
        match self.deliver(url, report).await {
            Ok(code) => {
                info!(call_id = %call_id, http_status = code, "Call report delivered");
                DeliveryOutcome::Delivered
            }
            Err(e) => {
                error!(call_id = %call_id, error = %e, "Call report delivery failed");
                DeliveryOutcome::Failed
            }
        }
    }

    /// Send a test report to `url`, falling back to the configured default.
    pub async fn send_test(
        &self,
        call_id: &str,
        url: Option<&str>,
        test_data: Option<Value>,
    ) -> WebhookTestResult {
        let target = url
            .filter(|u| !u.trim().is_empty())
            .or(self.settings.default_url.as_deref());
        let Some(target) = target else {
            info!(call_id = %call_id, "Test webhook requested without a URL");
            return WebhookTestResult::failed("No webhook URL configured");
        };

        let body = serde_json::json!({
            "content": test_data.unwrap_or_else(sample_transcript),
            "test": true,
            "timestamp": callrelay_core::now().to_rfc3339(),
            "sessionId": call_id,
        });

        info!(call_id = %call_id, url = %target, "Sending test webhook");
        match self.deliver(target, &body).await {
            Ok(_) => WebhookTestResult::ok("Test webhook sent successfully"),
            Err(e) => WebhookTestResult::failed(e.to_string()),
        }
    }
}
