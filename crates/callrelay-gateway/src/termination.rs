use crate::webhook::{format_report, WebhookDispatcher};
use callrelay_session::{CallEvent, CallerNumberPool, SessionRegistry};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Why a call is being torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The telephony stream sent `stop`.
    TelephonyStopped,
    /// The telephony socket closed or sent `close`.
    TelephonyClosed,
    /// The telephony socket failed.
    TelephonyError,
    /// No telephony frame arrived within the idle timeout.
    IdleTimeout,
    /// The provider reported a terminal call status.
    ProviderStatus,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TelephonyStopped => "telephony_stopped",
            Self::TelephonyClosed => "telephony_closed",
            Self::TelephonyError => "telephony_error",
            Self::IdleTimeout => "idle_timeout",
            Self::ProviderStatus => "provider_status",
        };
        f.write_str(s)
    }
}

/// Runs the end-of-call sequence exactly once per session.
///
/// Order: report delivery, link shutdown, caller number release, registry
/// removal. Every trigger (telephony stop, socket close, provider status)
/// funnels through [`TerminationCoordinator::end`]; only the first caller
/// for a session does any work.
#[derive(Clone)]
pub struct TerminationCoordinator {
    registry: Arc<dyn SessionRegistry>,
    pool: Arc<CallerNumberPool>,
    webhooks: Arc<WebhookDispatcher>,
}

impl TerminationCoordinator {
    /// Teardown over the given registry, pool and report dispatcher.
    pub fn new(
        registry: Arc<dyn SessionRegistry>,
        pool: Arc<CallerNumberPool>,
        webhooks: Arc<WebhookDispatcher>,
    ) -> Self {
        Self {
            registry,
            pool,
            webhooks,
        }
    }

    /// End `call_id`. Returns true if this call performed the teardown.
    pub async fn end(&self, call_id: &str, reason: EndReason) -> bool {
        let session = match self.registry.get(call_id).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                debug!(call_id = %call_id, reason = %reason, "End requested for unknown call");
                return false;
            }
            Err(e) => {
                error!(call_id = %call_id, error = %e, "Session lookup failed during end");
                return false;
            }
        };

        if !session.mark_terminated() {
            debug!(call_id = %call_id, reason = %reason, "Call already terminating");
            return false;
        }
        info!(call_id = %call_id, reason = %reason, "Ending call");

        let (report, url) = {
            let mut s = session.lock().await;
            s.apply(CallEvent::EndRequested);
            s.ended_at = Some(callrelay_core::now());
            (
                format_report(&s, &self.webhooks.settings().language),
                s.config.webhook_url.clone(),
            )
        };

        self.webhooks
            .send_report(call_id, url.as_deref(), &report)
            .await;

        let (links, caller_number) = {
            let mut s = session.lock().await;
            (s.links.take_all(), s.config.caller_number.clone())
        };
        for link in &links {
            link.close();
        }

        if let Some(number) = caller_number {
            self.pool.release(&number);
        }

        if let Err(e) = self.registry.delete(call_id).await {
            error!(call_id = %call_id, error = %e, "Failed to remove session");
        }

        session.lock().await.apply(CallEvent::Released);
        info!(call_id = %call_id, links = links.len(), "Call ended");
        true
    }
}
