use crate::config::BridgeConfig;
use crate::termination::{EndReason, TerminationCoordinator};
use crate::webhook::WebhookDispatcher;
use callrelay_core::{is_terminal_status, CallConfig, RelayResult};
use callrelay_session::{CallerNumberPool, SessionHandle, SessionRegistry};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Links never get fewer slots than this, so the connect sequence fits.
const MIN_LINK_BUFFER: usize = 8;

/// Request to place an outbound call.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementRequest {
    /// Provider call id. Generated when absent.
    #[serde(default)]
    pub call_id: Option<String>,
    /// Person being called. Required.
    #[serde(default)]
    pub subject_id: String,
    /// Opaque id echoed back in the report.
    #[serde(default)]
    pub setting_id: Option<String>,
    /// Opening instruction for the model.
    #[serde(default)]
    pub instruction: Option<String>,
    /// Model credential. Defaults to the configured key.
    #[serde(default)]
    pub credential: Option<String>,
    /// Where the final report goes. Defaults to the configured URL.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

/// Result of a placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// A session exists and a caller number is assigned.
    Accepted {
        /// Id the telephony and observer sockets connect with.
        call_id: String,
        /// Number the outbound call is placed from.
        caller_number: String,
    },
    /// Every caller number is busy. Retry later.
    Unavailable,
}

/// Shared state behind every route: registry, number pool, report delivery.
pub struct CallBridge {
    config: BridgeConfig,
    registry: Arc<dyn SessionRegistry>,
    pool: Arc<CallerNumberPool>,
    webhooks: Arc<WebhookDispatcher>,
    terminator: TerminationCoordinator,
}

impl CallBridge {
    /// Wire the bridge to its registry and number pool.
    pub fn new(
        config: BridgeConfig,
        registry: Arc<dyn SessionRegistry>,
        pool: Arc<CallerNumberPool>,
    ) -> Arc<Self> {
        let webhooks = Arc::new(WebhookDispatcher::new(config.webhook.clone()));
        let terminator =
            TerminationCoordinator::new(registry.clone(), pool.clone(), webhooks.clone());
        Arc::new(Self {
            config,
            registry,
            pool,
            webhooks,
            terminator,
        })
    }

    /// Settings the bridge was built with.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Live sessions.
    pub fn registry(&self) -> &Arc<dyn SessionRegistry> {
        &self.registry
    }

    /// Outbound caller numbers.
    pub fn pool(&self) -> &Arc<CallerNumberPool> {
        &self.pool
    }

    /// Report delivery.
    pub fn webhooks(&self) -> &Arc<WebhookDispatcher> {
        &self.webhooks
    }

    /// Outbound queue size for each link.
    pub fn link_buffer(&self) -> usize {
        self.config.relay.link_buffer.max(MIN_LINK_BUFFER)
    }

    /// Register a session for a new call and assign it a caller number.
    ///
    /// The config is validated before a number is taken. A number taken for
    /// a placement that then fails to register goes straight back.
    pub async fn place(&self, request: PlacementRequest) -> RelayResult<Placement> {
        let call_id = request
            .call_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut config = CallConfig {
            subject_id: request.subject_id,
            setting_id: request.setting_id,
            instruction: request
                .instruction
                .or_else(|| self.config.relay.default_instruction.clone()),
            credential: request
                .credential
                .filter(|c| !c.trim().is_empty())
                .or_else(|| self.config.realtime.api_key.clone())
                .unwrap_or_default(),
            webhook_url: request
                .webhook_url
                .or_else(|| self.config.webhook.default_url.clone()),
            caller_number: None,
        };
        config.validate()?;

        let Some(number) = self.pool.acquire() else {
            warn!(call_id = %call_id, "No caller number available");
            return Ok(Placement::Unavailable);
        };
        config.caller_number = Some(number.clone());

        match self.registry.create(&call_id, config).await {
            Ok(_) => {
                info!(call_id = %call_id, caller_number = %number, "Call placed");
                Ok(Placement::Accepted {
                    call_id,
                    caller_number: number,
                })
            }
            Err(e) => {
                self.pool.release(&number);
                Err(e)
            }
        }
    }

    /// Look up a live session. Registry failures are logged and read as absent.
    pub async fn session(&self, call_id: &str) -> Option<Arc<SessionHandle>> {
        match self.registry.get(call_id).await {
            Ok(session) => session,
            Err(e) => {
                error!(call_id = %call_id, error = %e, "Session lookup failed");
                None
            }
        }
    }

    /// Record a provider call status. Terminal statuses end the call.
    /// Returns true if this status ended it.
    pub async fn record_status(&self, call_id: &str, status: &str) -> bool {
        let Some(session) = self.session(call_id).await else {
            info!(call_id = %call_id, status = %status, "Status for unknown call ignored");
            return false;
        };
        session.lock().await.call_status = Some(status.to_string());
        info!(call_id = %call_id, status = %status, "Call status recorded");

        if is_terminal_status(status) {
            self.end(call_id, EndReason::ProviderStatus).await
        } else {
            false
        }
    }

    /// End `call_id` unless it is already ending. True for the call that ran teardown.
    pub async fn end(&self, call_id: &str, reason: EndReason) -> bool {
        self.terminator.end(call_id, reason).await
    }
}
