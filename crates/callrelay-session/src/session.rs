use crate::link::{LinkHandle, LinkRole};
use crate::state::{CallEvent, CallState};
use callrelay_core::{CallConfig, TranscriptEntry};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// Milliseconds of agent audio the subject heard before interrupting.
pub fn playback_elapsed(latest_media_ms: u64, response_start_ms: u64) -> u64 {
    latest_media_ms.saturating_sub(response_start_ms)
}

/// Truncation to send to the model after a barge-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Truncation {
    /// Assistant item that was playing.
    pub item_id: String,
    /// How far into the item playback got.
    pub audio_end_ms: u64,
}

/// The live links of a session, at most one per role.
#[derive(Debug, Default)]
pub struct Links {
    /// Telephony media stream.
    pub telephony: Option<LinkHandle>,
    /// Realtime model connection.
    pub model: Option<LinkHandle>,
    /// Monitoring client.
    pub observer: Option<LinkHandle>,
}

impl Links {
    /// The link currently bound for `role`.
    pub fn get(&self, role: LinkRole) -> Option<&LinkHandle> {
        self.slot(role).as_ref()
    }

    fn slot(&self, role: LinkRole) -> &Option<LinkHandle> {
        match role {
            LinkRole::Telephony => &self.telephony,
            LinkRole::Model => &self.model,
            LinkRole::Observer => &self.observer,
        }
    }

    fn slot_mut(&mut self, role: LinkRole) -> &mut Option<LinkHandle> {
        match role {
            LinkRole::Telephony => &mut self.telephony,
            LinkRole::Model => &mut self.model,
            LinkRole::Observer => &mut self.observer,
        }
    }

    /// Bind `link` to its role, returning whatever it replaced.
    pub fn bind(&mut self, link: LinkHandle) -> Option<LinkHandle> {
        self.slot_mut(link.role).replace(link)
    }

    /// Unbind the link for `role` only if it is still `link_id`.
    ///
    /// A newer link of the same role is left in place.
    pub fn unbind(&mut self, role: LinkRole, link_id: uuid::Uuid) -> Option<LinkHandle> {
        let slot = self.slot_mut(role);
        if slot.as_ref().is_some_and(|l| l.id == link_id) {
            slot.take()
        } else {
            None
        }
    }

    /// Unbind every link.
    pub fn take_all(&mut self) -> Vec<LinkHandle> {
        [
            self.telephony.take(),
            self.model.take(),
            self.observer.take(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Queue a frame on the link for `role`, if one is bound.
    pub fn send(&self, role: LinkRole, text: String) -> bool {
        self.get(role).is_some_and(|l| l.send(text))
    }

    /// Queue a JSON frame on the link for `role`, if one is bound.
    pub fn send_json<T: serde::Serialize + ?Sized>(&self, role: LinkRole, value: &T) -> bool {
        self.get(role).is_some_and(|l| l.send_json(value))
    }
}

/// Bridging context of one call.
#[derive(Debug)]
pub struct Session {
    /// Provider call id; registry key.
    pub call_id: String,
    /// Placement input.
    pub config: CallConfig,
    /// Utterances in the order they were recognized.
    pub transcript: Vec<TranscriptEntry>,
    /// Live links.
    pub links: Links,
    /// Telephony stream id, set by `start`.
    pub stream_sid: Option<String>,
    /// Assistant item currently being played to the subject.
    pub last_assistant_item: Option<String>,
    /// Media offset at which the current assistant response began playing.
    pub response_start_ms: Option<u64>,
    /// Offset of the most recent inbound media frame.
    pub latest_media_ms: u64,
    /// Model session settings supplied by an observer.
    pub saved_config: Option<serde_json::Value>,
    /// Raw status last reported by the telephony provider.
    pub call_status: Option<String>,
    /// Explicit "subject responded" override.
    pub responded: Option<bool>,
    /// When the session was placed.
    pub created_at: DateTime<Utc>,
    /// When telephony started streaming.
    pub started_at: Option<DateTime<Utc>>,
    /// When termination began.
    pub ended_at: Option<DateTime<Utc>>,
    /// Lifecycle state.
    pub state: CallState,
    /// A model connect attempt is in flight.
    pub model_connecting: bool,
}

impl Session {
    /// Create an idle session for a placed call.
    pub fn new(call_id: impl Into<String>, config: CallConfig) -> Self {
        Self {
            call_id: call_id.into(),
            config,
            transcript: Vec::new(),
            links: Links::default(),
            stream_sid: None,
            last_assistant_item: None,
            response_start_ms: None,
            latest_media_ms: 0,
            saved_config: None,
            call_status: None,
            responded: None,
            created_at: callrelay_core::now(),
            started_at: None,
            ended_at: None,
            state: CallState::Idle,
            model_connecting: false,
        }
    }

    /// Apply a lifecycle event. Invalid transitions leave the state unchanged.
    pub fn apply(&mut self, event: CallEvent) -> bool {
        match self.state.next(event) {
            Some(next) => {
                debug!(call_id = %self.call_id, from = ?self.state, to = ?next, "Call state transition");
                self.state = next;
                true
            }
            None => {
                warn!(call_id = %self.call_id, state = ?self.state, event = ?event, "Ignoring invalid call state transition");
                false
            }
        }
    }

    /// Telephony `start`: bind the stream and reset playback tracking.
    pub fn start_stream(&mut self, stream_sid: impl Into<String>) -> bool {
        if !self.apply(CallEvent::TelephonyStarted) {
            return false;
        }
        self.stream_sid = Some(stream_sid.into());
        self.last_assistant_item = None;
        self.response_start_ms = None;
        self.latest_media_ms = 0;
        self.started_at.get_or_insert_with(callrelay_core::now);
        true
    }

    /// Telephony `media`: remember how far the inbound stream has got.
    pub fn record_media(&mut self, timestamp_ms: u64) {
        self.latest_media_ms = timestamp_ms;
    }

    /// An assistant audio chunk is about to be played.
    pub fn begin_response(&mut self, item_id: Option<&str>) {
        if self.response_start_ms.is_none() {
            self.response_start_ms = Some(self.latest_media_ms);
        }
        if let Some(id) = item_id {
            self.last_assistant_item = Some(id.to_string());
        }
    }

    /// The subject started speaking. Returns the truncation to send, if an
    /// assistant item is in flight, and clears playback tracking.
    pub fn take_truncation(&mut self) -> Option<Truncation> {
        let item_id = self.last_assistant_item.take();
        let start = self.response_start_ms.take();
        let item_id = item_id?;
        let audio_end_ms = playback_elapsed(self.latest_media_ms, start.unwrap_or(self.latest_media_ms));
        Some(Truncation {
            item_id,
            audio_end_ms,
        })
    }

    /// Append an utterance.
    pub fn push_transcript(&mut self, entry: TranscriptEntry) {
        self.transcript.push(entry);
    }

    /// Whether the model link may be opened now.
    pub fn can_connect_model(&self) -> bool {
        self.state == CallState::AwaitingModel
            && self.links.telephony.is_some()
            && self.stream_sid.is_some()
            && !self.config.credential.is_empty()
            && self.links.model.is_none()
            && !self.model_connecting
    }
}

/// Shared owner of a [`Session`].
///
/// Mutation goes through [`SessionHandle::lock`]; termination is gated by a
/// one-shot flag that flips exactly once.
#[derive(Debug)]
pub struct SessionHandle {
    call_id: String,
    terminated: AtomicBool,
    inner: Mutex<Session>,
}

impl SessionHandle {
    /// Wrap a new session for `call_id`.
    pub fn new(call_id: impl Into<String>, config: CallConfig) -> Arc<Self> {
        let call_id = call_id.into();
        Arc::new(Self {
            inner: Mutex::new(Session::new(call_id.clone(), config)),
            call_id,
            terminated: AtomicBool::new(false),
        })
    }

    /// The call id this session bridges.
    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Exclusive access to the session fields.
    pub async fn lock(&self) -> MutexGuard<'_, Session> {
        self.inner.lock().await
    }

    /// Flip the terminated flag. Only the first caller gets `true`.
    pub fn mark_terminated(&self) -> bool {
        !self.terminated.swap(true, Ordering::AcqRel)
    }

    /// Whether termination has been claimed.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }
}
