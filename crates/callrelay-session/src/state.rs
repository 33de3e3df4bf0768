use serde::{Deserialize, Serialize};

/// Lifecycle of a bridged call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    /// Placed; telephony has not started streaming.
    #[default]
    Idle,
    /// Telephony stream started; model link not yet open.
    AwaitingModel,
    /// Audio flows in both directions.
    Bridging,
    /// Termination is running (webhook, link teardown).
    Terminating,
    /// All resources released.
    Closed,
}

/// Inputs that drive [`CallState`] transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallEvent {
    /// Telephony sent `start`.
    TelephonyStarted,
    /// The model link opened.
    ModelOpened,
    /// The model link closed or failed.
    ModelLost,
    /// Any termination trigger fired.
    EndRequested,
    /// Termination finished releasing resources.
    Released,
}

impl CallState {
    /// Transition table. `None` means the event is not valid in this state.
    pub fn next(self, event: CallEvent) -> Option<CallState> {
        use CallEvent::*;
        use CallState::*;

        match (self, event) {
            (Idle | AwaitingModel, TelephonyStarted) => Some(AwaitingModel),
            (Bridging, TelephonyStarted) => Some(Bridging),
            (AwaitingModel, ModelOpened) => Some(Bridging),
            (Bridging | AwaitingModel, ModelLost) => Some(AwaitingModel),
            (Idle | AwaitingModel | Bridging, EndRequested) => Some(Terminating),
            (Terminating, Released) => Some(Closed),
            _ => None,
        }
    }

    /// True once termination has begun.
    pub fn is_ending(self) -> bool {
        matches!(self, Self::Terminating | Self::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut state = CallState::Idle;
        for event in [
            CallEvent::TelephonyStarted,
            CallEvent::ModelOpened,
            CallEvent::EndRequested,
            CallEvent::Released,
        ] {
            state = state.next(event).unwrap_or(state);
        }
        assert_eq!(state, CallState::Closed);
    }

    #[test]
    fn test_model_loss_returns_to_awaiting() {
        assert_eq!(
            CallState::Bridging.next(CallEvent::ModelLost),
            Some(CallState::AwaitingModel)
        );
        assert_eq!(
            CallState::AwaitingModel.next(CallEvent::ModelOpened),
            Some(CallState::Bridging)
        );
    }

    #[test]
    fn test_restart_keeps_bridging() {
        assert_eq!(
            CallState::Bridging.next(CallEvent::TelephonyStarted),
            Some(CallState::Bridging)
        );
    }

    #[test]
    fn test_model_cannot_open_before_start() {
        assert_eq!(CallState::Idle.next(CallEvent::ModelOpened), None);
    }

    #[test]
    fn test_end_only_once() {
        assert_eq!(CallState::Terminating.next(CallEvent::EndRequested), None);
        assert_eq!(CallState::Closed.next(CallEvent::EndRequested), None);
        assert_eq!(CallState::Closed.next(CallEvent::TelephonyStarted), None);
    }

    #[test]
    fn test_nothing_reopens_after_terminating() {
        for event in [
            CallEvent::TelephonyStarted,
            CallEvent::ModelOpened,
            CallEvent::ModelLost,
        ] {
            assert_eq!(CallState::Terminating.next(event), None, "{event:?}");
        }
        assert!(CallState::Terminating.is_ending());
        assert!(!CallState::Bridging.is_ending());
    }
}
