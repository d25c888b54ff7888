//! Onboarding State Machine
//!
//! Defines the onboarding states, the events that drive them and the side
//! effects each transition asks the caller to perform. The machine itself never
//! touches the network, the disk or a timer.

use crate::timing;
use serde::Serialize;
use std::time::Duration;

/// What a retrying machine picks up again once its wait has elapsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resume {
    FetchCode,
    Poll { code: String },
}

/// Onboarding states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OnboardingState {
    /// No code and no token
    Unregistered,
    /// Code extracted from the landing page, not yet registered
    CodeObtained { code: String },
    /// Code registered, polling for a token
    Registered { code: String },
    /// Token available; the command channel is (being) opened.
    /// `code` is absent when the token came from stable storage.
    Authenticated { code: Option<String>, token: String },
    /// Waiting out a backoff before retrying
    Failed { resume: Resume, reason: String },
}

/// Events fed into the machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OnboardingEvent {
    /// Process start, with whatever token was found on disk
    Start { persisted_token: Option<String> },
    CodeFetched { code: String },
    CodeFetchFailed { reason: String },
    RegistrationSucceeded,
    RegistrationFailed { reason: String },
    PollRegistered { token: String },
    PollPending { status: String },
    PollFailed { reason: String },
    RetryElapsed,
    /// The command channel rejected the token
    AuthRejected { reason: String },
}

/// Side effects requested by a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    FetchCode,
    Register { code: String },
    Poll { code: String },
    Wait(Duration),
    PersistToken { token: String },
    DeleteToken,
    OpenChannel { token: String },
}

/// Result of a transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was valid; perform these effects in order
    Success(Vec<Effect>),
    /// Event does not apply to the current state; state unchanged
    Invalid { event: OnboardingEvent },
}

/// Observable session phase, as reported by the status surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SessionPhase {
    /// No code, no token
    Connecting,
    /// Code only
    AwaitingRegistration { code: String },
    /// Token present
    Connected,
}

/// Fixed retry delays; there is no attempt limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub code_retry: Duration,
    pub poll_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            code_retry: Duration::from_millis(timing::CODE_RETRY_MS),
            poll_interval: Duration::from_millis(timing::POLL_INTERVAL_MS),
        }
    }
}

/// The onboarding state machine
#[derive(Debug)]
pub struct OnboardingStateMachine {
    state: OnboardingState,
    policy: RetryPolicy,
}

impl Default for OnboardingStateMachine {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl OnboardingStateMachine {
    /// Create a new machine in the Unregistered state
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            state: OnboardingState::Unregistered,
            policy,
        }
    }

    pub fn state(&self) -> &OnboardingState {
        &self.state
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Verification code currently held, if any
    pub fn code(&self) -> Option<&str> {
        match &self.state {
            OnboardingState::CodeObtained { code } | OnboardingState::Registered { code } => {
                Some(code)
            }
            OnboardingState::Failed {
                resume: Resume::Poll { code },
                ..
            } => Some(code),
            OnboardingState::Authenticated { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Auth token currently held, if any
    pub fn token(&self) -> Option<&str> {
        match &self.state {
            OnboardingState::Authenticated { token, .. } => Some(token),
            _ => None,
        }
    }

    /// Session phase derived from the current state
    pub fn phase(&self) -> SessionPhase {
        if self.token().is_some() {
            return SessionPhase::Connected;
        }
        match self.code() {
            Some(code) => SessionPhase::AwaitingRegistration {
                code: code.to_string(),
            },
            None => SessionPhase::Connecting,
        }
    }

    /// Process an event and return the effects to perform
    pub fn process_event(&mut self, event: OnboardingEvent) -> TransitionResult {
        use OnboardingEvent as E;
        use OnboardingState as S;

        // Auth rejection clears everything regardless of how we got the token
        if matches!(self.state, S::Authenticated { .. })
            && matches!(event, E::AuthRejected { .. })
        {
            self.state = S::Unregistered;
            return TransitionResult::Success(vec![Effect::DeleteToken, Effect::FetchCode]);
        }

        let (next, effects) = match (&self.state, &event) {
            (S::Unregistered, E::Start { persisted_token }) => {
                match persisted_token.as_deref().map(str::trim) {
                    Some(token) if !token.is_empty() => (
                        S::Authenticated {
                            code: None,
                            token: token.to_string(),
                        },
                        vec![Effect::OpenChannel {
                            token: token.to_string(),
                        }],
                    ),
                    _ => (S::Unregistered, vec![Effect::FetchCode]),
                }
            }

            (S::Unregistered, E::CodeFetched { code }) => (
                S::CodeObtained { code: code.clone() },
                vec![Effect::Register { code: code.clone() }],
            ),
            (S::Unregistered, E::CodeFetchFailed { reason }) => (
                S::Failed {
                    resume: Resume::FetchCode,
                    reason: reason.clone(),
                },
                vec![Effect::Wait(self.policy.code_retry)],
            ),

            // Registration is best-effort: poll either way
            (S::CodeObtained { code }, E::RegistrationSucceeded)
            | (S::CodeObtained { code }, E::RegistrationFailed { .. }) => (
                S::Registered { code: code.clone() },
                vec![Effect::Poll { code: code.clone() }],
            ),

            (S::Registered { code }, E::PollRegistered { token }) if !token.is_empty() => (
                S::Authenticated {
                    code: Some(code.clone()),
                    token: token.clone(),
                },
                vec![
                    Effect::PersistToken {
                        token: token.clone(),
                    },
                    Effect::OpenChannel {
                        token: token.clone(),
                    },
                ],
            ),
            (S::Registered { code }, E::PollRegistered { .. })
            | (S::Registered { code }, E::PollPending { .. })
            | (S::Registered { code }, E::PollFailed { .. }) => (
                S::Failed {
                    resume: Resume::Poll { code: code.clone() },
                    reason: retry_reason(&event),
                },
                vec![Effect::Wait(self.policy.poll_interval)],
            ),

            (S::Failed { resume, .. }, E::RetryElapsed) => match resume {
                Resume::FetchCode => (S::Unregistered, vec![Effect::FetchCode]),
                Resume::Poll { code } => (
                    S::Registered { code: code.clone() },
                    vec![Effect::Poll { code: code.clone() }],
                ),
            },

            _ => {
                return TransitionResult::Invalid {
                    event: event.clone(),
                }
            }
        };

        self.state = next;
        TransitionResult::Success(effects)
    }
}

fn retry_reason(event: &OnboardingEvent) -> String {
    match event {
        OnboardingEvent::PollRegistered { .. } => "registered without a token".into(),
        OnboardingEvent::PollPending { status } => format!("status {}", status),
        OnboardingEvent::PollFailed { reason } => reason.clone(),
        other => format!("{:?}", other),
    }
}
