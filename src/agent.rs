//! Agent: drives the onboarding machine and owns the command channel
//!
//! The machine decides what to do next; the agent performs each effect with
//! the onboarding API, the token store and the channel session, then feeds
//! the outcome back in as an event.

use crate::channel::{ChannelSession, SessionEnd};
use crate::onboarding::{
    extract_verification_code, redact_token, OnboardingApi, OnboardingError, Sleeper,
    TokenStore, TokioSleeper,
};
use anyhow::{bail, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use suitestream_shared::state_machine::{
    Effect, OnboardingEvent, OnboardingStateMachine, RetryPolicy, SessionPhase, TransitionResult,
};
use suitestream_shared::timing;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub struct Agent {
    machine: OnboardingStateMachine,
    api: Arc<dyn OnboardingApi>,
    tokens: TokenStore,
    session: Arc<dyn ChannelSession>,
    sleeper: Arc<dyn Sleeper>,
    reconnect_delay: Duration,
    pending: VecDeque<Effect>,
    phase: watch::Sender<SessionPhase>,
}

impl Agent {
    pub fn new(
        api: Arc<dyn OnboardingApi>,
        tokens: TokenStore,
        session: Arc<dyn ChannelSession>,
        policy: RetryPolicy,
    ) -> Self {
        let machine = OnboardingStateMachine::new(policy);
        let (phase, _) = watch::channel(machine.phase());
        Self {
            machine,
            api,
            tokens,
            session,
            sleeper: Arc::new(TokioSleeper),
            reconnect_delay: Duration::from_millis(timing::CHANNEL_RECONNECT_MS),
            pending: VecDeque::new(),
            phase,
        }
    }

    #[cfg(test)]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Delay before reopening a channel that closed without an auth failure
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Observe the session phase
    pub fn subscribe(&self) -> watch::Receiver<SessionPhase> {
        self.phase.subscribe()
    }

    #[cfg(test)]
    pub fn machine(&self) -> &OnboardingStateMachine {
        &self.machine
    }

    /// Run until the machine stops asking for work, which only happens on a bug
    pub async fn run(mut self) -> Result<()> {
        self.start().await;
        while self.step().await {}
        bail!("onboarding stalled in state {:?}", self.machine.state())
    }

    /// Seed the machine with the persisted token, if any
    pub async fn start(&mut self) {
        let persisted_token = self.tokens.load().await;
        match &persisted_token {
            Some(token) => info!("[AGENT] Starting with persisted token {}", redact_token(token)),
            None => info!("[AGENT] No persisted token, starting onboarding"),
        }
        self.feed(OnboardingEvent::Start { persisted_token });
    }

    /// Perform the next pending effect; returns false when none is left
    pub async fn step(&mut self) -> bool {
        let Some(effect) = self.pending.pop_front() else {
            return false;
        };
        if let Some(event) = self.perform(effect).await {
            self.feed(event);
        }
        true
    }

    fn feed(&mut self, event: OnboardingEvent) {
        debug!("[AGENT] Event {:?}", event);
        match self.machine.process_event(event) {
            TransitionResult::Success(effects) => self.pending.extend(effects),
            TransitionResult::Invalid { event } => {
                warn!(
                    "[AGENT] Ignoring {:?} in state {:?}",
                    event,
                    self.machine.state()
                );
            }
        }
        self.phase.send_if_modified(|phase| {
            let next = self.machine.phase();
            if *phase == next {
                return false;
            }
            info!("[AGENT] Phase is now {:?}", next);
            *phase = next;
            true
        });
    }

    async fn perform(&mut self, effect: Effect) -> Option<OnboardingEvent> {
        match effect {
            Effect::FetchCode => Some(match self.fetch_verification_code().await {
                Ok(code) => OnboardingEvent::CodeFetched { code },
                Err(e) => {
                    warn!("[ONBOARD] Could not get verification code: {}", e);
                    OnboardingEvent::CodeFetchFailed {
                        reason: e.to_string(),
                    }
                }
            }),
            Effect::Register { code } => Some(match self.api.register(&code).await {
                Ok(()) => {
                    info!("[ONBOARD] Registered verification code {}", code);
                    OnboardingEvent::RegistrationSucceeded
                }
                Err(e) => {
                    warn!("[ONBOARD] Registration request failed: {}", e);
                    OnboardingEvent::RegistrationFailed {
                        reason: e.to_string(),
                    }
                }
            }),
            Effect::Poll { code } => Some(self.poll(&code).await),
            Effect::Wait(duration) => {
                self.sleeper.sleep(duration).await;
                Some(OnboardingEvent::RetryElapsed)
            }
            Effect::PersistToken { token } => {
                self.tokens.save(&token).await;
                None
            }
            Effect::DeleteToken => {
                self.tokens.clear().await;
                None
            }
            Effect::OpenChannel { token } => Some(self.hold_channel(&token).await),
        }
    }

    /// Fetch the connect page and extract the verification code
    pub async fn fetch_verification_code(&self) -> Result<String, OnboardingError> {
        let html = self.api.fetch_code_page().await?;
        let code = extract_verification_code(&html).ok_or(OnboardingError::MissingCode)?;
        info!("[ONBOARD] Extracted verification code {}", code);
        Ok(code)
    }

    async fn poll(&self, code: &str) -> OnboardingEvent {
        match self.api.poll_status(code).await {
            Ok(response) if response.status == "registered" => {
                let token = response.registered_token().unwrap_or_default().to_string();
                if !token.is_empty() {
                    info!("[ONBOARD] Device registered, token {}", redact_token(&token));
                }
                OnboardingEvent::PollRegistered { token }
            }
            Ok(response) => {
                debug!("[ONBOARD] Poll status {:?}", response.status);
                OnboardingEvent::PollPending {
                    status: response.status,
                }
            }
            Err(e) => {
                warn!("[ONBOARD] Poll failed: {}", e);
                OnboardingEvent::PollFailed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Keep the channel open until the server rejects the token
    async fn hold_channel(&self, token: &str) -> OnboardingEvent {
        loop {
            info!("[AGENT] Opening command channel");
            match self.session.run(token).await {
                SessionEnd::AuthRejected { reason } => {
                    warn!("[AGENT] Token rejected ({}), restarting onboarding", reason);
                    return OnboardingEvent::AuthRejected { reason };
                }
                SessionEnd::Closed => {
                    warn!(
                        "[AGENT] Command channel closed, reopening in {:?}",
                        self.reconnect_delay
                    );
                    self.sleeper.sleep(self.reconnect_delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onboarding::DeviceStatusResponse;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use suitestream_shared::state_machine::OnboardingState;

    const CODE_PAGE: &str = r#"<html><div id="verification-code"> 482913 </div></html>"#;

    #[derive(Default)]
    struct FakeApi {
        pages: Mutex<VecDeque<String>>,
        /// `None` entries fail the poll
        polls: Mutex<VecDeque<Option<DeviceStatusResponse>>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeApi {
        fn with_pages(pages: &[&str]) -> Self {
            let api = Self::default();
            api.pages
                .lock()
                .unwrap()
                .extend(pages.iter().map(|p| p.to_string()));
            api
        }

        fn push_poll(&self, status: &str, jwt: Option<&str>) {
            self.polls.lock().unwrap().push_back(Some(DeviceStatusResponse {
                status: status.into(),
                jwt: jwt.map(str::to_string),
            }));
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl OnboardingApi for FakeApi {
        async fn fetch_code_page(&self) -> Result<String, OnboardingError> {
            self.calls.lock().unwrap().push("fetch".into());
            self.pages
                .lock()
                .unwrap()
                .pop_front()
                .ok_or(OnboardingError::Status(503))
        }

        async fn register(&self, code: &str) -> Result<(), OnboardingError> {
            self.calls.lock().unwrap().push(format!("register {}", code));
            Ok(())
        }

        async fn poll_status(&self, code: &str) -> Result<DeviceStatusResponse, OnboardingError> {
            self.calls.lock().unwrap().push(format!("poll {}", code));
            self.polls
                .lock()
                .unwrap()
                .pop_front()
                .flatten()
                .ok_or(OnboardingError::Status(500))
        }
    }

    #[derive(Default)]
    struct RecordingSleeper {
        slept: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.slept.lock().unwrap().push(duration);
        }
    }

    /// Ends each run with the next scripted outcome; blocks once exhausted
    #[derive(Default)]
    struct ScriptedSession {
        outcomes: Mutex<VecDeque<SessionEnd>>,
        tokens: Mutex<Vec<String>>,
    }

    impl ScriptedSession {
        fn new(outcomes: Vec<SessionEnd>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                tokens: Mutex::default(),
            }
        }
    }

    #[async_trait]
    impl ChannelSession for ScriptedSession {
        async fn run(&self, token: &str) -> SessionEnd {
            self.tokens.lock().unwrap().push(token.to_string());
            let next = self.outcomes.lock().unwrap().pop_front();
            match next {
                Some(end) => end,
                None => std::future::pending().await,
            }
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            code_retry: Duration::from_millis(2000),
            poll_interval: Duration::from_millis(3000),
        }
    }

    struct Harness {
        agent: Agent,
        api: Arc<FakeApi>,
        sleeper: Arc<RecordingSleeper>,
        session: Arc<ScriptedSession>,
        tokens: TokenStore,
        _dir: tempfile::TempDir,
    }

    fn harness(api: FakeApi, session: ScriptedSession, persisted: Option<&str>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let tokens = TokenStore::new(dir.path().join("device_token"));
        if let Some(token) = persisted {
            std::fs::write(tokens.path(), token).unwrap();
        }
        let api = Arc::new(api);
        let sleeper = Arc::new(RecordingSleeper::default());
        let session = Arc::new(session);
        let agent = Agent::new(api.clone(), tokens.clone(), session.clone(), policy())
            .with_sleeper(sleeper.clone())
            .with_reconnect_delay(Duration::from_millis(1000));
        Harness {
            agent,
            api,
            sleeper,
            session,
            tokens,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_cold_start_onboards_and_opens_channel() {
        let api = FakeApi::with_pages(&[CODE_PAGE]);
        api.push_poll("pending", None);
        api.push_poll("registered", Some("jwt-1"));
        let mut h = harness(api, ScriptedSession::default(), None);
        let phase = h.agent.subscribe();

        h.agent.start().await;
        assert!(h.agent.step().await); // fetch
        assert_eq!(
            *phase.borrow(),
            SessionPhase::AwaitingRegistration {
                code: "482913".into()
            }
        );
        assert!(h.agent.step().await); // register
        assert!(h.agent.step().await); // poll: pending
        assert!(h.agent.step().await); // wait
        assert!(h.agent.step().await); // poll: registered
        assert!(h.agent.step().await); // persist

        assert_eq!(h.tokens.load().await, Some("jwt-1".into()));
        assert_eq!(*phase.borrow(), SessionPhase::Connected);
        assert_eq!(
            h.api.calls(),
            vec!["fetch", "register 482913", "poll 482913", "poll 482913"]
        );
        assert_eq!(
            *h.sleeper.slept.lock().unwrap(),
            vec![Duration::from_millis(3000)]
        );
        assert_eq!(
            h.agent.machine().state(),
            &OnboardingState::Authenticated {
                code: Some("482913".into()),
                token: "jwt-1".into()
            }
        );
    }

    #[tokio::test]
    async fn test_missing_code_element_retries_fetch() {
        let api = FakeApi::with_pages(&["<html>Loading…</html>", CODE_PAGE]);
        let mut h = harness(api, ScriptedSession::default(), None);

        h.agent.start().await;
        assert!(h.agent.step().await); // fetch fails
        assert!(matches!(
            h.agent.machine().state(),
            OnboardingState::Failed { .. }
        ));
        assert_eq!(*h.agent.subscribe().borrow(), SessionPhase::Connecting);

        assert!(h.agent.step().await); // wait
        assert_eq!(h.agent.machine().state(), &OnboardingState::Unregistered);
        assert_eq!(
            *h.sleeper.slept.lock().unwrap(),
            vec![Duration::from_millis(2000)]
        );

        assert!(h.agent.step().await); // fetch succeeds
        assert_eq!(h.agent.machine().code(), Some("482913"));
        assert_eq!(h.api.calls(), vec!["fetch", "fetch"]);
    }

    #[tokio::test]
    async fn test_persisted_token_skips_onboarding() {
        let session = ScriptedSession::new(vec![
            SessionEnd::Closed,
            SessionEnd::AuthRejected {
                reason: "expired".into(),
            },
        ]);
        let mut h = harness(FakeApi::default(), session, Some("jwt-saved\n"));
        let phase = h.agent.subscribe();

        h.agent.start().await;
        assert_eq!(*phase.borrow(), SessionPhase::Connected);
        assert!(h.agent.step().await); // channel: closed, then rejected

        assert_eq!(
            *h.session.tokens.lock().unwrap(),
            vec!["jwt-saved", "jwt-saved"]
        );
        assert_eq!(
            *h.sleeper.slept.lock().unwrap(),
            vec![Duration::from_millis(1000)]
        );
        assert!(h.api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_auth_rejection_deletes_token_and_refetches_code() {
        let session = ScriptedSession::new(vec![SessionEnd::AuthRejected {
            reason: "Invalid token".into(),
        }]);
        let api = FakeApi::with_pages(&[CODE_PAGE]);
        let mut h = harness(api, session, Some("jwt-old"));
        let phase = h.agent.subscribe();

        h.agent.start().await;
        assert!(h.agent.step().await); // channel rejects
        assert_eq!(h.agent.machine().state(), &OnboardingState::Unregistered);
        assert_eq!(h.agent.machine().token(), None);
        assert_eq!(*phase.borrow(), SessionPhase::Connecting);

        assert!(h.agent.step().await); // delete token
        assert!(!h.tokens.path().exists());

        assert!(h.agent.step().await); // fetch code again
        assert_eq!(h.api.calls(), vec!["fetch"]);
        assert_eq!(h.agent.machine().code(), Some("482913"));
    }

    #[tokio::test]
    async fn test_registered_without_token_keeps_polling() {
        let api = FakeApi::with_pages(&[CODE_PAGE]);
        api.push_poll("registered", None);
        let mut h = harness(api, ScriptedSession::default(), None);

        h.agent.start().await;
        for _ in 0..3 {
            assert!(h.agent.step().await); // fetch, register, poll
        }
        assert!(matches!(
            h.agent.machine().state(),
            OnboardingState::Failed { .. }
        ));
        assert_eq!(h.tokens.load().await, None);
    }

    #[tokio::test]
    async fn test_step_without_start_does_nothing() {
        let mut h = harness(FakeApi::default(), ScriptedSession::default(), None);
        assert!(!h.agent.step().await);
    }
}
