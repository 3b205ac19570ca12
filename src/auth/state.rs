//! Sign-in status state machine
//!
//! ```text
//! Idle -> RequestingNonce -> WaitingSignature -> Verifying -> Success
//!              \                   \                  \
//!               +-------------------+------------------+----> Error
//! ```
//!
//! `Success` and `Error` end an attempt but not the machine: each arms an
//! auto-reset that returns to `Idle` after a grace window. Every transition
//! disarms the previous auto-reset first, so a stale timer can never overwrite
//! a newer status.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::AbortHandle;

use crate::config::StatusCallback;
use crate::error::{AuthError, AuthResult};

/// Protocol status of the current sign-in attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    #[default]
    Idle,
    RequestingNonce,
    WaitingSignature,
    Verifying,
    Success,
    Error,
}

/// Inputs of the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    Start,
    NonceIssued,
    Signed,
    Verified,
    Fail,
    Reset,
}

impl AuthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthStatus::Idle => "idle",
            AuthStatus::RequestingNonce => "requesting_nonce",
            AuthStatus::WaitingSignature => "waiting_signature",
            AuthStatus::Verifying => "verifying",
            AuthStatus::Success => "success",
            AuthStatus::Error => "error",
        }
    }

    /// Attempt-terminal statuses, which arm the auto-reset
    pub fn is_terminal(&self) -> bool {
        matches!(self, AuthStatus::Success | AuthStatus::Error)
    }

    /// An attempt is running
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            AuthStatus::RequestingNonce | AuthStatus::WaitingSignature | AuthStatus::Verifying
        )
    }

    /// Pure transition function. `None` means the event is illegal here.
    ///
    /// `Start` is accepted from `Idle` and from the terminal statuses, so a new
    /// attempt may pre-empt a pending auto-reset; never while in flight.
    pub fn transition(self, event: AuthEvent) -> Option<AuthStatus> {
        use AuthEvent::*;
        use AuthStatus::*;

        match (self, event) {
            (Idle | Success | Error, Start) => Some(RequestingNonce),
            (RequestingNonce, NonceIssued) => Some(WaitingSignature),
            (WaitingSignature, Signed) => Some(Verifying),
            (Verifying, Verified) => Some(Success),
            (_, Fail) => Some(Error),
            (_, Reset) => Some(Idle),
            _ => None,
        }
    }
}

impl fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one sign-in attempt, handed out by [`AuthStateMachine::begin`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt(u64);

struct MachineState {
    status: AuthStatus,
    last_error: Option<String>,
    /// Bumped on every transition; an auto-reset only fires for its own epoch
    epoch: u64,
    /// Current attempt; bumped by `Start` and by any transition made outside it
    attempt: u64,
    auto_reset: Option<AbortHandle>,
}

struct Shared {
    state: Mutex<MachineState>,
    grace: Duration,
    on_change: Option<StatusCallback>,
    tx: broadcast::Sender<AuthStatus>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, MachineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, status: AuthStatus) {
        tracing::debug!(status = %status, "Sign-in status changed");
        // No receivers is fine
        let _ = self.tx.send(status);
        if let Some(callback) = &self.on_change {
            callback(status);
        }
    }

    fn fire_auto_reset(&self, epoch: u64) {
        {
            let mut state = self.lock();
            if state.epoch != epoch {
                return;
            }
            state.status = AuthStatus::Idle;
            state.last_error = None;
            state.epoch += 1;
            state.auto_reset = None;
        }
        tracing::debug!("Auto-reset fired");
        self.notify(AuthStatus::Idle);
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = state.auto_reset.take() {
            handle.abort();
        }
    }
}

/// Owns the current status and enforces legal transitions.
///
/// Cloning yields another handle to the same machine.
#[derive(Clone)]
pub struct AuthStateMachine {
    shared: Arc<Shared>,
}

impl fmt::Debug for AuthStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("AuthStateMachine")
            .field("status", &state.status)
            .field("last_error", &state.last_error)
            .field("auto_reset_pending", &state.auto_reset.is_some())
            .finish()
    }
}

impl AuthStateMachine {
    pub fn new(grace: Duration, on_change: Option<StatusCallback>) -> Self {
        let (tx, _rx) = broadcast::channel(32);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(MachineState {
                    status: AuthStatus::Idle,
                    last_error: None,
                    epoch: 0,
                    attempt: 0,
                    auto_reset: None,
                }),
                grace,
                on_change,
                tx,
            }),
        }
    }

    pub fn status(&self) -> AuthStatus {
        self.shared.lock().status
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.lock().last_error.clone()
    }

    pub fn has_pending_reset(&self) -> bool {
        self.shared.lock().auto_reset.is_some()
    }

    /// `attempt` still owns the machine
    pub fn is_current(&self, attempt: Attempt) -> bool {
        self.shared.lock().attempt == attempt.0
    }

    /// Receive every status change, including auto-resets
    pub fn subscribe(&self) -> broadcast::Receiver<AuthStatus> {
        self.shared.tx.subscribe()
    }

    /// Start an attempt. Refused while another attempt is in flight, in which
    /// case nothing changes.
    pub fn begin(&self) -> AuthResult<Attempt> {
        let (_, attempt) = self.apply(AuthEvent::Start, None, None)?;
        Ok(Attempt(attempt))
    }

    /// Advance `attempt`. Fails with `AttemptSuperseded` once a reset or a newer
    /// attempt has taken over the machine.
    pub fn step(&self, attempt: Attempt, event: AuthEvent) -> AuthResult<AuthStatus> {
        self.apply(event, None, Some(attempt)).map(|(status, _)| status)
    }

    /// End `attempt` in `Error`, recording the user-facing message
    pub fn fail_attempt(
        &self,
        attempt: Attempt,
        message: impl Into<String>,
    ) -> AuthResult<AuthStatus> {
        self.apply(AuthEvent::Fail, Some(message.into()), Some(attempt))
            .map(|(status, _)| status)
    }

    /// Enter `Error` without an attempt, e.g. when one cannot even start.
    /// Refused while an attempt is in flight.
    pub fn fail(&self, message: impl Into<String>) -> AuthResult<AuthStatus> {
        self.apply(AuthEvent::Fail, Some(message.into()), None)
            .map(|(status, _)| status)
    }

    /// Return to `Idle` and clear the last error. Abandons any attempt in flight.
    pub fn reset(&self) -> AuthStatus {
        // Reset is legal from every status
        self.apply(AuthEvent::Reset, None, None)
            .map(|(status, _)| status)
            .unwrap_or(AuthStatus::Idle)
    }

    /// Run `persist` and enter the state `event` leads to as one step, under the
    /// machine lock. A reset either lands before (nothing is persisted) or after
    /// (it sees the committed status).
    ///
    /// `persist` must not call back into the machine.
    pub fn commit<T>(
        &self,
        attempt: Attempt,
        event: AuthEvent,
        persist: impl FnOnce() -> AuthResult<T>,
    ) -> AuthResult<T> {
        let (value, next, epoch) = {
            let mut state = self.shared.lock();
            let next = Self::prepare(&state, event, Some(attempt))?;
            let value = persist()?;
            let epoch = Self::enter(&mut state, next, event, None, Some(attempt));
            (value, next, epoch)
        };
        self.settle(next, epoch);
        Ok(value)
    }

    fn apply(
        &self,
        event: AuthEvent,
        error: Option<String>,
        attempt: Option<Attempt>,
    ) -> AuthResult<(AuthStatus, u64)> {
        let (next, epoch, current_attempt) = {
            let mut state = self.shared.lock();
            let next = Self::prepare(&state, event, attempt)?;
            let epoch = Self::enter(&mut state, next, event, error, attempt);
            (next, epoch, state.attempt)
        };
        self.settle(next, epoch);
        Ok((next, current_attempt))
    }

    /// Status `event` leads to, if the caller may apply it now
    fn prepare(
        state: &MachineState,
        event: AuthEvent,
        attempt: Option<Attempt>,
    ) -> AuthResult<AuthStatus> {
        let from = state.status;
        match attempt {
            Some(Attempt(id)) if id != state.attempt => {
                return Err(AuthError::AttemptSuperseded);
            }
            None if from.is_in_flight()
                && matches!(event, AuthEvent::Start | AuthEvent::Fail) =>
            {
                return Err(AuthError::AttemptInProgress);
            }
            _ => {}
        }

        from.transition(event)
            .ok_or(AuthError::InvalidTransition { from, event })
    }

    /// Enter `next`, returning the new epoch
    fn enter(
        state: &mut MachineState,
        next: AuthStatus,
        event: AuthEvent,
        error: Option<String>,
        attempt: Option<Attempt>,
    ) -> u64 {
        if let Some(handle) = state.auto_reset.take() {
            handle.abort();
            tracing::debug!(from = %state.status, "Cancelled pending auto-reset");
        }

        state.epoch += 1;
        if attempt.is_none() {
            state.attempt += 1;
        }
        state.status = next;
        match event {
            AuthEvent::Start | AuthEvent::Reset => state.last_error = None,
            AuthEvent::Fail => state.last_error = error,
            _ => {}
        }
        state.epoch
    }

    /// Side effects of a transition, run outside the lock
    fn settle(&self, next: AuthStatus, epoch: u64) {
        self.shared.notify(next);

        // Armed after notifying so the Idle notification can never overtake
        if next.is_terminal() {
            self.arm_auto_reset(epoch);
        }
    }

    fn arm_auto_reset(&self, epoch: u64) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                tracing::debug!("No async runtime; auto-reset not scheduled");
                return;
            }
        };

        let mut state = self.shared.lock();
        // A callback may already have moved the machine on
        if state.epoch != epoch {
            return;
        }

        let weak = Arc::downgrade(&self.shared);
        let grace = self.shared.grace;
        let task = runtime.spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(shared) = weak.upgrade() {
                shared.fire_auto_reset(epoch);
            }
        });

        tracing::debug!(grace_ms = %grace.as_millis(), "Auto-reset scheduled");
        state.auto_reset = Some(task.abort_handle());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    const GRACE: Duration = Duration::from_secs(3);

    fn machine() -> AuthStateMachine {
        AuthStateMachine::new(GRACE, None)
    }

    fn run_to_success(m: &AuthStateMachine) {
        let attempt = m.begin().unwrap();
        m.step(attempt, AuthEvent::NonceIssued).unwrap();
        m.step(attempt, AuthEvent::Signed).unwrap();
        m.step(attempt, AuthEvent::Verified).unwrap();
    }

    #[test]
    fn test_transition_table() {
        use AuthEvent::*;
        use AuthStatus::*;

        assert_eq!(Idle.transition(Start), Some(RequestingNonce));
        assert_eq!(RequestingNonce.transition(NonceIssued), Some(WaitingSignature));
        assert_eq!(WaitingSignature.transition(Signed), Some(Verifying));
        assert_eq!(Verifying.transition(Verified), Some(Success));
        assert_eq!(Verifying.transition(Fail), Some(Error));
        assert_eq!(Success.transition(Start), Some(RequestingNonce));
        assert_eq!(Error.transition(Reset), Some(Idle));

        assert_eq!(Idle.transition(Verified), None);
        assert_eq!(RequestingNonce.transition(Signed), None);
        assert_eq!(Verifying.transition(Start), None);
    }

    #[test]
    fn test_in_flight_and_terminal() {
        assert!(!AuthStatus::Idle.is_in_flight());
        assert!(AuthStatus::WaitingSignature.is_in_flight());
        assert!(AuthStatus::Success.is_terminal());
        assert!(!AuthStatus::Verifying.is_terminal());
        assert_eq!(AuthStatus::WaitingSignature.to_string(), "waiting_signature");
    }

    #[test]
    fn test_begin_refused_while_in_flight() {
        let m = machine();
        let attempt = m.begin().unwrap();
        m.step(attempt, AuthEvent::NonceIssued).unwrap();

        let err = m.begin().unwrap_err();
        assert!(matches!(err, AuthError::AttemptInProgress));
        let err = m.fail("not connected").unwrap_err();
        assert!(matches!(err, AuthError::AttemptInProgress));
        assert_eq!(m.status(), AuthStatus::WaitingSignature);
    }

    #[test]
    fn test_reset_supersedes_attempt() {
        let m = machine();
        let stale = m.begin().unwrap();
        m.reset();

        let err = m.step(stale, AuthEvent::NonceIssued).unwrap_err();
        assert!(matches!(err, AuthError::AttemptSuperseded));

        let fresh = m.begin().unwrap();
        assert_ne!(stale, fresh);
        assert!(!m.is_current(stale));
        assert!(m.is_current(fresh));
        m.step(fresh, AuthEvent::NonceIssued).unwrap();

        // The abandoned attempt cannot push the new one along or fail it
        assert!(m.step(stale, AuthEvent::Signed).is_err());
        assert!(m.fail_attempt(stale, "late failure").is_err());
        assert_eq!(m.status(), AuthStatus::WaitingSignature);
    }

    #[test]
    fn test_commit_runs_persist_only_for_current_attempt() {
        let m = machine();
        let attempt = m.begin().unwrap();
        m.step(attempt, AuthEvent::NonceIssued).unwrap();
        m.step(attempt, AuthEvent::Signed).unwrap();
        m.reset();

        let mut persisted = false;
        let err = m
            .commit(attempt, AuthEvent::Verified, || {
                persisted = true;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, AuthError::AttemptSuperseded));
        assert!(!persisted);
        assert_eq!(m.status(), AuthStatus::Idle);
    }

    #[test]
    fn test_failed_commit_keeps_status() {
        let m = machine();
        let attempt = m.begin().unwrap();
        m.step(attempt, AuthEvent::NonceIssued).unwrap();
        m.step(attempt, AuthEvent::Signed).unwrap();

        let err = m
            .commit(attempt, AuthEvent::Verified, || -> AuthResult<()> {
                Err(AuthError::ChallengeExpired)
            })
            .unwrap_err();
        assert!(matches!(err, AuthError::ChallengeExpired));
        assert_eq!(m.status(), AuthStatus::Verifying);

        let token = m
            .commit(attempt, AuthEvent::Verified, || Ok("token"))
            .unwrap();
        assert_eq!(token, "token");
        assert_eq!(m.status(), AuthStatus::Success);
    }

    #[test]
    fn test_illegal_step_is_rejected() {
        let m = machine();
        let attempt = m.begin().unwrap();
        let err = m.step(attempt, AuthEvent::Verified).unwrap_err();
        assert!(matches!(
            err,
            AuthError::InvalidTransition {
                from: AuthStatus::RequestingNonce,
                event: AuthEvent::Verified
            }
        ));
        assert_eq!(m.status(), AuthStatus::RequestingNonce);
    }

    #[test]
    fn test_without_runtime_terminal_status_sticks() {
        let m = machine();
        m.fail("boom").unwrap();
        assert_eq!(m.status(), AuthStatus::Error);
        assert_eq!(m.last_error().as_deref(), Some("boom"));
        assert!(!m.has_pending_reset());

        m.reset();
        assert_eq!(m.status(), AuthStatus::Idle);
        assert_eq!(m.last_error(), None);
    }

    #[test]
    fn test_callback_sees_every_transition() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let m = AuthStateMachine::new(
            GRACE,
            Some(Arc::new(move |s| sink.lock().unwrap().push(s))),
        );

        run_to_success(&m);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                AuthStatus::RequestingNonce,
                AuthStatus::WaitingSignature,
                AuthStatus::Verifying,
                AuthStatus::Success,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_auto_resets_after_grace() {
        let m = machine();
        let mut rx = m.subscribe();
        run_to_success(&m);
        assert!(m.has_pending_reset());

        tokio::time::sleep(GRACE - Duration::from_millis(100)).await;
        assert_eq!(m.status(), AuthStatus::Success);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(m.status(), AuthStatus::Idle);
        assert!(!m.has_pending_reset());

        let mut received = Vec::new();
        while let Ok(status) = rx.try_recv() {
            received.push(status);
        }
        assert_eq!(received.last(), Some(&AuthStatus::Idle));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_auto_reset_clears_error() {
        let m = machine();
        m.fail("Nonce expired").unwrap();
        tokio::time::sleep(GRACE + Duration::from_millis(10)).await;
        assert_eq!(m.status(), AuthStatus::Idle);
        assert_eq!(m.last_error(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_attempt_cancels_stale_auto_reset() {
        let m = machine();
        m.fail("first").unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        m.begin().unwrap();
        assert!(!m.has_pending_reset());

        // Past the first deadline: the stale reset must not clobber the attempt
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(m.status(), AuthStatus::RequestingNonce);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearmed_reset_counts_from_latest_terminal() {
        let m = machine();
        m.fail("first").unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        let attempt = m.begin().unwrap();
        m.fail_attempt(attempt, "second").unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(m.status(), AuthStatus::Error);
        assert_eq!(m.last_error().as_deref(), Some("second"));

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(m.status(), AuthStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_reset_disarms_timer() {
        let m = machine();
        run_to_success(&m);
        m.reset();
        assert!(!m.has_pending_reset());

        let mut rx = m.subscribe();
        tokio::time::sleep(GRACE * 2).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(m.status(), AuthStatus::Idle);
    }
}
