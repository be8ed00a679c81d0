//! Interview session lifecycle: `Idle -> Starting -> Active -> Ending -> Ended`.
//!
//! The machine owns the countdown, the question cursor and the capture
//! recorder for the lifetime of one session, and is the only place that
//! decides what an error means to the person taking the interview.

use chrono::Utc;
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::collab::{PurchaseFlow, Transcriber, TranscriptSink};
use crate::error::{LedgerError, Result, SessionError};
use crate::ledger::BalanceLedger;
use crate::model::{
    CompletionRecord, EndReason, InterviewSession, Question, SessionId, SessionStatus,
    UserBalance, UserId,
};
use crate::policy::{AbandonPolicy, AnswerPolicy, RetryPolicy};
use crate::recorder::{CaptureRecorder, TranscriptChunk};
use crate::registry::ActiveSessions;
use crate::sequencer::QuestionSequencer;
use crate::store::SessionStore;
use crate::timer::{CountdownTimer, Tick};

/// 28:45, the length of a standard mock interview.
pub const DEFAULT_SESSION_SECS: u64 = 28 * 60 + 45;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum_macros::Display)]
pub enum MachineState {
    Idle,
    Starting,
    Active,
    Ending,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum_macros::Display)]
pub enum Action {
    Start,
    ToggleRecording,
    EditCode,
    Advance,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub duration_secs: u64,
    pub answer_policy: AnswerPolicy,
    pub abandon_policy: AbandonPolicy,
    pub retry: RetryPolicy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            duration_secs: DEFAULT_SESSION_SECS,
            answer_policy: AnswerPolicy::default(),
            abandon_policy: AbandonPolicy::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Everything the machine talks to, passed in rather than looked up.
#[derive(Clone)]
pub struct SessionDeps {
    pub ledger: Arc<dyn BalanceLedger>,
    pub store: Arc<dyn SessionStore>,
    pub transcriber: Arc<dyn Transcriber>,
    pub purchase: Arc<dyn PurchaseFlow>,
    pub registry: Arc<ActiveSessions>,
}

/// What the UI renders. Button enablement comes from `legal_actions`.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub state: MachineState,
    pub session_id: Option<SessionId>,
    pub remaining_secs: u64,
    pub question_index: usize,
    pub question_total: usize,
    pub current_question: Question,
    pub is_final_question: bool,
    pub recording: bool,
    pub transcript: String,
    pub code: Option<String>,
    pub answered: usize,
    pub balance: Option<u32>,
    pub legal_actions: Vec<Action>,
    pub banner: Option<String>,
    pub needs_purchase: bool,
    pub end_reason: Option<EndReason>,
}

impl SessionView {
    pub fn allows(&self, action: Action) -> bool {
        self.legal_actions.contains(&action)
    }
}

#[derive(Debug)]
struct Live {
    session: InterviewSession,
    timer: CountdownTimer,
    recorder: CaptureRecorder,
}

pub struct SessionMachine {
    user: UserId,
    settings: SessionSettings,
    deps: SessionDeps,
    state: MachineState,
    sequencer: QuestionSequencer,
    live: Option<Live>,
    balance: Option<u32>,
    banner: Option<String>,
    needs_purchase: bool,
    end_reason: Option<EndReason>,
    completion: Option<CompletionRecord>,
    transcript_tx: TranscriptSink,
    transcript_rx: Option<mpsc::UnboundedReceiver<TranscriptChunk>>,
    view_tx: watch::Sender<SessionView>,
}

impl SessionMachine {
    pub fn new(
        user: UserId,
        questions: Vec<Question>,
        settings: SessionSettings,
        deps: SessionDeps,
    ) -> Result<Self> {
        let sequencer = QuestionSequencer::new(questions)?;
        let (transcript_tx, transcript_rx) = mpsc::unbounded_channel();
        let initial = SessionView {
            state: MachineState::Idle,
            session_id: None,
            remaining_secs: settings.duration_secs,
            question_index: 0,
            question_total: sequencer.len(),
            current_question: sequencer.current().clone(),
            is_final_question: sequencer.is_last(),
            recording: false,
            transcript: String::new(),
            code: None,
            answered: 0,
            balance: None,
            legal_actions: vec![Action::Start],
            banner: None,
            needs_purchase: false,
            end_reason: None,
        };
        let (view_tx, _) = watch::channel(initial);

        Ok(Self {
            user,
            settings,
            deps,
            state: MachineState::Idle,
            sequencer,
            live: None,
            balance: None,
            banner: None,
            needs_purchase: false,
            end_reason: None,
            completion: None,
            transcript_tx,
            transcript_rx: Some(transcript_rx),
            view_tx,
        })
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    pub fn session(&self) -> Option<&InterviewSession> {
        self.live.as_ref().map(|l| &l.session)
    }

    pub fn balance(&self) -> Option<u32> {
        self.balance
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view_tx.subscribe()
    }

    /// Hands out the receiving end of the transcript channel, once.
    pub fn take_transcripts(&mut self) -> Option<mpsc::UnboundedReceiver<TranscriptChunk>> {
        self.transcript_rx.take()
    }

    pub fn legal_actions(&self) -> Vec<Action> {
        match self.state {
            MachineState::Idle => vec![Action::Start],
            MachineState::Active => vec![
                Action::ToggleRecording,
                Action::EditCode,
                Action::Advance,
                Action::End,
            ],
            MachineState::Starting | MachineState::Ending | MachineState::Ended => vec![],
        }
    }

    pub fn view(&self) -> SessionView {
        let live = self.live.as_ref();
        SessionView {
            state: self.state,
            session_id: live.map(|l| l.session.session_id),
            remaining_secs: live.map_or(self.settings.duration_secs, |l| l.timer.remaining()),
            question_index: self.sequencer.index(),
            question_total: self.sequencer.len(),
            current_question: self.sequencer.current().clone(),
            is_final_question: self.sequencer.is_last(),
            recording: live.map_or(false, |l| l.recorder.is_recording()),
            transcript: live.map(|l| l.recorder.transcript().to_string()).unwrap_or_default(),
            code: live.and_then(|l| l.recorder.code().map(str::to_string)),
            answered: live.map_or(0, |l| l.session.answers.len()),
            balance: self.balance,
            legal_actions: self.legal_actions(),
            banner: self.banner.clone(),
            needs_purchase: self.needs_purchase,
            end_reason: self.end_reason,
        }
    }

    pub async fn refresh_balance(&mut self) -> Result<UserBalance> {
        match self.deps.ledger.balance(&self.user).await {
            Ok(balance) => {
                self.balance = Some(balance.remaining);
                if balance.remaining > 0 {
                    self.needs_purchase = false;
                }
                self.publish();
                Ok(balance)
            }
            Err(err) => {
                warn!(user = %self.user, error = %err, "could not load balance");
                Err(err.into())
            }
        }
    }

    /// Debits one prep and makes the session live.
    pub async fn start(&mut self) -> Result<SessionId> {
        match self.state {
            MachineState::Idle => {}
            MachineState::Ended => {
                return Err(self.violation(SessionError::IllegalAction {
                    action: Action::Start,
                    state: self.state,
                }))
            }
            _ => return Err(self.violation(SessionError::SessionAlreadyActive)),
        }

        // Debit first, then claim the user's slot; a lost claim is refunded.
        let session_id = SessionId::new();
        self.needs_purchase = false;
        self.banner = None;
        self.set_state(MachineState::Starting);

        let remaining = match self.deps.ledger.debit(&self.user, &session_id).await {
            Ok(remaining) => remaining,
            Err(LedgerError::InsufficientBalance) => {
                info!(user = %self.user, "no preps remaining, start refused");
                self.balance = Some(0);
                self.needs_purchase = true;
                self.deps.purchase.needs_purchase(&self.user, 0);
                self.set_state(MachineState::Idle);
                return Err(SessionError::InsufficientBalance);
            }
            Err(LedgerError::SessionAlreadyActive) => {
                self.set_state(MachineState::Idle);
                return Err(self.violation(SessionError::SessionAlreadyActive));
            }
            Err(err) => {
                warn!(user = %self.user, error = %err, "debit failed");
                let err = SessionError::from(err);
                self.banner = Some(err.user_message());
                self.set_state(MachineState::Idle);
                return Err(err);
            }
        };

        if !self.deps.registry.claim(&self.user, session_id) {
            let ledger = self.deps.ledger.clone();
            let user = self.user.clone();
            let refunded = self
                .retry_until_ok("refund", || {
                    let ledger = ledger.clone();
                    let user = user.clone();
                    async move { ledger.refund(&user, &session_id).await }
                })
                .await;
            self.balance = Some(refunded);
            self.set_state(MachineState::Idle);
            return Err(self.violation(SessionError::SessionAlreadyActive));
        }

        let mut session = InterviewSession::new(session_id, self.user.clone());
        session.status = SessionStatus::Active;
        self.live = Some(Live {
            session,
            timer: CountdownTimer::new(self.settings.duration_secs),
            recorder: CaptureRecorder::new(session_id),
        });
        self.balance = Some(remaining);
        info!(
            user = %self.user,
            session = %session_id,
            remaining,
            questions = self.sequencer.len(),
            secs = self.settings.duration_secs,
            "interview started"
        );
        self.set_state(MachineState::Active);
        Ok(session_id)
    }

    /// One second of wall-clock time. Ignored unless the session is live.
    pub async fn tick(&mut self) -> Tick {
        if self.state != MachineState::Active {
            return Tick::Inert;
        }
        let Some(live) = self.live.as_mut() else {
            return Tick::Inert;
        };
        let tick = live.timer.tick();
        live.session.elapsed_budget_secs = live.timer.elapsed();

        match tick {
            Tick::Expired => {
                info!(user = %self.user, "time expired");
                self.conclude(EndReason::TimeExpired).await;
            }
            Tick::Remaining(_) => self.publish(),
            Tick::Inert => {}
        }
        tick
    }

    /// Starts or stops answering the current question. Returns whether the
    /// recorder is now recording.
    pub async fn toggle_recording(&mut self) -> Result<bool> {
        self.require(Action::ToggleRecording)?;
        let recording = self.live.as_ref().map_or(false, |l| l.recorder.is_recording());

        if recording {
            self.finalize_capture().await;
            self.publish();
            return Ok(false);
        }

        let question = self.sequencer.index();
        let started = match self.live.as_mut() {
            Some(live) => {
                let now = live.timer.elapsed();
                live.recorder.start(question, now)
            }
            None => Ok(None),
        };
        let token = started.map_err(|e| self.violation(e))?;

        if let Some(token) = token {
            debug!(?token, "capture started");
            if let Err(err) = self
                .deps
                .transcriber
                .begin(token, self.transcript_tx.clone())
                .await
            {
                warn!(error = %err, "transcriber unavailable, recording without speech");
                self.banner = Some("Live transcription is unavailable.".to_string());
            }
        }
        self.publish();
        Ok(true)
    }

    /// Buffers streamed text for the live capture.
    pub fn on_transcript(&mut self, chunk: TranscriptChunk) -> bool {
        if self.state != MachineState::Active {
            debug!(token = ?chunk.token, "transcript chunk after session left Active");
            return false;
        }
        let accepted = self
            .live
            .as_mut()
            .map_or(false, |l| l.recorder.append(&chunk.token, &chunk.text));
        if accepted {
            self.publish();
        }
        accepted
    }

    /// Replaces the code editor contents for the current question.
    pub fn set_code(&mut self, code: String) -> Result<()> {
        self.require(Action::EditCode)?;
        let question = self.sequencer.index();
        let result = match self.live.as_mut() {
            Some(live) => live.recorder.set_code(question, code),
            None => Ok(()),
        };
        result.map_err(|e| self.violation(e))?;
        self.publish();
        Ok(())
    }

    /// Moves to the next question; on the last question this finishes the
    /// interview.
    pub async fn advance(&mut self) -> Result<()> {
        self.require(Action::Advance)?;
        self.finalize_capture().await;

        match self.sequencer.advance().map(|q| q.index) {
            Ok(index) => {
                if let Some(live) = self.live.as_mut() {
                    live.session.question_index = index;
                }
                debug!(index, "advanced to next question");
                self.publish();
                Ok(())
            }
            Err(SessionError::AtEnd { .. }) => {
                self.conclude(EndReason::Finished).await;
                Ok(())
            }
            Err(err) => Err(self.violation(err)),
        }
    }

    /// Ends the interview early. Repeating it once ended is harmless.
    pub async fn end(&mut self) -> Result<()> {
        match self.state {
            MachineState::Active => {
                self.conclude(EndReason::EndedEarly).await;
                Ok(())
            }
            MachineState::Ending | MachineState::Ended => Ok(()),
            state => Err(self.violation(SessionError::IllegalAction {
                action: Action::End,
                state,
            })),
        }
    }

    /// The interview screen was left before the session ended.
    pub async fn abandon(&mut self) {
        if self.state != MachineState::Active {
            return;
        }
        info!(user = %self.user, policy = ?self.settings.abandon_policy, "interview abandoned");
        self.end_reason = Some(EndReason::Abandoned);
        self.set_state(MachineState::Ending);
        self.stop_clock().await;

        let Some(record) = self.assemble(EndReason::Abandoned) else {
            self.set_state(MachineState::Ended);
            return;
        };
        let refund = self.settings.abandon_policy == AbandonPolicy::Refund;

        let store = self.deps.store.clone();
        self.retry_until_ok("abandon", || {
            let store = store.clone();
            let record = record.clone();
            async move { store.mark_abandoned(&record, refund).await }
        })
        .await;

        if refund {
            let ledger = self.deps.ledger.clone();
            let user = self.user.clone();
            let session_id = record.session_id;
            let remaining = self
                .retry_until_ok("refund", || {
                    let ledger = ledger.clone();
                    let user = user.clone();
                    async move { ledger.refund(&user, &session_id).await }
                })
                .await;
            self.balance = Some(remaining);
        }

        self.close(SessionStatus::Abandoned);
    }

    async fn conclude(&mut self, reason: EndReason) {
        if self.state != MachineState::Active {
            debug!(?reason, state = %self.state, "already concluding");
            return;
        }
        self.end_reason = Some(reason);
        self.set_state(MachineState::Ending);
        self.stop_clock().await;

        let Some(record) = self.assemble(reason) else {
            error!(user = %self.user, "ending a session that never went live");
            self.set_state(MachineState::Ended);
            return;
        };

        let store = self.deps.store.clone();
        self.retry_until_ok("completion", || {
            let store = store.clone();
            let record = record.clone();
            async move { store.persist_completion(&record).await }
        })
        .await;

        info!(
            user = %self.user,
            session = %record.session_id,
            reason = %reason,
            answered = record.answers.len(),
            elapsed = record.elapsed_secs,
            "interview ended"
        );
        self.close(SessionStatus::Ended);
    }

    fn close(&mut self, status: SessionStatus) {
        if let Some(live) = self.live.as_mut() {
            live.session.status = status;
            self.deps
                .registry
                .release(&self.user, live.session.session_id);
        }
        self.set_state(MachineState::Ended);
    }

    async fn stop_clock(&mut self) {
        if let Some(live) = self.live.as_mut() {
            live.timer.cancel();
        }
        self.finalize_capture().await;
        self.publish();
    }

    /// Stops the recorder, if anything is captured, and files the answer.
    async fn finalize_capture(&mut self) {
        let policy = self.settings.answer_policy;
        let Some(live) = self.live.as_mut() else {
            return;
        };
        let token = live.recorder.active_token();
        let now = live.timer.elapsed();
        if let Some(answer) = live.recorder.stop(now) {
            debug!(question = answer.question_index, "answer captured");
            live.session.record_answer(answer, policy);
        }
        if let Some(token) = token {
            self.deps.transcriber.end(&token).await;
        }
    }

    /// Builds the completion payload. Later calls return the same payload.
    fn assemble(&mut self, reason: EndReason) -> Option<CompletionRecord> {
        if let Some(record) = &self.completion {
            return Some(record.clone());
        }
        let live = self.live.as_ref()?;
        let record = CompletionRecord {
            session_id: live.session.session_id,
            user_id: self.user.clone(),
            started_at: live.session.started_at,
            ended_at: Utc::now(),
            end_reason: reason,
            questions_total: self.sequencer.len(),
            elapsed_secs: live.timer.elapsed(),
            answers: live.session.answers.clone(),
        };
        self.completion = Some(record.clone());
        Some(record)
    }

    /// Keeps calling `op` with backoff until it succeeds.
    async fn retry_until_ok<T, E, F, Fut>(&mut self, what: &'static str, mut op: F) -> T
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(what, attempts = attempt + 1, "persistence recovered");
                        self.banner = None;
                        self.publish();
                    }
                    return value;
                }
                Err(err) => {
                    attempt += 1;
                    let delay = self.settings.retry.delay(attempt);
                    warn!(what, attempt, ?delay, error = %err, "persistence failed, retrying");
                    self.banner = Some(
                        SessionError::PersistenceFailure {
                            reason: err.to_string(),
                        }
                        .user_message(),
                    );
                    self.publish();
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn require(&self, action: Action) -> Result<()> {
        if self.legal_actions().contains(&action) {
            Ok(())
        } else {
            Err(self.violation(SessionError::IllegalAction {
                action,
                state: self.state,
            }))
        }
    }

    fn violation(&self, err: SessionError) -> SessionError {
        warn!(user = %self.user, state = %self.state, error = %err, "contract violation");
        err
    }

    fn set_state(&mut self, next: MachineState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "state change");
            self.state = next;
        }
        self.publish();
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.view());
    }
}
