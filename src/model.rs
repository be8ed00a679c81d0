use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::policy::AnswerPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies one interview session. Doubles as the idempotency key for
/// debit and completion persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
pub enum QuestionKind {
    Behavioral,
    Technical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub index: usize,
    pub prompt: String,
    pub kind: QuestionKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub question_index: usize,
    pub transcript: String,
    pub code_buffer: Option<String>,
    pub recorded_duration_secs: u64,
}

impl Answer {
    /// Folds a later take of the same question into this one.
    fn merge(&mut self, later: Answer) {
        if !later.transcript.is_empty() {
            if !self.transcript.is_empty() {
                self.transcript.push('\n');
            }
            self.transcript.push_str(&later.transcript);
        }
        if later.code_buffer.is_some() {
            self.code_buffer = later.code_buffer;
        }
        self.recorded_duration_secs += later.recorded_duration_secs;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBalance {
    pub user_id: UserId,
    pub remaining: u32,
    pub total_purchased: u32,
}

impl UserBalance {
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            remaining: 0,
            total_purchased: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Active,
    Ended,
    Abandoned,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Active => "active",
            SessionStatus::Ended => "ended",
            SessionStatus::Abandoned => "abandoned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SessionStatus::Pending),
            "active" => Some(SessionStatus::Active),
            "ended" => Some(SessionStatus::Ended),
            "abandoned" => Some(SessionStatus::Abandoned),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Finished,
    EndedEarly,
    TimeExpired,
    Abandoned,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Finished => "finished",
            EndReason::EndedEarly => "ended_early",
            EndReason::TimeExpired => "time_expired",
            EndReason::Abandoned => "abandoned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "finished" => Some(EndReason::Finished),
            "ended_early" => Some(EndReason::EndedEarly),
            "time_expired" => Some(EndReason::TimeExpired),
            "abandoned" => Some(EndReason::Abandoned),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterviewSession {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub started_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub question_index: usize,
    /// Kept sorted by question index, at most one entry per index.
    pub answers: Vec<Answer>,
    pub elapsed_budget_secs: u64,
}

impl InterviewSession {
    pub fn new(session_id: SessionId, user_id: UserId) -> Self {
        Self {
            session_id,
            user_id,
            started_at: Utc::now(),
            status: SessionStatus::Pending,
            question_index: 0,
            answers: Vec::new(),
            elapsed_budget_secs: 0,
        }
    }

    pub fn record_answer(&mut self, answer: Answer, policy: AnswerPolicy) {
        match self
            .answers
            .binary_search_by_key(&answer.question_index, |a| a.question_index)
        {
            Ok(pos) => match policy {
                AnswerPolicy::Overwrite => self.answers[pos] = answer,
                AnswerPolicy::Append => self.answers[pos].merge(answer),
            },
            Err(pos) => self.answers.insert(pos, answer),
        }
    }

    pub fn answer_for(&self, question_index: usize) -> Option<&Answer> {
        self.answers.iter().find(|a| a.question_index == question_index)
    }
}

/// The payload handed to persistence when a session ends or is abandoned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub end_reason: EndReason,
    pub questions_total: usize,
    pub elapsed_secs: u64,
    pub answers: Vec<Answer>,
}
