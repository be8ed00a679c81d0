use tracing::debug;

use crate::error::{Result, SessionError};
use crate::model::{Answer, SessionId};

/// Names one recording take. Transcript chunks carry the token so text is
/// only ever attributed to the question that was live when it was spoken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaptureToken {
    pub session_id: SessionId,
    pub question_index: usize,
    pub take: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptChunk {
    pub token: CaptureToken,
    pub text: String,
}

#[derive(Debug, Clone, Copy)]
struct Recording {
    token: CaptureToken,
    started_at_secs: u64,
}

/// Holds the answer being captured for the current question.
#[derive(Debug)]
pub struct CaptureRecorder {
    session_id: SessionId,
    recording: Option<Recording>,
    question: Option<usize>,
    transcript: String,
    code: Option<String>,
    takes: u32,
}

impl CaptureRecorder {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            recording: None,
            question: None,
            transcript: String::new(),
            code: None,
            takes: 0,
        }
    }

    /// Begins recording for `question_index`. Returns the new token, or
    /// `None` when that question is already recording.
    pub fn start(&mut self, question_index: usize, now_secs: u64) -> Result<Option<CaptureToken>> {
        if let Some(active) = self.pending_question() {
            if active != question_index {
                return Err(SessionError::RecordingAlreadyActive {
                    active,
                    requested: question_index,
                });
            }
        }
        if self.recording.is_some() {
            return Ok(None);
        }

        self.takes += 1;
        let token = CaptureToken {
            session_id: self.session_id,
            question_index,
            take: self.takes,
        };
        self.question = Some(question_index);
        self.recording = Some(Recording {
            token,
            started_at_secs: now_secs,
        });
        Ok(Some(token))
    }

    /// Buffers a transcript chunk. Chunks for any other token are dropped.
    pub fn append(&mut self, token: &CaptureToken, text: &str) -> bool {
        match self.recording {
            Some(rec) if rec.token == *token => {
                self.transcript.push_str(text);
                true
            }
            _ => {
                debug!(?token, "dropping transcript chunk for inactive capture");
                false
            }
        }
    }

    /// Replaces the code buffer for `question_index`.
    pub fn set_code(&mut self, question_index: usize, code: String) -> Result<()> {
        if let Some(active) = self.pending_question() {
            if active != question_index {
                return Err(SessionError::RecordingAlreadyActive {
                    active,
                    requested: question_index,
                });
            }
        }
        self.question = Some(question_index);
        self.code = Some(code);
        Ok(())
    }

    /// Goes idle and hands back whatever was captured, clearing the buffers.
    pub fn stop(&mut self, now_secs: u64) -> Option<Answer> {
        let recording = self.recording.take();
        let question_index = self.question.take()?;

        let recorded_duration_secs =
            recording.map_or(0, |r| now_secs.saturating_sub(r.started_at_secs));

        Some(Answer {
            question_index,
            transcript: std::mem::take(&mut self.transcript),
            code_buffer: self.code.take(),
            recorded_duration_secs,
        })
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    pub fn active_token(&self) -> Option<CaptureToken> {
        self.recording.map(|r| r.token)
    }

    pub fn has_pending(&self) -> bool {
        self.question.is_some()
    }

    fn pending_question(&self) -> Option<usize> {
        self.question
    }

    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn recorder() -> CaptureRecorder {
        CaptureRecorder::new(SessionId::new())
    }

    #[test]
    fn start_is_idempotent_for_the_same_question() {
        let mut r = recorder();
        let token = r.start(0, 0).unwrap();
        assert!(token.is_some());
        assert_eq!(r.start(0, 3).unwrap(), None);
        assert_eq!(r.active_token(), token);
    }

    #[test]
    fn start_for_another_question_while_recording_is_rejected() {
        let mut r = recorder();
        r.start(0, 0).unwrap();
        assert_matches!(
            r.start(1, 5),
            Err(SessionError::RecordingAlreadyActive {
                active: 0,
                requested: 1
            })
        );
        assert!(r.is_recording());
    }

    #[test]
    fn transcript_only_grows_while_recording() {
        let mut r = recorder();
        let token = r.start(0, 10).unwrap().unwrap();

        let mut last_len = 0;
        for chunk in ["Hi, ", "I'm Alex, ", "a CS student."] {
            assert!(r.append(&token, chunk));
            assert!(r.transcript().len() >= last_len);
            assert!(r.transcript().starts_with(&"Hi, I'm Alex, a CS student."[..last_len]));
            last_len = r.transcript().len();
        }

        let answer = r.stop(25).unwrap();
        assert_eq!(answer.question_index, 0);
        assert_eq!(answer.transcript, "Hi, I'm Alex, a CS student.");
        assert_eq!(answer.recorded_duration_secs, 15);
        assert!(!r.is_recording());
        assert_eq!(r.transcript(), "");
    }

    #[test]
    fn stale_token_chunks_are_dropped() {
        let mut r = recorder();
        let first = r.start(0, 0).unwrap().unwrap();
        r.stop(1);
        let second = r.start(1, 1).unwrap().unwrap();

        assert!(!r.append(&first, "late text"));
        assert!(r.append(&second, "fresh"));
        assert_eq!(r.transcript(), "fresh");
    }

    #[test]
    fn stop_while_idle_yields_nothing() {
        let mut r = recorder();
        assert_eq!(r.stop(0), None);
    }

    #[test]
    fn code_draft_is_part_of_the_answer() {
        let mut r = recorder();
        r.set_code(2, "fn reverse() {}".into()).unwrap();
        assert!(r.has_pending());

        let answer = r.stop(40).unwrap();
        assert_eq!(answer.question_index, 2);
        assert_eq!(answer.code_buffer.as_deref(), Some("fn reverse() {}"));
        assert_eq!(answer.recorded_duration_secs, 0);
    }
}
