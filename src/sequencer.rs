use crate::error::{Result, SessionError};
use crate::model::Question;

/// Fixed, ordered list of prompts with a forward-only cursor.
#[derive(Debug, Clone)]
pub struct QuestionSequencer {
    questions: Vec<Question>,
    cursor: usize,
}

impl QuestionSequencer {
    pub fn new(questions: Vec<Question>) -> Result<Self> {
        if questions.is_empty() {
            return Err(SessionError::EmptyQuestionSet);
        }
        Ok(Self {
            questions,
            cursor: 0,
        })
    }

    pub fn current(&self) -> &Question {
        &self.questions[self.cursor]
    }

    /// Moves to the next question. Fails with `AtEnd` on the last one.
    pub fn advance(&mut self) -> Result<&Question> {
        if self.is_last() {
            return Err(SessionError::AtEnd { index: self.cursor });
        }
        self.cursor += 1;
        Ok(&self.questions[self.cursor])
    }

    pub fn index(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_last(&self) -> bool {
        self.cursor + 1 == self.questions.len()
    }
}
