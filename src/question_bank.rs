use include_dir::{include_dir, Dir};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;

use crate::model::{Question, QuestionKind};

static QUESTION_DIR: Dir = include_dir!("src/questions");

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BankError {
    #[error("unknown question set '{0}'")]
    UnknownSet(String),

    #[error("question set '{name}' is malformed: {reason}")]
    Malformed { name: String, reason: String },
}

#[derive(Deserialize, Clone, Debug)]
struct Entry {
    prompt: String,
    kind: QuestionKind,
}

#[derive(Deserialize, Clone, Debug)]
pub struct QuestionBank {
    pub name: String,
    questions: Vec<Entry>,
}

impl QuestionBank {
    pub fn load(name: &str) -> Result<Self, BankError> {
        let file = QUESTION_DIR
            .get_file(format!("{name}.json"))
            .ok_or_else(|| BankError::UnknownSet(name.to_string()))?;
        let text = file.contents_utf8().ok_or_else(|| BankError::Malformed {
            name: name.to_string(),
            reason: "not utf-8".to_string(),
        })?;
        let bank: QuestionBank = serde_json::from_str(text).map_err(|e| BankError::Malformed {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        if bank.questions.is_empty() {
            return Err(BankError::Malformed {
                name: name.to_string(),
                reason: "no questions".to_string(),
            });
        }
        Ok(bank)
    }

    /// Names of the bundled question sets.
    pub fn available() -> Vec<String> {
        let mut names: Vec<String> = QUESTION_DIR
            .files()
            .filter_map(|f| f.path().file_stem())
            .filter_map(|s| s.to_str())
            .map(str::to_string)
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// The first `n` questions in set order.
    pub fn first(&self, n: usize) -> Vec<Question> {
        let n = n.clamp(1, self.len());
        index(self.questions.iter().take(n))
    }

    pub fn pick(&self, n: usize) -> Vec<Question> {
        self.pick_with(n, &mut rand::thread_rng())
    }

    /// Draws `n` questions. A behavioral opener, if the set has one, always
    /// comes first; the rest keep their set order.
    pub fn pick_with<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Vec<Question> {
        let n = n.clamp(1, self.len());
        let opener = self
            .questions
            .iter()
            .position(|q| q.kind == QuestionKind::Behavioral);

        let mut positions: Vec<usize> = (0..self.len()).filter(|&i| Some(i) != opener).collect();
        let rest = if opener.is_some() { n - 1 } else { n };
        positions.shuffle(rng);
        positions.truncate(rest);
        positions.sort_unstable();

        let chosen = opener
            .into_iter()
            .chain(positions)
            .map(|i| &self.questions[i]);
        index(chosen)
    }
}

fn index<'a>(entries: impl Iterator<Item = &'a Entry>) -> Vec<Question> {
    entries
        .enumerate()
        .map(|(index, e)| Question {
            index,
            prompt: e.prompt.clone(),
            kind: e.kind,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn loads_bundled_software_engineer_set() {
        let bank = QuestionBank::load("software_engineer").unwrap();
        assert_eq!(bank.name, "software_engineer");
        assert!(bank.len() >= 4);
    }

    #[test]
    fn unknown_set_is_an_error() {
        assert_matches!(
            QuestionBank::load("astrology"),
            Err(BankError::UnknownSet(name)) if name == "astrology"
        );
    }

    #[test]
    fn available_lists_every_bundled_set() {
        let names = QuestionBank::available();
        assert!(names.contains(&"software_engineer".to_string()));
        assert!(names.contains(&"behavioral".to_string()));
        for name in names {
            assert!(QuestionBank::load(&name).is_ok(), "{name} should load");
        }
    }

    #[test]
    fn first_keeps_order_and_reindexes() {
        let bank = QuestionBank::load("software_engineer").unwrap();
        let qs = bank.first(4);
        assert_eq!(qs.len(), 4);
        assert!(qs[0].prompt.starts_with("Tell me about yourself"));
        assert_eq!(qs[1].kind, QuestionKind::Technical);
        for (i, q) in qs.iter().enumerate() {
            assert_eq!(q.index, i);
        }
    }

    #[test]
    fn pick_opens_with_a_behavioral_question() {
        let bank = QuestionBank::load("data_structures").unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let qs = bank.pick_with(3, &mut rng);
            assert_eq!(qs.len(), 3);
            assert_eq!(qs[0].kind, QuestionKind::Behavioral);
            assert_eq!(qs.iter().map(|q| q.index).collect::<Vec<_>>(), vec![0, 1, 2]);
        }
    }

    #[test]
    fn pick_clamps_to_the_set_size() {
        let bank = QuestionBank::load("behavioral").unwrap();
        assert_eq!(bank.pick(100).len(), bank.len());
        assert_eq!(bank.pick(0).len(), 1);
    }
}
