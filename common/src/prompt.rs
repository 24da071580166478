use anyhow::{Context, Result, anyhow};
use std::collections::VecDeque;
use std::io::{BufRead, Write};

/// Line-based interaction with the operator
pub trait Prompt {
    /// Show `question` and return the answer without its trailing line break.
    fn ask(&mut self, question: &str) -> Result<String>;
}

/// Asks on stdout and reads the answer from stdin
#[derive(Debug, Default)]
pub struct StdinPrompt;

impl Prompt for StdinPrompt {
    fn ask(&mut self, question: &str) -> Result<String> {
        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(question.as_bytes())
            .and_then(|()| stdout.flush())
            .context("failed writing prompt to stdout")?;
        let mut answer = String::new();
        let read = std::io::stdin()
            .lock()
            .read_line(&mut answer)
            .context("failed reading answer from stdin")?;
        if read == 0 {
            tracing::debug!("stdin closed while waiting for: {}", question);
        }
        Ok(answer.trim_end_matches(['\r', '\n']).to_string())
    }
}

/// Replays pre-recorded answers, for headless runs and tests
#[derive(Debug, Default, Clone)]
pub struct ScriptedPrompt {
    answers: VecDeque<String>,
    questions: Vec<String>,
}

impl ScriptedPrompt {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            questions: vec![],
        }
    }

    /// Questions asked so far, in order.
    #[must_use]
    pub fn questions(&self) -> &[String] {
        &self.questions
    }

    /// Answers not consumed yet.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.answers.len()
    }
}

impl Prompt for ScriptedPrompt {
    fn ask(&mut self, question: &str) -> Result<String> {
        self.questions.push(question.to_string());
        self.answers
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted answer left for: {}", question))
    }
}

/// `true` for the single-character affirmative answer (`Y` or `y`, surrounding whitespace ignored).
#[must_use]
pub fn is_affirmative(answer: &str) -> bool {
    answer.trim().eq_ignore_ascii_case("y")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_answers_are_consumed_in_order() {
        let mut prompt = ScriptedPrompt::new(["first", "second"]);
        assert_eq!(prompt.ask("one?").unwrap(), "first");
        assert_eq!(prompt.ask("two?").unwrap(), "second");
        assert!(prompt.ask("three?").is_err());
        assert_eq!(prompt.questions(), ["one?", "two?", "three?"]);
        assert_eq!(prompt.remaining(), 0);
    }

    #[test]
    fn only_single_y_is_affirmative() {
        assert!(is_affirmative("Y"));
        assert!(is_affirmative("y"));
        assert!(is_affirmative(" Y \n"));
        assert!(!is_affirmative("yes"));
        assert!(!is_affirmative("N"));
        assert!(!is_affirmative(""));
    }
}
