//! Operator decisions
//!
//! Every yes/no or multi-choice question the engine needs answered goes through a
//! [`DecisionSource`], so a run can be driven interactively from a terminal, fully
//! non-interactively from flags, or deterministically from a test script.

use std::collections::{BTreeSet, VecDeque};
use std::io::{BufRead, Write};
use std::sync::Mutex;

/// One selectable option in a choice-set question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    pub key: String,
    pub label: String,
}

impl Choice {
    pub fn new(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
        }
    }
}

pub trait DecisionSource: Send + Sync {
    fn ask_yes_no(&self, question: &str) -> bool;

    /// Returns the keys of the selected options; unknown keys are dropped.
    fn ask_choice_set(&self, question: &str, options: &[Choice]) -> BTreeSet<String>;
}

/// Keep only answers that name a known option.
pub fn parse_choice_answer(answer: &str, options: &[Choice]) -> BTreeSet<String> {
    answer
        .split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .filter(|a| options.iter().any(|o| o.key == *a))
        .map(str::to_string)
        .collect()
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Prompts on stdout and reads answers from stdin.
///
/// An unreadable stdin (closed pipe, EOF) answers "no" and selects nothing.
#[derive(Debug, Default)]
pub struct TerminalPrompt;

impl TerminalPrompt {
    fn read_answer(prompt: &str) -> Option<String> {
        print!("{prompt}");
        std::io::stdout().flush().ok()?;
        let mut input = String::new();
        match std::io::stdin().lock().read_line(&mut input) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(input),
        }
    }
}

impl DecisionSource for TerminalPrompt {
    fn ask_yes_no(&self, question: &str) -> bool {
        Self::read_answer(&format!("{question} (y/n): ")).is_some_and(|a| is_yes(&a))
    }

    fn ask_choice_set(&self, question: &str, options: &[Choice]) -> BTreeSet<String> {
        println!();
        println!("{question}");
        for option in options {
            println!("{}: {}", option.key, option.label);
        }
        Self::read_answer("Choices (comma separated, e.g. 1,2,3): ")
            .map(|a| parse_choice_answer(&a, options))
            .unwrap_or_default()
    }
}

/// Answers every question the same way without prompting.
///
/// Used for `--yes` runs: yes/no questions get `yes_to_all`, choice sets select every
/// option.
#[derive(Debug, Clone, Copy)]
pub struct AutoDecisions {
    pub yes_to_all: bool,
}

impl DecisionSource for AutoDecisions {
    fn ask_yes_no(&self, question: &str) -> bool {
        tracing::debug!(question, answer = self.yes_to_all, "auto-answered");
        self.yes_to_all
    }

    fn ask_choice_set(&self, _question: &str, options: &[Choice]) -> BTreeSet<String> {
        options.iter().map(|o| o.key.clone()).collect()
    }
}

/// Replays canned answers in order and records every question asked.
///
/// Once the script runs dry, yes/no questions answer "no" and choice sets select
/// nothing.
#[derive(Debug, Default)]
pub struct ScriptedDecisions {
    yes_no: Mutex<VecDeque<bool>>,
    choices: Mutex<VecDeque<String>>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedDecisions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer_yes_no(self, answer: bool) -> Self {
        self.yes_no
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(answer);
        self
    }

    pub fn answer_choices(self, answer: &str) -> Self {
        self.choices
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(answer.to_string());
        self
    }

    pub fn questions_asked(&self) -> Vec<String> {
        self.asked.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn note(&self, question: &str) {
        self.asked
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(question.to_string());
    }
}

impl DecisionSource for ScriptedDecisions {
    fn ask_yes_no(&self, question: &str) -> bool {
        self.note(question);
        self.yes_no
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front()
            .unwrap_or(false)
    }

    fn ask_choice_set(&self, question: &str, options: &[Choice]) -> BTreeSet<String> {
        self.note(question);
        self.choices
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front()
            .map(|a| parse_choice_answer(&a, options))
            .unwrap_or_default()
    }
}
