use std::{
    collections::{HashMap, VecDeque},
    io::{self, BufRead, Write},
    sync::{Arc, RwLock},
};

use thiserror::Error;

/// Secret the login flow may need from the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecretKind {
    /// One-time login code.
    Code,
    /// Two-step verification password.
    Password,
    /// First name for a new account.
    FirstName,
    /// Last name for a new account.
    LastName,
}

impl SecretKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Code => "Enter code",
            Self::Password => "Password",
            Self::FirstName => "First name",
            Self::LastName => "Last name",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PromptError {
    #[error("no answer available for {0:?}")]
    NoAnswer(SecretKind),
    #[error("prompt unavailable: {0}")]
    Unavailable(String),
    #[error("prompt backend failure: {0}")]
    Backend(String),
}

/// Synchronous source of secrets for the blocking login.
pub trait SecretPrompt: Send + Sync {
    fn prompt(&self, kind: SecretKind) -> Result<String, PromptError>;
}

/// Reads answers line by line from standard input.
///
/// Input is echoed; callers that need hidden password entry should supply
/// their own prompt.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinPrompt;

impl SecretPrompt for StdinPrompt {
    fn prompt(&self, kind: SecretKind) -> Result<String, PromptError> {
        let mut stdout = io::stdout().lock();
        write!(stdout, "{}: ", kind.label())
            .and_then(|_| stdout.flush())
            .map_err(|err| PromptError::Unavailable(err.to_string()))?;

        let mut line = String::new();
        let read = io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|err| PromptError::Backend(err.to_string()))?;
        if read == 0 {
            return Err(PromptError::Unavailable("stdin closed".to_owned()));
        }

        let answer = line.trim();
        if answer.is_empty() {
            return Err(PromptError::NoAnswer(kind));
        }
        Ok(answer.to_owned())
    }
}

/// Pre-loaded answers, consumed in order per kind.
#[derive(Clone, Default)]
pub struct ScriptedPrompt {
    answers: Arc<RwLock<HashMap<SecretKind, VecDeque<String>>>>,
}

impl ScriptedPrompt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_answer(self, kind: SecretKind, answer: impl Into<String>) -> Self {
        self.push(kind, answer);
        self
    }

    pub fn push(&self, kind: SecretKind, answer: impl Into<String>) {
        if let Ok(mut answers) = self.answers.write() {
            answers.entry(kind).or_default().push_back(answer.into());
        }
    }

    pub fn remaining(&self, kind: SecretKind) -> usize {
        self.answers
            .read()
            .map(|answers| answers.get(&kind).map_or(0, VecDeque::len))
            .unwrap_or(0)
    }
}

impl SecretPrompt for ScriptedPrompt {
    fn prompt(&self, kind: SecretKind) -> Result<String, PromptError> {
        let mut answers = self
            .answers
            .write()
            .map_err(|_| PromptError::Backend("poisoned lock".to_owned()))?;
        answers
            .get_mut(&kind)
            .and_then(VecDeque::pop_front)
            .ok_or(PromptError::NoAnswer(kind))
    }
}

impl<P: SecretPrompt + ?Sized> SecretPrompt for Arc<P> {
    fn prompt(&self, kind: SecretKind) -> Result<String, PromptError> {
        (**self).prompt(kind)
    }
}
