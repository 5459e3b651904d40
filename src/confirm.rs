//! Interactive confirmation before risky or destructive work.

use dialoguer::Input;
use thiserror::Error;

/// Answers that count as consent, compared case-insensitively.
pub const ACCEPTED_ANSWERS: [&str; 4] = ["y", "yes", "buzz off", "screw you"];

/// Answer assumed when the operator just presses enter.
pub const DEFAULT_ANSWER: &str = "Not at all";

/// Raised when the interactive channel cannot be used.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfirmError {
    /// The prompt could not be shown or read.
    #[error("confirmation prompt failed: {0}")]
    Prompt(String),
}

/// Asks an operator a question and returns the raw answer.
pub trait Confirmer {
    /// Shows `message` and returns what the operator typed.
    ///
    /// # Errors
    ///
    /// Returns [`ConfirmError`] when no answer can be obtained.
    fn ask(&self, message: &str) -> Result<String, ConfirmError>;
}

impl<T: Confirmer + ?Sized> Confirmer for &T {
    fn ask(&self, message: &str) -> Result<String, ConfirmError> {
        (**self).ask(message)
    }
}

/// Returns `true` when `answer` is one of [`ACCEPTED_ANSWERS`].
#[must_use]
pub fn is_affirmative(answer: &str) -> bool {
    let normalised = answer.trim().to_lowercase();
    ACCEPTED_ANSWERS.contains(&normalised.as_str())
}

/// Asks `message` and reports whether the operator consented. A failed
/// prompt counts as a refusal.
pub fn confirm<C: Confirmer + ?Sized>(confirmer: &C, message: &str) -> bool {
    match confirmer.ask(message) {
        Ok(answer) => is_affirmative(&answer),
        Err(err) => {
            tracing::warn!(error = %err, "treating failed confirmation prompt as a refusal");
            false
        }
    }
}

/// Prompts on the controlling terminal.
#[derive(Clone, Copy, Debug, Default)]
pub struct TerminalConfirmer;

impl Confirmer for TerminalConfirmer {
    fn ask(&self, message: &str) -> Result<String, ConfirmError> {
        Input::<String>::new()
            .with_prompt(message)
            .default(String::from(DEFAULT_ANSWER))
            .interact_text()
            .map_err(|err| ConfirmError::Prompt(err.to_string()))
    }
}
