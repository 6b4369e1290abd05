//! Line based operator prompts.
//!
//! Menus are shown as numbered lists and answered by number; free text fields
//! re-ask until the answer passes validation. End of input is reported as
//! [`PromptError::Closed`] so callers can wind down cleanly.

use std::fmt::Display;
use std::io::{self, BufRead, BufReader, Stdin, Stdout, Write};
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("Input closed")]
    Closed,
    #[error("Terminal I/O error: {0}")]
    Io(#[from] io::Error),
}

pub trait Prompt {
    /// Asks the operator to pick one of `choices`, returning its index.
    fn select(&mut self, message: &str, choices: &[&str]) -> Result<usize, PromptError>;
    /// Reads one line of free text, trimmed.
    fn text(&mut self, message: &str) -> Result<String, PromptError>;
    /// Shows a message without waiting for input.
    fn say(&mut self, message: &str) -> Result<(), PromptError>;
}

/// Prompt surface shared between the menu and background alert handling.
/// Holding the lock keeps a prompt on screen without interleaving.
pub type SharedPrompt = Arc<Mutex<dyn Prompt + Send>>;

pub fn shared<P: Prompt + Send + 'static>(prompt: P) -> SharedPrompt {
    Arc::new(Mutex::new(prompt))
}

/// Picks one of a labelled set of values.
pub fn choose<'a, T>(
    prompt: &mut dyn Prompt,
    message: &str,
    items: &'a [(&str, T)],
) -> Result<&'a T, PromptError> {
    let labels: Vec<&str> = items.iter().map(|(label, _)| *label).collect();
    let index = prompt.select(message, &labels)?;
    Ok(&items[index].1)
}

/// Asks until `parse` accepts the answer.
pub fn ask<T, E: Display>(
    prompt: &mut dyn Prompt,
    message: &str,
    parse: impl Fn(&str) -> Result<T, E>,
) -> Result<T, PromptError> {
    loop {
        let answer = prompt.text(message)?;
        match parse(&answer) {
            Ok(value) => return Ok(value),
            Err(e) => prompt.say(&format!("  {e}"))?,
        }
    }
}

pub struct LinePrompt<R, W> {
    input: R,
    output: W,
}

impl LinePrompt<BufReader<Stdin>, Stdout> {
    pub fn stdio() -> Self {
        LinePrompt::new(BufReader::new(io::stdin()), io::stdout())
    }
}

impl<R: BufRead, W: Write> LinePrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        LinePrompt { input, output }
    }

    pub fn into_output(self) -> W {
        self.output
    }

    fn read_line(&mut self) -> Result<String, PromptError> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(PromptError::Closed);
        }
        Ok(line.trim().to_string())
    }
}

impl<R: BufRead, W: Write> Prompt for LinePrompt<R, W> {
    fn select(&mut self, message: &str, choices: &[&str]) -> Result<usize, PromptError> {
        if choices.is_empty() {
            return Err(PromptError::Closed);
        }
        writeln!(self.output, "? {message}")?;
        for (number, choice) in choices.iter().enumerate() {
            writeln!(self.output, "  {}) {choice}", number + 1)?;
        }
        loop {
            write!(self.output, "> ")?;
            self.output.flush()?;
            let answer = self.read_line()?;
            match answer.parse::<usize>() {
                Ok(number) if (1..=choices.len()).contains(&number) => return Ok(number - 1),
                _ => writeln!(
                    self.output,
                    "  enter a number between 1 and {}",
                    choices.len()
                )?,
            }
        }
    }

    fn text(&mut self, message: &str) -> Result<String, PromptError> {
        write!(self.output, "? {message}: ")?;
        self.output.flush()?;
        self.read_line()
    }

    fn say(&mut self, message: &str) -> Result<(), PromptError> {
        writeln!(self.output, "{message}")?;
        self.output.flush()?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::io::Cursor;

    use super::*;

    pub(crate) type ScriptedPrompt = LinePrompt<Cursor<Vec<u8>>, Vec<u8>>;

    pub(crate) fn scripted(answers: &str) -> ScriptedPrompt {
        LinePrompt::new(Cursor::new(answers.as_bytes().to_vec()), Vec::new())
    }

    pub(crate) fn transcript(prompt: ScriptedPrompt) -> String {
        String::from_utf8_lossy(&prompt.into_output()).into_owned()
    }
}
