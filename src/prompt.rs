// Operator confirmation prompts
//
// The console operator reads single key presses in raw mode so a stray
// Enter does not count as an answer.

use std::collections::VecDeque;
use std::io::{self, Write};

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use tracing::info;

/// Someone who can answer yes/no questions before the rig does something
pub trait Operator {
    fn confirm(&mut self, prompt: &str) -> io::Result<bool>;
}

/// Interactive operator on the controlling terminal
#[derive(Debug, Default)]
pub struct ConsoleOperator;

/// Restores cooked mode however the prompt ends
struct RawMode;

impl RawMode {
    fn enable() -> io::Result<Self> {
        enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

fn answer(code: KeyCode, modifiers: KeyModifiers) -> Option<bool> {
    match code {
        KeyCode::Char('y') | KeyCode::Char('Y') => Some(true),
        KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => Some(false),
        // Ctrl-C is a key event in raw mode
        KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => Some(false),
        _ => None,
    }
}

impl Operator for ConsoleOperator {
    fn confirm(&mut self, prompt: &str) -> io::Result<bool> {
        let mut stdout = io::stdout();
        print!("{} [y/n] ", prompt);
        stdout.flush()?;

        let result = {
            let _raw = RawMode::enable()?;
            loop {
                if let Event::Key(KeyEvent {
                    code,
                    modifiers,
                    kind: KeyEventKind::Press,
                    ..
                }) = event::read()?
                {
                    match answer(code, modifiers) {
                        Some(yes) => break yes,
                        None => {
                            // Raw mode: explicit carriage return
                            print!("\r\nPlease enter 'y' or 'n'. ");
                            stdout.flush()?;
                        }
                    }
                }
            }
        };

        println!("{}", if result { "y" } else { "n" });
        Ok(result)
    }
}

/// Answers every prompt with yes (`--yes`)
#[derive(Debug, Default)]
pub struct AssumeYes;

impl Operator for AssumeYes {
    fn confirm(&mut self, prompt: &str) -> io::Result<bool> {
        info!("{} [assumed yes]", prompt);
        Ok(true)
    }
}

/// Pre-recorded answers. Declines once they run out.
#[derive(Debug, Default)]
pub struct ScriptedOperator {
    answers: VecDeque<bool>,
    asked: Vec<String>,
}

impl ScriptedOperator {
    pub fn new(answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
            asked: Vec::new(),
        }
    }

    /// Prompts seen so far
    pub fn asked(&self) -> &[String] {
        &self.asked
    }
}

impl Operator for ScriptedOperator {
    fn confirm(&mut self, prompt: &str) -> io::Result<bool> {
        self.asked.push(prompt.to_string());
        Ok(self.answers.pop_front().unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_answers() {
        assert_eq!(answer(KeyCode::Char('y'), KeyModifiers::NONE), Some(true));
        assert_eq!(answer(KeyCode::Char('N'), KeyModifiers::SHIFT), Some(false));
        assert_eq!(answer(KeyCode::Char('c'), KeyModifiers::CONTROL), Some(false));
        assert_eq!(answer(KeyCode::Char('c'), KeyModifiers::NONE), None);
        assert_eq!(answer(KeyCode::Enter, KeyModifiers::NONE), None);
    }

    #[test]
    fn test_scripted_operator() {
        let mut op = ScriptedOperator::new([true]);
        assert!(op.confirm("first?").unwrap());
        assert!(!op.confirm("second?").unwrap());
        assert_eq!(op.asked(), ["first?", "second?"]);
    }
}
