//! Terminal prompts for credentials that were not found in the environment.

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use fundlab_core::source::{CredentialPrompt, SourceError};
use std::io::{self, BufRead, IsTerminal, Write};

/// What a key press does to a hidden input line.
#[derive(Debug, PartialEq, Eq)]
pub enum KeyOutcome {
    Continue,
    Submit,
    Abort,
}

/// Apply one key press to the hidden input buffer.
pub fn apply_key(buf: &mut String, key: KeyEvent) -> KeyOutcome {
    match key.code {
        KeyCode::Enter => KeyOutcome::Submit,
        KeyCode::Esc => KeyOutcome::Abort,
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => KeyOutcome::Abort,
        KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) && buf.is_empty() => {
            KeyOutcome::Abort
        }
        KeyCode::Backspace => {
            buf.pop();
            KeyOutcome::Continue
        }
        KeyCode::Char(c) => {
            buf.push(c);
            KeyOutcome::Continue
        }
        _ => KeyOutcome::Continue,
    }
}

/// Disables raw mode when dropped.
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

fn prompt_err(e: io::Error) -> SourceError {
    SourceError::Credentials(format!("terminal prompt failed: {e}"))
}

fn require_terminal() -> Result<(), SourceError> {
    if io::stdin().is_terminal() {
        Ok(())
    } else {
        Err(SourceError::Credentials(
            "no terminal to prompt on; set PGUSER/PGPASSWORD or use ~/.pgpass".into(),
        ))
    }
}

/// Prompts on stderr, reads from the terminal.
pub struct TerminalPrompt;

impl CredentialPrompt for TerminalPrompt {
    fn username(&self, target: &str) -> Result<String, SourceError> {
        require_terminal()?;
        eprint!("Username for {target}: ");
        io::stderr().flush().map_err(prompt_err)?;

        let mut line = String::new();
        io::stdin().lock().read_line(&mut line).map_err(prompt_err)?;
        Ok(line.trim().to_string())
    }

    fn password(&self, username: &str, target: &str) -> Result<String, SourceError> {
        require_terminal()?;
        eprint!("Password for {username}@{target}: ");
        io::stderr().flush().map_err(prompt_err)?;

        let mut buf = String::new();
        let outcome = {
            let _raw = RawModeGuard::enable().map_err(prompt_err)?;
            loop {
                match event::read().map_err(prompt_err)? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        match apply_key(&mut buf, key) {
                            KeyOutcome::Continue => {}
                            done => break done,
                        }
                    }
                    _ => {}
                }
            }
        };
        eprintln!();

        match outcome {
            KeyOutcome::Abort => Err(SourceError::Credentials("password entry aborted".into())),
            _ => Ok(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn typed(keys: &[KeyEvent]) -> (String, KeyOutcome) {
        let mut buf = String::new();
        for key in keys {
            match apply_key(&mut buf, *key) {
                KeyOutcome::Continue => {}
                done => return (buf, done),
            }
        }
        (buf, KeyOutcome::Continue)
    }

    #[test]
    fn typing_and_backspace() {
        let (buf, outcome) = typed(&[
            KeyEvent::from(KeyCode::Char('p')),
            KeyEvent::from(KeyCode::Char('x')),
            KeyEvent::from(KeyCode::Backspace),
            KeyEvent::from(KeyCode::Char('w')),
            KeyEvent::from(KeyCode::Enter),
        ]);
        assert_eq!(buf, "pw");
        assert_eq!(outcome, KeyOutcome::Submit);
    }

    #[test]
    fn ctrl_c_and_esc_abort() {
        let (_, outcome) = typed(&[KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)]);
        assert_eq!(outcome, KeyOutcome::Abort);
        let (_, outcome) = typed(&[KeyEvent::from(KeyCode::Char('a')), KeyEvent::from(KeyCode::Esc)]);
        assert_eq!(outcome, KeyOutcome::Abort);
    }

    #[test]
    fn plain_c_is_just_a_character() {
        let (buf, _) = typed(&[KeyEvent::from(KeyCode::Char('c'))]);
        assert_eq!(buf, "c");
    }
}
