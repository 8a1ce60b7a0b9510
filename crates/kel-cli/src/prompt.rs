use std::io::{self, BufRead, IsTerminal, Write};

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;

use kel_core::Prompter;

/// Reads login details from the terminal.
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn principal(&self) -> io::Result<String> {
        ask("Username: ")
    }

    fn secret(&self) -> io::Result<String> {
        if !io::stdin().is_terminal() {
            return ask("Password: ");
        }
        ask_hidden("Password: ")
    }
}

fn ask(label: &str) -> io::Result<String> {
    let mut stderr = io::stderr();
    write!(stderr, "{}", label)?;
    stderr.flush()?;

    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "no input available for login prompt",
        ));
    }
    Ok(line.trim_end_matches(&['\r', '\n'][..]).to_string())
}

/// Read a line in raw mode without echoing it.
fn ask_hidden(label: &str) -> io::Result<String> {
    let mut stderr = io::stderr();
    write!(stderr, "{}", label)?;
    stderr.flush()?;

    terminal::enable_raw_mode()?;
    let result = read_hidden();
    terminal::disable_raw_mode()?;
    writeln!(stderr)?;
    result
}

fn read_hidden() -> io::Result<String> {
    let mut secret = String::new();
    loop {
        if let Event::Key(key) = event::read()? {
            if let Some(done) = on_key(&mut secret, key) {
                return done.map(|()| secret);
            }
        }
    }
}

/// Apply one key press; `Some` once input is finished or aborted.
fn on_key(secret: &mut String, key: KeyEvent) -> Option<io::Result<()>> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    match key.code {
        KeyCode::Enter => Some(Ok(())),
        KeyCode::Char('c') | KeyCode::Char('d')
            if key.modifiers.contains(KeyModifiers::CONTROL) =>
        {
            Some(Err(io::Error::new(
                io::ErrorKind::Interrupted,
                "login prompt cancelled",
            )))
        }
        KeyCode::Esc => Some(Err(io::Error::new(
            io::ErrorKind::Interrupted,
            "login prompt cancelled",
        ))),
        KeyCode::Backspace => {
            secret.pop();
            None
        }
        KeyCode::Char(c) => {
            secret.push(c);
            None
        }
        _ => None,
    }
}
