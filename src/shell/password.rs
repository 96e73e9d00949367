//! Password lookup: first the password file, then a masked prompt.

use std::borrow::Cow;

use rustyline::completion::Completer;
use rustyline::highlight::{CmdKind, Highlighter};
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Editor, Helper};
use tracing::{error, info};

use crate::shell::preferences::Preferences;

/// Resolves the password for a connection fingerprint of the shape
/// `<host>:<port>:<db>:<user>:`, falling back to an interactive
/// prompt.
pub fn get(preferences: &Preferences, fingerprint: &str) -> String {
    let file = &preferences.password_file;
    if file.is_empty() {
        return prompt();
    }

    let data = match std::fs::read_to_string(file) {
        Ok(data) => data,
        Err(err) => {
            if err.kind() != std::io::ErrorKind::NotFound {
                error!(context = "read password file", path = %file, "{err}");
            }
            return prompt();
        }
    };

    match find_in(&data, fingerprint) {
        Some(password) => {
            info!(path = %file, "found password");
            password
        }
        None => {
            info!(prefix = fingerprint, path = %file, "no password found");
            prompt()
        }
    }
}

fn find_in(data: &str, fingerprint: &str) -> Option<String> {
    data.lines().find_map(|line| {
        line.strip_prefix(fingerprint)
            .map(|rest| rest.trim().to_string())
    })
}

fn prompt() -> String {
    match read_masked("Password: ") {
        Ok(password) => password,
        // interrupt or EOF: the editor has restored the terminal
        Err(_) => {
            eprintln!();
            std::process::exit(1);
        }
    }
}

fn read_masked(prompt: &str) -> rustyline::Result<String> {
    let mut editor: Editor<MaskingHelper, DefaultHistory> = Editor::new()?;
    editor.set_helper(Some(MaskingHelper));
    editor.readline(prompt)
}

/// Paints every typed character as an asterisk.
struct MaskingHelper;

impl Highlighter for MaskingHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        Cow::Owned("*".repeat(line.chars().count()))
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _kind: CmdKind) -> bool {
        true
    }
}

impl Completer for MaskingHelper {
    type Candidate = String;
}

impl Hinter for MaskingHelper {
    type Hint = String;
}

impl Validator for MaskingHelper {}

impl Helper for MaskingHelper {}
