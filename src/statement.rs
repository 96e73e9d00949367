//! Assembly of raw input lines into complete SQL statements.
//!
//! A statement ends at a semicolon that is neither inside a quoted
//! literal nor preceded by an escape character. Lines can also turn out
//! to be shell commands (leading `\`), which the assembler hands back
//! to the caller untouched.

/// What the assembler concluded about the line it was fed.
#[derive(Debug, PartialEq, Eq)]
pub enum LineStep {
    /// The line is a shell command for the dispatcher; the statement
    /// buffer was not touched.
    Command,
    /// An unquoted semicolon completed the statement. Anything left on
    /// the line after it is returned trimmed, to be re-fed as the start
    /// of the next statement.
    Complete { residual: String },
    /// No terminator yet; feed another line.
    Incomplete,
}

/// Accumulates lines until they form a full statement.
///
/// One value tracks one statement: create it fresh after every
/// [`LineStep::Complete`].
#[derive(Debug, Default)]
pub struct StatementAssembler {
    buf: String,
    /// Open literal delimiter (`'` or `"`), if any.
    literal: Option<char>,
    /// Whether the previous character was an unconsumed escape.
    escape: bool,
}

impl StatementAssembler {
    pub fn new() -> Self {
        StatementAssembler::default()
    }

    /// Feeds one input line, newline included.
    pub fn push_line(&mut self, line: &str) -> LineStep {
        for (i, c) in line.char_indices() {
            if self.escape {
                self.escape = false;
                continue;
            }
            match c {
                '\\' => {
                    // A backslash opening a line outside any literal is
                    // a shell command embedded in the SQL flow.
                    if i == 0 && self.literal.is_none() {
                        return LineStep::Command;
                    }
                    self.escape = true;
                }
                ';' if self.literal.is_none() => {
                    self.buf.push_str(&line[..=i]);
                    return LineStep::Complete {
                        residual: line[i + 1..].trim().to_string(),
                    };
                }
                '\'' | '"' => match self.literal {
                    Some(open) if open == c => self.literal = None,
                    None => self.literal = Some(c),
                    // The opposite quote inside an open literal is data.
                    Some(_) => {}
                },
                _ => {}
            }
        }

        self.buf.push_str(line);
        LineStep::Incomplete
    }

    /// The statement accumulated so far.
    pub fn statement(&self) -> &str {
        &self.buf
    }

    /// Takes the accumulated statement, leaving the assembler empty.
    pub fn take(&mut self) -> String {
        self.literal = None;
        self.escape = false;
        std::mem::take(&mut self.buf)
    }
}
