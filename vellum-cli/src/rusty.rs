use rustyline::completion::{Completer, FilenameCompleter, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::{ValidationContext, ValidationResult, Validator};
use rustyline::{Context, Helper, Result};
use std::borrow::Cow;

const COMMANDS: &[&str] = &[
    "ping", "create_collection", "list_collections", "drop_collection", "create_index",
    "create_unique_index", "create_composite_index", "create_vector_index", "list_indexes",
    "drop_index", "insert", "insert_many", "find", "find_one", "count", "update", "update_one",
    "delete", "delete_one", "aggregate", "vector_search", "compact", "begin_tx", "commit_tx",
    "rollback_tx",
];

pub struct CliHelper {
    completer: FilenameCompleter,
}

impl CliHelper {
    pub fn new() -> Self {
        Self { completer: FilenameCompleter::new() }
    }
}

impl Highlighter for CliHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        Cow::Borrowed(line)
    }

    fn highlight_hint<'h>(&self, hint: &'h str) -> Cow<'h, str> {
        Cow::Owned(format!("\x1b[2m{hint}\x1b[m"))
    }

    fn highlight_char(&self, line: &str, _pos: usize, _forced: bool) -> bool {
        !line.is_empty()
    }
}

impl Hinter for CliHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> Option<Self::Hint> {
        if pos != line.len() || line.contains(' ') {
            return None;
        }
        COMMANDS
            .iter()
            .find(|c| c.starts_with(line) && **c != line)
            .map(|c| c[line.len()..].to_string())
    }
}

impl Completer for CliHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        ctx: &Context<'_>,
    ) -> std::result::Result<(usize, Vec<Pair>), ReadlineError> {
        if !line[..pos].contains(' ') {
            let matches: Vec<Pair> = COMMANDS
                .iter()
                .filter(|c| c.starts_with(&line[..pos]))
                .map(|c| Pair { display: c.to_string(), replacement: c.to_string() })
                .collect();
            if !matches.is_empty() {
                return Ok((0, matches));
            }
        }
        self.completer.complete(line, pos, ctx)
    }
}

impl Validator for CliHelper {
    fn validate(&self, ctx: &mut ValidationContext<'_>) -> Result<ValidationResult> {
        let input = ctx.input().trim_end();
        if input.strip_suffix('\\').is_some() {
            Ok(ValidationResult::Incomplete)
        } else {
            Ok(ValidationResult::Valid(None))
        }
    }
}

impl Helper for CliHelper {}
