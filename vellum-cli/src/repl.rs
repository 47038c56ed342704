//! Interactive/scripted session loop. A line is either a dot-command
//! (`.exit`, `.quit`) or `<cmd> [json-args]`, e.g.
//! `insert {"collection":"users","doc":{"name":"Ann"}}`. `cmd` becomes
//! the wire request's `"cmd"` field; the JSON object, if present, is
//! merged in as the rest of the request.

use crate::client::Client;
use crate::rusty::CliHelper;
use anyhow::{anyhow, Result};
use colored::Colorize;
use rustyline::config::Builder;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{CompletionType, Editor};
use serde_json::{json, Value};
use std::io::BufRead;

const PROMPT: &str = "vellum> ";

pub struct Session {
    client: Client,
}

impl Session {
    pub fn new(client: Client) -> Self {
        Session { client }
    }

    pub fn handle_repl(&mut self) {
        println!("Connected to vellumd. Type a command (e.g. `ping`) or `.exit` to quit.");

        let config = Builder::new().completion_type(CompletionType::Circular).build();
        let mut rl = Editor::<CliHelper, DefaultHistory>::with_config(config).unwrap();
        rl.set_helper(Some(CliHelper::new()));
        let _ = rl.load_history(&history_path());

        loop {
            match rl.readline(PROMPT) {
                Ok(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let _ = rl.add_history_entry(line);
                    if matches!(line, ".exit" | ".quit" | "exit" | "quit") {
                        break;
                    }
                    match self.handle_line(line) {
                        Ok(response) => print_response(&response),
                        Err(e) => eprintln!("{}: {e}", "error".red().bold()),
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("^C");
                    continue;
                }
                Err(ReadlineError::Eof) => break,
                Err(e) => {
                    eprintln!("readline error: {e}");
                    break;
                }
            }
        }

        println!("Bye~");
        let _ = rl.save_history(&history_path());
    }

    pub fn handle_reader<R: BufRead>(&mut self, r: R) -> Result<()> {
        for line in r.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let response = self.handle_line(line)?;
            print_response(&response);
            if response.get("ok").and_then(Value::as_bool) == Some(false) {
                return Err(anyhow!("command failed: {line}"));
            }
        }
        Ok(())
    }

    fn handle_line(&mut self, line: &str) -> Result<Value> {
        let req = parse_line(line)?;
        self.client.call(&req)
    }
}

fn parse_line(line: &str) -> Result<Value> {
    let (cmd, rest) = match line.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd, rest.trim()),
        None => (line, ""),
    };

    let mut req = if rest.is_empty() {
        json!({})
    } else {
        serde_json::from_str(rest).map_err(|e| anyhow!("invalid JSON arguments: {e}"))?
    };
    let obj = req
        .as_object_mut()
        .ok_or_else(|| anyhow!("command arguments must be a JSON object"))?;
    obj.insert("cmd".to_string(), Value::String(cmd.to_string()));
    Ok(req)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_command_becomes_a_cmd_only_request() {
        assert_eq!(parse_line("ping").unwrap(), json!({"cmd": "ping"}));
    }

    #[test]
    fn command_with_args_merges_cmd_into_the_object() {
        let req = parse_line(r#"insert {"collection":"users","doc":{"name":"Ann"}}"#).unwrap();
        assert_eq!(
            req,
            json!({"cmd": "insert", "collection": "users", "doc": {"name": "Ann"}})
        );
    }

    #[test]
    fn non_object_arguments_are_rejected() {
        assert!(parse_line(r#"ping "not an object""#).is_err());
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(parse_line("insert {not json}").is_err());
    }
}

fn print_response(response: &Value) {
    match response.get("ok").and_then(Value::as_bool) {
        Some(true) => {
            let data = response.get("data").cloned().unwrap_or(Value::Null);
            println!("{}", serde_json::to_string_pretty(&data).unwrap_or_default());
        }
        Some(false) => {
            let message = response.get("error").and_then(Value::as_str).unwrap_or("unknown error");
            eprintln!("{} {message}", "error:".red().bold());
        }
        None => println!("{}", serde_json::to_string_pretty(response).unwrap_or_default()),
    }
}

fn history_path() -> String {
    format!("{}/.vellum_cli_history", std::env::var("HOME").unwrap_or_else(|_| ".".to_string()))
}
