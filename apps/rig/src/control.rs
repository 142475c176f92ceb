use std::str::FromStr;

use anyhow::{anyhow, bail, Error};
use chrono::{DateTime, TimeZone};

pub const HELP: &str = "commands: start [name] | stop | state | status | reconnect | \
trigger on|off | laser on|off | stream start|stop | help | quit";

/// One line typed at the capture console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Start { name: Option<String> },
    Stop,
    State,
    Status,
    Reconnect,
    Trigger { enable: bool },
    Laser { on: bool },
    Stream { start: bool },
    Help,
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (verb, rest) = line
            .split_once(char::is_whitespace)
            .map(|(verb, rest)| (verb, rest.trim()))
            .unwrap_or((line, ""));

        let command = match verb.to_ascii_lowercase().as_str() {
            "start" => ConsoleCommand::Start {
                name: Some(rest.to_string()).filter(|name| !name.is_empty()),
            },
            "stop" => ConsoleCommand::Stop,
            "state" => ConsoleCommand::State,
            "status" => ConsoleCommand::Status,
            "reconnect" => ConsoleCommand::Reconnect,
            "trigger" => ConsoleCommand::Trigger {
                enable: parse_switch(rest, "on", "off")?,
            },
            "laser" => ConsoleCommand::Laser {
                on: parse_switch(rest, "on", "off")?,
            },
            "stream" => ConsoleCommand::Stream {
                start: parse_switch(rest, "start", "stop")?,
            },
            "help" | "?" => ConsoleCommand::Help,
            "quit" | "exit" => ConsoleCommand::Quit,
            "" => bail!("empty command; {HELP}"),
            other => bail!("unknown command '{other}'; {HELP}"),
        };

        let takes_argument = matches!(
            command,
            ConsoleCommand::Start { .. }
                | ConsoleCommand::Trigger { .. }
                | ConsoleCommand::Laser { .. }
                | ConsoleCommand::Stream { .. }
        );
        if !takes_argument && !rest.is_empty() {
            bail!("'{verb}' takes no arguments");
        }
        Ok(command)
    }
}

fn parse_switch(arg: &str, yes: &str, no: &str) -> Result<bool, Error> {
    if arg.eq_ignore_ascii_case(yes) {
        Ok(true)
    } else if arg.eq_ignore_ascii_case(no) {
        Ok(false)
    } else {
        Err(anyhow!("expected '{yes}' or '{no}', got '{arg}'"))
    }
}

/// `session_YYYY-MM-DD_HH-MM` in the given clock's zone.
pub fn default_session_name<Tz>(now: DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    now.format("session_%Y-%m-%d_%H-%M").to_string()
}

#[cfg(test)]
#[path = "tests/control_tests.rs"]
mod tests;
