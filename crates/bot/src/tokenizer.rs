//! Splits mention text into a [`ParsedCommand`].
//!
//! Grammar: `<mention> <command> [<argument>] [--<flag> <value>]...`.
//! Tokens are separated by single spaces and trimmed; empty tokens do not
//! take a position. `translate` swallows the rest of the text as its
//! argument and `short` takes its argument from the first link in the
//! rich-text blocks.

use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use plugin_core::ParsedCommand;

use crate::event::InboundEvent;

pub const TRANSLATE: &str = "translate";
pub const SHORT: &str = "short";
const FLAG_PREFIX: &str = "--";

static MENTION_REGEX: OnceLock<Regex> = OnceLock::new();

fn mention_re() -> &'static Regex {
    MENTION_REGEX
        .get_or_init(|| Regex::new(r"^<@([A-Za-z0-9]{11})>$").expect("valid mention regex"))
}

/// `<@U0LAN0Z8900>` becomes `U0LAN0Z8900`; anything else is returned as is.
fn unwrap_mention(token: &str) -> &str {
    mention_re()
        .captures(token)
        .and_then(|caps| caps.get(1))
        .map_or(token, |m| m.as_str())
}

/// What the next token will be read as.
#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    To,
    Command,
    Argument,
    /// Between options with no flag waiting for a value.
    FlagKey,
    /// A flag was seen; the next plain token is its value.
    FlagValue(String),
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenClass {
    Flag,
    Word,
}

fn classify(token: &str) -> TokenClass {
    if token.len() > FLAG_PREFIX.len() && token.starts_with(FLAG_PREFIX) {
        TokenClass::Flag
    } else {
        TokenClass::Word
    }
}

struct Tokenizer<'e> {
    event: &'e InboundEvent,
    /// Non-empty trimmed tokens as written.
    tokens: Vec<&'e str>,
    cmd: ParsedCommand,
    state: State,
}

impl<'e> Tokenizer<'e> {
    fn new(event: &'e InboundEvent) -> Self {
        let msg = &event.event;
        let cmd = ParsedCommand {
            channel: msg.channel.clone(),
            event_ts: msg.event_ts.clone(),
            text: msg.text.clone(),
            from: msg.user.clone(),
            files: msg
                .files
                .iter()
                .map(|f| (f.url_private_download.clone(), f.name.clone()))
                .collect(),
            ..ParsedCommand::default()
        };
        let tokens = msg
            .text
            .split(' ')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect();

        Self {
            event,
            tokens,
            cmd,
            state: State::To,
        }
    }

    fn run(mut self) -> ParsedCommand {
        for position in 0..self.tokens.len() {
            if self.state == State::Done {
                break;
            }
            let state = core::mem::replace(&mut self.state, State::Done);
            self.state = self.step(state, position);
        }
        self.cmd
    }

    fn step(&mut self, state: State, position: usize) -> State {
        let token = unwrap_mention(self.tokens[position]);

        match state {
            State::To => {
                token.clone_into(&mut self.cmd.to);
                State::Command
            }
            State::Command => {
                token.clone_into(&mut self.cmd.command);
                State::Argument
            }
            State::Argument if self.cmd.command == TRANSLATE => {
                self.cmd.argument = self.tokens[position..].join(" ");
                State::Done
            }
            State::Argument if self.cmd.command == SHORT => {
                self.cmd.argument = self.event.first_link().unwrap_or_default().to_owned();
                State::FlagKey
            }
            State::Argument => {
                token.clone_into(&mut self.cmd.argument);
                State::FlagKey
            }
            State::FlagKey | State::FlagValue(_) if classify(token) == TokenClass::Flag => {
                if let State::FlagValue(lost) = &state {
                    debug!(flag = %lost, "Flag replaced before receiving a value");
                }
                State::FlagValue(token.to_owned())
            }
            State::FlagKey => State::FlagKey,
            State::FlagValue(flag) => {
                self.cmd.push_option(&flag, token);
                State::FlagKey
            }
            State::Done => State::Done,
        }
    }
}

/// Parses a validated mention event. Never fails; missing parts stay empty.
#[must_use]
pub fn parse(event: &InboundEvent) -> ParsedCommand {
    let cmd = Tokenizer::new(event).run();
    debug!(
        to = %cmd.to,
        command = %cmd.command,
        argument = %cmd.argument,
        options = ?cmd.options,
        files = cmd.files.len(),
        "Parsed command"
    );
    cmd
}
