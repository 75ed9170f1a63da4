//! Reply composition. A reply is a list of mrkdwn sections; adapters render
//! them as blocks separated by dividers.

use time::UtcOffset;

use crate::{ParsedCommand, dates, truncate};

const MAX_COMMAND_CHARS: usize = 2000;
const KEPT_COMMAND_CHARS: usize = 1950;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    Help,
}

impl Outcome {
    const fn summary(self) -> &'static str {
        match self {
            Self::Success => ":confetti_ball: I successfully executed the requested command.",
            Self::Failure => ":rotating_light: I failed to execute the requested command.",
            Self::Help => ":thinking_face: Please check the following command help.",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    pub sections: Vec<String>,
}

impl Reply {
    /// Starts a reply with the summary line, addressed to `mention` when set.
    #[must_use]
    pub fn new(mention: &str, outcome: Outcome) -> Self {
        let summary = if mention.is_empty() {
            outcome.summary().to_owned()
        } else {
            format!("<@{mention}> \n{}", outcome.summary())
        };
        Self {
            sections: vec![summary],
        }
    }

    /// Echoes the command text and when it was sent.
    #[must_use]
    pub fn with_command(self, text: &str, event_ts: &str, offset: UtcOffset) -> Self {
        let mut text = text.to_owned();
        if text.chars().count() > MAX_COMMAND_CHARS {
            text = format!("{}...(omitted)", truncate(&text, KEPT_COMMAND_CHARS));
        }
        let sent_at = dates::parse_event_ts(event_ts)
            .map(|at| dates::display_date(at, offset))
            .unwrap_or_default();
        self.with_section(format!("*Command:*\n```{text}```\n:clock8: {sent_at}"))
    }

    #[must_use]
    pub fn with_results(self, body: &str) -> Self {
        self.with_section(format!("*Results:*\n{body}"))
    }

    #[must_use]
    pub fn with_section(mut self, text: impl Into<String>) -> Self {
        self.sections.push(text.into());
        self
    }

    /// Plain text used where blocks are not rendered (notifications).
    #[must_use]
    pub fn fallback_text(&self) -> String {
        self.sections.join("\n\n")
    }
}

/// The single user-facing notice for a failed command.
#[must_use]
pub fn failure(cmd: &ParsedCommand, message: &str, offset: UtcOffset) -> Reply {
    Reply::new(&cmd.from, Outcome::Failure)
        .with_command(&cmd.text, &cmd.event_ts, offset)
        .with_results(&format!(
            ":name_badge: {message}\n> :warning: _Be sure to check the help if you want to rerun the command._"
        ))
}
