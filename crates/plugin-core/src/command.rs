use std::collections::BTreeMap;

/// A mention command split into its parts.
///
/// `options` maps a flag (including its `--` marker) to the values that
/// followed each occurrence of it. Flags that never received a value are
/// absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedCommand {
    pub channel: String,
    pub event_ts: String,
    pub text: String,
    pub to: String,
    pub from: String,
    pub command: String,
    pub argument: String,
    /// Download reference -> display name.
    pub files: BTreeMap<String, String>,
    pub options: BTreeMap<String, Vec<String>>,
}

impl ParsedCommand {
    #[must_use]
    pub fn option_values(&self, flag: &str) -> &[String] {
        self.options.get(flag).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn first_option(&self, flag: &str) -> Option<&str> {
        self.option_values(flag).first().map(String::as_str)
    }

    /// The argument as an integer, if it is one.
    #[must_use]
    pub fn numeric_argument(&self) -> Option<i64> {
        self.argument.trim().parse().ok()
    }

    pub fn push_option(&mut self, flag: &str, value: &str) {
        self.options
            .entry(flag.to_owned())
            .or_default()
            .push(value.to_owned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_option_accumulates_per_flag() {
        let mut cmd = ParsedCommand::default();
        cmd.push_option("--ex", "A");
        cmd.push_option("--ex", "B");
        cmd.push_option("--ttl", "7");

        assert_eq!(cmd.option_values("--ex"), ["A", "B"]);
        assert_eq!(cmd.first_option("--ttl"), Some("7"));
        assert!(cmd.option_values("--missing").is_empty());
    }

    #[test]
    fn numeric_argument_trims_and_rejects_words() {
        let mut cmd = ParsedCommand {
            argument: " 3 ".to_owned(),
            ..ParsedCommand::default()
        };
        assert_eq!(cmd.numeric_argument(), Some(3));

        "three".clone_into(&mut cmd.argument);
        assert_eq!(cmd.numeric_argument(), None);
    }
}
