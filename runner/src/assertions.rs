//! Predicates over the captured output of the CLI under test.
//!
//! The message literals below are golden output: the CLI must print them
//! byte for byte.

use regex::Regex;
use serde::Serialize;

use crate::error::{AssertionFailure, Result};
use crate::process::CapturedOutput;

/// Coarse marker `make` prints when a recipe fails.
pub const MAKE_FAILURE_MARKER: &str = "Error 1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedMessage {
    HelpBanner,
    MissingApiKey,
    ProjectRootRequired,
    MissingPath,
    MissingAppVersion,
    NoSuchFile,
}

const HELP_BANNER_PLACEHOLDER: &str = "{binary}";

const MESSAGES: &[(ExpectedMessage, &str, &str)] = &[
    (ExpectedMessage::HelpBanner, "help banner", "Usage: {binary} <command>"),
    (
        ExpectedMessage::MissingApiKey,
        "API Key error",
        "[ERROR] missing api key, please specify using `--api-key`",
    ),
    (
        ExpectedMessage::ProjectRootRequired,
        "Project Root error",
        "[ERROR] --project-root is required when uploading dSYMs from a directory that is not an Xcode project or workspace",
    ),
    (ExpectedMessage::MissingPath, "missing path error", "error: expected \"<path>\""),
    (
        ExpectedMessage::MissingAppVersion,
        "missing app version error",
        "[ERROR] missing app version, please specify using `--app-version`",
    ),
    (
        ExpectedMessage::NoSuchFile,
        "no such file or directory error",
        "error: <path>: stat /path/to/no/file: no such file or directory",
    ),
];

impl ExpectedMessage {
    pub const ALL: [ExpectedMessage; 6] = [
        ExpectedMessage::HelpBanner,
        ExpectedMessage::MissingApiKey,
        ExpectedMessage::ProjectRootRequired,
        ExpectedMessage::MissingPath,
        ExpectedMessage::MissingAppVersion,
        ExpectedMessage::NoSuchFile,
    ];

    fn row(self) -> &'static (ExpectedMessage, &'static str, &'static str) {
        MESSAGES
            .iter()
            .find(|(message, _, _)| *message == self)
            .unwrap_or(&MESSAGES[0])
    }

    pub fn label(self) -> &'static str {
        self.row().1
    }

    /// The literal as printed by the CLI; `binary_file_name` fills the help banner.
    pub fn render(self, binary_file_name: &str) -> String {
        self.row().2.replace(HELP_BANNER_PLACEHOLDER, binary_file_name)
    }

    pub fn parse(name: &str) -> Option<Self> {
        let wanted = name.replace(['-', ' '], "_").to_ascii_lowercase();
        Self::ALL.into_iter().find(|message| {
            serde_json::to_value(message)
                .ok()
                .and_then(|v| v.as_str().map(|s| s == wanted))
                .unwrap_or(false)
        })
    }
}

/// `Using <value> as <field> from`
pub fn confirmation_line(value: &str, field: &str) -> String {
    format!("Using {value} as {field} from")
}

pub fn contains(text: &str, literal: &str) -> bool {
    text.contains(literal)
}

/// Unanchored: the pattern may match anywhere in `text`.
pub fn matches(text: &str, pattern: &str) -> Result<bool> {
    Ok(Regex::new(pattern)?.is_match(text))
}

pub fn expect_contains(output: &CapturedOutput, literal: &str) -> std::result::Result<(), AssertionFailure> {
    if contains(&output.text, literal) {
        Ok(())
    } else {
        Err(AssertionFailure::new(
            "output contains",
            format!("{literal:?}"),
            &output.text,
        ))
    }
}

pub fn expect_not_contains(output: &CapturedOutput, literal: &str) -> std::result::Result<(), AssertionFailure> {
    if contains(&output.text, literal) {
        Err(AssertionFailure::new(
            "output does not contain",
            format!("no {literal:?}"),
            &output.text,
        ))
    } else {
        Ok(())
    }
}

pub fn expect_matches(output: &CapturedOutput, pattern: &str) -> Result<()> {
    if matches(&output.text, pattern)? {
        Ok(())
    } else {
        Err(AssertionFailure::new("output matches", format!("/{pattern}/"), &output.text).into())
    }
}

/// Exit status must be zero and `make`'s failure marker must be absent.
pub fn expect_build_succeeded(output: &CapturedOutput) -> std::result::Result<(), AssertionFailure> {
    if !output.success() {
        return Err(AssertionFailure::new(
            "build succeeded",
            "exit status 0",
            format!("exit status {:?}\n{}", output.exit_code, output.text),
        ));
    }
    expect_not_contains(output, MAKE_FAILURE_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn captured(text: &str) -> CapturedOutput {
        CapturedOutput {
            command: "bin/x86_64-linux-bugsnag-cli".to_string(),
            text: text.to_string(),
            exit_code: Some(0),
        }
    }

    #[test]
    fn renders_help_banner_for_binary() {
        assert_eq!(
            ExpectedMessage::HelpBanner.render("x86_64-linux-bugsnag-cli"),
            "Usage: x86_64-linux-bugsnag-cli <command>"
        );
    }

    #[test]
    fn error_literals_are_verbatim() {
        assert_eq!(
            ExpectedMessage::MissingApiKey.render("ignored"),
            "[ERROR] missing api key, please specify using `--api-key`"
        );
        assert_eq!(
            ExpectedMessage::MissingPath.render("ignored"),
            "error: expected \"<path>\""
        );
        assert_eq!(
            ExpectedMessage::NoSuchFile.render("ignored"),
            "error: <path>: stat /path/to/no/file: no such file or directory"
        );
    }

    #[test]
    fn every_message_has_a_row() {
        for message in ExpectedMessage::ALL {
            assert_eq!(message.row().0, message);
        }
    }

    #[test]
    fn parses_message_names() {
        assert_eq!(ExpectedMessage::parse("missing-api-key"), Some(ExpectedMessage::MissingApiKey));
        assert_eq!(ExpectedMessage::parse("help_banner"), Some(ExpectedMessage::HelpBanner));
        assert_eq!(ExpectedMessage::parse("no such file"), Some(ExpectedMessage::NoSuchFile));
        assert_eq!(ExpectedMessage::parse("bogus"), None);
    }

    #[test]
    fn contains_is_idempotent() {
        let text = "[ERROR] missing api key, please specify using `--api-key`\n";
        let literal = ExpectedMessage::MissingApiKey.render("");
        let first = contains(text, &literal);
        let second = contains(text, &literal);
        assert!(first);
        assert_eq!(first, second);
    }

    #[test]
    fn confirmation_line_format() {
        assert_eq!(
            confirmation_line("1.0.0", "version name"),
            "Using 1.0.0 as version name from"
        );
    }

    #[test]
    fn matches_anywhere_in_text() {
        assert!(matches("a\nerror: expected \"<path>\"\n", r#"error: expected "<\w+>""#).unwrap());
        assert!(!matches("nothing", r"^error").unwrap());
        assert!(matches("x", "(").is_err());
    }

    #[test]
    fn failure_reports_expected_and_actual() {
        let failure = expect_contains(&captured("hello"), "Usage").unwrap_err();
        assert_eq!(failure.expected, "\"Usage\"");
        assert_eq!(failure.actual, "hello");
    }

    #[test]
    fn build_success_needs_zero_exit_and_no_marker() {
        assert!(expect_build_succeeded(&captured("go build ./...\n")).is_ok());
        assert!(expect_build_succeeded(&captured("make: *** [build] Error 1\n")).is_err());
        let mut failed = captured("compile error\n");
        failed.exit_code = Some(2);
        assert!(expect_build_succeeded(&failed).is_err());
    }
}
