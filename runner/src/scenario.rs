//! Scenario-scoped state threaded through acceptance steps.
//!
//! A `ScenarioContext` owns the one "last output" slot: every invocation
//! replaces it and every output assertion reads it. Request records stay with
//! the mock server and are fetched on demand through a [`RequestSource`].

use std::path::Path;
use tracing::{info, warn};

use crate::assertions::{self, ExpectedMessage};
use crate::config::HarnessConfig;
use crate::error::{AssertionFailure, HarnessError, Result};
use crate::payload::{self, BuildApi, Channel, Expectation, InMemoryRequests, PayloadField, RequestLogDir, RequestSource};
use crate::platform::{BinaryReference, PlatformIdentity};
use crate::process::{self, CapturedOutput};
use crate::version;

pub struct ScenarioContext {
    config: HarnessConfig,
    platform: PlatformIdentity,
    requests: Box<dyn RequestSource>,
    last_output: Option<CapturedOutput>,
}

impl ScenarioContext {
    pub fn new(config: HarnessConfig, platform: PlatformIdentity, requests: Box<dyn RequestSource>) -> Self {
        ScenarioContext {
            config,
            platform,
            requests,
            last_output: None,
        }
    }

    /// Host platform, and the request log directory when one is configured.
    pub fn from_config(config: HarnessConfig) -> Self {
        let requests: Box<dyn RequestSource> = match &config.requests_dir {
            Some(dir) => Box::new(RequestLogDir::new(config.work_dir.join(dir))),
            None => Box::new(InMemoryRequests::new()),
        };
        Self::new(config, PlatformIdentity::resolve(), requests)
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn platform(&self) -> &PlatformIdentity {
        &self.platform
    }

    pub fn binary(&self) -> Result<BinaryReference> {
        BinaryReference::locate(&self.platform, &self.config.bin_dir, &self.config.binary_base_name)
    }

    pub fn last_output(&self) -> Result<&CapturedOutput> {
        self.last_output.as_ref().ok_or(HarnessError::NoCapturedOutput)
    }

    fn capture(&mut self, output: CapturedOutput) -> &CapturedOutput {
        self.last_output.insert(output)
    }

    /// "I run the CLI"
    pub fn run_cli(&mut self) -> Result<&CapturedOutput> {
        self.run_cli_with("")
    }

    /// "I run the CLI with <flags>"
    pub fn run_cli_with(&mut self, flags: &str) -> Result<&CapturedOutput> {
        let binary = self.binary()?;
        let output = process::run(&binary, flags, &self.config.work_dir, self.config.command_timeout)?;
        info!(command = %output.command, exit_code = ?output.exit_code, "ran CLI");
        Ok(self.capture(output))
    }

    /// "I make the <target>"
    pub fn make(&mut self, target: &str) -> Result<&CapturedOutput> {
        let output = process::run_make(target, &self.config.work_dir, self.config.command_timeout)?;
        info!(make_target = target, exit_code = ?output.exit_code, "ran make");
        Ok(self.capture(output))
    }

    fn report(check: &str, outcome: std::result::Result<(), AssertionFailure>) -> Result<()> {
        match outcome {
            Ok(()) => {
                info!(check, "passed");
                Ok(())
            }
            Err(failure) => {
                warn!(check, expected = %failure.expected, "failed");
                Err(failure.into())
            }
        }
    }

    pub fn assert_contains(&self, literal: &str) -> Result<()> {
        Self::report("contains", assertions::expect_contains(self.last_output()?, literal))
    }

    pub fn assert_not_contains(&self, literal: &str) -> Result<()> {
        Self::report("not contains", assertions::expect_not_contains(self.last_output()?, literal))
    }

    pub fn assert_matches(&self, pattern: &str) -> Result<()> {
        assertions::expect_matches(self.last_output()?, pattern)
    }

    pub fn assert_message(&self, message: ExpectedMessage) -> Result<()> {
        let binary_file_name = match message {
            ExpectedMessage::HelpBanner => self.binary()?.file_name(),
            _ => String::new(),
        };
        let literal = message.render(&binary_file_name);
        Self::report(message.label(), assertions::expect_contains(self.last_output()?, &literal))
    }

    pub fn assert_help_banner(&self) -> Result<()> {
        self.assert_message(ExpectedMessage::HelpBanner)
    }

    /// "<value> should be used as <field>"
    pub fn assert_used_as(&self, value: &str, field: &str) -> Result<()> {
        self.assert_contains(&assertions::confirmation_line(value, field))
    }

    /// "I wait for the build to succeed"
    pub fn assert_build_succeeded(&self) -> Result<()> {
        Self::report("build succeeded", assertions::expect_build_succeeded(self.last_output()?))
    }

    pub fn check_field(&self, channel: Channel, field: PayloadField, expectation: &Expectation) -> Result<()> {
        payload::check_field(self.requests.as_ref(), channel, field, expectation)
    }

    /// "the sourcemap is valid for the <X> Build API" / "the build is valid for the Builds API"
    pub fn assert_valid_for(&self, api: BuildApi) -> Result<()> {
        let api_key = self.config.require_api_key()?;
        payload::validate(self.requests.as_ref(), api, api_key)
    }

    pub fn assert_multipart_content_type(&self) -> Result<()> {
        payload::check_multipart_content_type(self.requests.as_ref())
    }

    /// The CLI reports the version its source declares. A source without a
    /// version assignment fails here, not during extraction.
    pub fn assert_version_matches(&self, source: Option<&Path>) -> Result<String> {
        let path = self
            .config
            .work_dir
            .join(source.unwrap_or(self.config.version_source.as_path()));
        let declared = version::extract_version(&path)?.ok_or_else(|| {
            AssertionFailure::new(
                "version number matches source",
                format!("a package_version assignment in {}", path.display()),
                "<none>",
            )
        })?;
        self.assert_contains(&declared)?;
        Ok(declared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::RecordedRequest;
    use crate::platform::HostOs;
    use serde_json::json;

    fn context_with(requests: InMemoryRequests) -> ScenarioContext {
        let config = HarnessConfig {
            api_key: Some("K1".to_string()),
            ..HarnessConfig::default()
        };
        ScenarioContext::new(config, PlatformIdentity::new(HostOs::Linux, "x86_64"), Box::new(requests))
    }

    fn captured(text: &str) -> CapturedOutput {
        CapturedOutput {
            command: "bin/x86_64-linux-bugsnag-cli".to_string(),
            text: text.to_string(),
            exit_code: Some(0),
        }
    }

    #[test]
    fn asserting_before_running_is_a_harness_error() {
        let ctx = context_with(InMemoryRequests::new());
        let err = ctx.assert_contains("anything").unwrap_err();
        assert!(matches!(err, HarnessError::NoCapturedOutput));
    }

    #[test]
    fn later_capture_replaces_earlier_one() {
        let mut ctx = context_with(InMemoryRequests::new());
        ctx.capture(captured("Usage: x86_64-linux-bugsnag-cli <command>\n"));
        ctx.assert_help_banner().unwrap();

        ctx.capture(captured("[ERROR] missing api key, please specify using `--api-key`\n"));
        ctx.assert_message(ExpectedMessage::MissingApiKey).unwrap();
        assert!(ctx.assert_help_banner().unwrap_err().is_assertion());
    }

    #[test]
    fn contract_check_uses_configured_key() {
        let mut requests = InMemoryRequests::new();
        requests.record(Channel::Sourcemaps, RecordedRequest::new(json!({"apiKey": "K1", "appVersion": "1.2"})));
        let ctx = context_with(requests);
        ctx.assert_valid_for(BuildApi::ReactNative).unwrap();
        ctx.assert_valid_for(BuildApi::Dsym).unwrap();
        assert!(ctx.assert_valid_for(BuildApi::Android).unwrap_err().is_assertion());
    }

    #[test]
    fn contract_check_without_key_is_a_config_error() {
        let mut ctx = context_with(InMemoryRequests::new());
        ctx.config.api_key = None;
        assert!(matches!(ctx.assert_valid_for(BuildApi::Dart), Err(HarnessError::Config(_))));
    }

    #[test]
    fn confirmation_line_step() {
        let mut ctx = context_with(InMemoryRequests::new());
        ctx.capture(captured("[INFO] Using 1.0 as version name from AndroidManifest.xml\n"));
        ctx.assert_used_as("1.0", "version name").unwrap();
        assert!(ctx.assert_used_as("2.0", "version name").is_err());
    }

    #[test]
    fn version_must_appear_in_output() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.go"), "var package_version = \"4.2.0\"\n").unwrap();
        std::fs::write(dir.path().join("empty.go"), "package main\n").unwrap();
        let mut ctx = context_with(InMemoryRequests::new());
        ctx.config.work_dir = dir.path().to_path_buf();

        ctx.capture(captured("4.2.0\n"));
        assert_eq!(ctx.assert_version_matches(None).unwrap(), "4.2.0");

        ctx.capture(captured("4.1.9\n"));
        assert!(ctx.assert_version_matches(None).unwrap_err().is_assertion());

        let err = ctx.assert_version_matches(Some(Path::new("empty.go"))).unwrap_err();
        assert!(err.is_assertion());
    }
}
