//! Conformance checks for requests the CLI sent to the mock ingestion server.
//!
//! The server owns request storage. This module only reads the latest request
//! per channel and checks it against the contract of a Build API.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::error::{AssertionFailure, HarnessError, Result};

pub const MULTIPART_CONTENT_TYPE_PATTERN: &str = r"^multipart/form-data; boundary=([^;]+)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Sourcemaps,
    Builds,
}

impl Channel {
    pub fn name(self) -> &'static str {
        match self {
            Channel::Sourcemaps => "sourcemaps",
            Channel::Builds => "builds",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sourcemaps" | "sourcemap" => Some(Channel::Sourcemaps),
            "builds" | "build" => Some(Channel::Builds),
            _ => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Payload fields the harness knows how to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PayloadField {
    ApiKey,
    AppId,
    AppVersion,
    BuildId,
    AppVersionCode,
    AppBundleVersion,
    BuilderName,
    ReleaseStage,
}

impl PayloadField {
    pub const ALL: [PayloadField; 8] = [
        PayloadField::ApiKey,
        PayloadField::AppId,
        PayloadField::AppVersion,
        PayloadField::BuildId,
        PayloadField::AppVersionCode,
        PayloadField::AppBundleVersion,
        PayloadField::BuilderName,
        PayloadField::ReleaseStage,
    ];

    pub fn wire_name(self) -> &'static str {
        match self {
            PayloadField::ApiKey => "apiKey",
            PayloadField::AppId => "appId",
            PayloadField::AppVersion => "appVersion",
            PayloadField::BuildId => "buildId",
            PayloadField::AppVersionCode => "appVersionCode",
            PayloadField::AppBundleVersion => "appBundleVersion",
            PayloadField::BuilderName => "builderName",
            PayloadField::ReleaseStage => "releaseStage",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.wire_name() == name)
    }
}

impl fmt::Display for PayloadField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Snapshot of the last request the mock server received on a channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordedRequest {
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, alias = "body")]
    pub payload: Value,
}

impl RecordedRequest {
    pub fn new(payload: Value) -> Self {
        RecordedRequest {
            headers: BTreeMap::new(),
            payload,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn field(&self, field: PayloadField) -> Option<&Value> {
        self.payload.get(field.wire_name())
    }
}

/// Read access to the mock server's per-channel "current request" slot.
pub trait RequestSource {
    fn last_request(&self, channel: Channel) -> Result<Option<RecordedRequest>>;
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryRequests {
    current: BTreeMap<Channel, RecordedRequest>,
}

impl InMemoryRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the channel's current request.
    pub fn record(&mut self, channel: Channel, request: RecordedRequest) {
        self.current.insert(channel, request);
    }

    pub fn reset(&mut self) {
        self.current.clear();
    }
}

impl RequestSource for InMemoryRequests {
    fn last_request(&self, channel: Channel) -> Result<Option<RecordedRequest>> {
        Ok(self.current.get(&channel).cloned())
    }
}

/// Reads `<dir>/<channel>.jsonl` written by the mock server, one request per
/// line; the last non-empty line is the current request.
#[derive(Debug, Clone)]
pub struct RequestLogDir {
    dir: PathBuf,
}

impl RequestLogDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        RequestLogDir { dir: dir.into() }
    }

    pub fn path_for(&self, channel: Channel) -> PathBuf {
        self.dir.join(format!("{}.jsonl", channel.name()))
    }
}

impl RequestSource for RequestLogDir {
    fn last_request(&self, channel: Channel) -> Result<Option<RecordedRequest>> {
        let path = self.path_for(channel);
        if !path.exists() {
            return Ok(None);
        }
        let io_err = |source| HarnessError::Io {
            path: path.clone(),
            source,
        };
        let file = std::fs::File::open(&path).map_err(io_err)?;
        let mut last = None;
        for line in BufReader::new(file).lines() {
            let line = line.map_err(io_err)?;
            if !line.trim().is_empty() {
                last = Some(line);
            }
        }
        match last {
            Some(line) => {
                let mut request: RecordedRequest =
                    serde_json::from_str(&line).map_err(|source| HarnessError::Json {
                        path: path.clone(),
                        source,
                    })?;
                request.headers = request
                    .headers
                    .into_iter()
                    .map(|(k, v)| (k.to_ascii_lowercase(), v))
                    .collect();
                Ok(Some(request))
            }
            None => Ok(None),
        }
    }
}

fn fetch(source: &dyn RequestSource, channel: Channel) -> Result<RecordedRequest> {
    let request = source
        .last_request(channel)?
        .ok_or(HarnessError::NoRecordedRequest { channel })?;
    debug!(%channel, payload = %request.payload, "fetched recorded request");
    Ok(request)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Expectation {
    Equals(String),
    IsNotNull,
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expectation::Equals(value) => write!(f, "equals {value:?}"),
            Expectation::IsNotNull => f.write_str("is not null"),
        }
    }
}

fn field_check_name(channel: Channel, field: PayloadField, expectation: &Expectation) -> String {
    format!("{channel} payload field {:?} {expectation}", field.wire_name())
}

/// Checks one field of an already-fetched request. `Equals` only matches
/// JSON strings: a number or boolean never equals its textual form.
pub fn evaluate(
    request: &RecordedRequest,
    channel: Channel,
    field: PayloadField,
    expectation: &Expectation,
) -> std::result::Result<(), AssertionFailure> {
    let check = field_check_name(channel, field, expectation);
    let actual = request.field(field);
    let passed = match (expectation, actual) {
        (_, None) | (_, Some(Value::Null)) => false,
        (Expectation::IsNotNull, Some(_)) => true,
        (Expectation::Equals(expected), Some(Value::String(value))) => value == expected,
        (Expectation::Equals(_), Some(_)) => false,
    };
    if passed {
        info!(check = %check, "passed");
        return Ok(());
    }
    let actual = match actual {
        None => "<absent>".to_string(),
        Some(value) => value.to_string(),
    };
    warn!(check = %check, actual = %actual, "failed");
    Err(AssertionFailure::new(check, expectation.to_string(), actual))
}

pub fn check_field(
    source: &dyn RequestSource,
    channel: Channel,
    field: PayloadField,
    expectation: &Expectation,
) -> Result<()> {
    let request = fetch(source, channel)?;
    evaluate(&request, channel, field, expectation)?;
    Ok(())
}

/// Right-hand side of a contract check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Rule {
    EqualsExpectedApiKey,
    IsNotNull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldCheck {
    pub field: PayloadField,
    pub rule: Rule,
}

impl FieldCheck {
    fn expectation(&self, expected_api_key: &str) -> Expectation {
        match self.rule {
            Rule::EqualsExpectedApiKey => Expectation::Equals(expected_api_key.to_string()),
            Rule::IsNotNull => Expectation::IsNotNull,
        }
    }
}

const API_KEY_MATCHES: FieldCheck = FieldCheck {
    field: PayloadField::ApiKey,
    rule: Rule::EqualsExpectedApiKey,
};

const fn not_null(field: PayloadField) -> FieldCheck {
    FieldCheck {
        field,
        rule: Rule::IsNotNull,
    }
}

/// Conjunction of field checks against one channel's current request.
#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct Contract {
    pub channel: Channel,
    pub checks: &'static [FieldCheck],
}

static ANDROID: Contract = Contract {
    channel: Channel::Sourcemaps,
    checks: &[API_KEY_MATCHES, not_null(PayloadField::AppId)],
};

static DART: Contract = Contract {
    channel: Channel::Sourcemaps,
    checks: &[API_KEY_MATCHES, not_null(PayloadField::BuildId)],
};

static REACT_NATIVE: Contract = Contract {
    channel: Channel::Sourcemaps,
    checks: &[API_KEY_MATCHES, not_null(PayloadField::AppVersion)],
};

static DSYM: Contract = Contract {
    channel: Channel::Sourcemaps,
    checks: &[API_KEY_MATCHES, not_null(PayloadField::AppVersion)],
};

static BUILDS: Contract = Contract {
    channel: Channel::Builds,
    checks: &[API_KEY_MATCHES, not_null(PayloadField::AppVersion)],
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BuildApi {
    Android,
    Proguard,
    Ndk,
    Dart,
    ReactNative,
    Dsym,
    Builds,
}

/// Name, contract. Proguard and NDK point at the Android contract itself.
static BUILD_APIS: &[(BuildApi, &str, &Contract)] = &[
    (BuildApi::Android, "Android", &ANDROID),
    (BuildApi::Proguard, "Proguard", &ANDROID),
    (BuildApi::Ndk, "NDK", &ANDROID),
    (BuildApi::Dart, "Dart", &DART),
    (BuildApi::ReactNative, "React Native", &REACT_NATIVE),
    (BuildApi::Dsym, "dSYM", &DSYM),
    (BuildApi::Builds, "Builds", &BUILDS),
];

impl BuildApi {
    pub const ALL: [BuildApi; 7] = [
        BuildApi::Android,
        BuildApi::Proguard,
        BuildApi::Ndk,
        BuildApi::Dart,
        BuildApi::ReactNative,
        BuildApi::Dsym,
        BuildApi::Builds,
    ];

    fn row(self) -> &'static (BuildApi, &'static str, &'static Contract) {
        BUILD_APIS
            .iter()
            .find(|(api, _, _)| *api == self)
            .unwrap_or(&BUILD_APIS[0])
    }

    pub fn name(self) -> &'static str {
        self.row().1
    }

    pub fn contract(self) -> &'static Contract {
        self.row().2
    }

    /// Accepts the display name case-insensitively, ignoring spaces, dashes and underscores.
    pub fn parse(name: &str) -> Option<Self> {
        let squash = |s: &str| {
            s.chars()
                .filter(|c| !matches!(c, ' ' | '-' | '_'))
                .collect::<String>()
                .to_ascii_lowercase()
        };
        let wanted = squash(name);
        BUILD_APIS
            .iter()
            .find(|(_, display, _)| squash(display) == wanted)
            .map(|(api, _, _)| *api)
    }
}

impl fmt::Display for BuildApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == BuildApi::Builds {
            f.write_str("Builds API")
        } else {
            write!(f, "{} Build API", self.name())
        }
    }
}

/// "is valid for the <X> Build API": every check must pass, in order; the
/// first failing check is reported.
pub fn validate(source: &dyn RequestSource, api: BuildApi, expected_api_key: &str) -> Result<()> {
    let contract = api.contract();
    let request = fetch(source, contract.channel)?;
    for check in contract.checks {
        let expectation = check.expectation(expected_api_key);
        evaluate(&request, contract.channel, check.field, &expectation)?;
    }
    info!(build_api = %api, "request conforms");
    Ok(())
}

/// Header check on the sourcemaps channel's current request.
pub fn check_multipart_content_type(source: &dyn RequestSource) -> Result<()> {
    let request = fetch(source, Channel::Sourcemaps)?;
    let actual = request.content_type().unwrap_or_default();
    let pattern = Regex::new(MULTIPART_CONTENT_TYPE_PATTERN)?;
    if pattern.is_match(actual) {
        Ok(())
    } else {
        Err(AssertionFailure::new(
            "sourcemaps Content-Type header is multipart form-data",
            format!("/{MULTIPART_CONTENT_TYPE_PATTERN}/"),
            actual,
        )
        .into())
    }
}
