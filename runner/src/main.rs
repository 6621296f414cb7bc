use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use cli_acceptance::assertions::ExpectedMessage;
use cli_acceptance::json_contract::{self, JsonResult, EXIT_USAGE};
use cli_acceptance::payload::{BuildApi, Channel, Expectation, PayloadField};
use cli_acceptance::{HarnessConfig, HarnessError, Result, ScenarioContext};

/// Acceptance checks for the upload CLI. Every subcommand prints one JSON
/// envelope on stdout; exit 0 = pass, 3 = check failed, 2 = harness error.
#[derive(Parser)]
#[command(name = "acceptance-runner")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct Overrides {
    /// Directory holding the platform binaries (HARNESS_BIN_DIR)
    #[arg(long, global = true, value_name = "DIR")]
    bin_dir: Option<PathBuf>,

    /// Directory commands run from (HARNESS_WORK_DIR)
    #[arg(long, global = true, value_name = "DIR")]
    work_dir: Option<PathBuf>,

    /// Expected API key for Build API contracts (HARNESS_API_KEY)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Mock server request dump directory (HARNESS_REQUESTS_DIR)
    #[arg(long, global = true, value_name = "DIR")]
    requests_dir: Option<PathBuf>,

    /// Kill commands still running after this many seconds
    #[arg(long, global = true, value_name = "SECS")]
    timeout_secs: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    /// Show the resolved platform and binary under test
    Resolve,
    /// Run the CLI and check its merged output
    Run(RunArgs),
    /// Run `make <target>`
    Make {
        target: String,
        /// Fail unless the build exits 0 without "Error 1"
        #[arg(long)]
        expect_success: bool,
    },
    /// Check the last request against a Build API contract
    Validate {
        /// Android, Proguard, NDK, Dart, React Native, dSYM or Builds
        #[arg(long)]
        build_api: String,
    },
    /// Check a single payload field of the last request on a channel
    Field {
        #[arg(long)]
        channel: String,
        #[arg(long)]
        field: String,
        #[arg(long, conflicts_with = "not_null", required_unless_present = "not_null")]
        equals: Option<String>,
        #[arg(long)]
        not_null: bool,
    },
    /// Check the sourcemaps Content-Type header is multipart form-data
    ContentType,
    /// Extract the declared version and optionally check the CLI reports it
    Version {
        /// Source file declaring package_version (HARNESS_VERSION_SOURCE)
        #[arg(long)]
        source: Option<PathBuf>,
        /// Flags to run the CLI with before comparing, e.g. "--version"
        #[arg(long, allow_hyphen_values = true)]
        against_cli: Option<String>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Literal the output must contain (repeatable)
    #[arg(long, value_name = "TEXT", allow_hyphen_values = true)]
    expect: Vec<String>,
    /// Literal the output must not contain (repeatable)
    #[arg(long, value_name = "TEXT", allow_hyphen_values = true)]
    reject: Vec<String>,
    /// Regex the output must match (repeatable)
    #[arg(long = "match", value_name = "PATTERN", allow_hyphen_values = true)]
    patterns: Vec<String>,
    /// Named golden message, e.g. help-banner, missing-api-key (repeatable)
    #[arg(long, value_name = "NAME")]
    message: Vec<String>,
    /// VALUE=FIELD; expects "Using VALUE as FIELD from" (repeatable)
    #[arg(long, value_name = "VALUE=FIELD")]
    used_as: Vec<String>,
    /// Flags passed to the CLI, joined with spaces
    #[arg(last = true)]
    flags: Vec<String>,
}

struct Outcome {
    kind: &'static str,
    check: String,
    data: Value,
    result: Result<()>,
}

impl Outcome {
    fn new(kind: &'static str, check: impl Into<String>, data: Value, result: Result<()>) -> Self {
        Outcome {
            kind,
            check: check.into(),
            data,
            result,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(overrides: Overrides) -> Result<HarnessConfig> {
    let mut config = HarnessConfig::from_env()?;
    if let Some(dir) = overrides.bin_dir {
        config.bin_dir = dir;
    }
    if let Some(dir) = overrides.work_dir {
        config.work_dir = dir;
    }
    if let Some(key) = overrides.api_key {
        config.api_key = Some(key);
    }
    if let Some(dir) = overrides.requests_dir {
        config.requests_dir = Some(dir);
    }
    if let Some(secs) = overrides.timeout_secs {
        if secs == 0 {
            return Err(HarnessError::Config("--timeout-secs must be greater than zero".to_string()));
        }
        config.command_timeout = Some(Duration::from_secs(secs));
    }
    Ok(config)
}

fn output_data(ctx: &ScenarioContext) -> Value {
    match ctx.last_output() {
        Ok(output) => json!({
            "command": output.command,
            "exit_code": output.exit_code,
            "output": output.text,
        }),
        Err(_) => Value::Null,
    }
}

fn split_used_as(raw: &str) -> Result<(&str, &str)> {
    raw.split_once('=')
        .ok_or_else(|| HarnessError::Config(format!("--used-as expects VALUE=FIELD, got {raw:?}")))
}

fn run_checks(ctx: &ScenarioContext, args: &RunArgs) -> Result<()> {
    for name in &args.message {
        let message = ExpectedMessage::parse(name)
            .ok_or_else(|| HarnessError::Config(format!("unknown message {name:?}")))?;
        ctx.assert_message(message)?;
    }
    for literal in &args.expect {
        ctx.assert_contains(literal)?;
    }
    for literal in &args.reject {
        ctx.assert_not_contains(literal)?;
    }
    for pattern in &args.patterns {
        ctx.assert_matches(pattern)?;
    }
    for raw in &args.used_as {
        let (value, field) = split_used_as(raw)?;
        ctx.assert_used_as(value, field)?;
    }
    Ok(())
}

fn cmd_resolve(ctx: &ScenarioContext) -> Outcome {
    let platform = ctx.platform().clone();
    let result = ctx.binary().map(|binary| {
        let sha256 = binary.sha256(&ctx.config().work_dir).ok();
        let exists = ctx.config().work_dir.join(&binary.path).exists();
        (binary, exists, sha256)
    });
    match result {
        Ok((binary, exists, sha256)) => Outcome::new(
            "platform_report",
            "resolve binary",
            json!({
                "platform": platform,
                "binary": binary.command_path(),
                "exists": exists,
                "sha256": sha256,
            }),
            Ok(()),
        ),
        Err(err) => Outcome::new("platform_report", "resolve binary", json!({ "platform": platform }), Err(err)),
    }
}

fn run_and_check(ctx: &mut ScenarioContext, args: &RunArgs) -> Result<()> {
    ctx.run_cli_with(&args.flags.join(" "))?;
    run_checks(ctx, args)
}

fn cmd_run(ctx: &mut ScenarioContext, args: RunArgs) -> Outcome {
    let result = run_and_check(ctx, &args);
    Outcome::new("cli_run_report", "run CLI", output_data(ctx), result)
}

fn make_and_check(ctx: &mut ScenarioContext, target: &str, expect_success: bool) -> Result<()> {
    ctx.make(target)?;
    if expect_success {
        ctx.assert_build_succeeded()?;
    }
    Ok(())
}

fn cmd_make(ctx: &mut ScenarioContext, target: String, expect_success: bool) -> Outcome {
    let result = make_and_check(ctx, &target, expect_success);
    Outcome::new("make_report", format!("make {target}"), output_data(ctx), result)
}

fn cmd_validate(ctx: &ScenarioContext, name: &str) -> Outcome {
    let Some(api) = BuildApi::parse(name) else {
        let err = HarnessError::Config(format!("unknown Build API {name:?}"));
        return Outcome::new("contract_report", "validate", Value::Null, Err(err));
    };
    let contract = api.contract();
    Outcome::new(
        "contract_report",
        format!("valid for the {api}"),
        json!({ "build_api": api, "contract": contract }),
        ctx.assert_valid_for(api),
    )
}

fn cmd_field(ctx: &ScenarioContext, channel: &str, field: &str, equals: Option<String>) -> Outcome {
    let parsed = Channel::parse(channel)
        .ok_or_else(|| HarnessError::Config(format!("unknown channel {channel:?}")))
        .and_then(|channel| {
            PayloadField::parse(field)
                .map(|field| (channel, field))
                .ok_or_else(|| HarnessError::Config(format!("unknown payload field {field:?}")))
        });
    let expectation = match equals {
        Some(value) => Expectation::Equals(value),
        None => Expectation::IsNotNull,
    };
    let data = json!({ "channel": channel, "field": field, "expectation": expectation });
    let result = parsed.and_then(|(channel, field)| ctx.check_field(channel, field, &expectation));
    Outcome::new("field_report", format!("payload field {field:?} {expectation}"), data, result)
}

fn run_and_compare_version(ctx: &mut ScenarioContext, flags: &str, source: &Path) -> Result<String> {
    ctx.run_cli_with(flags)?;
    ctx.assert_version_matches(Some(source))
}

fn cmd_version(ctx: &mut ScenarioContext, source: Option<PathBuf>, against_cli: Option<String>) -> Outcome {
    let path = source.unwrap_or_else(|| ctx.config().version_source.clone());
    let full_path = ctx.config().work_dir.join(&path);
    let Some(flags) = against_cli else {
        let result = cli_acceptance::version::extract_version(&full_path);
        let data = json!({
            "source": path,
            "version": result.as_ref().ok().cloned().flatten(),
        });
        return Outcome::new("version_report", "extract version", data, result.map(|_| ()));
    };
    let result = run_and_compare_version(ctx, &flags, &path);
    let data = json!({
        "source": path,
        "version": result.as_ref().ok(),
        "cli": output_data(ctx),
    });
    Outcome::new("version_report", "version matches source", data, result.map(|_| ()))
}

fn dispatch(ctx: &mut ScenarioContext, command: Command) -> Outcome {
    match command {
        Command::Resolve => cmd_resolve(ctx),
        Command::Run(args) => cmd_run(ctx, args),
        Command::Make { target, expect_success } => cmd_make(ctx, target, expect_success),
        Command::Validate { build_api } => cmd_validate(ctx, &build_api),
        Command::Field {
            channel,
            field,
            equals,
            not_null: _,
        } => cmd_field(ctx, &channel, &field, equals),
        Command::ContentType => Outcome::new(
            "header_report",
            "sourcemaps Content-Type header is multipart form-data",
            Value::Null,
            ctx.assert_multipart_content_type(),
        ),
        Command::Version { source, against_cli } => cmd_version(ctx, source, against_cli),
    }
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let config = match load_config(cli.overrides) {
        Ok(config) => config,
        Err(err) => {
            let result = JsonResult::from_error(&err).with_check("load configuration");
            if let Err(e) = json_contract::print_envelope("config_error", &result, &Value::Null) {
                eprintln!("{e}");
            }
            std::process::exit(EXIT_USAGE);
        }
    };

    let mut ctx = ScenarioContext::from_config(config);
    let outcome = dispatch(&mut ctx, cli.command);
    let result = match &outcome.result {
        Ok(()) => JsonResult::from_ok(true),
        Err(err) => JsonResult::from_error(err),
    }
    .with_check(outcome.check);

    if let Err(e) = json_contract::print_envelope(outcome.kind, &result, &outcome.data) {
        eprintln!("{e}");
        std::process::exit(EXIT_USAGE);
    }
    std::process::exit(result.exit_code);
}
