//! Acceptance harness for the symbol/sourcemap upload CLI.
//!
//! - `platform` picks the `<arch>-<os>-<name>[.exe]` binary for this host.
//! - `process` runs it through the shell and captures merged output.
//! - `assertions` holds the golden output literals and predicates.
//! - `payload` checks what the CLI uploaded to the mock ingestion server.
//! - `version` reads the declared version from the CLI's source.
//! - `scenario` threads all of the above through acceptance steps.

pub mod assertions;
pub mod config;
pub mod error;
pub mod json_contract;
pub mod payload;
pub mod platform;
pub mod process;
pub mod scenario;
pub mod version;

pub use config::HarnessConfig;
pub use error::{AssertionFailure, HarnessError, Result};
pub use scenario::ScenarioContext;
