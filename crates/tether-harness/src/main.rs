#![forbid(unsafe_code)]

//! Tether reference harness.
//!
//! Runs one scripted [`Stylist`](tether_harness::Stylist) session against the
//! headless host and prints a JSON summary on stdout. Exits non-zero if the
//! session left anything behind after a full unwind.
//!
//! # Running
//!
//! ```sh
//! cargo run -p tether-harness
//! RUST_LOG=tether=debug cargo run -p tether-harness
//! ```
//!
//! # Environment
//!
//! - `TETHER_HARNESS_PREEXISTING`: browser surfaces present before startup (default 2)
//! - `TETHER_HARNESS_OPENED`: browser surfaces opened after startup (default 1)
//! - `TETHER_HARNESS_CLOSE`: surfaces closed before shutdown (default 1)
//! - `TETHER_HARNESS_REASON`: shutdown reason code, 1-8 (default 4, addon disable)
//! - `TETHER_HARNESS_POLICY`: path to a policy file (`.toml` or `.json`)

use std::process::ExitCode;

use tether::{LifecycleReason, Policy, ShutdownOutcome};
use tether_harness::{SessionConfig, run_session};

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn load_policy() -> Result<Policy, String> {
    let Ok(path) = std::env::var("TETHER_HARNESS_POLICY") else {
        return Ok(Policy::default());
    };
    load_policy_file(&path)
}

#[cfg(feature = "policy-config")]
fn load_policy_file(path: &str) -> Result<Policy, String> {
    let policy = if path.ends_with(".json") {
        Policy::from_json_file(path)
    } else {
        Policy::from_toml_file(path)
    };
    policy
        .and_then(Policy::validated)
        .map_err(|e| format!("{path}: {e}"))
}

#[cfg(not(feature = "policy-config"))]
fn load_policy_file(path: &str) -> Result<Policy, String> {
    Err(format!(
        "{path}: policy files need the `policy-config` feature"
    ))
}

fn init_logging() {
    #[cfg(feature = "json-logs")]
    let result = tether::init_json_logging(tether::core::logging::DEFAULT_FILTER);
    #[cfg(not(feature = "json-logs"))]
    let result = tether::init_logging(tether::core::logging::DEFAULT_FILTER);
    if let Err(err) = result {
        eprintln!("tether-harness: {err}");
    }
}

fn main() -> ExitCode {
    init_logging();

    let policy = match load_policy() {
        Ok(policy) => policy,
        Err(err) => {
            eprintln!("tether-harness: {err}");
            return ExitCode::from(2);
        }
    };
    let reason_code = env_usize("TETHER_HARNESS_REASON", 4);
    let Some(shutdown_reason) = u32::try_from(reason_code)
        .ok()
        .and_then(LifecycleReason::from_code)
    else {
        eprintln!("tether-harness: unknown lifecycle reason {reason_code}");
        return ExitCode::from(2);
    };

    let config = SessionConfig {
        preexisting: env_usize("TETHER_HARNESS_PREEXISTING", 2),
        opened: env_usize("TETHER_HARNESS_OPENED", 1),
        close_before_shutdown: env_usize("TETHER_HARNESS_CLOSE", 1),
        shutdown_reason,
        policy,
        ..SessionConfig::default()
    };

    let report = match run_session(&config) {
        Ok(report) => report,
        Err(err) => {
            eprintln!("tether-harness: session failed: {err}");
            return ExitCode::FAILURE;
        }
    };
    println!("{}", report.to_json());

    match report.outcome {
        ShutdownOutcome::Unwound(_) if !report.is_clean() => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    }
}
