//! Command-line harness around the orchestration core.
//!
//! The CLI wires the HTTP transports into a [`SessionRegistry`] and drives a
//! single session per invocation. It is a thin shell; all orchestration
//! behavior lives in the service layer.
//!
//! [`SessionRegistry`]: crate::services::SessionRegistry

pub mod commands;
pub mod output;
pub mod types;

pub use types::{Cli, Commands};

/// Print an error and exit with a failure status.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let chain: Vec<String> = err.chain().map(ToString::to_string).collect();
        let body = serde_json::json!({
            "success": false,
            "error": err.to_string(),
            "causes": chain.get(1..).unwrap_or_default(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&body).unwrap_or_default()
        );
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(1);
}
