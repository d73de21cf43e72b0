//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::process;
use tileforge::service::{ServiceError, SubmitError};

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration error
    Config(String),
    /// Failed to start the conversion service
    ServiceStart(ServiceError),
    /// Submission rejected
    Submit(SubmitError),
    /// Status/list lookup failed
    Lookup(ServiceError),
    /// The conversion ended in a terminal failure
    ConversionFailed { stage: String, message: String },
    /// The conversion was cancelled
    Cancelled,
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::ConversionFailed { .. } => {
                eprintln!();
                eprintln!("The job record retains the full error; inspect it with:");
                eprintln!("  tileforge jobs --status failed");
            }
            CliError::Submit(SubmitError::SourceNotFound(_)) => {
                eprintln!();
                eprintln!("Check that the path points to an .osm or .pbf extract.");
            }
            _ => {}
        }

        process::exit(match self {
            CliError::Cancelled => 130,
            _ => 1,
        })
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::ServiceStart(e) => write!(f, "Failed to start service: {}", e),
            CliError::Submit(e) => write!(f, "Submission rejected: {}", e),
            CliError::Lookup(e) => write!(f, "Lookup failed: {}", e),
            CliError::ConversionFailed { stage, message } => {
                write!(f, "Conversion failed in stage '{}': {}", stage, message)
            }
            CliError::Cancelled => write!(f, "Conversion cancelled"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::ServiceStart(e) | CliError::Lookup(e) => Some(e),
            CliError::Submit(e) => Some(e),
            _ => None,
        }
    }
}
