//! Output formatting utilities

use serde::Serialize;

use crate::error::{CliError, CliResult};

/// Print a report as pretty JSON on stdout
pub fn print_json<T: Serialize>(data: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(data)?);
    Ok(())
}

/// Print an error on stderr
pub fn print_error(err: &CliError) {
    eprintln!("error: {}", err);
}
