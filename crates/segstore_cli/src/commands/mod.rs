//! CLI command implementations.

pub mod append;
pub mod bookmark;
pub mod consume;
pub mod inspect;

use segstore_core::{Config, CoreResult, Store};
use std::path::Path;
use thiserror::Error;

/// Errors raised by the CLI itself.
#[derive(Debug, Error)]
pub enum CliError {
    /// A token argument is not valid hex.
    #[error("invalid hex token: {0}")]
    InvalidHex(String),
}

/// Opens the store at `path`, picking the backend from the path.
pub fn open_store(path: &Path) -> CoreResult<Store> {
    if is_archive(path) {
        Store::open_archive(path, Config::default())
    } else {
        Store::open_dir(path, Config::default())
    }
}

fn is_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
}

/// Formats bytes as lowercase hex.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Parses hex produced by [`to_hex`].
pub fn from_hex(text: &str) -> Result<Vec<u8>, CliError> {
    let text = text.trim();
    if text.len() % 2 != 0 || !text.is_ascii() {
        return Err(CliError::InvalidHex(text.to_string()));
    }
    (0..text.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&text[i..i + 2], 16)
                .map_err(|_| CliError::InvalidHex(text.to_string()))
        })
        .collect()
}
