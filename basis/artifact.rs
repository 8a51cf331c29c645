//! Persistence of fitted artifacts as human-readable TOML files.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Failed to read or write artifact file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML artifact file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize artifact to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
}

/// Writes `value` to `path` as pretty-printed TOML.
pub fn save_toml<T: Serialize>(value: &T, path: impl AsRef<Path>) -> Result<(), ArtifactError> {
    let toml_string = toml::to_string_pretty(value)?;
    let mut file = BufWriter::new(fs::File::create(path)?);
    file.write_all(toml_string.as_bytes())?;
    file.flush()?;
    Ok(())
}

/// Reads a value previously written with [`save_toml`].
pub fn load_toml<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ArtifactError> {
    let toml_string = fs::read_to_string(path)?;
    Ok(toml::from_str(&toml_string)?)
}
