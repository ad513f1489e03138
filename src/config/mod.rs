//! Client configuration: upstream address and the metadata document

use crate::{Error, Result};
use serde_json::Value;
use std::path::Path;

/// Default upstream tunnel server address
pub const DEFAULT_UPSTREAM: &str = "127.0.0.1:9000";

/// Port assumed when `--connect` names a bare host
pub const DEFAULT_PORT: u16 = 9000;

/// Everything a session needs to connect and introduce itself.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Upstream address, always `host:port`
    pub upstream: String,
    /// JSON metadata document sent as the handshake line
    pub metadata: Value,
}

/// Load the metadata document from a file, defaulting to `{}`.
///
/// The document must be a JSON object; the server routes on its fields.
pub fn load_metadata(path: Option<&Path>) -> Result<Value> {
    let Some(path) = path else {
        return Ok(Value::Object(Default::default()));
    };

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
    parse_metadata(&content)
        .map_err(|e| Error::Config(format!("invalid metadata in {}: {}", path.display(), e)))
}

fn parse_metadata(content: &str) -> std::result::Result<Value, String> {
    let value: Value = serde_json::from_str(content).map_err(|e| e.to_string())?;
    if !value.is_object() {
        return Err("metadata document must be a JSON object".to_string());
    }
    Ok(value)
}

/// Normalize a `host[:port]` argument, appending the default port to a
/// bare host.
pub fn parse_upstream(arg: &str) -> String {
    if arg.contains(':') {
        arg.to_string()
    } else {
        format!("{}:{}", arg, DEFAULT_PORT)
    }
}
