//! JSON rendering.

use crate::error::Result;
use serde::Serialize;

/// Pretty-printed JSON of the full structure.
pub fn render<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    Ok(bytes)
}
