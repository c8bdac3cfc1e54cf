pub mod agents;
pub mod apps;
pub mod artifacts;
pub mod chats;
pub mod datasets;
pub mod keys;
pub mod workspaces;

use crate::core::store::error::StoreError;

/// Trim a required string field, rejecting blank input wholesale.
pub(crate) fn required(value: &str, field: &'static str) -> Result<String, StoreError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(StoreError::bad_request(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}
