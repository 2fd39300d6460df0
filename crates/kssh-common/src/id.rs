/// Generate a correlation id for a request/response pair.
///
/// UUID v7, so ids sort by creation time in logs and the ledger.
pub fn generate_correlation_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// Short 8-character form of an id for log lines.
pub fn short(id: &str) -> &str {
    let trimmed = id.trim();
    let start = trimmed.len().saturating_sub(8);
    trimmed.get(start..).unwrap_or(trimmed)
}
