//! Correlation ID generation
//!
//! Every loader execution mints a fresh correlation ID, propagated into
//! logs, metrics, and activity events. IDs use the format
//! `{6-char-hex}-exec-{loader_code}`, matching the engine's other domain
//! ID conventions: short, sortable-enough prefix plus a human-legible tag.

/// Generate a correlation ID for a single execution attempt
pub fn generate_correlation_id(loader_code: &str) -> String {
    let uuid = uuid::Uuid::now_v7();
    let hex_prefix = &uuid.to_string()[..6];
    format!("{hex_prefix}-exec-{loader_code}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_distinct_ids() {
        let a = generate_correlation_id("loader_a");
        let b = generate_correlation_id("loader_a");
        assert_ne!(a, b);
        assert!(a.contains("-exec-loader_a"));
    }

    #[test]
    fn hex_prefix_is_six_chars() {
        let id = generate_correlation_id("x");
        let prefix = id.split('-').next().unwrap();
        assert_eq!(prefix.len(), 6);
    }
}
