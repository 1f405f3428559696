//! ---
//! nls_section: "01-core-functionality"
//! nls_subsection: "module"
//! nls_type: "source"
//! nls_scope: "code"
//! nls_description: "Shared primitives and utilities for the exporter runtime."
//! nls_version: "v0.1.0"
//! nls_owner: "tbd"
//! ---

/// Placeholder rendered for blank label values.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Trim a label value, substituting [`UNKNOWN_LABEL`] when nothing is left.
pub fn safe_label(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        UNKNOWN_LABEL.to_owned()
    } else {
        trimmed.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_values_become_unknown() {
        assert_eq!(safe_label(""), "unknown");
        assert_eq!(safe_label("   "), "unknown");
        assert_eq!(safe_label(" vgpu "), "vgpu");
    }
}
