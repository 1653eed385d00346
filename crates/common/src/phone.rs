//! Phone-number normalization.
//!
//! The provider identifies contacts by a digits-only id (an E.164 number
//! without the leading `+`). Callers hand us phone numbers in whatever shape
//! a human typed, so both forms are normalized here.

/// Normalize a phone number or provider contact id to the provider's
/// external-id form: digits only, no leading `+`, no separators.
pub fn normalize_external_id(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Render an external id back as a display phone number (`+` prefix).
pub fn display_phone(external_id: &str) -> String {
    if external_id.starts_with('+') {
        external_id.to_string()
    } else {
        format!("+{external_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_plus_and_separators() {
        assert_eq!(normalize_external_id("+1 (555) 010-2345"), "15550102345");
        assert_eq!(normalize_external_id("15550102345"), "15550102345");
    }

    #[test]
    fn display_adds_plus_once() {
        assert_eq!(display_phone("15550102345"), "+15550102345");
        assert_eq!(display_phone("+15550102345"), "+15550102345");
    }
}
