use crate::error::ValidationError;

/// Longest message accepted, counted in characters after trimming.
pub const MAX_MESSAGE_LEN: usize = 140;

/// Trim `text` and check it against the feed's length rules.
/// Returns the trimmed text that should be stored.
pub fn validate_text(text: &str) -> Result<&str, ValidationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty);
    }

    let len = trimmed.chars().count();
    if len > MAX_MESSAGE_LEN {
        return Err(ValidationError::TooLong {
            len,
            max: MAX_MESSAGE_LEN,
        });
    }

    Ok(trimmed)
}

/// Whether a send control should be enabled for the current input.
pub fn can_send(input: &str) -> bool {
    !input.trim().is_empty()
}

/// Cut input down to the maximum length, like an input length filter would.
pub fn clamp_input(input: &str) -> &str {
    match input.char_indices().nth(MAX_MESSAGE_LEN) {
        Some((idx, _)) => &input[..idx],
        None => input,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_and_trims() {
        assert_eq!(validate_text("  hi \n").unwrap(), "hi");
        assert_eq!(validate_text("a").unwrap(), "a");
    }

    #[test]
    fn rejects_empty_and_blank() {
        assert_eq!(validate_text(""), Err(ValidationError::Empty));
        assert_eq!(validate_text(" "), Err(ValidationError::Empty));
        assert_eq!(validate_text("\t\n "), Err(ValidationError::Empty));
    }

    #[test]
    fn length_boundary() {
        let ok = "x".repeat(MAX_MESSAGE_LEN);
        assert_eq!(validate_text(&ok).unwrap().len(), MAX_MESSAGE_LEN);

        let too_long = "x".repeat(MAX_MESSAGE_LEN + 1);
        assert_eq!(
            validate_text(&too_long),
            Err(ValidationError::TooLong { len: 141, max: 140 })
        );
    }

    #[test]
    fn length_counts_chars_not_bytes() {
        let accented = "é".repeat(MAX_MESSAGE_LEN);
        assert!(validate_text(&accented).is_ok());
    }

    #[test]
    fn surrounding_whitespace_does_not_count() {
        let padded = format!("   {}   ", "y".repeat(MAX_MESSAGE_LEN));
        assert!(validate_text(&padded).is_ok());
    }

    #[test]
    fn send_enablement() {
        assert!(!can_send(""));
        assert!(!can_send("   "));
        assert!(can_send(" a "));
    }

    #[test]
    fn clamp_keeps_char_boundaries() {
        let long = "ü".repeat(200);
        assert_eq!(clamp_input(&long).chars().count(), MAX_MESSAGE_LEN);
        assert_eq!(clamp_input("short"), "short");
    }
}
