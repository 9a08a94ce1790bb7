//! Validation helpers for DTOs.

use validator::ValidationError;

/// Longest display name accepted, in characters.
pub const MAX_NAME_CHARS: usize = 32;

/// Longest prompt accepted, in characters.
pub const MAX_PROMPT_CHARS: usize = 500;

/// Validates that a display name is not blank and fits on a scoreboard line.
///
/// # Examples
///
/// ```ignore
/// validate_player_name("alice") // Ok
/// validate_player_name("   ")   // Err - blank
/// ```
pub fn validate_player_name(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        let mut err = ValidationError::new("name_blank");
        err.message = Some("Name must not be blank".into());
        return Err(err);
    }

    let len = trimmed.chars().count();
    if len > MAX_NAME_CHARS {
        let mut err = ValidationError::new("name_length");
        err.message =
            Some(format!("Name must be at most {MAX_NAME_CHARS} characters (got {len})").into());
        return Err(err);
    }

    Ok(())
}

/// Validates a prompt before it is ledgered.
pub fn validate_prompt(text: &str) -> Result<(), ValidationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        let mut err = ValidationError::new("prompt_blank");
        err.message = Some("Prompt must not be blank".into());
        return Err(err);
    }

    if trimmed.chars().count() > MAX_PROMPT_CHARS {
        let mut err = ValidationError::new("prompt_length");
        err.message = Some(format!("Prompt must be at most {MAX_PROMPT_CHARS} characters").into());
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_player_name_valid() {
        assert!(validate_player_name("alice").is_ok());
        assert!(validate_player_name("  bob  ").is_ok());
        assert!(validate_player_name(&"x".repeat(MAX_NAME_CHARS)).is_ok());
    }

    #[test]
    fn test_validate_player_name_invalid() {
        assert!(validate_player_name("").is_err());
        assert!(validate_player_name("   ").is_err());
        assert!(validate_player_name(&"x".repeat(MAX_NAME_CHARS + 1)).is_err());
    }

    #[test]
    fn test_validate_prompt() {
        assert!(validate_prompt("a potato in space").is_ok());
        assert!(validate_prompt("\n").is_err());
        assert!(validate_prompt(&"p".repeat(MAX_PROMPT_CHARS + 1)).is_err());
    }
}
