//! NHS number format checks.
//!
//! Only the shape is enforced here (exactly ten ASCII digits). Check-digit
//! verification is left to the demographics service, which rejects unknown patients.

use crate::error::IngestError;

pub const NHS_NUMBER_LENGTH: usize = 10;

/// Validate an NHS number and return it trimmed.
pub fn validate_nhs_number(raw: &str) -> Result<String, IngestError> {
    let trimmed = raw.trim();
    if trimmed.len() != NHS_NUMBER_LENGTH || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(IngestError::InvalidResourceId(format!(
            "NHS number must be {} digits, got {:?}",
            NHS_NUMBER_LENGTH,
            mask_nhs_number(trimmed)
        )));
    }
    Ok(trimmed.to_string())
}

/// Mask an NHS number for logging, keeping only the last four characters.
pub fn mask_nhs_number(nhs_number: &str) -> String {
    let chars: Vec<char> = nhs_number.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let visible: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), visible)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_nhs_number() {
        assert_eq!(validate_nhs_number("9000000009").unwrap(), "9000000009");
        assert_eq!(validate_nhs_number(" 9000000009 ").unwrap(), "9000000009");
    }

    #[test]
    fn test_invalid_nhs_numbers() {
        for raw in ["", "900000000", "90000000091", "900000000a", "900 000 0009", "９000000009"] {
            let err = validate_nhs_number(raw).unwrap_err();
            assert!(
                matches!(err, IngestError::InvalidResourceId(_)),
                "expected InvalidResourceId for {:?}",
                raw
            );
        }
    }

    #[test]
    fn test_error_does_not_leak_full_number() {
        let err = validate_nhs_number("12345678901").unwrap_err();
        assert!(!err.to_string().contains("12345678901"));
        assert!(err.to_string().contains("8901"));
    }

    #[test]
    fn test_mask_nhs_number() {
        assert_eq!(mask_nhs_number("9000000009"), "******0009");
        assert_eq!(mask_nhs_number("123"), "***");
    }
}
