//! Product identifier (EAN/UPC/GTIN) normalization and check-digit validation.

use crate::errors::{PipelineError, PipelineResult};

const GTIN_LENGTHS: [usize; 4] = [8, 12, 13, 14];

fn digits_only(raw: &str) -> String {
    raw.chars().filter(|ch| ch.is_ascii_digit()).collect()
}

/// Derives the ordered, duplicate-free set of equivalent identifiers for `raw`.
///
/// A 12-digit UPC-A code also yields its zero-padded EAN-13 form; a 13-digit
/// code with a leading zero also yields the stripped 12-digit form.
pub fn normalize_variants(raw: &str) -> Vec<String> {
    let digits = digits_only(raw);
    if digits.is_empty() {
        return Vec::new();
    }

    let mut variants = vec![digits.clone()];
    match digits.len() {
        12 => variants.push(format!("0{digits}")),
        13 if digits.starts_with('0') => variants.push(digits[1..].to_string()),
        _ => {}
    }
    variants.dedup();
    variants
}

/// Computes the GS1 check digit for the payload digits (check digit excluded).
pub fn gs1_check_digit(payload: &str) -> Option<u8> {
    let mut sum = 0u32;
    for (position, ch) in payload.chars().rev().enumerate() {
        let digit = ch.to_digit(10)?;
        let weight = if position % 2 == 0 { 3 } else { 1 };
        sum += digit * weight;
    }
    Some(((10 - (sum % 10)) % 10) as u8)
}

/// Returns true when `code` is an 8/12/13/14-digit GTIN with a valid check digit.
pub fn has_valid_check_digit(code: &str) -> bool {
    if !GTIN_LENGTHS.contains(&code.len()) || !code.chars().all(|ch| ch.is_ascii_digit()) {
        return false;
    }
    let (payload, check) = code.split_at(code.len() - 1);
    let Some(expected) = gs1_check_digit(payload) else {
        return false;
    };
    check.chars().next().and_then(|ch| ch.to_digit(10)) == Some(u32::from(expected))
}

/// Normalizes caller input before a search starts.
///
/// A well-formed 13-digit code with a bad check digit is rejected outright;
/// other lengths are passed through since lookups are best-effort.
pub fn validate_for_search(raw: &str) -> PipelineResult<Vec<String>> {
    let digits = digits_only(raw);
    if digits.len() == 13 && !has_valid_check_digit(&digits) {
        return Err(PipelineError::InvalidChecksum(digits));
    }
    Ok(normalize_variants(raw))
}

#[cfg(test)]
mod tests {
    use super::{gs1_check_digit, has_valid_check_digit, normalize_variants, validate_for_search};
    use crate::errors::PipelineError;

    #[test]
    fn test_normalize_variants_pads_twelve_digit_codes() {
        assert_eq!(
            normalize_variants("012345678905"),
            vec!["012345678905".to_string(), "0012345678905".to_string()]
        );
    }

    #[test]
    fn test_normalize_variants_keeps_thirteen_digit_code_without_leading_zero() {
        assert_eq!(
            normalize_variants("5901234123457"),
            vec!["5901234123457".to_string()]
        );
    }

    #[test]
    fn test_normalize_variants_strips_leading_zero_from_thirteen_digit_code() {
        assert_eq!(
            normalize_variants("0012345678905"),
            vec!["0012345678905".to_string(), "012345678905".to_string()]
        );
    }

    #[test]
    fn test_normalize_variants_ignores_separators_and_handles_empty_input() {
        assert_eq!(
            normalize_variants(" 590-1234 123457 "),
            vec!["5901234123457".to_string()]
        );
        assert!(normalize_variants("no digits here").is_empty());
        assert!(normalize_variants("").is_empty());
    }

    #[test]
    fn test_gs1_check_digit_matches_known_codes() {
        assert_eq!(gs1_check_digit("590123412345"), Some(7));
        assert_eq!(gs1_check_digit("01234567890"), Some(5));
        assert_eq!(gs1_check_digit("9638507"), Some(4));
    }

    #[test]
    fn test_has_valid_check_digit_accepts_valid_codes() {
        for code in ["5901234123457", "4006381333931", "012345678905", "96385074"] {
            assert!(has_valid_check_digit(code), "{code} should validate");
        }
    }

    #[test]
    fn test_has_valid_check_digit_rejects_every_single_digit_mutation() {
        for valid in ["5901234123457", "4006381333931", "0012345678905"] {
            let digits: Vec<char> = valid.chars().collect();
            for position in 0..digits.len() {
                for replacement in '0'..='9' {
                    if replacement == digits[position] {
                        continue;
                    }
                    let mut mutated = digits.clone();
                    mutated[position] = replacement;
                    let mutated: String = mutated.into_iter().collect();
                    assert!(
                        !has_valid_check_digit(&mutated),
                        "{mutated} unexpectedly validated"
                    );
                }
            }
        }
    }

    #[test]
    fn test_has_valid_check_digit_rejects_unsupported_lengths() {
        assert!(!has_valid_check_digit("12345"));
        assert!(!has_valid_check_digit("59012341234X"));
    }

    #[test]
    fn test_validate_for_search_rejects_bad_thirteen_digit_checksum() {
        assert_eq!(
            validate_for_search("5901234123450"),
            Err(PipelineError::InvalidChecksum("5901234123450".to_string()))
        );
        assert_eq!(
            validate_for_search("5901234123457"),
            Ok(vec!["5901234123457".to_string()])
        );
        // Lengths other than 13 are looked up best-effort.
        assert!(validate_for_search("012345678900").is_ok());
    }
}
