//! Barcode validation and identity resolution.
//!
//! Turns a raw barcode-like value into a canonical product id. Supports
//! GTIN-8/12/13/14 and ISBN-13 with check-digit validation; anything that
//! fails validation is rejected so the fragment is skipped upstream — a bad
//! barcode is never silently truncated or repaired into a wrong identity.
//!
//! For GTIN families the GS1 company prefix also yields the manufacturer
//! country; ISBN codes skip country detection.

use thiserror::Error;

use crate::models::BarcodeType;

/// Why a raw barcode could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BarcodeError {
    #[error("empty barcode")]
    Empty,
    #[error("barcode contains non-digit characters: {0}")]
    NonNumeric(String),
    #[error("unsupported barcode length {0}")]
    BadLength(usize),
    #[error("check digit mismatch for {0}")]
    BadChecksum(String),
}

/// Validate and normalize a raw barcode into `(canonical id, type)`.
///
/// Whitespace and hyphens (common in feed exports and printed ISBNs) are
/// stripped; any other non-digit rejects the value outright.
pub fn resolve(raw: &str) -> Result<(String, BarcodeType), BarcodeError> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();

    if cleaned.is_empty() {
        return Err(BarcodeError::Empty);
    }
    if !cleaned.bytes().all(|b| b.is_ascii_digit()) {
        return Err(BarcodeError::NonNumeric(raw.to_string()));
    }

    let barcode_type = match cleaned.len() {
        8 => BarcodeType::Gtin8,
        12 => BarcodeType::Gtin12,
        13 if cleaned.starts_with("978") || cleaned.starts_with("979") => BarcodeType::Isbn13,
        13 => BarcodeType::Gtin13,
        14 => BarcodeType::Gtin14,
        n => return Err(BarcodeError::BadLength(n)),
    };

    if !checksum_valid(&cleaned) {
        return Err(BarcodeError::BadChecksum(cleaned));
    }

    Ok((cleaned, barcode_type))
}

/// GS1 modulo-10 check: weights 1/3 alternate right-to-left starting at 3
/// on the digit left of the check digit.
fn checksum_valid(digits: &str) -> bool {
    let bytes = digits.as_bytes();
    let n = bytes.len();
    let sum: u32 = bytes[..n - 1]
        .iter()
        .enumerate()
        .map(|(i, b)| {
            let d = (b - b'0') as u32;
            if (n - i) % 2 == 0 {
                d * 3
            } else {
                d
            }
        })
        .sum();
    let check = (10 - sum % 10) % 10;
    check == (bytes[n - 1] - b'0') as u32
}

/// Two identifiers name the same physical good when their numeric values
/// match (a UPC-A and its zero-padded GTIN-13 form, or a hyphenated ISBN
/// and its canonical spelling, for instance).
pub fn same_gtin(a: &str, b: &str) -> bool {
    match (numeric_value(a), numeric_value(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// Numeric value after the same separator cleanup `resolve` applies.
fn numeric_value(raw: &str) -> Option<u64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    cleaned.parse().ok()
}

/// Manufacturer country for a validated code, from its GS1 prefix.
/// ISBN codes carry a bookland prefix, not a company prefix, so they yield
/// no country.
pub fn country(code: &str, barcode_type: BarcodeType) -> Option<&'static str> {
    let digits = match barcode_type {
        BarcodeType::Isbn13 => return None,
        // The leading digit of a GTIN-14 is a packaging indicator.
        BarcodeType::Gtin14 => &code[1..],
        _ => code,
    };

    // Normalize to the 13-digit form before reading the prefix.
    let padded = format!("{:0>13}", digits);
    let prefix: u16 = padded[..3].parse().ok()?;
    gs1_country(prefix)
}

/// GS1 company-prefix allocation ranges (abridged to active allocations).
fn gs1_country(prefix: u16) -> Option<&'static str> {
    let name = match prefix {
        0..=139 => "United States / Canada",
        300..=379 => "France",
        380 => "Bulgaria",
        383 => "Slovenia",
        385 => "Croatia",
        400..=440 => "Germany",
        450..=459 | 490..=499 => "Japan",
        460..=469 => "Russia",
        471 => "Taiwan",
        480 => "Philippines",
        489 => "Hong Kong",
        500..=509 => "United Kingdom",
        520..=521 => "Greece",
        539 => "Ireland",
        540..=549 => "Belgium / Luxembourg",
        560 => "Portugal",
        569 => "Iceland",
        570..=579 => "Denmark",
        590 => "Poland",
        594 => "Romania",
        599 => "Hungary",
        600..=601 => "South Africa",
        611 => "Morocco",
        619 => "Tunisia",
        622 => "Egypt",
        626 => "Iran",
        628 => "Saudi Arabia",
        629 => "United Arab Emirates",
        640..=649 => "Finland",
        690..=699 => "China",
        700..=709 => "Norway",
        729 => "Israel",
        730..=739 => "Sweden",
        750 => "Mexico",
        754..=755 => "Canada",
        760..=769 => "Switzerland",
        770..=771 => "Colombia",
        779 => "Argentina",
        780 => "Chile",
        789..=790 => "Brazil",
        800..=839 => "Italy",
        840..=849 => "Spain",
        858 => "Slovakia",
        859 => "Czech Republic",
        860 => "Serbia",
        868..=869 => "Turkey",
        870..=879 => "Netherlands",
        880 => "South Korea",
        885 => "Thailand",
        888 => "Singapore",
        890 => "India",
        893 => "Vietnam",
        899 => "Indonesia",
        900..=919 => "Austria",
        930..=939 => "Australia",
        940..=949 => "New Zealand",
        955 => "Malaysia",
        958 => "Macau",
        _ => return None,
    };
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_ean13() {
        let (id, t) = resolve("4006381333931").unwrap();
        assert_eq!(id, "4006381333931");
        assert_eq!(t, BarcodeType::Gtin13);
    }

    #[test]
    fn test_valid_ean8() {
        let (id, t) = resolve("96385074").unwrap();
        assert_eq!(id, "96385074");
        assert_eq!(t, BarcodeType::Gtin8);
    }

    #[test]
    fn test_valid_upc() {
        let (id, t) = resolve("036000291452").unwrap();
        assert_eq!(id, "036000291452");
        assert_eq!(t, BarcodeType::Gtin12);
    }

    #[test]
    fn test_valid_gtin14() {
        let (_, t) = resolve("14006381333938").unwrap();
        assert_eq!(t, BarcodeType::Gtin14);
    }

    #[test]
    fn test_isbn13_detected() {
        let (id, t) = resolve("978-0-306-40615-7").unwrap();
        assert_eq!(id, "9780306406157");
        assert_eq!(t, BarcodeType::Isbn13);
    }

    #[test]
    fn test_bad_checksum_rejected() {
        assert_eq!(
            resolve("4006381333932"),
            Err(BarcodeError::BadChecksum("4006381333932".to_string()))
        );
    }

    #[test]
    fn test_short_code_rejected() {
        assert_eq!(resolve("123"), Err(BarcodeError::BadLength(3)));
    }

    #[test]
    fn test_noise_rejected_not_truncated() {
        assert!(matches!(
            resolve("EAN4006381333931"),
            Err(BarcodeError::NonNumeric(_))
        ));
    }

    #[test]
    fn test_empty_rejected() {
        assert_eq!(resolve("   "), Err(BarcodeError::Empty));
    }

    #[test]
    fn test_country_from_prefix() {
        assert_eq!(country("4006381333931", BarcodeType::Gtin13), Some("Germany"));
        assert_eq!(
            country("036000291452", BarcodeType::Gtin12),
            Some("United States / Canada")
        );
        // Packaging indicator does not shift the prefix.
        assert_eq!(country("14006381333938", BarcodeType::Gtin14), Some("Germany"));
    }

    #[test]
    fn test_isbn_skips_country() {
        assert_eq!(country("9780306406157", BarcodeType::Isbn13), None);
    }

    #[test]
    fn test_same_gtin_upc_padding() {
        assert!(same_gtin("0036000291452", "036000291452"));
        assert!(!same_gtin("4006381333931", "036000291452"));
    }

    #[test]
    fn test_same_gtin_ignores_separators() {
        assert!(same_gtin("978-0-306-40615-7", "9780306406157"));
        assert!(same_gtin("4006381333931", "4006 3813 33931"));
        assert!(!same_gtin("EAN4006381333931", "4006381333931"));
    }
}
