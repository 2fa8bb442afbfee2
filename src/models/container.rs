use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// ISO 6346 container identification code, e.g. `MSCU6639870`.
///
/// Layout: three-letter owner code, category identifier (`U`, `J` or `Z`),
/// six-digit serial number and a check digit. Codes are stored upper-case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContainerCode(String);

const CATEGORY_IDENTIFIERS: [char; 3] = ['U', 'J', 'Z'];

impl ContainerCode {
    pub fn parse(input: &str) -> Result<Self, EngineError> {
        let code = input.trim().to_ascii_uppercase();
        let invalid = |reason: &str| EngineError::InvalidContainerCode {
            code: input.to_string(),
            reason: reason.to_string(),
        };

        if code.len() != 11 || !code.is_ascii() {
            return Err(invalid("expected 11 ASCII characters"));
        }

        let chars: Vec<char> = code.chars().collect();
        if !chars[..3].iter().all(|c| c.is_ascii_uppercase()) {
            return Err(invalid("owner code must be three letters"));
        }
        if !CATEGORY_IDENTIFIERS.contains(&chars[3]) {
            return Err(invalid("category identifier must be U, J or Z"));
        }
        if !chars[4..].iter().all(|c| c.is_ascii_digit()) {
            return Err(invalid("serial number and check digit must be digits"));
        }

        let expected = check_digit(&code[..10]);
        let actual = chars[10].to_digit(10).unwrap_or(u32::MAX);
        if expected != actual {
            return Err(invalid(&format!("check digit should be {}", expected)));
        }

        Ok(Self(code))
    }

    /// Builds a code from owner prefix (owner code plus category, e.g.
    /// `MSCU`) and serial number, appending the computed check digit.
    pub fn compose(prefix: &str, serial: u32) -> Result<Self, EngineError> {
        if serial > 999_999 {
            return Err(EngineError::InvalidContainerCode {
                code: format!("{}{}", prefix, serial),
                reason: "serial number must fit in six digits".to_string(),
            });
        }
        let body = format!("{}{:06}", prefix.trim().to_ascii_uppercase(), serial);
        if body.len() != 10 || !body.is_ascii() {
            return Err(EngineError::InvalidContainerCode {
                code: body,
                reason: "prefix must be four letters".to_string(),
            });
        }
        let digit = check_digit(&body);
        Self::parse(&format!("{}{}", body, digit))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn owner_code(&self) -> &str {
        &self.0[..3]
    }
}

/// Letter values skip multiples of 11 (A=10, B=12, ..., K=21, L=23, ...).
fn letter_value(c: char) -> u32 {
    let mut value = 10;
    for letter in 'A'..=c {
        if value % 11 == 0 {
            value += 1;
        }
        if letter == c {
            break;
        }
        value += 1;
    }
    value
}

/// Expects ten ASCII characters; letters must be upper-case.
fn check_digit(body: &str) -> u32 {
    let sum: u32 = body
        .chars()
        .enumerate()
        .map(|(i, c)| {
            let value = c.to_digit(10).unwrap_or_else(|| letter_value(c));
            value << i
        })
        .sum();
    sum % 11 % 10
}

impl fmt::Display for ContainerCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContainerCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for ContainerCode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ContainerCode {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ContainerCode> for String {
    fn from(code: ContainerCode) -> Self {
        code.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letter_values_skip_multiples_of_eleven() {
        assert_eq!(letter_value('A'), 10);
        assert_eq!(letter_value('B'), 12);
        assert_eq!(letter_value('K'), 21);
        assert_eq!(letter_value('L'), 23);
        assert_eq!(letter_value('U'), 32);
        assert_eq!(letter_value('V'), 34);
        assert_eq!(letter_value('Z'), 38);
    }

    #[test]
    fn test_known_codes_validate() {
        for raw in ["MSCU6639870", "CSQU3054383", "TGHU1234567", "MAEU1000018"] {
            assert!(ContainerCode::parse(raw).is_ok(), "{} should be valid", raw);
        }
    }

    #[test]
    fn test_lowercase_input_is_normalized() {
        let code = ContainerCode::parse(" mscu6639870 ").unwrap();
        assert_eq!(code.as_str(), "MSCU6639870");
        assert_eq!(code.owner_code(), "MSC");
    }

    #[test]
    fn test_wrong_check_digit_rejected() {
        let err = ContainerCode::parse("MSCU6639871").unwrap_err();
        assert!(matches!(err, EngineError::InvalidContainerCode { .. }));
    }

    #[test]
    fn test_malformed_codes_rejected() {
        for raw in ["", "MSCU663987", "MSCX6639870", "M5CU6639870", "MSCU66398A0", "MSCU66398700"] {
            assert!(ContainerCode::parse(raw).is_err(), "{:?} should be rejected", raw);
        }
    }

    #[test]
    fn test_compose_appends_check_digit() {
        let code = ContainerCode::compose("MSCU", 663987).unwrap();
        assert_eq!(code.as_str(), "MSCU6639870");
        let code = ContainerCode::compose("csqu", 305438).unwrap();
        assert_eq!(code.as_str(), "CSQU3054383");
        assert!(ContainerCode::compose("MSCU", 1_000_000).is_err());
        assert!(ContainerCode::compose("MSC", 1).is_err());
    }

    #[test]
    fn test_serde_validates() {
        let code: ContainerCode = serde_json::from_str("\"TGHU1234567\"").unwrap();
        assert_eq!(serde_json::to_string(&code).unwrap(), "\"TGHU1234567\"");
        assert!(serde_json::from_str::<ContainerCode>("\"TGHU1234568\"").is_err());
    }
}
