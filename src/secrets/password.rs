//! Password generation and validation.

use rand::Rng;

const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const SYMBOLS: &[u8] = b"!@#$%^&*()-_=+[]{}";

/// Generate a cryptographically secure password of `length` characters
/// drawn from lower/upper/digit/symbol classes, guaranteeing at least one
/// character from each class when `length >= 4`.
pub fn generate_password(length: usize) -> String {
    let mut rng = rand::thread_rng();
    let alphabet: Vec<u8> = [LOWER, UPPER, DIGITS, SYMBOLS].concat();
    let mut password: Vec<u8> = (0..length)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())])
        .collect();

    if length >= 4 {
        let classes = [LOWER, UPPER, DIGITS, SYMBOLS];
        for (i, class) in classes.iter().enumerate() {
            password[i] = class[rng.gen_range(0..class.len())];
        }
        // Shuffle so the guaranteed characters aren't always in the first
        // four positions.
        for i in (1..password.len()).rev() {
            let j = rng.gen_range(0..=i);
            password.swap(i, j);
        }
    }

    String::from_utf8(password).expect("alphabet is ASCII")
}

/// One violation of a [`PasswordPolicy`], returned by [`validate_password`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordIssue {
    /// Shorter than the policy's minimum length.
    TooShort { min: usize, actual: usize },
    /// Missing a lowercase letter.
    MissingLowercase,
    /// Missing an uppercase letter.
    MissingUppercase,
    /// Missing a digit.
    MissingDigit,
    /// Missing a symbol.
    MissingSymbol,
}

impl std::fmt::Display for PasswordIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooShort { min, actual } => {
                write!(f, "password is {actual} characters, minimum is {min}")
            }
            Self::MissingLowercase => write!(f, "password must contain a lowercase letter"),
            Self::MissingUppercase => write!(f, "password must contain an uppercase letter"),
            Self::MissingDigit => write!(f, "password must contain a digit"),
            Self::MissingSymbol => write!(f, "password must contain a symbol"),
        }
    }
}

/// Minimum-strength requirements checked by [`validate_password`].
#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    /// Minimum length, defaults to 8.
    pub min_length: usize,
    /// Require at least one lowercase letter.
    pub require_lowercase: bool,
    /// Require at least one uppercase letter.
    pub require_uppercase: bool,
    /// Require at least one digit.
    pub require_digit: bool,
    /// Require at least one symbol.
    pub require_symbol: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            require_lowercase: true,
            require_uppercase: true,
            require_digit: true,
            require_symbol: true,
        }
    }
}

/// Validate `password` against `policy`, returning every violation found
/// (not just the first).
pub fn validate_password(password: &str, policy: &PasswordPolicy) -> Vec<PasswordIssue> {
    let mut issues = Vec::new();

    if password.len() < policy.min_length {
        issues.push(PasswordIssue::TooShort {
            min: policy.min_length,
            actual: password.len(),
        });
    }
    if policy.require_lowercase && !password.bytes().any(|b| b.is_ascii_lowercase()) {
        issues.push(PasswordIssue::MissingLowercase);
    }
    if policy.require_uppercase && !password.bytes().any(|b| b.is_ascii_uppercase()) {
        issues.push(PasswordIssue::MissingUppercase);
    }
    if policy.require_digit && !password.bytes().any(|b| b.is_ascii_digit()) {
        issues.push(PasswordIssue::MissingDigit);
    }
    if policy.require_symbol && !password.bytes().any(|b| SYMBOLS.contains(&b)) {
        issues.push(PasswordIssue::MissingSymbol);
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_password_has_requested_length() {
        let password = generate_password(16);
        assert_eq!(password.len(), 16);
    }

    #[test]
    fn generated_password_passes_default_policy() {
        for _ in 0..20 {
            let password = generate_password(12);
            assert!(validate_password(&password, &PasswordPolicy::default()).is_empty());
        }
    }

    #[test]
    fn short_password_fails_validation() {
        let issues = validate_password("ab", &PasswordPolicy::default());
        assert!(issues.contains(&PasswordIssue::TooShort { min: 8, actual: 2 }));
    }

    #[test]
    fn missing_classes_are_all_reported() {
        let issues = validate_password("lowercase", &PasswordPolicy::default());
        assert!(issues.contains(&PasswordIssue::MissingUppercase));
        assert!(issues.contains(&PasswordIssue::MissingDigit));
        assert!(issues.contains(&PasswordIssue::MissingSymbol));
    }
}
