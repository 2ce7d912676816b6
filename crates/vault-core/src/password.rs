//! Random password generation and a simple strength score

use rand::{rngs::OsRng, seq::SliceRandom};

use crate::error::{Result, VaultError};

const UPPERCASE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWERCASE: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const NUMBERS: &[u8] = b"0123456789";
const SYMBOLS: &[u8] = b"!@#$%^&*()_+-=[]{}|;:,.<>?";

pub const MIN_LENGTH: usize = 8;
pub const MAX_LENGTH: usize = 128;
pub const DEFAULT_LENGTH: usize = 16;

/// Character classes to draw from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordOptions {
    pub uppercase: bool,
    pub lowercase: bool,
    pub numbers: bool,
    pub symbols: bool,
}

impl Default for PasswordOptions {
    fn default() -> Self {
        Self {
            uppercase: true,
            lowercase: true,
            numbers: true,
            symbols: true,
        }
    }
}

impl PasswordOptions {
    fn charset(&self) -> Vec<u8> {
        let classes = [
            (self.uppercase, UPPERCASE),
            (self.lowercase, LOWERCASE),
            (self.numbers, NUMBERS),
            (self.symbols, SYMBOLS),
        ];

        classes
            .into_iter()
            .filter(|(enabled, _)| *enabled)
            .flat_map(|(_, chars)| chars.iter().copied())
            .collect()
    }
}

/// Generate a password of `length` characters from the OS RNG
///
/// Characters are chosen uniformly from the union of the enabled classes.
pub fn generate_password(length: usize, options: PasswordOptions) -> Result<String> {
    if !(MIN_LENGTH..=MAX_LENGTH).contains(&length) {
        return Err(VaultError::ValidationError(format!(
            "password length must be between {} and {}",
            MIN_LENGTH, MAX_LENGTH
        )));
    }

    let charset = options.charset();
    if charset.is_empty() {
        return Err(VaultError::ValidationError(
            "at least one character class must be enabled".to_string(),
        ));
    }

    let mut rng = OsRng;
    let password: String = (0..length)
        .filter_map(|_| charset.choose(&mut rng).map(|&b| b as char))
        .collect();

    Ok(password)
}

/// Coarse strength bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StrengthLabel {
    Weak,
    Fair,
    Good,
    Strong,
}

impl std::fmt::Display for StrengthLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StrengthLabel::Weak => "Weak",
            StrengthLabel::Fair => "Fair",
            StrengthLabel::Good => "Good",
            StrengthLabel::Strong => "Strong",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordStrength {
    /// 1 (weak) to 4 (strong)
    pub score: u8,
    pub label: StrengthLabel,
}

/// Score a password on length and character variety
///
/// One point each for length >= 8, >= 12, >= 16, and for containing
/// lowercase, uppercase, a digit and a symbol; the 0..=7 total is then
/// bucketed into four labels.
pub fn password_strength(password: &str) -> PasswordStrength {
    let length = password.chars().count();
    let checks = [
        length >= 8,
        length >= 12,
        length >= 16,
        password.chars().any(|c| c.is_ascii_lowercase()),
        password.chars().any(|c| c.is_ascii_uppercase()),
        password.chars().any(|c| c.is_ascii_digit()),
        password.chars().any(|c| !c.is_ascii_alphanumeric()),
    ];
    let points = checks.iter().filter(|passed| **passed).count();

    let label = match points {
        0..=2 => StrengthLabel::Weak,
        3..=4 => StrengthLabel::Fair,
        5 => StrengthLabel::Good,
        _ => StrengthLabel::Strong,
    };

    PasswordStrength {
        score: label as u8 + 1,
        label,
    }
}
