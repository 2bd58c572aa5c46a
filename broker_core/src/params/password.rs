//! CSPRNG password generation for the `generatePassword` source.

use rand::Rng;

use crate::error::{ErrorKind, Result};

/// Draw `length` characters uniformly and independently from `dictionary`,
/// treated as a multiset - a repeated char is sampled with proportionally
/// higher weight rather than being deduplicated.
pub fn generate_password(length: usize, dictionary: &str) -> Result<String> {
    let alphabet: Vec<char> = dictionary.chars().collect();
    if alphabet.is_empty() {
        return Err(ErrorKind::ConfigurationError("generatePassword dictionary must contain at least one character".into()).into());
    }
    let mut rng = rand::thread_rng();
    Ok((0..length).map(|_| alphabet[rng.gen_range(0..alphabet.len())]).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_requested_length() {
        let p = generate_password(32, "abc").unwrap();
        assert_eq!(p.chars().count(), 32);
    }

    #[test]
    fn only_uses_dictionary_characters() {
        let p = generate_password(200, "xy").unwrap();
        assert!(p.chars().all(|c| c == 'x' || c == 'y'));
    }

    #[test]
    fn empty_dictionary_is_rejected() {
        assert!(generate_password(8, "").is_err());
    }

    #[test]
    fn zero_length_yields_empty_string() {
        assert_eq!(generate_password(0, "abc").unwrap(), "");
    }
}
