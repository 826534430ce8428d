use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

const SCHEME: &str = "pbkdf2";
const KEY_LEN: usize = 32;

/// Hashes a password as `pbkdf2$<rounds>$<salt>$<hash>` (PBKDF2-HMAC-SHA256)
pub fn hash_password(password: &str, rounds: u32) -> String {
    let salt = *Uuid::new_v4().as_bytes();
    let hash = derive(password, &salt, rounds);
    format!(
        "{}${}${}${}",
        SCHEME,
        rounds,
        STANDARD_NO_PAD.encode(salt),
        STANDARD_NO_PAD.encode(hash)
    )
}

fn derive(password: &str, salt: &[u8], rounds: u32) -> [u8; KEY_LEN] {
    let mut out = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, rounds, &mut out);
    out
}

/// Checks a password against a stored hash in constant time
pub fn verify_password(password: &str, stored: &str) -> AppResult<bool> {
    let corrupt = || AppError::Internal("Unrecognized password hash format".to_string());

    let mut parts = stored.split('$');
    let (Some(SCHEME), Some(rounds), Some(salt), Some(hash), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return Err(corrupt());
    };

    let rounds: u32 = rounds.parse().map_err(|_| corrupt())?;
    let salt = STANDARD_NO_PAD.decode(salt).map_err(|_| corrupt())?;
    let expected = STANDARD_NO_PAD.decode(hash).map_err(|_| corrupt())?;

    let actual = derive(password, &salt, rounds);
    Ok(constant_time_eq(&actual, &expected))
}

/// Runs the key derivation for an account that does not exist and discards it
pub fn burn_verification(password: &str, rounds: u32) {
    let salt = [0u8; 16];
    let hash = derive(password, &salt, rounds);
    std::hint::black_box(hash);
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let stored = hash_password("hunter22", 1_000);
        assert!(stored.starts_with("pbkdf2$1000$"));
        assert!(verify_password("hunter22", &stored).unwrap());
        assert!(!verify_password("hunter23", &stored).unwrap());
    }

    #[test]
    fn test_salts_differ() {
        assert_ne!(hash_password("same", 1_000), hash_password("same", 1_000));
    }

    #[test]
    fn test_corrupt_hash_is_an_error() {
        assert!(verify_password("x", "plaintext").is_err());
        assert!(verify_password("x", "bcrypt$10$abc$def").is_err());
    }

    #[test]
    fn test_burn_verification_costs_like_a_real_check() {
        let rounds = 20_000;
        let stored = hash_password("hunter22", rounds);

        let started = std::time::Instant::now();
        verify_password("wrong", &stored).unwrap();
        let real = started.elapsed();

        let started = std::time::Instant::now();
        burn_verification("wrong", rounds);
        let burned = started.elapsed();

        // same derivation, so well within an order of magnitude either way
        assert!(burned * 10 > real, "burned {burned:?} vs real {real:?}");
        assert!(real * 10 > burned, "burned {burned:?} vs real {real:?}");
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
