use rand::Rng;

use crate::Result;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

/// Generate a random agent credential.
pub fn generate_credential() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..48)
        .map(|_| {
            let idx = rng.random_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

/// Hash a credential using argon2id and a pepper.
pub fn hash_credential(credential: &str, pepper: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let password = format!("{credential}{pepper}");
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow::anyhow!("failed to hash credential: {}", err))?
        .to_string())
}

/// Check a provided credential against the stored hash.
pub fn verify_credential(credential: &str, stored_hash: &str, pepper: &str) -> bool {
    let Ok(password_hash) = PasswordHash::new(stored_hash) else {
        return false;
    };
    let password = format!("{credential}{pepper}");
    Argon2::default()
        .verify_password(password.as_bytes(), &password_hash)
        .is_ok()
}
