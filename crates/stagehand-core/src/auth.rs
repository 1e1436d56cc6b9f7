//! Challenge-response authentication.
//!
//! The server stores `secret = base64(sha256(password + salt))`. Each
//! connection gets a fresh challenge, and the client proves knowledge of the
//! password by sending `base64(sha256(secret + challenge))`. All encodings are
//! standard base64 with padding.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};

/// Salt and derived secret for a configured password.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    /// Random salt, handed to clients in `Hello`.
    pub salt: String,
    /// Secret derived from the password and salt.
    pub secret: String,
}

impl Credentials {
    /// Derive credentials for `password` with a fresh salt.
    pub fn from_password(password: &str) -> Self {
        let salt = generate_salt();
        let secret = generate_secret(password, &salt);
        Self { salt, secret }
    }
}

/// 32 random bytes, base64-encoded.
pub fn generate_salt() -> String {
    let random_bytes: [u8; 32] = rand::random();
    STANDARD.encode(random_bytes)
}

/// A per-connection challenge. Same shape as a salt.
pub fn generate_challenge() -> String {
    generate_salt()
}

/// Random password for servers that require auth but have none configured.
pub fn generate_password() -> String {
    let random_bytes: [u8; 12] = rand::random();
    STANDARD.encode(random_bytes)
}

/// `base64(sha256(password + salt))`
pub fn generate_secret(password: &str, salt: &str) -> String {
    hash_concat(password, salt)
}

/// `base64(sha256(secret + challenge))`, the value a client must send.
pub fn authentication_string(secret: &str, challenge: &str) -> String {
    hash_concat(secret, challenge)
}

/// Check a client's authentication string against the expected value.
pub fn check_authentication(secret: &str, challenge: &str, candidate: &str) -> bool {
    let expected = authentication_string(secret, challenge);
    constant_time_eq(expected.as_bytes(), candidate.as_bytes())
}

fn hash_concat(first: &str, second: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(first.as_bytes());
    hasher.update(second.as_bytes());
    STANDARD.encode(hasher.finalize())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn salt_is_32_bytes_base64() {
        let salt = generate_salt();
        let decoded = STANDARD.decode(&salt).unwrap();
        assert_eq!(decoded.len(), 32);
        assert!(salt.ends_with('='));
    }

    #[test]
    fn salts_are_unique() {
        assert_ne!(generate_salt(), generate_salt());
        assert_ne!(generate_challenge(), generate_challenge());
    }

    #[test]
    fn generated_password_nonempty() {
        let password = generate_password();
        assert_eq!(STANDARD.decode(&password).unwrap().len(), 12);
    }

    #[test]
    fn secret_matches_known_vector() {
        // sha256("supersecretpassword" + "lM1GncleQOaCu9lT1yeUZhFYnqhsLLP1G5lAGo3ixaI=")
        let secret = generate_secret(
            "supersecretpassword",
            "lM1GncleQOaCu9lT1yeUZhFYnqhsLLP1G5lAGo3ixaI=",
        );
        let mut hasher = Sha256::new();
        hasher.update(b"supersecretpasswordlM1GncleQOaCu9lT1yeUZhFYnqhsLLP1G5lAGo3ixaI=");
        assert_eq!(secret, STANDARD.encode(hasher.finalize()));
    }

    #[test]
    fn round_trip_accepts_correct_password() {
        let creds = Credentials::from_password("hunter2");
        let challenge = generate_challenge();
        let client_secret = generate_secret("hunter2", &creds.salt);
        let auth = authentication_string(&client_secret, &challenge);
        assert!(check_authentication(&creds.secret, &challenge, &auth));
    }

    #[test]
    fn wrong_password_rejected() {
        let creds = Credentials::from_password("hunter2");
        let challenge = generate_challenge();
        let client_secret = generate_secret("hunter3", &creds.salt);
        let auth = authentication_string(&client_secret, &challenge);
        assert!(!check_authentication(&creds.secret, &challenge, &auth));
    }

    #[test]
    fn stale_challenge_rejected() {
        let creds = Credentials::from_password("pw");
        let auth = authentication_string(&creds.secret, &generate_challenge());
        assert!(!check_authentication(&creds.secret, &generate_challenge(), &auth));
    }

    #[test]
    fn length_mismatch_rejected() {
        assert!(!check_authentication("s", "c", ""));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn any_single_byte_mutation_fails(
                password in "[ -~]{1,32}",
                index in 0usize..44,
                replacement in proptest::char::range('!', '~'),
            ) {
                let creds = Credentials::from_password(&password);
                let challenge = generate_challenge();
                let auth = authentication_string(&creds.secret, &challenge);
                prop_assert!(check_authentication(&creds.secret, &challenge, &auth));

                let mut bytes = auth.into_bytes();
                let original = bytes[index];
                prop_assume!(original != replacement as u8);
                bytes[index] = replacement as u8;
                let mutated = String::from_utf8(bytes).unwrap();
                prop_assert!(!check_authentication(&creds.secret, &challenge, &mutated));
            }
        }
    }
}
