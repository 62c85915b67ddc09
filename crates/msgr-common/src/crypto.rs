//! Password KDF and challenge-response digest for the login handshake.
//!
//! The client derives a password hash once per connection with
//! PBKDF2-HMAC-SHA512 (salt = lowercased account name); the server stores
//! the same value at registration time. During login the server issues a
//! random nonce and both sides compute HMAC-MD5 over it keyed with the
//! hex-encoded hash. The hex/ASCII forms are part of the wire contract —
//! both ends must feed the HMAC identical bytes.

use hmac::{Hmac, Mac};
use md5::Md5;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha512;

type HmacMd5 = Hmac<Md5>;

/// PBKDF2 iteration count. Fixed by the protocol; changing it breaks
/// every stored credential.
pub const KDF_ITERATIONS: u32 = 10_000;

/// Raw KDF output length in bytes (SHA-512 width).
pub const KDF_OUTPUT_LEN: usize = 64;

/// Challenge nonce length in bytes, before hex encoding.
pub const NONCE_LEN: usize = 64;

/// Derives the stored credential for an account: lowercase hex of
/// PBKDF2-HMAC-SHA512(password, lowercased account name, 10000 rounds).
///
/// Run once at connection-init (client) or registration (server), not per
/// handshake.
#[must_use]
pub fn password_hash_hex(password: &str, account_name: &str) -> String {
    let salt = account_name.to_lowercase();
    let mut output = [0u8; KDF_OUTPUT_LEN];
    pbkdf2::pbkdf2_hmac::<Sha512>(
        password.as_bytes(),
        salt.as_bytes(),
        KDF_ITERATIONS,
        &mut output,
    );
    hex::encode(output)
}

/// Generates a fresh challenge nonce: [`NONCE_LEN`] random bytes, hex
/// encoded for the 511 DATA field.
#[must_use]
pub fn issue_nonce() -> String {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    hex::encode(nonce)
}

/// Computes the handshake digest: HMAC-MD5 keyed with the hex-encoded
/// password hash over the hex-encoded nonce.
#[must_use]
pub fn challenge_digest(hash_hex: &[u8], nonce_hex: &[u8]) -> Vec<u8> {
    let mut mac = HmacMd5::new_from_slice(hash_hex).expect("HMAC accepts any key length");
    mac.update(nonce_hex);
    mac.finalize().into_bytes().to_vec()
}

/// Verifies a presented digest against the expected one in constant time.
#[must_use]
pub fn verify_digest(hash_hex: &[u8], nonce_hex: &[u8], presented: &[u8]) -> bool {
    let mut mac = HmacMd5::new_from_slice(hash_hex).expect("HMAC accepts any key length");
    mac.update(nonce_hex);
    mac.verify_slice(presented).is_ok()
}

/// Returns the current Unix timestamp in seconds.
///
/// Returns 0 if the system clock is before the Unix epoch.
#[must_use]
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
