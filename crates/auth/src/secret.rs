use rand::RngCore;
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;

use jobstream_core::JobToken;

/// Entropy of a job token before hex encoding.
pub const TOKEN_BYTES: usize = 32;

/// Generate an unguessable job token (32 bytes from the OS RNG, hex encoded).
pub fn generate_token() -> JobToken {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    JobToken::new(hex::encode(bytes))
}

/// Compare two secrets without leaking the position of the first mismatch.
///
/// Length differences return early; lengths are not secret here.
pub fn secure_eq(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}
