//! Share token value generation.

use crate::error::SecurityError;
use crate::guard::fill_random;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Largest multiple of the alphabet size that fits in a byte. Bytes at or
/// above it are discarded so every character is equally likely.
const REJECTION_BOUND: u8 = (256 / ALPHABET.len() * ALPHABET.len()) as u8;

/// Random alphanumeric string of `length` characters from the OS CSPRNG.
pub fn generate_token(length: usize) -> Result<String, SecurityError> {
    let mut token = String::with_capacity(length);
    let mut buf = [0u8; 64];

    while token.len() < length {
        fill_random(&mut buf)?;
        for &byte in buf.iter().filter(|&&b| b < REJECTION_BOUND) {
            if token.len() == length {
                break;
            }
            token.push(char::from(ALPHABET[usize::from(byte) % ALPHABET.len()]));
        }
    }
    Ok(token)
}
