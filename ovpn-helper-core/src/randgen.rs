//! Randomness and identifier helpers.

use crate::error::{Error, Result};
use rand::RngCore;

lazy_static::lazy_static! {
    static ref NON_ALPHANUMERIC: regex::Regex = regex::Regex::new(r"[^a-zA-Z0-9]+").unwrap();
}

/// `n` cryptographically secure random bytes.
pub fn rand_bytes(n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    buf
}

/// Up to 10 attempts of: generate `ceil(n*1.25)` random bytes, base64 encode
/// (no padding), strip non-alphanumerics, succeed once at least `n`
/// characters remain. Returns the first `n` characters.
pub fn rand_str(n: usize) -> Result<String> {
    let want = ((n as f64) * 1.25).ceil() as usize;
    for _ in 0..10 {
        let bytes = rand_bytes(want);
        let encoded = base64::encode_config(&bytes, base64::STANDARD_NO_PAD);
        let stripped = NON_ALPHANUMERIC.replace_all(&encoded, "");
        if stripped.len() >= n {
            return Ok(stripped[..n].to_string());
        }
    }
    Err(Error::RandStrExhausted)
}

/// 16 cryptographically random bytes, hex-encoded without dashes.
pub fn uuid() -> String {
    hex::encode(rand_bytes(16))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rand_str_has_exact_length_and_alphabet() {
        for n in [1, 8, 32, 64].iter() {
            let s = rand_str(*n).unwrap();
            assert_eq!(s.len(), *n);
            assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn uuid_is_32_hex_chars() {
        let id = uuid();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
