use serde::{Deserialize, Serialize};

/// Per-profile opaque server-issued token.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Token {
    pub profile_id: String,
    pub server_public_key_fingerprint: String,
    pub token: String,
    pub valid: bool,
}

impl Token {
    /// Zeroes the token on auth failure.
    pub fn init(&mut self) {
        self.token.clear();
        self.valid = false;
    }

    /// Refreshes the token's value before use.
    pub fn update(&mut self, token: impl Into<String>) {
        self.token = token.into();
    }
}

/// The plaintext that gets RSA-OAEP-SHA512 encrypted and base64-encoded
/// into the `.auth` file's password line when a profile carries a
/// `server_public_key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthData {
    pub token: String,
    pub password: String,
    pub nonce: String,
    pub timestamp: i64,
}
