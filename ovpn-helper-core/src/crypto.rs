//! The RSA-OAEP-SHA512 credential envelope.

use crate::error::{Error, Result};
use crate::randgen;
use ovpn_helper_types::AuthData;
use rsa::{PaddingScheme, PublicKey, RsaPublicKey};
use sha2::Sha512;

/// Literal prefix identifying an RSA-OAEP encrypted password field.
pub const RSA_ENCRYPTED_PREFIX: &str = "<%=RSA_ENCRYPTED=%>";

/// Parses a PEM-encoded PKCS#1 RSA public key.
pub fn parse_public_key(pem: &str) -> Result<RsaPublicKey> {
    rsa::pkcs1::FromRsaPublicKey::from_pkcs1_pem(pem).map_err(|_| Error::InvalidPublicKey)
}

/// Builds the envelope written as the second line of a profile's `.auth`
/// file: the literal prefix followed by base64(standard) of
/// `RSA-OAEP(sha512, label="")` over the JSON encoding of `AuthData`.
pub fn encrypt_auth_data(public_key: &RsaPublicKey, token: &str, password: &str) -> Result<String> {
    let nonce = randgen::rand_str(32)?;
    let timestamp = chrono::Utc::now().timestamp();
    let auth_data = AuthData {
        token: token.to_owned(),
        password: password.to_owned(),
        nonce,
        timestamp,
    };
    let plaintext = serde_json::to_vec(&auth_data).map_err(Error::Serialize)?;

    let padding = PaddingScheme::new_oaep::<Sha512>();
    let mut rng = rand::rngs::OsRng;
    let ciphertext = public_key
        .encrypt(&mut rng, padding, &plaintext)
        .map_err(Error::Encrypt)?;

    let encoded = base64::encode(&ciphertext);
    Ok(format!("{}{}", RSA_ENCRYPTED_PREFIX, encoded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::{RsaPrivateKey, pkcs1::ToRsaPublicKey};

    fn test_keypair() -> (RsaPrivateKey, RsaPublicKey) {
        let mut rng = rand::rngs::OsRng;
        let private = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let public = RsaPublicKey::from(&private);
        (private, public)
    }

    #[test]
    fn envelope_round_trips_through_the_matching_private_key() {
        let (private, public) = test_keypair();
        let envelope = encrypt_auth_data(&public, "tok123", "hunter2").unwrap();
        assert!(envelope.starts_with(RSA_ENCRYPTED_PREFIX));

        let ciphertext = base64::decode(&envelope[RSA_ENCRYPTED_PREFIX.len()..]).unwrap();
        let padding = PaddingScheme::new_oaep::<Sha512>();
        let plaintext = private.decrypt(padding, &ciphertext).unwrap();
        let auth_data: AuthData = serde_json::from_slice(&plaintext).unwrap();

        assert_eq!(auth_data.password, "hunter2");
        assert_eq!(auth_data.token, "tok123");
        assert_eq!(auth_data.nonce.len(), 32);
        let now = chrono::Utc::now().timestamp();
        assert!((now - auth_data.timestamp).abs() < 5);
    }

    #[test]
    fn parses_pkcs1_pem_public_key() {
        let (private, public) = test_keypair();
        let pem = public.to_pkcs1_pem().unwrap();
        let parsed = parse_public_key(&pem).unwrap();
        assert_eq!(parsed, public);
        let _ = private;
    }
}
