use err_derive::Error;
use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
#[error(no_from)]
pub enum Error {
    #[error(display = "failed to write temporary file {:?}", _0)]
    TempFileWrite(std::path::PathBuf, #[error(source)] io::Error),

    #[error(display = "failed to spawn OpenVPN process")]
    Spawn(#[error(source)] io::Error),

    #[error(display = "failed to wait for OpenVPN process")]
    Wait(#[error(source)] io::Error),

    #[error(display = "invalid PEM public key")]
    InvalidPublicKey,

    #[error(display = "RSA encryption failed")]
    Encrypt(#[error(source)] rsa::errors::Error),

    #[error(display = "failed to serialize auth data")]
    Serialize(#[error(source)] serde_json::Error),

    #[error(display = "no TAP adapter available")]
    NoTapAvailable,

    #[error(display = "scutil invocation failed")]
    Scutil(#[error(source)] io::Error),

    #[error(display = "could not determine primary scutil service")]
    NoPrimaryService,

    #[error(display = "RandStr exhausted its retry budget")]
    RandStrExhausted,

    #[error(display = "I/O error")]
    Io(#[error(source)] io::Error),
}
