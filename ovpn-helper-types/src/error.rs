use err_derive::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
#[error(no_from)]
pub enum Error {
    #[error(display = "invalid profile id")]
    InvalidId,

    #[error(display = "invalid event payload")]
    InvalidEvent(#[error(source)] serde_json::Error),
}
