use serde::{Deserialize, Serialize};

/// The public, wire-visible view of a profile.
///
/// Fields the GUI must never read back (`data`, `username`, `password`,
/// `server_public_key`) are `skip_serializing`, matching the original's
/// `json:"-"` tagging on the same fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,

    #[serde(skip_serializing)]
    pub data: String,

    #[serde(skip_serializing, default)]
    pub username: Option<String>,

    #[serde(skip_serializing, default)]
    pub password: Option<String>,

    #[serde(skip_serializing, default)]
    pub server_public_key: Option<String>,

    #[serde(default)]
    pub reconnect: bool,

    #[serde(default)]
    pub status: Status,

    #[serde(default)]
    pub timestamp: i64,

    #[serde(default)]
    pub server_addr: String,

    #[serde(default)]
    pub client_addr: String,
}

impl Profile {
    /// A fresh profile carrying only the five user-supplied inputs, with
    /// observable fields reset — the public-facing half of `Copy()`.
    pub fn copy_inputs(&self) -> Profile {
        Profile {
            id: self.id.clone(),
            data: self.data.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            server_public_key: self.server_public_key.clone(),
            reconnect: self.reconnect,
            status: Status::Disconnected,
            timestamp: 0,
            server_addr: String::new(),
            client_addr: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl Default for Status {
    fn default() -> Self {
        Status::Disconnected
    }
}
