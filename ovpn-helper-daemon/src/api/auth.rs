//! Control-API authentication: the shared-secret bootstrap and the
//! per-request middleware that enforces it.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use ovpn_helper_core::paths::Paths;
use ovpn_helper_core::randgen;
use std::fs;
use std::sync::Arc;
use subtle::ConstantTimeEq;

const REQUIRED_USER_AGENT: &str = "pritunl";

/// Reads the on-disk shared secret, generating one on first run. A file
/// that exists but is empty is treated as corrupt and regenerated once.
pub fn bootstrap(paths: &Paths) -> std::io::Result<String> {
    paths.ensure_auth_parent()?;
    let path = paths.auth_path();

    match fs::read_to_string(&path) {
        Ok(contents) if !contents.is_empty() => Ok(contents),
        Ok(_) => {
            fs::remove_file(&path)?;
            generate_and_write(&path)
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => generate_and_write(&path),
        Err(err) => Err(err),
    }
}

fn generate_and_write(path: &std::path::Path) -> std::io::Result<String> {
    let key = randgen::rand_str(64).map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    fs::write(path, &key)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o644))?;
    }
    Ok(key)
}

/// Shared state the auth middleware checks every request against.
pub struct AuthState {
    pub key: String,
}

/// Rejects any request that carries `Origin`/`Referer`, doesn't identify
/// itself as `pritunl`, or whose `Auth-Key` doesn't match the bootstrapped
/// secret (compared in constant time).
pub async fn require_auth_key(
    State(state): State<Arc<AuthState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let headers = req.headers();

    if headers.contains_key("origin") || headers.contains_key("referer") {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if user_agent != REQUIRED_USER_AGENT {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let presented = headers
        .get("auth-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if presented.as_bytes().ct_eq(state.key.as_bytes()).unwrap_u8() != 1 {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(req).await)
}
