//! Temp-file materialization and OpenVPN argument construction.

use crate::crypto;
use crate::error::{Error, Result};
use crate::paths::Paths;
use ovpn_helper_types::Profile;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

#[cfg(target_os = "macos")]
const UP_SCRIPT: &str = include_str!("scripts/darwin_up.sh");
#[cfg(target_os = "macos")]
const DOWN_SCRIPT: &str = include_str!("scripts/darwin_down.sh");
const RESOLVED_UP_SCRIPT: &str = include_str!("scripts/linux_resolved_up.sh");
const RESOLVED_DOWN_SCRIPT: &str = include_str!("scripts/linux_resolved_down.sh");
const CLASSIC_UP_SCRIPT: &str = include_str!("scripts/linux_classic_up.sh");
const CLASSIC_DOWN_SCRIPT: &str = include_str!("scripts/linux_classic_down.sh");
const BLOCK_SCRIPT: &str = include_str!("scripts/block.sh");

/// Everything materialize() produced for one Start, so it can be cleaned
/// up by clearStatus and fed into the OpenVPN command line.
pub struct Materialized {
    pub config_path: PathBuf,
    pub auth_path: Option<PathBuf>,
    pub up_path: Option<PathBuf>,
    pub down_path: Option<PathBuf>,
    pub block_path: Option<PathBuf>,
    pub rem_paths: Vec<PathBuf>,
}

#[cfg(unix)]
fn write_file(path: &Path, contents: &str, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::write(path, contents).map_err(|e| Error::TempFileWrite(path.to_owned(), e))?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| Error::TempFileWrite(path.to_owned(), e))?;
    Ok(())
}

#[cfg(windows)]
fn write_file(path: &Path, contents: &str, _mode: u32) -> Result<()> {
    fs::write(path, contents).map_err(|e| Error::TempFileWrite(path.to_owned(), e))
}

fn probe_resolved() -> bool {
    fs::read_to_string("/etc/resolv.conf")
        .map(|s| s.contains("systemd-resolved") || s.contains("127.0.0.53"))
        .unwrap_or(false)
}

/// Writes every temp file a Start needs and returns their paths.
pub fn materialize(profile: &Profile, paths: &Paths, token: &str) -> Result<Materialized> {
    let dir = paths.ensure_temp_dir().map_err(Error::Io)?;
    let mut rem_paths = Vec::new();

    let config_path = dir.join(&profile.id);
    write_file(&config_path, &profile.data, 0o600)?;
    rem_paths.push(config_path.clone());

    let has_credentials = profile.username.is_some() && profile.password.is_some();
    let auth_path = if has_credentials || profile.server_public_key.is_some() {
        let username = profile.username.clone().unwrap_or_default();
        let password = profile.password.clone().unwrap_or_default();
        let password_line = match &profile.server_public_key {
            Some(pem) => {
                let key = crypto::parse_public_key(pem)?;
                crypto::encrypt_auth_data(&key, token, &password)?
            }
            None => password,
        };
        let path = dir.join(format!("{}.auth", profile.id));
        write_file(&path, &format!("{}\n{}\n", username, password_line), 0o600)?;
        rem_paths.push(path.clone());
        Some(path)
    } else {
        None
    };

    #[cfg(windows)]
    let (up_path, down_path) = (None, None);

    #[cfg(not(windows))]
    let (up_path, down_path) = {
        let (up, down) = script_bodies();
        let up_path = dir.join(format!("{}-up.sh", profile.id));
        let down_path = dir.join(format!("{}-down.sh", profile.id));
        write_file(&up_path, up, 0o755)?;
        write_file(&down_path, down, 0o755)?;
        rem_paths.push(up_path.clone());
        rem_paths.push(down_path.clone());
        (Some(up_path), Some(down_path))
    };

    #[cfg(windows)]
    let block_path = None;

    #[cfg(not(windows))]
    let block_path = {
        let path = dir.join(format!("{}-block.sh", profile.id));
        write_file(&path, BLOCK_SCRIPT, 0o755)?;
        rem_paths.push(path.clone());
        Some(path)
    };

    Ok(Materialized {
        config_path,
        auth_path,
        up_path,
        down_path,
        block_path,
        rem_paths,
    })
}

#[cfg(target_os = "macos")]
fn script_bodies() -> (&'static str, &'static str) {
    (UP_SCRIPT, DOWN_SCRIPT)
}

#[cfg(all(not(windows), not(target_os = "macos")))]
fn script_bodies() -> (&'static str, &'static str) {
    if probe_resolved() {
        (RESOLVED_UP_SCRIPT, RESOLVED_DOWN_SCRIPT)
    } else {
        (CLASSIC_UP_SCRIPT, CLASSIC_DOWN_SCRIPT)
    }
}

/// Builds the `openvpn` command line. `tap_name` is only
/// consulted on Windows.
pub fn build_command(
    openvpn_bin: &Path,
    openvpn_dir: &Path,
    materialized: &Materialized,
    tap_name: Option<&str>,
) -> Command {
    let mut cmd = Command::new(openvpn_bin);
    cmd.current_dir(openvpn_dir);
    cmd.arg("--config").arg(&materialized.config_path);
    cmd.arg("--verb").arg("2");

    if cfg!(unix) {
        cmd.arg("--script-security").arg("2");
        if let (Some(up), Some(down)) = (&materialized.up_path, &materialized.down_path) {
            cmd.arg("--up").arg(up);
            cmd.arg("--down").arg(down);
        }
        if let Some(block) = &materialized.block_path {
            // The block script is wired to every hook point that can run
            // before the tunnel is fully up: route-pre-down, tls-verify,
            // ipchange, and route-up all point at the same script.
            cmd.arg("--route-pre-down").arg(block);
            cmd.arg("--tls-verify").arg(block);
            cmd.arg("--ipchange").arg(block);
            cmd.arg("--route-up").arg(block);
        }
    } else {
        cmd.arg("--script-security").arg("1");
        if let Some(tap) = tap_name {
            cmd.arg("--dev-node").arg(tap);
        }
    }

    if let Some(auth) = &materialized.auth_path {
        cmd.arg("--auth-user-pass").arg(auth);
    }

    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use ovpn_helper_types::Status;
    use rsa::pkcs1::ToRsaPublicKey;
    use rsa::{RsaPrivateKey, RsaPublicKey};

    fn make_profile(id: &str, username: Option<&str>, password: Option<&str>, server_public_key: Option<String>) -> Profile {
        Profile {
            id: id.to_owned(),
            data: "client\nremote example.com 1194\n".to_owned(),
            username: username.map(|s| s.to_owned()),
            password: password.map(|s| s.to_owned()),
            server_public_key,
            reconnect: false,
            status: Status::Disconnected,
            timestamp: 0,
            server_addr: String::new(),
            client_addr: String::new(),
        }
    }

    fn test_pubkey_pem() -> String {
        let mut rng = rand::rngs::OsRng;
        let private = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let public = RsaPublicKey::from(&private);
        public.to_pkcs1_pem().unwrap()
    }

    #[test]
    fn no_credentials_and_no_server_key_skips_auth_file() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::dev(&dir.path().join("exe"));
        let profile = make_profile("noauth", None, None, None);

        let materialized = materialize(&profile, &paths, "tok").unwrap();

        assert!(materialized.auth_path.is_none());
    }

    #[test]
    fn username_without_password_skips_auth_file() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::dev(&dir.path().join("exe"));
        let profile = make_profile("userOnly", Some("alice"), None, None);

        let materialized = materialize(&profile, &paths, "tok").unwrap();

        assert!(materialized.auth_path.is_none());
    }

    #[test]
    fn username_and_password_writes_plaintext_auth_file() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::dev(&dir.path().join("exe"));
        let profile = make_profile("userpass", Some("alice"), Some("hunter2"), None);

        let materialized = materialize(&profile, &paths, "tok").unwrap();

        let auth_path = materialized.auth_path.expect("auth file expected");
        let contents = fs::read_to_string(&auth_path).unwrap();
        assert_eq!(contents, "alice\nhunter2\n");
    }

    #[test]
    fn server_public_key_alone_writes_auth_file_without_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::dev(&dir.path().join("exe"));
        let profile = make_profile("keyonly", None, None, Some(test_pubkey_pem()));

        let materialized = materialize(&profile, &paths, "tok").unwrap();

        let auth_path = materialized.auth_path.expect("auth file expected");
        let contents = fs::read_to_string(&auth_path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next(), Some(""));
        assert!(lines.next().unwrap().starts_with(crypto::RSA_ENCRYPTED_PREFIX));
    }

    #[test]
    fn server_public_key_encrypts_the_password_line() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::dev(&dir.path().join("exe"));
        let profile = make_profile("userkey", Some("alice"), Some("hunter2"), Some(test_pubkey_pem()));

        let materialized = materialize(&profile, &paths, "tok").unwrap();

        let auth_path = materialized.auth_path.expect("auth file expected");
        let contents = fs::read_to_string(&auth_path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next(), Some("alice"));
        assert!(lines.next().unwrap().starts_with(crypto::RSA_ENCRYPTED_PREFIX));
    }

    #[test]
    fn build_command_omits_auth_flag_when_no_auth_file() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::dev(&dir.path().join("exe"));
        let profile = make_profile("noauth2", None, None, None);
        let materialized = materialize(&profile, &paths, "tok").unwrap();

        let cmd = build_command(Path::new("/usr/sbin/openvpn"), Path::new("/usr/sbin"), &materialized, None);

        let args: Vec<String> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert!(!args.iter().any(|a| a == "--auth-user-pass"));
    }
}
