//! Platform filesystem layout, with `--dev` mode collapsing
//! everything under `<exe_dir>/../dev/`, matching the original `GetRootDir`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Paths {
    dev: Option<PathBuf>,
}

impl Paths {
    /// Production paths for each supported platform.
    pub fn production() -> Self {
        Paths { dev: None }
    }

    /// Development paths: everything under `<exe_dir>/../dev/`.
    pub fn dev(exe_dir: &Path) -> Self {
        Paths {
            dev: Some(exe_dir.join("..").join("dev")),
        }
    }

    fn dev_path(&self, name: &str) -> Option<PathBuf> {
        self.dev.as_ref().map(|root| root.join(name))
    }

    fn ensure_parent(path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = fs::set_permissions(parent, fs::Permissions::from_mode(0o755));
            }
        }
        Ok(())
    }

    pub fn auth_path(&self) -> PathBuf {
        if let Some(p) = self.dev_path("auth") {
            return p;
        }
        cfg_if::cfg_if! {
            if #[cfg(windows)] {
                PathBuf::from(r"C:\ProgramData\Pritunl\auth")
            } else if #[cfg(target_os = "macos")] {
                PathBuf::from("/Applications/Pritunl.app/Contents/Resources/auth")
            } else {
                PathBuf::from("/var/run/pritunl.auth")
            }
        }
    }

    pub fn log_path(&self) -> PathBuf {
        if let Some(p) = self.dev_path("pritunl.log") {
            return p;
        }
        cfg_if::cfg_if! {
            if #[cfg(windows)] {
                PathBuf::from(r"C:\ProgramData\Pritunl\pritunl.log")
            } else if #[cfg(target_os = "macos")] {
                PathBuf::from("/Applications/Pritunl.app/Contents/Resources/pritunl.log")
            } else {
                PathBuf::from("/var/log/pritunl.log")
            }
        }
    }

    pub fn log_path_1(&self) -> PathBuf {
        let mut p = self.log_path();
        let mut name = p.file_name().unwrap().to_os_string();
        name.push(".1");
        p.set_file_name(name);
        p
    }

    /// `n/a` on Windows.
    #[cfg(not(windows))]
    pub fn pid_path(&self) -> PathBuf {
        if let Some(p) = self.dev_path("pritunl.pid") {
            return p;
        }
        cfg_if::cfg_if! {
            if #[cfg(target_os = "macos")] {
                PathBuf::from("/Applications/Pritunl.app/Contents/Resources/pritunl.pid")
            } else {
                PathBuf::from("/var/run/pritunl.pid")
            }
        }
    }

    pub fn temp_dir(&self) -> PathBuf {
        if let Some(p) = self.dev_path("temp") {
            return p;
        }
        cfg_if::cfg_if! {
            if #[cfg(windows)] {
                PathBuf::from(r"C:\ProgramData\Pritunl")
            } else {
                PathBuf::from("/tmp/pritunl")
            }
        }
    }

    /// Creates the temp directory with `0700` permissions on POSIX,
    /// returning the path. Idempotent.
    pub fn ensure_temp_dir(&self) -> io::Result<PathBuf> {
        let dir = self.temp_dir();
        fs::create_dir_all(&dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))?;
        }
        Ok(dir)
    }

    pub fn ensure_auth_parent(&self) -> io::Result<()> {
        Self::ensure_parent(&self.auth_path())
    }

    pub fn ensure_log_parent(&self) -> io::Result<()> {
        Self::ensure_parent(&self.log_path())
    }
}
