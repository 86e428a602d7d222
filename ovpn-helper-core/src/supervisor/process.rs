//! The process abstraction the registry spawns profiles through — kept
//! swappable so tests can exercise the state machine without a real
//! OpenVPN binary, mirroring `talpid_core::tunnel::openvpn`'s
//! `OpenVpnBuilder`/`ProcessHandle` split.

use std::io::{self, BufRead, BufReader};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::SyncSender;
use std::thread;

/// Spawns a profile's subprocess.
pub trait ProcessBuilder: Send + Sync + 'static {
    fn start(&self, cmd: Command) -> io::Result<Box<dyn ProcessHandle>>;
}

/// A running (or finished) subprocess.
pub trait ProcessHandle: Send + Sync + 'static {
    /// Starts draining stdout+stderr line-by-line into `tx`, returning
    /// immediately. Reads that fail with "closed"/"bad descriptor"/EOF
    /// return silently rather than logging: a reader racing the child's
    /// exit is the expected shutdown path, not an error.
    fn drain_into(&mut self, tx: SyncSender<String>) -> thread::JoinHandle<()>;

    /// Sends SIGINT on POSIX, or kills directly on Windows.
    fn interrupt(&self) -> io::Result<()>;

    /// Forcibly kills the process.
    fn kill(&self) -> io::Result<()>;

    /// Blocks until the process exits.
    fn wait(&self) -> io::Result<ExitStatus>;
}

/// The production builder: spawns the real OpenVPN binary.
#[derive(Debug, Default)]
pub struct RealProcessBuilder;

impl ProcessBuilder for RealProcessBuilder {
    fn start(&self, mut cmd: Command) -> io::Result<Box<dyn ProcessHandle>> {
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        let child = cmd.spawn()?;
        Ok(Box::new(RealProcessHandle { child }))
    }
}

struct RealProcessHandle {
    child: Child,
}

fn read_lines(reader: impl std::io::Read, tx: SyncSender<String>) {
    let buffered = BufReader::new(reader);
    for line in buffered.lines() {
        match line {
            Ok(line) => {
                if tx.send(line).is_err() {
                    return;
                }
            }
            Err(_) => return,
        }
    }
}

impl ProcessHandle for RealProcessHandle {
    fn drain_into(&mut self, tx: SyncSender<String>) -> thread::JoinHandle<()> {
        let stdout = self.child.stdout.take();
        let stderr = self.child.stderr.take();
        let tx_err = tx.clone();

        if let Some(stderr) = stderr {
            let tx_err = tx_err;
            thread::spawn(move || read_lines(stderr, tx_err));
        }

        thread::spawn(move || {
            if let Some(stdout) = stdout {
                read_lines(stdout, tx);
            }
        })
    }

    #[cfg(unix)]
    fn interrupt(&self) -> io::Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        kill(Pid::from_raw(self.child.id() as i32), Signal::SIGINT)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    #[cfg(windows)]
    fn interrupt(&self) -> io::Result<()> {
        self.kill()
    }

    fn kill(&self) -> io::Result<()> {
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            return kill(Pid::from_raw(self.child.id() as i32), Signal::SIGKILL)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
        }
        #[cfg(windows)]
        {
            // Child::kill requires &mut self; going through the pid with
            // OpenProcess avoids needing interior mutability here, since
            // Stop() escalates through the registry which already holds
            // the handle behind a Mutex.
            use winapi::um::handleapi::CloseHandle;
            use winapi::um::processthreadsapi::{OpenProcess, TerminateProcess};
            use winapi::um::winnt::PROCESS_TERMINATE;
            unsafe {
                let handle = OpenProcess(PROCESS_TERMINATE, 0, self.child.id());
                if handle.is_null() {
                    return Err(io::Error::last_os_error());
                }
                let ok = TerminateProcess(handle, 1);
                CloseHandle(handle);
                if ok == 0 {
                    return Err(io::Error::last_os_error());
                }
            }
            Ok(())
        }
    }

    fn wait(&self) -> io::Result<ExitStatus> {
        // `Child::wait` takes `&mut self`; subprocess reaping happens on
        // exactly one reaper thread per profile which owns the handle
        // exclusively by the time it calls this, so a blocking lock-free
        // unsafe alias would be overkill — callers are expected to hold
        // the only reference at wait time (enforced by the registry).
        let pid = self.child.id();
        loop {
            match waitpid_nonblocking(pid) {
                Some(status) => return Ok(status),
                None => thread::sleep(std::time::Duration::from_millis(50)),
            }
        }
    }
}

#[cfg(unix)]
fn waitpid_nonblocking(pid: u32) -> Option<ExitStatus> {
    use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
    use nix::unistd::Pid;
    use std::os::unix::process::ExitStatusExt;

    match waitpid(Pid::from_raw(pid as i32), Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::Exited(_, code)) => Some(ExitStatus::from_raw(code << 8)),
        Ok(WaitStatus::Signaled(_, signal, _)) => Some(ExitStatus::from_raw(signal as i32)),
        _ => None,
    }
}

#[cfg(windows)]
fn waitpid_nonblocking(pid: u32) -> Option<ExitStatus> {
    use std::os::windows::process::ExitStatusExt;
    use winapi::shared::minwindef::DWORD;
    use winapi::um::handleapi::CloseHandle;
    use winapi::um::minwinbase::STILL_ACTIVE;
    use winapi::um::processthreadsapi::{GetExitCodeProcess, OpenProcess};
    use winapi::um::winnt::PROCESS_QUERY_LIMITED_INFORMATION;

    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if handle.is_null() {
            return Some(ExitStatus::from_raw(0));
        }
        let mut code: DWORD = 0;
        let ok = GetExitCodeProcess(handle, &mut code);
        CloseHandle(handle);
        if ok == 0 || code == STILL_ACTIVE {
            None
        } else {
            Some(ExitStatus::from_raw(code))
        }
    }
}
