//! Child process lifecycle management
//!
//! Package managers and service managers must not keep running after debprov
//! is interrupted. Every spawned command:
//!
//! - runs in its own process group, so one signal reaches its whole tree
//! - receives SIGTERM through `PR_SET_PDEATHSIG` if debprov dies
//! - is tracked in a global registry while it runs
//!
//! On SIGINT, SIGTERM or SIGHUP the signal thread terminates every tracked
//! group (SIGTERM, then SIGKILL after a grace period) and exits with
//! `128 + signal`.

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

static CHILD_REGISTRY: OnceLock<Mutex<ChildRegistry>> = OnceLock::new();

/// Registry tracking running child process groups
#[derive(Debug, Default)]
pub struct ChildRegistry {
    pids: HashSet<u32>,
    cleanup_initiated: bool,
}

impl ChildRegistry {
    fn global() -> &'static Mutex<ChildRegistry> {
        CHILD_REGISTRY.get_or_init(|| Mutex::new(ChildRegistry::default()))
    }

    /// Run `f` against the global registry.
    ///
    /// A poisoned lock is recovered: the registry only holds PIDs, which stay
    /// valid whatever panicked while holding it.
    pub fn with_global<R>(f: impl FnOnce(&mut ChildRegistry) -> R) -> R {
        let mut guard = match Self::global().lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    pub fn register(&mut self, pid: u32) {
        self.pids.insert(pid);
        tracing::debug!("Registered child process PID {}", pid);
    }

    pub fn unregister(&mut self, pid: u32) {
        self.pids.remove(&pid);
        tracing::debug!("Unregistered child process PID {}", pid);
    }

    pub fn count(&self) -> usize {
        self.pids.len()
    }

    /// SIGTERM every tracked group, wait up to `grace_period`, SIGKILL the rest.
    pub fn terminate_all(&mut self, grace_period: Duration) {
        if self.cleanup_initiated || self.pids.is_empty() {
            return;
        }
        self.cleanup_initiated = true;

        tracing::info!("Terminating {} child process(es)...", self.pids.len());
        let pids: Vec<u32> = self.pids.iter().copied().collect();

        for &pid in &pids {
            if let Err(e) = signal_group(pid, Signal::SIGTERM) {
                tracing::warn!("Failed to send SIGTERM to process group {}: {}", pid, e);
            }
        }

        let start = Instant::now();
        while start.elapsed() < grace_period {
            if pids.iter().all(|&pid| !is_process_alive(pid)) {
                tracing::info!("All child processes terminated");
                self.pids.clear();
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        for &pid in pids.iter().filter(|&&pid| is_process_alive(pid)) {
            tracing::warn!("Process group {} ignored SIGTERM, sending SIGKILL", pid);
            if let Err(e) = signal_group(pid, Signal::SIGKILL) {
                tracing::error!("Failed to send SIGKILL to process group {}: {}", pid, e);
            }
        }
        self.pids.clear();
    }
}

/// Negative PID addresses the whole group led by `pgid`.
fn signal_group(pgid: u32, sig: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(-(pgid as i32)), sig)
}

/// Alive means the PID exists and is not a zombie.
fn is_process_alive(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .split_whitespace()
            .nth(2)
            .is_none_or(|state| !matches!(state, "Z" | "X")),
        Err(_) => true,
    }
}

/// Install handlers for SIGINT, SIGTERM and SIGHUP. Call once at startup.
pub fn init_signal_handlers() -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            tracing::warn!("Received signal {}, stopping child processes", sig);
            ChildRegistry::with_global(|registry| registry.terminate_all(Duration::from_secs(3)));
            std::process::exit(128 + sig);
        }
    });

    Ok(())
}

/// Extension trait for `std::process::Command` to isolate children
pub trait CommandProcessGroup {
    /// Put the child in a new process group and tie its life to ours.
    fn in_own_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_own_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: the closure only calls async-signal-safe setpgid and prctl.
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::other)?;
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        self
    }
}
