//! Spawning of the real-time refresh thread.
//!
//! Scan-out jitter shows up as flicker, so the refresh thread asks for
//! `SCHED_FIFO` scheduling and is pinned to one CPU. Both are best effort:
//! without the privileges (or on a single-core board) the thread keeps
//! running with the default policy and a warning is logged.

use std::io;
use std::thread::{self, JoinHandle};

use crate::error::{Error, Result};

/// Scheduling wishes for a spawned thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadOptions {
    /// `SCHED_FIFO` priority (1..=99).
    pub realtime_priority: Option<i32>,
    /// CPU to pin the thread to.
    pub cpu_affinity: Option<usize>,
}

/// Spawn `body` on a thread named `name` and apply `options` from inside it.
///
/// # Errors
///
/// [`Error::Spawn`] if the OS refuses to create the thread.
pub fn spawn<F, T>(name: &str, options: ThreadOptions, body: F) -> Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    thread::Builder::new()
        .name(name.to_owned())
        .spawn(move || {
            apply(options);
            body()
        })
        .map_err(Error::Spawn)
}

fn apply(options: ThreadOptions) {
    if let Some(priority) = options.realtime_priority {
        if let Err(e) = set_realtime_priority(priority) {
            log::warn!("can't set SCHED_FIFO priority {priority}: {e}");
        }
    }
    if let Some(cpu) = options.cpu_affinity {
        if let Err(e) = set_cpu_affinity(cpu) {
            log::warn!("can't pin refresh thread to CPU {cpu}: {e}");
        }
    }
}

#[cfg(target_os = "linux")]
fn set_realtime_priority(priority: i32) -> io::Result<()> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: pid 0 is the calling thread and `param` outlives the call.
    let rc = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(target_os = "linux")]
fn set_cpu_affinity(cpu: usize) -> io::Result<()> {
    if cpu >= libc::CPU_SETSIZE as usize {
        return Err(io::Error::from(io::ErrorKind::InvalidInput));
    }
    // SAFETY: cpu_set_t is plain data; zeroed is the empty set.
    let mut set: libc::cpu_set_t = unsafe { std::mem::zeroed() };
    // SAFETY: `cpu` was checked against CPU_SETSIZE above.
    unsafe { libc::CPU_SET(cpu, &mut set) };
    // SAFETY: pid 0 is the calling thread; the size matches `set`.
    let rc = unsafe { libc::sched_setaffinity(0, std::mem::size_of_val(&set), &set) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(target_os = "linux"))]
fn set_realtime_priority(_priority: i32) -> io::Result<()> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
}

#[cfg(not(target_os = "linux"))]
fn set_cpu_affinity(_cpu: usize) -> io::Result<()> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
}
