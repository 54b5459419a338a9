//! Process-group signalling
//!
//! Every child is spawned as the leader of its own process group, so signals
//! sent here reach the whole tree the tool may have forked.

use tokio::process::Command;

/// Put the child in a fresh process group whose id equals its pid
pub fn isolate_process_group(command: &mut Command) {
    #[cfg(unix)]
    {
        command.process_group(0);
    }
    #[cfg(not(unix))]
    {
        let _ = command;
    }
}

/// Ask the process group to exit (SIGTERM)
///
/// Returns `false` if nothing could be signalled, usually because the group
/// has already exited.
pub fn terminate_group(pid: u32) -> bool {
    #[cfg(unix)]
    {
        signal_group(pid, nix::sys::signal::Signal::SIGTERM)
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// Kill the process group outright (SIGKILL)
pub fn kill_group(pid: u32) -> bool {
    #[cfg(unix)]
    {
        signal_group(pid, nix::sys::signal::Signal::SIGKILL)
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) -> bool {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 1 {
        return false;
    }

    // Only the group is signalled: a bare pid may already belong to someone else
    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) => true,
        Err(err) => {
            tracing::debug!(pid, ?signal, "killpg failed: {}", err);
            false
        }
    }
}

/// Signal number that ended a process, if it was killed by one
pub fn terminating_signal(status: &std::process::ExitStatus) -> Option<i32> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    }
    #[cfg(not(unix))]
    {
        let _ = status;
        None
    }
}
