//! Running work in a forked child process
//!
//! The child gets a copy-on-write snapshot of everything, so whatever it
//! does to the symbol table or heap (including crashing) cannot reach the
//! parent. The parent blocks until the child is gone and gets back a typed
//! [`ChildStatus`].

use crate::infrastructure::interrupt::Interrupts;
use std::fmt;
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use tracing::debug;

/// How a child that exited normally finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Ok,
    /// Some script it looked at has errors
    Errors,
    /// Something went wrong that the parent cannot recover from
    Catastrophic,
    /// The work panicked
    Panicked,
    Other(i32),
}

impl ExitKind {
    pub fn code(self) -> i32 {
        match self {
            ExitKind::Ok => 0,
            ExitKind::Errors => 1,
            ExitKind::Catastrophic => 2,
            ExitKind::Panicked => 101,
            ExitKind::Other(code) => code,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            0 => ExitKind::Ok,
            1 => ExitKind::Errors,
            2 => ExitKind::Catastrophic,
            101 => ExitKind::Panicked,
            other => ExitKind::Other(other),
        }
    }
}

/// A child killed by a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault {
    pub signal: i32,
    pub core_dumped: bool,
}

impl Fault {
    pub fn is_interrupt(&self) -> bool {
        self.signal == libc::SIGINT
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.signal {
            libc::SIGINT => write!(f, "<<...interrupt>>")?,
            libc::SIGBUS => write!(f, "<<...bus error")?,
            libc::SIGSEGV => write!(f, "<<...segmentation fault")?,
            signal => write!(f, "<<...uncaught signal {}", signal)?,
        }
        if self.signal != libc::SIGINT {
            if self.core_dumped {
                write!(f, " (core dumped)")?;
            }
            write!(f, ">>")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildStatus {
    Exited(ExitKind),
    Faulted(Fault),
}

impl ChildStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, ChildStatus::Exited(ExitKind::Ok))
    }
}

/// Run `work` in a forked child and wait for it
///
/// The child starts with the default SIGINT disposition, so an interrupt
/// kills it and shows up as a [`Fault`]. It leaves through `_exit`, never
/// running destructors or flushing state shared with the parent.
pub fn run_isolated<F>(work: F) -> io::Result<ChildStatus>
where
    F: FnOnce() -> ExitKind,
{
    io::stdout().flush()?;

    // SAFETY: the child only runs `work` and then calls _exit
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(io::Error::last_os_error());
    }
    if pid == 0 {
        // SAFETY: resetting a disposition in the freshly forked child
        unsafe {
            libc::signal(libc::SIGINT, libc::SIG_DFL);
        }
        let kind = panic::catch_unwind(AssertUnwindSafe(work)).unwrap_or(ExitKind::Panicked);
        let _ = io::stdout().flush();
        let _ = io::stderr().flush();
        // SAFETY: terminate the child without unwinding into parent frames
        unsafe { libc::_exit(kind.code()) }
    }

    let status = wait_for(pid)?;
    debug!(pid, ?status, "child finished");
    Ok(status)
}

fn wait_for(pid: libc::pid_t) -> io::Result<ChildStatus> {
    let mut status: libc::c_int = 0;
    loop {
        // SAFETY: pid is our own child and status outlives the call
        let reaped = unsafe { libc::waitpid(pid, &mut status, 0) };
        if reaped == pid {
            break;
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }

    if libc::WIFSIGNALED(status) {
        Ok(ChildStatus::Faulted(Fault {
            signal: libc::WTERMSIG(status),
            core_dumped: libc::WCOREDUMP(status),
        }))
    } else {
        Ok(ChildStatus::Exited(ExitKind::from_code(libc::WEXITSTATUS(status))))
    }
}

/// Keeps the parent deaf to SIGINT while a child owns the terminal
struct IgnoreInterrupt {
    previous: libc::sighandler_t,
}

impl IgnoreInterrupt {
    fn new() -> Self {
        // SAFETY: swapping the disposition; restored on drop
        let previous = unsafe { libc::signal(libc::SIGINT, libc::SIG_IGN) };
        Self { previous }
    }
}

impl Drop for IgnoreInterrupt {
    fn drop(&mut self) {
        if self.previous != libc::SIG_ERR {
            // SAFETY: restoring the disposition saved in `new`
            unsafe {
                libc::signal(libc::SIGINT, self.previous);
            }
        }
    }
}

/// Run an evaluation in a child, ignoring interrupts in the parent meanwhile
///
/// Returns the fault if the child was killed by a signal; a normal exit,
/// whatever its code, returns `None`.
pub fn isolate_and_run<F>(interrupts: &Interrupts, work: F) -> io::Result<Option<Fault>>
where
    F: FnOnce(),
{
    let _isolated = interrupts.enter_isolated();
    let _deaf = IgnoreInterrupt::new();
    let status = run_isolated(|| {
        work();
        ExitKind::Ok
    })?;
    Ok(match status {
        ChildStatus::Faulted(fault) => Some(fault),
        ChildStatus::Exited(_) => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_round_trip() {
        for kind in [ExitKind::Ok, ExitKind::Errors, ExitKind::Catastrophic, ExitKind::Panicked] {
            assert_eq!(ExitKind::from_code(kind.code()), kind);
        }
        assert_eq!(ExitKind::from_code(7), ExitKind::Other(7));
    }

    #[test]
    fn test_fault_messages() {
        let segv = Fault { signal: libc::SIGSEGV, core_dumped: true };
        assert_eq!(segv.to_string(), "<<...segmentation fault (core dumped)>>");
        let bus = Fault { signal: libc::SIGBUS, core_dumped: false };
        assert_eq!(bus.to_string(), "<<...bus error>>");
        let other = Fault { signal: libc::SIGUSR1, core_dumped: false };
        assert_eq!(other.to_string(), format!("<<...uncaught signal {}>>", libc::SIGUSR1));
    }

    #[test]
    fn test_child_exit_kind() {
        let status = run_isolated(|| ExitKind::Errors).unwrap();
        assert_eq!(status, ChildStatus::Exited(ExitKind::Errors));
    }

    #[test]
    fn test_child_panic_is_contained() {
        let status = run_isolated(|| panic!("boom")).unwrap();
        assert_eq!(status, ChildStatus::Exited(ExitKind::Panicked));
    }

    #[test]
    fn test_child_fault_reported() {
        let status = run_isolated(|| {
            // std's own SIGSEGV handler would swallow a raised signal
            // SAFETY: deliberately kill the child
            unsafe {
                libc::signal(libc::SIGSEGV, libc::SIG_DFL);
                libc::raise(libc::SIGSEGV);
            }
            ExitKind::Ok
        })
        .unwrap();

        match status {
            ChildStatus::Faulted(fault) => assert_eq!(fault.signal, libc::SIGSEGV),
            other => panic!("expected a fault, got {:?}", other),
        }
    }

    #[test]
    fn test_isolate_and_run_restores_activity() {
        let interrupts = Interrupts::new();
        let fault = isolate_and_run(&interrupts, || {}).unwrap();
        assert!(fault.is_none());
        assert_eq!(interrupts.activity(), crate::infrastructure::interrupt::Activity::Idle);
    }
}
