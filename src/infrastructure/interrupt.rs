//! Interrupt delivery and deferral
//!
//! An interrupt never unwinds anything by itself. While a compilation is in
//! progress it only raises a pending flag, which the compiler consults at
//! safe points through [`Interrupts::check`]; the resulting
//! [`Halt::Cancelled`] travels up through `?` to the top level, which runs
//! recovery. Outside a compilation an interrupt just prints `<<interrupt>>`.
//! Inside a deferral window the interrupt is remembered and delivered again
//! when the outermost window closes.

use crate::errors::Halt;
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

/// What the process is doing when an interrupt arrives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Activity {
    /// Waiting for input or between commands
    Idle = 0,
    /// Compiling or loading a script
    Loading = 1,
    /// Blocked on an evaluation child
    Isolated = 2,
}

impl Activity {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Activity::Loading,
            2 => Activity::Isolated,
            _ => Activity::Idle,
        }
    }
}

/// How an interrupt was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Nothing in progress; the caller should print `<<interrupt>>`
    Idle,
    /// A compilation will stop at its next safe point
    Pending,
    /// Held until the deferral window closes
    Deferred,
    /// The child owns the terminal; the parent does nothing
    Ignored,
}

#[derive(Debug, Default)]
struct InterruptState {
    activity: AtomicU8,
    pending: AtomicBool,
    windows: AtomicUsize,
    deferred: AtomicBool,
    terminate: AtomicBool,
}

/// Shared interrupt state; cheap to clone
#[derive(Debug, Clone, Default)]
pub struct Interrupts(Arc<InterruptState>);

impl Interrupts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activity(&self) -> Activity {
        Activity::from_raw(self.0.activity.load(Ordering::SeqCst))
    }

    fn set_activity(&self, activity: Activity) -> Activity {
        Activity::from_raw(self.0.activity.swap(activity as u8, Ordering::SeqCst))
    }

    /// Deliver one interrupt. Only touches atomics, so it is safe to call
    /// from a signal handler.
    pub fn raise(&self) -> Delivery {
        if self.0.windows.load(Ordering::SeqCst) > 0 {
            self.0.deferred.store(true, Ordering::SeqCst);
            return Delivery::Deferred;
        }
        match self.activity() {
            Activity::Idle => Delivery::Idle,
            Activity::Loading => {
                self.0.pending.store(true, Ordering::SeqCst);
                Delivery::Pending
            }
            Activity::Isolated => Delivery::Ignored,
        }
    }

    /// Safe point: fail with `Halt::Cancelled` once an interrupt is pending
    pub fn check(&self) -> Result<(), Halt> {
        if self.0.pending.load(Ordering::SeqCst) {
            return Err(Halt::Cancelled);
        }
        Ok(())
    }

    pub fn is_pending(&self) -> bool {
        self.0.pending.load(Ordering::SeqCst)
    }

    /// Forget pending and deferred interrupts after recovery
    pub fn rearm(&self) {
        self.0.pending.store(false, Ordering::SeqCst);
        self.0.deferred.store(false, Ordering::SeqCst);
    }

    /// Mark the start of a compilation; the previous activity returns on drop
    pub fn enter_loading(&self) -> ActivityGuard {
        let previous = self.set_activity(Activity::Loading);
        ActivityGuard { interrupts: self.clone(), previous }
    }

    /// Mark a wait on an evaluation child
    pub fn enter_isolated(&self) -> ActivityGuard {
        let previous = self.set_activity(Activity::Isolated);
        ActivityGuard { interrupts: self.clone(), previous }
    }

    /// Open a deferral window; interrupts arriving inside are replayed when
    /// the outermost window closes
    pub fn defer(&self) -> DeferGuard {
        self.0.windows.fetch_add(1, Ordering::SeqCst);
        DeferGuard { interrupts: self.clone() }
    }

    pub fn request_terminate(&self) {
        self.0.terminate.store(true, Ordering::SeqCst);
    }

    pub fn terminate_requested(&self) -> bool {
        self.0.terminate.load(Ordering::SeqCst)
    }
}

#[must_use]
pub struct ActivityGuard {
    interrupts: Interrupts,
    previous: Activity,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.interrupts.set_activity(self.previous);
    }
}

#[must_use]
pub struct DeferGuard {
    interrupts: Interrupts,
}

impl Drop for DeferGuard {
    fn drop(&mut self) {
        let state = &self.interrupts.0;
        if state.windows.fetch_sub(1, Ordering::SeqCst) == 1 && state.deferred.swap(false, Ordering::SeqCst) {
            self.interrupts.raise();
        }
    }
}

static ACTIVE: OnceCell<Interrupts> = OnceCell::new();

const IDLE_MESSAGE: &[u8] = b"\n<<interrupt>>\n";

extern "C" fn on_interrupt(_signal: libc::c_int) {
    if let Some(interrupts) = ACTIVE.get() {
        if interrupts.raise() == Delivery::Idle {
            // SAFETY: write(2) is async-signal-safe and the buffer is static
            unsafe {
                libc::write(libc::STDOUT_FILENO, IDLE_MESSAGE.as_ptr().cast(), IDLE_MESSAGE.len());
            }
        }
    }
}

extern "C" fn on_terminate(_signal: libc::c_int) {
    if let Some(interrupts) = ACTIVE.get() {
        deliver_terminate(interrupts);
    }
}

/// Ask the top level to stop once output is flushed; a compilation in
/// progress is cancelled first
fn deliver_terminate(interrupts: &Interrupts) {
    interrupts.request_terminate();
    if interrupts.activity() != Activity::Idle {
        interrupts.raise();
    }
}

/// Route SIGINT and SIGTERM to `interrupts` for the rest of the process
pub fn install_handlers(interrupts: &Interrupts) -> std::io::Result<()> {
    if ACTIVE.set(interrupts.clone()).is_err() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "interrupt handlers already installed",
        ));
    }
    // SAFETY: the handlers only touch atomics and async-signal-safe calls
    unsafe {
        if libc::signal(libc::SIGINT, on_interrupt as libc::sighandler_t) == libc::SIG_ERR {
            return Err(std::io::Error::last_os_error());
        }
        // no SA_RESTART, so a blocked read returns and the prompt loop sees the request
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = on_terminate as libc::sighandler_t;
        action.sa_flags = 0;
        libc::sigemptyset(&mut action.sa_mask);
        if libc::sigaction(libc::SIGTERM, &action, std::ptr::null_mut()) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}
