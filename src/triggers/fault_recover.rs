/*!
 * Trap-and-resume trigger.
 *
 * The target byte is loaded after a long run of independent adds. By the time
 * the load reaches retirement and faults, the dependent probe access has
 * already been issued. The fault handler then moves the saved instruction
 * pointer to the routine's `ret`, so the call returns as if nothing happened.
 */

use crate::cache::{CacheProbe, PAGE_SHIFT};
use crate::calibrate::{CalibrationPlan, CutoffRule};
use crate::error::{Error, Result};
use crate::triggers::SpeculationTrigger;
use core::arch::global_asm;
use libc::{c_int, c_void, siginfo_t};
use std::io;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// How many `add`s sit in front of the faulting load
pub const STALL_LENGTH : usize = 300;

/// Signals that a faulting load can raise on Linux
const RECOVERED_SIGNALS : [c_int; 2] = [libc::SIGSEGV, libc::SIGBUS];

/// Set while a probe is in flight; the handler only recovers armed probes
static ARMED : AtomicBool = AtomicBool::new(false);

/// The handler is process-wide, so only one trigger may own it
static INSTALLED : AtomicBool = AtomicBool::new(false);

// specread_stall(target: rdi, probe: rsi)
//
// The adds keep the reorder buffer busy so the load of `target` cannot retire
// (and fault) before `probe[*target << 12]` has been issued.
global_asm!(
    ".pushsection .text",
    ".balign 64",
    ".globl specread_stall",
    "specread_stall:",
    ".rept {stall}",
    "add rax, 141",
    ".endr",
    "xor edx, edx",
    ".globl specread_stall_load",
    "specread_stall_load:",
    "mov dl, byte ptr [rdi]",
    "shl rdx, {shift}",
    "mov rax, qword ptr [rsi + rdx]",
    ".globl specread_stall_resume",
    "specread_stall_resume:",
    "ret",
    ".popsection",
    stall = const STALL_LENGTH,
    shift = const PAGE_SHIFT,
);

extern "C" {
    fn specread_stall(target: *const u8, probe: *const u8);

    // Labels inside `specread_stall`; never called, only compared against.
    fn specread_stall_load();
    fn specread_stall_resume();
}

/**
 * SIGSEGV/SIGBUS handler.
 *
 * Resumes at `specread_stall_resume` when, and only when, a probe is armed
 * and the fault came from the probe's load. Anything else is a real crash:
 * restore the default action and let the instruction fault again.
 */
extern "C" fn recover(signal: c_int, _info: *mut siginfo_t, context: *mut c_void) {
    let load = specread_stall_load as usize;
    let resume = specread_stall_resume as usize;
    unsafe {
        let context = &mut *(context as *mut libc::ucontext_t);
        let ip = &mut context.uc_mcontext.gregs[libc::REG_RIP as usize];
        if ARMED.load(Ordering::Relaxed) && *ip as usize == load {
            *ip = resume as libc::greg_t;
            return;
        }
        libc::signal(signal, libc::SIG_DFL);
    }
}

/**
 * The fault-recover trigger. Owns the process-wide fault handler for as long
 * as it lives and restores the previous handlers on drop.
 */
pub struct FaultRecoverTrigger {
    previous: Vec<(c_int, libc::sigaction)>,
}

/**
 * Install `recover` for `signal`.
 *
 * # Return Value
 * The action that was installed before, so it can be put back.
 */
unsafe fn install(signal: c_int) -> Result<libc::sigaction> {
    let mut action : libc::sigaction = mem::zeroed();
    action.sa_sigaction = recover as libc::sighandler_t;
    action.sa_flags = libc::SA_SIGINFO | libc::SA_NODEFER;
    libc::sigemptyset(&mut action.sa_mask);

    let mut previous : libc::sigaction = mem::zeroed();
    if libc::sigaction(signal, &action, &mut previous) != 0 {
        return Err(Error::SignalHandler { signal, source: io::Error::last_os_error() });
    }
    return Ok(previous);
}

unsafe fn restore(previous: &[(c_int, libc::sigaction)]) {
    for (signal, action) in previous {
        libc::sigaction(*signal, action, std::ptr::null_mut());
    }
}

impl SpeculationTrigger for FaultRecoverTrigger {
    const NAME : &'static str = "fault-recover";

    fn open() -> Result<Self> {
        if INSTALLED.swap(true, Ordering::SeqCst) {
            return Err(Error::TriggerInUse);
        }

        let mut previous = Vec::with_capacity(RECOVERED_SIGNALS.len());
        for signal in RECOVERED_SIGNALS {
            match unsafe { install(signal) } {
                Ok(action) => previous.push((signal, action)),
                Err(err) => {
                    unsafe { restore(&previous) };
                    INSTALLED.store(false, Ordering::SeqCst);
                    return Err(err);
                }
            }
        }

        debug!("Installed fault handler for signals {:?}", RECOVERED_SIGNALS);
        Ok(Self { previous })
    }

    #[inline(always)]
    fn fire(&mut self, target: usize, probe: &CacheProbe) {
        // `&mut self` plus the single-owner handler means there is never more
        // than one armed probe.
        ARMED.store(true, Ordering::SeqCst);
        unsafe { specread_stall(target as *const u8, probe.base()) };
        ARMED.store(false, Ordering::SeqCst);
    }

    /// No address hits a known region here. Region 1 is never touched by a
    /// fault on a null target, so it serves as the miss reference.
    fn calibration(&self) -> CalibrationPlan {
        CalibrationPlan {
            reference: 0,
            rule: CutoffRule::FractionOfMiss { miss_region: 1 },
        }
    }
}

impl Drop for FaultRecoverTrigger {
    fn drop(&mut self) {
        unsafe { restore(&self.previous) };
        INSTALLED.store(false, Ordering::SeqCst);
        debug!("Restored previous fault handlers");
    }
}
