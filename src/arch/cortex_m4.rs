//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4 (Thumb-2) processor.
//! Implements context switching via PendSV, the SysTick tick source, and
//! the exception-frame bootstrap for new tasks.
//!
//! ## Context Switch Mechanism
//!
//! The Cortex-M4 uses a split-stack model:
//! - **MSP** (Main Stack Pointer): used by the boot code and interrupt handlers
//! - **PSP** (Process Stack Pointer): used by tasks in Thread mode
//!
//! On exception entry, the hardware automatically stacks R0–R3, R12, LR, PC,
//! and xPSR onto the process stack. The PendSV handler manually saves and
//! restores R4–R11, which completes the full context save/restore.
//!
//! [`Port::switch`] only records which context to save and which to load,
//! then pends PendSV. The switch runs once the caller leaves its critical
//! section, which is what re-enables interrupts "as part of the switch".
//! The very first switch comes from the boot context on MSP; PendSV skips
//! the save and returns to Thread mode on PSP, abandoning the boot stack.
//!
//! ## Interrupt Priorities
//!
//! - SysTick: Priority 0xFF (lowest)
//! - PendSV: Priority 0xFF (lowest) — runs only when no other ISR is active
//!
//! FPU context is not preserved; tasks must not use floating point on
//! `thumbv7em-none-eabihf` builds.

use core::arch::naked_asm;
use core::ptr::{self, addr_of_mut};
use core::sync::atomic::{AtomicPtr, Ordering};

use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::SCB;

use super::{AddressWidth, Context, Port, TaskEntry};
use crate::config::SYSTEM_CLOCK_HZ;
use crate::kernel::Kernel;

/// Words in a bootstrap frame: R4–R11 plus the hardware-stacked frame.
const FRAME_WORDS: usize = 16;

/// xPSR with only the Thumb bit set.
const XPSR_THUMB: u32 = 0x0100_0000;

/// SysTick reload register is 24 bits wide.
const SYST_MAX_RELOAD: u64 = 0x00ff_ffff;

static KERNEL: AtomicPtr<Kernel<CortexM4>> = AtomicPtr::new(ptr::null_mut());

// Read by PendSV. Written only with interrupts disabled.
static mut SWITCH_FROM: *mut usize = ptr::null_mut();
static mut SWITCH_TO: usize = 0;
static mut SWITCH_PENDING: bool = false;

/// The Cortex-M4 port. Owns SysTick and PendSV for the lifetime of the
/// kernel.
pub struct CortexM4 {
    _private: (),
}

impl CortexM4 {
    pub const fn new() -> Self {
        Self { _private: () }
    }
}

fn kernel() -> Option<&'static Kernel<CortexM4>> {
    // SAFETY: the pointer is null or was stored from a `&'static Kernel`
    // in `attach`.
    unsafe { KERNEL.load(Ordering::Acquire).as_ref() }
}

impl Port for CortexM4 {
    /// Pre-populate the exception frame so that the first PendSV "return"
    /// starts executing the task function.
    ///
    /// ## Stack Layout (top = high address, growing down)
    ///
    /// ```text
    /// [Hardware stacked frame]
    ///   xPSR  (Thumb bit set)
    ///   PC    (task entry point)
    ///   LR    (task_return)
    ///   R12, R3, R2, R1, R0 (0)
    /// [Software saved context]
    ///   R11 … R4 (0)             <- saved sp
    /// ```
    ///
    /// Code addresses are always 32 bits wide here; `width` is ignored.
    fn prepare_stack(&mut self, stack: &mut [u8], entry: TaskEntry, _width: AddressWidth) -> Option<Context> {
        let bottom = stack.as_mut_ptr() as usize;
        // Align to 8 bytes (AAPCS requirement)
        let aligned_top = (bottom + stack.len()) & !0x07;
        let frame = aligned_top.checked_sub(FRAME_WORDS * 4)?;
        if frame < bottom {
            return None;
        }

        let words = frame as *mut u32;
        // SAFETY: `frame..aligned_top` lies inside `stack` and is 4-byte
        // aligned.
        unsafe {
            for i in 0..13 {
                words.add(i).write_volatile(0); // R4–R11, R0–R3, R12
            }
            words.add(13).write_volatile(task_return as usize as u32); // LR
            words.add(14).write_volatile(entry as usize as u32 & !1); // PC
            words.add(15).write_volatile(XPSR_THUMB);
        }

        Some(Context { sp: frame })
    }

    fn switch(&mut self, from: Option<&mut Context>, to: &Context, _first_run: bool) {
        // SAFETY: interrupts are disabled by the caller; PendSV reads these
        // only after they are re-enabled.
        unsafe {
            if !*addr_of_mut!(SWITCH_PENDING) {
                *addr_of_mut!(SWITCH_FROM) = match from {
                    Some(ctx) => &mut ctx.sp as *mut usize,
                    None => ptr::null_mut(),
                };
            }
            *addr_of_mut!(SWITCH_TO) = to.sp;
            *addr_of_mut!(SWITCH_PENDING) = true;
        }
        SCB::set_pendsv();
    }

    fn start_ticks(&mut self, tick_usec: u32) {
        // SAFETY: the kernel is the only user of SysTick and the system
        // handler priority registers.
        let mut cp = unsafe { cortex_m::Peripherals::steal() };

        let cycles = (SYSTEM_CLOCK_HZ as u64 * tick_usec as u64 / 1_000_000).clamp(1, SYST_MAX_RELOAD + 1);
        if cycles > SYST_MAX_RELOAD {
            log::warn!("tick period of {} us exceeds the SysTick range; clamped", tick_usec);
        }

        cp.SYST.set_reload((cycles - 1) as u32);
        cp.SYST.clear_current();
        cp.SYST.set_clock_source(SystClkSource::Core);
        cp.SYST.enable_counter();
        cp.SYST.enable_interrupt();

        set_interrupt_priorities();
    }

    fn stop_ticks(&mut self) {
        // SAFETY: see `start_ticks`.
        let mut cp = unsafe { cortex_m::Peripherals::steal() };
        cp.SYST.disable_interrupt();
        cp.SYST.disable_counter();
    }

    fn shutdown(&mut self) {
        SCB::sys_reset()
    }

    fn idle_entry(&self) -> TaskEntry {
        idle
    }

    fn stack_pointer(&self, _active: &Context) -> usize {
        cortex_m::register::psp::read() as usize
    }

    fn attach(kernel: &'static Kernel<Self>) {
        KERNEL.store(kernel as *const Kernel<Self> as *mut Kernel<Self>, Ordering::Release);
    }

    fn wait_for_interrupt() {
        cortex_m::asm::wfi();
    }
}

/// Set PendSV and SysTick to the lowest interrupt priority.
///
/// This ensures context switches (PendSV) never preempt application-level
/// ISRs, and SysTick doesn't interfere with higher-priority interrupts.
fn set_interrupt_priorities() {
    // System Handler Priority Register 3 (SHPR3): 0xE000_ED20
    // Bits [23:16] = PendSV priority
    // Bits [31:24] = SysTick priority
    let shpr3 = 0xE000_ED20 as *mut u32;
    // SAFETY: SHPR3 is a valid, always-mapped system control register.
    unsafe {
        let val = ptr::read_volatile(shpr3);
        ptr::write_volatile(shpr3, val | (0xFF << 16) | (0xFF << 24));
    }
}

/// Every task's entry point returns here.
extern "C" fn task_return() {
    if let Some(kernel) = kernel() {
        kernel.exit_current();
    }
    // The exit pends a switch that abandons this context
    loop {
        cortex_m::asm::wfi();
    }
}

extern "C" fn idle() {
    loop {
        cortex_m::asm::wfi();
    }
}

// ---------------------------------------------------------------------------
// Exception handlers
// ---------------------------------------------------------------------------

/// PendSV exception handler — performs the actual context switch.
///
/// ## Sequence
/// 1. If there is an outgoing context, push R4–R11 onto its stack (PSP) and
///    store the resulting PSP through `SWITCH_FROM`
/// 2. Load `SWITCH_TO`, pop R4–R11 from it and make it the PSP
/// 3. Return from exception to Thread mode on PSP (hardware restores R0–R3,
///    R12, LR, PC, xPSR)
#[unsafe(no_mangle)]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "cpsid i",
        "ldr r2, ={from}",
        "ldr r1, [r2]",
        "cbz r1, 1f",
        "mrs r0, psp",
        "stmdb r0!, {{r4-r11}}",
        "str r0, [r1]",
        "1:",
        "movs r0, #0",
        "str r0, [r2]",
        "ldr r2, ={pending}",
        "strb r0, [r2]",
        "ldr r2, ={to}",
        "ldr r0, [r2]",
        "ldmia r0!, {{r4-r11}}",
        "msr psp, r0",
        "cpsie i",
        // Return to Thread mode using PSP (EXC_RETURN = 0xFFFFFFFD)
        "ldr r0, =0xFFFFFFFD",
        "bx r0",
        from = sym SWITCH_FROM,
        to = sym SWITCH_TO,
        pending = sym SWITCH_PENDING,
    );
}

/// SysTick exception handler — the kernel's tick source.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn SysTick() {
    if let Some(kernel) = kernel() {
        kernel.tick();
    }
}
