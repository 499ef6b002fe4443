// Idle hook for the scheduler
//
// The scheduler calls Sleep::sleep from inside its critical section when
// the queue is empty. WFI on RISC-V (and Cortex-M) still wakes on a pending
// interrupt while interrupts are masked; the handler then runs as soon as
// the critical section ends, so an event posted between the empty check and
// the WFI can't be lost.

pub trait Sleep {
    fn sleep(&mut self);
}

impl<F: FnMut()> Sleep for F {
    fn sleep(&mut self) {
        self()
    }
}

/// Sleep hook that halts the core until the next interrupt.
#[derive(Debug, Default, Clone, Copy)]
pub struct Wfi;

impl Sleep for Wfi {
    #[inline]
    fn sleep(&mut self) {
        wait_for_interrupt();
    }
}

#[inline]
pub fn wait_for_interrupt() {
    #[cfg(target_arch = "riscv32")]
    unsafe {
        core::arch::asm!("wfi", options(nomem, nostack));
    }

    #[cfg(not(target_arch = "riscv32"))]
    {
        core::hint::spin_loop();
    }
}
