//! The control and status register file, with specifiers for the CSRs the
//! trap and firmware paths interpret.
//!
//! > RISC-V defines a separate address space of 4096 Control and Status registers associated with
//! > each hart.
//!
//! Every slot is a plain read/write cell; the named slots below carry field
//! semantics, but those semantics live in the trap machinery and the
//! firmware, not in the cells themselves.

use crate::registers::Register;

/// General 12-bit value representing a CSR specifier. Note that this can hold
/// any 12-bit value, even if the value represents a CSR no code interprets.
pub type CsrSpecifier = u16;

/// The number of CSR slots.
pub const LEN: usize = 4096;

//
// Supervisor trap setup (`0x100..=0x106`).
//
/// Supervisor status register.
pub const SSTATUS: CsrSpecifier = 0x100;
/// Supervisor interrupt-enable register.
pub const SIE: CsrSpecifier = 0x104;
/// Supervisor trap handler base address.
pub const STVEC: CsrSpecifier = 0x105;
/// Supervisor counter enable.
pub const SCOUNTEREN: CsrSpecifier = 0x106;

//
// Supervisor trap handling (`0x140..=0x144`).
//
/// Scratch register for supervisor trap handlers.
pub const SSCRATCH: CsrSpecifier = 0x140;
/// Supervisor exception program counter.
pub const SEPC: CsrSpecifier = 0x141;
/// Supervisor trap cause.
pub const SCAUSE: CsrSpecifier = 0x142;
/// Supervisor bad address or instruction.
pub const STVAL: CsrSpecifier = 0x143;
/// Supervisor interrupt pending.
pub const SIP: CsrSpecifier = 0x144;

//
// Supervisor protection and translation.
//
/// Supervisor address translation and protection.
pub const SATP: CsrSpecifier = 0x180;

//
// Machine trap setup.
//
/// Machine interrupt delegation register. Reset to all-ones so every
/// interrupt is delegated to supervisor mode.
pub const MIDELEG: CsrSpecifier = 0x303;
/// Machine interrupt-enable register.
pub const MIE: CsrSpecifier = 0x304;
/// Machine interrupt pending.
pub const MIP: CsrSpecifier = 0x344;

//
// Unprivileged counters/timers, mirrored by the firmware's timer extension.
//
/// Cycle counter for RDCYCLE instruction.
pub const CYCLE: CsrSpecifier = 0xC00;
/// Timer for RDTIME instruction.
pub const TIME: CsrSpecifier = 0xC01;
/// Upper 32 bits of [`CYCLE`], RV32 only.
pub const CYCLEH: CsrSpecifier = 0xC80;
/// Upper 32 bits of [`TIME`], RV32 only.
pub const TIMEH: CsrSpecifier = 0xC81;

/// Bit indices of the `sstatus` fields the trap machinery and the page walker
/// interpret.
pub mod sstatus {
    /// Supervisor Interrupt Enable.
    pub const SIE: usize = 1;
    /// Supervisor Previous Interrupt Enable.
    pub const SPIE: usize = 5;
    /// Supervisor Previous Privilege (0 = user, 1 = supervisor).
    pub const SPP: usize = 8;
    /// permit Supervisor User Memory access.
    pub const SUM: usize = 18;
}

/// Bit indices of the supervisor interrupt causes within `sie`/`sip`.
pub mod interrupt {
    /// Supervisor software interrupt.
    pub const SUPERVISOR_SOFTWARE: u32 = 1;
    /// Supervisor timer interrupt.
    pub const SUPERVISOR_TIMER: u32 = 5;
    /// Supervisor external interrupt. The same bit doubles as the
    /// pending-ecall marker while a hart sits in the machine trampoline.
    pub const SUPERVISOR_EXTERNAL: u32 = 9;
}

/// Dense file of all 4096 CSR slots.
#[derive(Debug, Clone)]
pub struct Csrs {
    cells: Vec<Register>,
}

impl Default for Csrs {
    fn default() -> Self {
        Self::new()
    }
}

impl Csrs {
    /// Returns a fresh all-zero CSR file.
    pub fn new() -> Self {
        Self {
            cells: vec![Register::Cell(0); LEN],
        }
    }

    /// Returns the value of a CSR.
    pub fn read(&self, specifier: CsrSpecifier) -> u32 {
        self.cells[usize::from(specifier) % LEN].read()
    }

    /// Sets the value of a CSR.
    pub fn write(&mut self, specifier: CsrSpecifier, value: u32) {
        self.cells[usize::from(specifier) % LEN].write(value);
    }

    /// Returns the value of a single bit of a CSR.
    pub fn bit(&self, specifier: CsrSpecifier, index: usize) -> bool {
        self.cells[usize::from(specifier) % LEN].bit(index)
    }

    /// Sets the value of a single bit of a CSR.
    pub fn set_bit(&mut self, specifier: CsrSpecifier, index: usize, value: bool) {
        self.cells[usize::from(specifier) % LEN].set_bit(index, value);
    }

    /// Returns the value of the `sstatus.SIE` field.
    pub fn sstatus_sie(&self) -> bool {
        self.bit(SSTATUS, sstatus::SIE)
    }

    /// Returns the value of the `sstatus.SUM` field.
    pub fn sstatus_sum(&self) -> bool {
        self.bit(SSTATUS, sstatus::SUM)
    }
}
