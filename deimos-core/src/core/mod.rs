//! Provides the RV32IMA hart implementation.

pub mod csr;
mod execute;
pub mod mmu;

use crate::address_space::{AccessContext, AccessType, AddressSpace, BusError};
use crate::registers::{abi, Registers};
use crate::{bits, Alignment, PrivilegeLevel};
use csr::Csrs;
use log::trace;
use thiserror::Error;

pub use csr::CsrSpecifier;

/// Result of executing a single instruction. [`Ok`] if execution went normal,
/// [`Err`] if an exception occurred.
pub type ExecutionResult = Result<(), ExceptionCause>;

/// The exception causes of the privileged architecture, plus two out-of-band
/// conditions the interpreter reports without architectural effect.
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
pub enum ExceptionCause {
    #[error("instruction address misaligned")]
    InstructionAddressMisaligned,
    #[error("instruction access fault")]
    InstructionAccessFault,
    #[error("illegal instruction")]
    IllegalInstruction,
    #[error("breakpoint")]
    Breakpoint,
    #[error("load address misaligned")]
    LoadAddressMisaligned,
    #[error("load access fault")]
    LoadAccessFault,
    #[error("store/AMO address misaligned")]
    StoreAddressMisaligned,
    #[error("store/AMO access fault")]
    StoreAccessFault,
    #[error("environment call from U-mode")]
    EnvironmentCallFromUMode,
    #[error("environment call from S-mode")]
    EnvironmentCallFromSMode,
    #[error("instruction page fault")]
    InstructionPageFault,
    #[error("load page fault")]
    LoadPageFault,
    #[error("store/AMO page fault")]
    StorePageFault,
    /// The instruction sits in valid extension opcode space the interpreter
    /// does not model. Surfaced out-of-band from [`Hart::step`].
    #[error("instruction unimplemented")]
    UnimplementedInstruction,
    /// The emulator is in its reset state. Surfaced out-of-band.
    #[error("core stopped")]
    CoreStopped,
}

impl ExceptionCause {
    /// Returns the numeric cause written to `scause`, or `None` for the
    /// out-of-band conditions that never reach the guest.
    pub fn code(self) -> Option<u32> {
        match self {
            Self::InstructionAddressMisaligned => Some(0),
            Self::InstructionAccessFault => Some(1),
            Self::IllegalInstruction => Some(2),
            Self::Breakpoint => Some(3),
            Self::LoadAddressMisaligned => Some(4),
            Self::LoadAccessFault => Some(5),
            Self::StoreAddressMisaligned => Some(6),
            Self::StoreAccessFault => Some(7),
            Self::EnvironmentCallFromUMode => Some(8),
            Self::EnvironmentCallFromSMode => Some(9),
            Self::InstructionPageFault => Some(12),
            Self::LoadPageFault => Some(13),
            Self::StorePageFault => Some(15),
            Self::UnimplementedInstruction | Self::CoreStopped => None,
        }
    }

    /// `true` for the causes whose `stval` the accessor layer already set to
    /// the faulting address.
    fn tval_set_by_accessor(self) -> bool {
        matches!(
            self,
            Self::InstructionAddressMisaligned
                | Self::InstructionAccessFault
                | Self::LoadAddressMisaligned
                | Self::LoadAccessFault
                | Self::StoreAddressMisaligned
                | Self::StoreAccessFault
                | Self::InstructionPageFault
                | Self::LoadPageFault
                | Self::StorePageFault
        )
    }
}

/// The single mapping from bus errors to architectural exception causes.
///
/// The bus classifies every read as a load; `access` restores the distinction
/// between loads and instruction fetches.
fn exception_for(error: BusError, access: AccessType) -> ExceptionCause {
    match (error, access) {
        (BusError::LoadMisaligned, AccessType::Fetch) => {
            ExceptionCause::InstructionAddressMisaligned
        }
        (BusError::LoadMisaligned, _) => ExceptionCause::LoadAddressMisaligned,
        (BusError::StoreMisaligned, _) => ExceptionCause::StoreAddressMisaligned,
        (BusError::LoadAccessFault, AccessType::Fetch) => ExceptionCause::InstructionAccessFault,
        (BusError::LoadAccessFault, _) => ExceptionCause::LoadAccessFault,
        (BusError::StoreAccessFault, _) => ExceptionCause::StoreAccessFault,
        (BusError::LoadPageFault, AccessType::Fetch) => ExceptionCause::InstructionPageFault,
        (BusError::LoadPageFault, _) => ExceptionCause::LoadPageFault,
        (BusError::StorePageFault, _) => ExceptionCause::StorePageFault,
        (BusError::FetchPageFault, _) => ExceptionCause::InstructionPageFault,
    }
}

macro_rules! access_fns {
    ( $( $read_fn:ident, $read_physical_fn:ident, $write_fn:ident, $write_physical_fn:ident,
         $alignment:expr => $u:ident ),* $(,)? ) => {
        $(
            /// Invoke a load for the specified virtual address.
            pub fn $read_fn(
                &mut self,
                address_space: &mut AddressSpace,
                address: u32,
            ) -> Result<$u, ExceptionCause> {
                self.check_alignment(address, $alignment, AccessType::Load)?;
                let context = self.access_context(AccessType::Load);
                let mut buf = [0u8; std::mem::size_of::<$u>()];
                address_space
                    .read(&context, address, &mut buf)
                    .map_err(|error| self.fault(error, AccessType::Load, address))?;
                Ok($u::from_le_bytes(buf))
            }

            /// Invoke a load for the specified physical address, bypassing
            /// translation.
            pub fn $read_physical_fn(
                &mut self,
                address_space: &mut AddressSpace,
                address: u32,
            ) -> Result<$u, ExceptionCause> {
                self.check_alignment(address, $alignment, AccessType::Load)?;
                let mut buf = [0u8; std::mem::size_of::<$u>()];
                address_space
                    .read_physical(address, &mut buf)
                    .map_err(|error| self.fault(error, AccessType::Load, address))?;
                Ok($u::from_le_bytes(buf))
            }

            /// Invoke a store for the specified virtual address.
            pub fn $write_fn(
                &mut self,
                address_space: &mut AddressSpace,
                address: u32,
                value: $u,
            ) -> Result<(), ExceptionCause> {
                self.check_alignment(address, $alignment, AccessType::Store)?;
                let context = self.access_context(AccessType::Store);
                let physical_address = address_space
                    .write(&context, address, &value.to_le_bytes())
                    .map_err(|error| self.fault(error, AccessType::Store, address))?;
                self.note_store(physical_address);
                Ok(())
            }

            /// Invoke a store for the specified physical address, bypassing
            /// translation.
            pub fn $write_physical_fn(
                &mut self,
                address_space: &mut AddressSpace,
                address: u32,
                value: $u,
            ) -> Result<(), ExceptionCause> {
                self.check_alignment(address, $alignment, AccessType::Store)?;
                address_space
                    .write_physical(address, &value.to_le_bytes())
                    .map_err(|error| self.fault(error, AccessType::Store, address))?;
                self.note_store(address);
                Ok(())
            }
        )*
    };
}

/// One RV32IMA hardware thread.
///
/// > From the perspective of software running in a given execution environment, a hart is a
/// > resource that autonomously fetches and executes RISC-V instructions within that execution
/// > environment. In this respect, a hart behaves like a hardware thread resource even if
/// > time-multiplexed onto real hardware by the execution environment.
///
/// The hart owns its register and CSR state; the address space it fetches and
/// loads through is passed in on every [`step`](Self::step), since it is
/// shared between all harts of the machine.
#[derive(Debug)]
pub struct Hart {
    hart_id: u32,
    registers: Registers,
    csrs: Csrs,
    privilege: PrivilegeLevel,
    /// The reserved physical word address, with the low bit doubling as the
    /// valid flag. See the LR/SC handlers.
    reservation: u32,
    /// Physical address of the store this step retired, if any; consumed by
    /// the orchestrator to invalidate overlapping reservations on other harts.
    store_broadcast: Option<u32>,
}

impl Hart {
    /// Creates a hart in its reset state.
    ///
    /// `hart_id` must be unique within the machine and stays fixed for the
    /// hart's lifetime.
    pub fn new(hart_id: u32) -> Self {
        let mut hart = Self {
            hart_id,
            registers: Registers::new(),
            csrs: Csrs::new(),
            privilege: PrivilegeLevel::Supervisor,
            reservation: 0,
            store_broadcast: None,
        };
        hart.reset();
        hart
    }

    /// Force this hart back to its reset state.
    ///
    /// Execution restarts at physical address zero in supervisor mode, with
    /// `a0` holding the hart id and every interrupt delegated to supervisor
    /// mode.
    pub fn reset(&mut self) {
        self.registers = Registers::new();
        self.csrs = Csrs::new();
        self.privilege = PrivilegeLevel::Supervisor;
        self.reservation = 0;
        self.store_broadcast = None;
        self.registers.set_x(abi::A0, self.hart_id);
        self.csrs.write(csr::MIDELEG, 0xFFFF_FFFF);
    }

    pub fn hart_id(&self) -> u32 {
        self.hart_id
    }

    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.registers
    }

    pub fn csrs(&self) -> &Csrs {
        &self.csrs
    }

    pub fn csrs_mut(&mut self) -> &mut Csrs {
        &mut self.csrs
    }

    /// Returns the current privilege level the hart is running at.
    pub fn privilege(&self) -> PrivilegeLevel {
        self.privilege
    }

    pub fn set_privilege(&mut self, privilege: PrivilegeLevel) {
        self.privilege = privilege;
    }

    access_fns! {
        read_byte, read_byte_physical, write_byte, write_byte_physical,
            Alignment::BYTE => u8,
        read_halfword, read_halfword_physical, write_halfword, write_halfword_physical,
            Alignment::HALFWORD => u16,
        read_word, read_word_physical, write_word, write_word_physical,
            Alignment::WORD => u32,
    }

    /// Fetches the instruction word at the specified virtual address.
    ///
    /// > The base RISC-V ISA has fixed-length 32-bit instructions that must be naturally aligned on
    /// > 32-bit boundaries.
    pub fn fetch_word(
        &mut self,
        address_space: &mut AddressSpace,
        address: u32,
    ) -> Result<u32, ExceptionCause> {
        self.check_alignment(address, Alignment::WORD, AccessType::Fetch)?;
        let context = self.access_context(AccessType::Fetch);
        let mut buf = [0u8; 4];
        address_space
            .read(&context, address, &mut buf)
            .map_err(|error| self.fault(error, AccessType::Fetch, address))?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Runs `address` through the translator chain with this hart's state.
    fn translate(
        &mut self,
        address_space: &mut AddressSpace,
        access: AccessType,
        address: u32,
    ) -> Result<u32, ExceptionCause> {
        let context = self.access_context(access);
        address_space
            .translate(&context, address)
            .map_err(|error| self.fault(error, access, address))
    }

    fn access_context(&self, access: AccessType) -> AccessContext {
        AccessContext {
            access,
            privilege: self.privilege,
            satp: self.csrs.read(csr::SATP),
            sum: self.csrs.sstatus_sum(),
        }
    }

    fn check_alignment(
        &mut self,
        address: u32,
        alignment: Alignment,
        access: AccessType,
    ) -> Result<(), ExceptionCause> {
        if alignment.is_aligned(address) {
            Ok(())
        } else {
            Err(self.fault(access.misaligned(), access, address))
        }
    }

    /// Records the faulting address in `stval` and maps the bus error to its
    /// architectural cause.
    fn fault(&mut self, error: BusError, access: AccessType, address: u32) -> ExceptionCause {
        self.csrs.write(csr::STVAL, address);
        exception_for(error, access)
    }

    fn set_reservation(&mut self, physical_address: u32) {
        self.reservation = (physical_address & !0b11) | 1;
    }

    fn reservation_matches(&self, physical_address: u32) -> bool {
        self.reservation & 1 == 1 && self.reservation & !0b11 == physical_address & !0b11
    }

    fn clear_reservation(&mut self) {
        self.reservation = 0;
    }

    /// Drops this hart's reservation if it covers the given physical word.
    /// Invoked by the orchestrator for stores other harts retire.
    pub fn clear_matching_reservation(&mut self, physical_address: u32) {
        if self.reservation_matches(physical_address) {
            self.reservation = 0;
        }
    }

    fn note_store(&mut self, physical_address: u32) {
        self.store_broadcast = Some(physical_address);
        self.clear_matching_reservation(physical_address);
    }

    /// Returns the physical address of the store retired by the last step,
    /// clearing it.
    pub fn take_store_broadcast(&mut self) -> Option<u32> {
        self.store_broadcast.take()
    }

    /// Returns the cause code of the interrupt to take, if any is both
    /// pending and enabled.
    fn pending_interrupt(&self) -> Option<u32> {
        let pending = self.csrs.read(csr::SIE) & self.csrs.read(csr::SIP);
        if pending == 0 {
            return None;
        }
        let enabled = match self.privilege {
            PrivilegeLevel::Supervisor => self.csrs.sstatus_sie(),
            PrivilegeLevel::User => true,
            PrivilegeLevel::Machine => false,
        };
        if !enabled {
            return None;
        }
        [
            csr::interrupt::SUPERVISOR_EXTERNAL,
            csr::interrupt::SUPERVISOR_SOFTWARE,
            csr::interrupt::SUPERVISOR_TIMER,
        ]
        .into_iter()
        .find(|&code| pending & bits::bit(code) != 0)
    }

    /// Executes a single instruction, taking pending interrupts first.
    ///
    /// Architectural exceptions are handled here: the trap is entered and the
    /// cause returned for diagnostics only. The out-of-band causes
    /// ([`ExceptionCause::code`] of `None`) leave the architectural state of
    /// the trap path untouched.
    pub fn step(&mut self, address_space: &mut AddressSpace) -> Result<(), ExceptionCause> {
        self.store_broadcast = None;

        if let Some(code) = self.pending_interrupt() {
            let pc = self.registers.pc();
            self.csrs.write(csr::STVAL, 0);
            self.trap(address_space, bits::bit(31) | code, pc);
            return Ok(());
        }

        let pc = self.registers.pc();
        let raw_instruction = match self.fetch_word(address_space, pc) {
            Ok(raw_instruction) => raw_instruction,
            Err(cause) => {
                if let Some(code) = cause.code() {
                    self.trap(address_space, code, pc);
                }
                return Err(cause);
            }
        };

        let result = execute::dispatch(self, address_space, raw_instruction);

        // The non-branching handlers rely on this increment; jump and branch
        // handlers pre-compensate by writing their destination minus four.
        *self.registers.pc_mut() = self.registers.pc().wrapping_add(4);

        match result {
            Ok(()) => Ok(()),
            Err(cause @ ExceptionCause::EnvironmentCallFromSMode) => {
                // Supervisor ecalls do not trap. The hart parks in the machine
                // trampoline with the pending-ecall bit raised; the
                // orchestrator services the SBI call and returns the hart to
                // supervisor mode.
                self.privilege = PrivilegeLevel::Machine;
                if let Some(code) = cause.code() {
                    self.csrs.set_bit(csr::SIP, code as usize, true);
                    self.csrs.write(csr::SCAUSE, code);
                }
                Ok(())
            }
            Err(cause) => match cause.code() {
                Some(code) => {
                    if !cause.tval_set_by_accessor() {
                        self.csrs.write(csr::STVAL, pc);
                    }
                    self.trap(address_space, code, pc);
                    Err(cause)
                }
                None => Err(cause),
            },
        }
    }

    /// Enters the supervisor trap handler.
    ///
    /// `pc` is the address of the faulting instruction (or, for interrupts,
    /// of the instruction that was about to execute).
    fn trap(&mut self, address_space: &mut AddressSpace, cause: u32, pc: u32) {
        trace!(
            "hart{}: trap cause {:#010x} at pc {:#010x}",
            self.hart_id,
            cause,
            pc
        );
        let interrupt_enable = self.csrs.sstatus_sie();
        self.csrs
            .set_bit(csr::SSTATUS, csr::sstatus::SPIE, interrupt_enable);
        self.csrs.set_bit(
            csr::SSTATUS,
            csr::sstatus::SPP,
            self.privilege == PrivilegeLevel::Supervisor,
        );
        self.csrs.write(csr::SEPC, pc);
        self.csrs.write(csr::SCAUSE, cause);
        self.csrs.set_bit(csr::SSTATUS, csr::sstatus::SIE, false);
        address_space.invalidate();
        self.privilege = PrivilegeLevel::Supervisor;
        self.clear_reservation();

        let stvec = self.csrs.read(csr::STVEC);
        let base = stvec & !0b11;
        let vectored = stvec & 0b11 == 1;
        let is_interrupt = cause & bits::bit(31) != 0;
        *self.registers.pc_mut() = if vectored && is_interrupt {
            base.wrapping_add(4 * (cause & !bits::bit(31)))
        } else {
            base
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mmu::Sv32Translator;
    use crate::resources::ram::Ram;

    fn fixture() -> (Hart, AddressSpace) {
        let mut address_space = AddressSpace::new();
        address_space.map(0, Box::new(Ram::new(0x10_0000))).unwrap();
        address_space.add_translator(Box::new(Sv32Translator::new()));
        (Hart::new(0), address_space)
    }

    #[test]
    fn test_reset_state() {
        let hart = Hart::new(3);
        assert_eq!(0, hart.registers().pc());
        assert_eq!(3, hart.registers().x(abi::A0));
        assert_eq!(PrivilegeLevel::Supervisor, hart.privilege());
        assert_eq!(0xFFFF_FFFF, hart.csrs().read(csr::MIDELEG));
    }

    #[test]
    fn test_accessor_round_trip() {
        let (mut hart, mut address_space) = fixture();
        hart.write_word(&mut address_space, 0x100, 0x1122_3344).unwrap();
        assert_eq!(0x1122_3344, hart.read_word(&mut address_space, 0x100).unwrap());
        // Little-endian byte order.
        assert_eq!(0x44, hart.read_byte(&mut address_space, 0x100).unwrap());
        assert_eq!(0x3344, hart.read_halfword(&mut address_space, 0x100).unwrap());
        hart.write_byte(&mut address_space, 0x101, 0xAA).unwrap();
        assert_eq!(0x1122_AA44, hart.read_word(&mut address_space, 0x100).unwrap());
        // The physical variants reach the same bytes while satp is bare.
        assert_eq!(
            0x1122_AA44,
            hart.read_word_physical(&mut address_space, 0x100).unwrap()
        );
        hart.write_halfword_physical(&mut address_space, 0x102, 0xBEEF).unwrap();
        assert_eq!(0xBEEF, hart.read_halfword_physical(&mut address_space, 0x102).unwrap());
        assert_eq!(0xEF, hart.read_byte_physical(&mut address_space, 0x102).unwrap());
        hart.write_byte_physical(&mut address_space, 0x103, 0).unwrap();
        assert_eq!(0x00EF, hart.read_halfword(&mut address_space, 0x102).unwrap());
    }

    #[test]
    fn test_misaligned_accesses() {
        let (mut hart, mut address_space) = fixture();
        assert_eq!(
            Err(ExceptionCause::LoadAddressMisaligned),
            hart.read_word(&mut address_space, 0x101)
        );
        assert_eq!(0x101, hart.csrs().read(csr::STVAL));
        assert_eq!(
            Err(ExceptionCause::StoreAddressMisaligned),
            hart.write_halfword(&mut address_space, 0x103, 0)
        );
        assert_eq!(0x103, hart.csrs().read(csr::STVAL));
        assert_eq!(
            Err(ExceptionCause::InstructionAddressMisaligned),
            hart.fetch_word(&mut address_space, 0x102)
        );
    }

    #[test]
    fn test_access_fault_classification() {
        let (mut hart, mut address_space) = fixture();
        assert_eq!(
            Err(ExceptionCause::LoadAccessFault),
            hart.read_word(&mut address_space, 0x8000_0000)
        );
        assert_eq!(
            Err(ExceptionCause::StoreAccessFault),
            hart.write_word(&mut address_space, 0x8000_0000, 0)
        );
        assert_eq!(
            Err(ExceptionCause::InstructionAccessFault),
            hart.fetch_word(&mut address_space, 0x8000_0000)
        );
        assert_eq!(0x8000_0000, hart.csrs().read(csr::STVAL));
    }

    #[test]
    fn test_trap_entry_invariants() {
        let (mut hart, mut address_space) = fixture();
        hart.csrs_mut().set_bit(csr::SSTATUS, csr::sstatus::SIE, true);
        hart.csrs_mut().write(csr::STVEC, 0x4000);
        *hart.registers_mut().pc_mut() = 0x100;
        // An all-zero word decodes as quadrant zero: illegal instruction.
        let result = hart.step(&mut address_space);

        assert_eq!(Err(ExceptionCause::IllegalInstruction), result);
        assert_eq!(Some(2), ExceptionCause::IllegalInstruction.code());
        assert_eq!(2, hart.csrs().read(csr::SCAUSE));
        assert_eq!(0x100, hart.csrs().read(csr::SEPC));
        assert_eq!(0x100, hart.csrs().read(csr::STVAL));
        assert_eq!(0x4000, hart.registers().pc());
        assert_eq!(PrivilegeLevel::Supervisor, hart.privilege());
        // SPP records supervisor, SPIE the previous SIE, and SIE is cleared.
        assert!(hart.csrs().bit(csr::SSTATUS, csr::sstatus::SPP));
        assert!(hart.csrs().bit(csr::SSTATUS, csr::sstatus::SPIE));
        assert!(!hart.csrs().sstatus_sie());
    }

    #[test]
    fn test_interrupt_taken_when_enabled() {
        let (mut hart, mut address_space) = fixture();
        hart.csrs_mut().set_bit(csr::SSTATUS, csr::sstatus::SIE, true);
        hart.csrs_mut()
            .set_bit(csr::SIE, csr::interrupt::SUPERVISOR_TIMER as usize, true);
        hart.csrs_mut()
            .set_bit(csr::SIP, csr::interrupt::SUPERVISOR_TIMER as usize, true);
        hart.csrs_mut().write(csr::STVEC, 0x4000);
        *hart.registers_mut().pc_mut() = 0x200;

        assert_eq!(Ok(()), hart.step(&mut address_space));
        assert_eq!(0x8000_0005, hart.csrs().read(csr::SCAUSE));
        assert_eq!(0x200, hart.csrs().read(csr::SEPC));
        assert_eq!(0x4000, hart.registers().pc());
    }

    #[test]
    fn test_interrupt_vectored_mode() {
        let (mut hart, mut address_space) = fixture();
        hart.csrs_mut().set_bit(csr::SSTATUS, csr::sstatus::SIE, true);
        hart.csrs_mut()
            .set_bit(csr::SIE, csr::interrupt::SUPERVISOR_TIMER as usize, true);
        hart.csrs_mut()
            .set_bit(csr::SIP, csr::interrupt::SUPERVISOR_TIMER as usize, true);
        hart.csrs_mut().write(csr::STVEC, 0x4000 | 1);

        assert_eq!(Ok(()), hart.step(&mut address_space));
        assert_eq!(0x4000 + 4 * 5, hart.registers().pc());
    }

    #[test]
    fn test_interrupt_masked_by_sstatus_sie() {
        let (mut hart, mut address_space) = fixture();
        hart.csrs_mut()
            .set_bit(csr::SIE, csr::interrupt::SUPERVISOR_TIMER as usize, true);
        hart.csrs_mut()
            .set_bit(csr::SIP, csr::interrupt::SUPERVISOR_TIMER as usize, true);
        // A nop at the reset vector, so the masked step retires normally.
        address_space
            .write_physical(0, &0x0000_0013_u32.to_le_bytes())
            .unwrap();
        // sstatus.SIE clear: supervisor keeps running.
        assert_eq!(Ok(()), hart.step(&mut address_space));
        assert_eq!(0, hart.csrs().read(csr::SCAUSE));
        // But user mode cannot mask supervisor interrupts.
        hart.set_privilege(PrivilegeLevel::User);
        assert_eq!(Ok(()), hart.step(&mut address_space));
        assert_eq!(0x8000_0005, hart.csrs().read(csr::SCAUSE));
    }

    #[test]
    fn test_interrupt_priority_order() {
        let (mut hart, mut address_space) = fixture();
        hart.csrs_mut().set_bit(csr::SSTATUS, csr::sstatus::SIE, true);
        for code in [1, 5, 9] {
            hart.csrs_mut().set_bit(csr::SIE, code, true);
            hart.csrs_mut().set_bit(csr::SIP, code, true);
        }
        assert_eq!(Ok(()), hart.step(&mut address_space));
        // External wins over software and timer.
        assert_eq!(0x8000_0009, hart.csrs().read(csr::SCAUSE));
    }

    #[test]
    fn test_trap_clears_reservation() {
        let (mut hart, mut address_space) = fixture();
        hart.set_reservation(0x100);
        assert!(hart.reservation_matches(0x100));
        hart.trap(&mut address_space, 2, 0);
        assert!(!hart.reservation_matches(0x100));
    }

    #[test]
    fn test_store_broadcast() {
        let (mut hart, mut address_space) = fixture();
        hart.write_word(&mut address_space, 0x40, 1).unwrap();
        assert_eq!(Some(0x40), hart.take_store_broadcast());
        assert_eq!(None, hart.take_store_broadcast());
    }

    #[test]
    fn test_clear_matching_reservation_ignores_low_bits() {
        let mut hart = Hart::new(0);
        hart.set_reservation(0x100);
        hart.clear_matching_reservation(0x102);
        assert!(!hart.reservation_matches(0x100));
        hart.set_reservation(0x100);
        hart.clear_matching_reservation(0x104);
        assert!(hart.reservation_matches(0x100));
    }
}
