//! The machine orchestrator: round-robin hart scheduling, the machine-mode
//! SBI trampoline, and the reset/power-up lifecycle.

use crate::address_space::AddressSpace;
use crate::core::{ExceptionCause, Hart};
use crate::firmware::Firmware;
use crate::PrivilegeLevel;

/// A complete RV32IMA machine: one address space, one firmware instance, and
/// one or more harts stepped one instruction at a time.
///
/// The emulator comes up in its reset state; [`power_up`](Self::power_up)
/// moves it to running, [`reset`](Self::reset) back. While in reset,
/// [`step`](Self::step) reports [`ExceptionCause::CoreStopped`] out-of-band.
#[derive(Debug)]
pub struct Emulator {
    in_reset: bool,
    firmware: Firmware,
    address_space: AddressSpace,
    harts: Vec<Hart>,
    current_hart: usize,
}

impl Emulator {
    /// Creates a machine with `hart_count` harts (ids `0..hart_count`) and an
    /// empty address space. The embedding maps peripherals and registers
    /// translators before powering up.
    pub fn new(hart_count: u32) -> Self {
        assert!(hart_count > 0, "a machine needs at least one hart");
        Self {
            in_reset: true,
            firmware: Firmware::new(),
            address_space: AddressSpace::new(),
            harts: (0..hart_count).map(Hart::new).collect(),
            current_hart: 0,
        }
    }

    pub fn address_space(&self) -> &AddressSpace {
        &self.address_space
    }

    pub fn address_space_mut(&mut self) -> &mut AddressSpace {
        &mut self.address_space
    }

    pub fn harts(&self) -> &[Hart] {
        &self.harts
    }

    pub fn harts_mut(&mut self) -> &mut [Hart] {
        &mut self.harts
    }

    /// Steps the next hart in the round-robin order by one instruction.
    ///
    /// If the step left the hart in the machine trampoline, the SBI call is
    /// serviced and the hart returned to supervisor mode before this returns,
    /// so guest code never observes machine mode. The returned cause is
    /// diagnostic: architectural exceptions have already been handled by the
    /// hart's trap machinery.
    pub fn step(&mut self) -> Result<(), ExceptionCause> {
        if self.in_reset {
            return Err(ExceptionCause::CoreStopped);
        }

        let hart = &mut self.harts[self.current_hart];
        let result = hart.step(&mut self.address_space);

        if hart.privilege() == PrivilegeLevel::Machine {
            self.firmware.handle_ecall(hart);
            hart.set_privilege(PrivilegeLevel::Supervisor);
        }
        self.firmware.update(hart);

        // Stores retired by this hart invalidate overlapping reservations
        // everywhere else.
        let broadcast = hart.take_store_broadcast();
        if let Some(physical_address) = broadcast {
            let current = self.current_hart;
            for (index, other) in self.harts.iter_mut().enumerate() {
                if index != current {
                    other.clear_matching_reservation(physical_address);
                }
            }
        }

        self.current_hart = (self.current_hart + 1) % self.harts.len();
        result
    }

    /// Forces the whole machine back to its reset state and keeps it there.
    pub fn reset(&mut self) {
        for hart in &mut self.harts {
            hart.reset();
        }
        self.address_space.reset();
        self.firmware.reset();
        self.current_hart = 0;
        self.in_reset = true;
    }

    /// Resets the machine and starts it.
    pub fn power_up(&mut self) {
        self.reset();
        self.in_reset = false;
    }
}
