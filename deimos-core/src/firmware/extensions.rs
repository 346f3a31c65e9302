//! The SBI extensions the firmware registers.

use super::{SbiExtension, SbiResult};
use crate::core::{csr, Hart};
use crate::registers::abi;

/// Packs a four-byte ASCII name into the big-endian extension id encoding.
const fn packed_id(name: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*name)
}

/// The Base extension id.
pub const BASE: u32 = 0x10;
/// The Timer extension id.
pub const TIMER: u32 = packed_id(b"TIME");
/// The System Reset extension id.
pub const SYSTEM_RESET: u32 = packed_id(b"SRST");
/// The Hart State Management extension id.
pub const HSM: u32 = packed_id(b"\0HSM");
/// The Inter-Processor Interrupt extension id.
pub const IPI: u32 = packed_id(b"\0sPI");
/// The Remote Fence extension id.
pub const RFENCE: u32 = packed_id(b"RFNC");

/// Uniform signature of an extension function: the calling hart plus the six
/// argument registers `a0..a5`.
type ExtensionFn<E> = fn(&mut E, &mut Hart, &[u32; 6]) -> SbiResult;

/// Scans a declaration-ordered function table.
fn dispatch_function<E>(
    extension: &mut E,
    functions: &[(u32, ExtensionFn<E>)],
    hart: &mut Hart,
    function_id: u32,
    args: &[u32; 6],
) -> SbiResult {
    match functions.iter().find(|(id, _)| *id == function_id) {
        Some((_, function)) => function(extension, hart, args),
        None => SbiResult::NOT_SUPPORTED,
    }
}

/// The Base extension: version and machine-identity queries plus extension
/// probing.
#[derive(Debug)]
pub struct BaseExtension {
    /// Ids of every extension in the firmware registry, for probing.
    registered: Vec<u32>,
}

impl BaseExtension {
    const FUNCTIONS: &'static [(u32, ExtensionFn<Self>)] = &[
        (0, Self::get_sbi_spec_version),
        (1, Self::get_sbi_impl_id),
        (2, Self::get_sbi_impl_version),
        (3, Self::probe_extension),
        (4, Self::get_mvendorid),
        (5, Self::get_marchid),
        (6, Self::get_mimpid),
    ];

    const SBI_SPEC_VERSION: u32 = 2 << 24;
    const SBI_IMPL_ID: u32 = 0x999;
    const SBI_IMPL_VERSION: u32 = 1;
    const MVENDORID: u32 = 0x1234_5678;
    const MARCHID: u32 = (1 << 31) | 1;
    const MIMPID: u32 = 1;

    pub fn new(registered: Vec<u32>) -> Self {
        Self { registered }
    }

    fn get_sbi_spec_version(&mut self, _hart: &mut Hart, _args: &[u32; 6]) -> SbiResult {
        SbiResult::success(Self::SBI_SPEC_VERSION)
    }

    fn get_sbi_impl_id(&mut self, _hart: &mut Hart, _args: &[u32; 6]) -> SbiResult {
        SbiResult::success(Self::SBI_IMPL_ID)
    }

    fn get_sbi_impl_version(&mut self, _hart: &mut Hart, _args: &[u32; 6]) -> SbiResult {
        SbiResult::success(Self::SBI_IMPL_VERSION)
    }

    fn probe_extension(&mut self, _hart: &mut Hart, args: &[u32; 6]) -> SbiResult {
        let available = self.registered.contains(&args[0]);
        SbiResult::success(available as u32)
    }

    fn get_mvendorid(&mut self, _hart: &mut Hart, _args: &[u32; 6]) -> SbiResult {
        SbiResult::success(Self::MVENDORID)
    }

    fn get_marchid(&mut self, _hart: &mut Hart, _args: &[u32; 6]) -> SbiResult {
        SbiResult::success(Self::MARCHID)
    }

    fn get_mimpid(&mut self, _hart: &mut Hart, _args: &[u32; 6]) -> SbiResult {
        SbiResult::success(Self::MIMPID)
    }
}

impl SbiExtension for BaseExtension {
    fn id(&self) -> u32 {
        BASE
    }

    fn call(&mut self, hart: &mut Hart, function_id: u32, args: &[u32; 6]) -> SbiResult {
        dispatch_function(self, Self::FUNCTIONS, hart, function_id, args)
    }
}

/// The Timer extension: a per-hart 64-bit compare value against a shared
/// wall-step counter.
///
/// Every update advances the cycle counter (attributed to hart 0 so multiple
/// harts share one timebase), derives the time from it, mirrors both into the
/// stepped hart's counter CSRs, and raises the supervisor timer-pending bit
/// once the compare value is reached.
#[derive(Debug)]
pub struct TimerExtension {
    cycle_counter: u64,
    timer_value: u64,
    compare: Vec<u64>,
}

impl TimerExtension {
    const FUNCTIONS: &'static [(u32, ExtensionFn<Self>)] = &[(0, Self::set_timer)];

    /// Nanoseconds per counted cycle, from the device tree's 65 MHz clock
    /// with the interpreter's two-steps-per-cycle pacing.
    const CYCLE_TIME: u64 = (1_000_000_000 / 65_000_000) / 2;

    pub fn new() -> Self {
        Self {
            cycle_counter: 0,
            timer_value: 0,
            compare: Vec::new(),
        }
    }

    fn set_timer(&mut self, hart: &mut Hart, args: &[u32; 6]) -> SbiResult {
        let compare = u64::from(args[1]) << 32 | u64::from(args[0]);
        *self.compare_for(hart.hart_id()) = compare;
        hart.csrs_mut()
            .set_bit(csr::SIP, csr::interrupt::SUPERVISOR_TIMER as usize, false);
        SbiResult::success(0)
    }

    fn compare_for(&mut self, hart_id: u32) -> &mut u64 {
        let hart_id = hart_id as usize;
        if self.compare.len() <= hart_id {
            self.compare.resize(hart_id + 1, 0);
        }
        &mut self.compare[hart_id]
    }
}

impl Default for TimerExtension {
    fn default() -> Self {
        Self::new()
    }
}

impl SbiExtension for TimerExtension {
    fn id(&self) -> u32 {
        TIMER
    }

    fn call(&mut self, hart: &mut Hart, function_id: u32, args: &[u32; 6]) -> SbiResult {
        dispatch_function(self, Self::FUNCTIONS, hart, function_id, args)
    }

    fn update(&mut self, hart: &mut Hart) {
        self.timer_value = self.cycle_counter * Self::CYCLE_TIME;

        let csrs = hart.csrs_mut();
        csrs.write(csr::TIME, self.timer_value as u32);
        csrs.write(csr::TIMEH, (self.timer_value >> 32) as u32);
        csrs.write(csr::CYCLE, self.cycle_counter as u32);
        csrs.write(csr::CYCLEH, (self.cycle_counter >> 32) as u32);

        if self.timer_value >= *self.compare_for(hart.hart_id()) {
            hart.csrs_mut()
                .set_bit(csr::SIP, csr::interrupt::SUPERVISOR_TIMER as usize, true);
        }

        if hart.hart_id() == 0 {
            self.cycle_counter += 1;
        }
    }

    fn reset(&mut self) {
        self.compare.clear();
    }
}

/// An extension that is present for probing but exposes no functions; every
/// call comes back not-supported.
#[derive(Debug)]
pub struct StubExtension {
    id: u32,
}

impl StubExtension {
    pub fn new(id: u32) -> Self {
        Self { id }
    }
}

impl SbiExtension for StubExtension {
    fn id(&self) -> u32 {
        self.id
    }

    fn call(&mut self, _hart: &mut Hart, _function_id: u32, _args: &[u32; 6]) -> SbiResult {
        SbiResult::NOT_SUPPORTED
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::SbiError;

    #[test]
    fn test_extension_ids_pack_big_endian() {
        assert_eq!(0x54494D45, TIMER);
        assert_eq!(0x53525354, SYSTEM_RESET);
        assert_eq!(0x0048534D, HSM);
        assert_eq!(0x00735049, IPI);
        assert_eq!(0x52464E43, RFENCE);
    }

    #[test]
    fn test_set_timer_clears_pending_and_arms_compare() {
        let mut timer = TimerExtension::new();
        let mut hart = Hart::new(0);
        hart.csrs_mut()
            .set_bit(csr::SIP, csr::interrupt::SUPERVISOR_TIMER as usize, true);

        let result = timer.call(&mut hart, 0, &[0x100, 0, 0, 0, 0, 0]);
        assert_eq!(SbiError::Success, result.error);
        assert!(!hart
            .csrs()
            .bit(csr::SIP, csr::interrupt::SUPERVISOR_TIMER as usize));
        assert_eq!(0x100, timer.compare[0]);

        // High word lands in the upper compare half.
        timer.call(&mut hart, 0, &[0, 1, 0, 0, 0, 0]);
        assert_eq!(1 << 32, timer.compare[0]);
    }

    #[test]
    fn test_update_mirrors_counters_and_fires() {
        let mut timer = TimerExtension::new();
        let mut hart = Hart::new(0);
        // Arm far enough out that a couple of updates stay quiet.
        timer.call(&mut hart, 0, &[4 * TimerExtension::CYCLE_TIME as u32, 0, 0, 0, 0, 0]);

        for _ in 0..4 {
            timer.update(&mut hart);
            assert!(!hart
                .csrs()
                .bit(csr::SIP, csr::interrupt::SUPERVISOR_TIMER as usize));
        }
        // Cycle 4 reaches time = compare.
        timer.update(&mut hart);
        assert!(hart
            .csrs()
            .bit(csr::SIP, csr::interrupt::SUPERVISOR_TIMER as usize));
        assert_eq!(4, hart.csrs().read(csr::CYCLE));
        assert_eq!(
            4 * TimerExtension::CYCLE_TIME as u32,
            hart.csrs().read(csr::TIME)
        );
    }

    #[test]
    fn test_cycle_counter_attributed_to_hart_zero() {
        let mut timer = TimerExtension::new();
        let mut hart0 = Hart::new(0);
        let mut hart1 = Hart::new(1);
        // Park both compares far away.
        timer.call(&mut hart0, 0, &[u32::MAX, u32::MAX, 0, 0, 0, 0]);
        timer.call(&mut hart1, 0, &[u32::MAX, u32::MAX, 0, 0, 0, 0]);

        timer.update(&mut hart1);
        timer.update(&mut hart1);
        assert_eq!(0, timer.cycle_counter);
        timer.update(&mut hart0);
        assert_eq!(1, timer.cycle_counter);
    }

    #[test]
    fn test_unknown_function_not_supported() {
        let mut timer = TimerExtension::new();
        let mut hart = Hart::new(0);
        let result = timer.call(&mut hart, 99, &[0; 6]);
        assert_eq!(SbiError::NotSupported, result.error);
    }

    #[test]
    fn test_timer_reset_drops_compares() {
        let mut timer = TimerExtension::new();
        let mut hart = Hart::new(0);
        timer.call(&mut hart, 0, &[5, 0, 0, 0, 0, 0]);
        timer.reset();
        assert!(timer.compare.is_empty());
    }
}
