//! Sv32 virtual address translation.
//!
//! > Sv32 implementations support a 32-bit virtual address space, divided into 4 KiB pages. An
//! > Sv32 virtual address is partitioned into a virtual page number (VPN) and page offset. [...]
//! > Sv32 page tables consist of 2^10 page-table entries (PTEs), each of four bytes. A page table
//! > is exactly the size of a page and must always be aligned to a page boundary.
//!
//! The walker runs as a stage in the address space's translator chain. It
//! keeps no cached state, so the invalidation hook (trap entry, SFENCE.VMA)
//! has nothing to drop; a TLB added later must clear itself there.

use crate::address_space::{
    AccessContext, AccessType, AddressTranslator, BusError, PhysicalMemory,
};
use crate::{bits, PrivilegeLevel};

/// Size of a page, and of one page table, in bytes.
pub const PAGE_SIZE: u32 = 4096;

/// A 32-bit Sv32 page-table entry.
///
/// Layout: `PPN1[31:20] PPN0[19:10] RSW[9:8] D A G U X W R V`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Pte(pub u32);

impl Pte {
    const V: u32 = bits::bit(0);
    const R: u32 = bits::bit(1);
    const W: u32 = bits::bit(2);
    const X: u32 = bits::bit(3);
    const U: u32 = bits::bit(4);
    const A: u32 = bits::bit(6);
    const D: u32 = bits::bit(7);

    pub fn valid(self) -> bool {
        self.0 & Self::V != 0
    }

    pub fn readable(self) -> bool {
        self.0 & Self::R != 0
    }

    pub fn writable(self) -> bool {
        self.0 & Self::W != 0
    }

    pub fn executable(self) -> bool {
        self.0 & Self::X != 0
    }

    pub fn user(self) -> bool {
        self.0 & Self::U != 0
    }

    pub fn accessed(self) -> bool {
        self.0 & Self::A != 0
    }

    pub fn dirty(self) -> bool {
        self.0 & Self::D != 0
    }

    /// A PTE with V set but neither R nor X points to the next level table.
    pub fn is_pointer(self) -> bool {
        !self.readable() && !self.executable()
    }

    /// The low half of the physical page number (bits 10..=19).
    pub fn ppn0(self) -> u32 {
        bits::extract(self.0, 10, 19)
    }

    /// The high half of the physical page number (bits 20..=31).
    pub fn ppn1(self) -> u32 {
        bits::extract(self.0, 20, 31)
    }

    /// The full 22-bit physical page number (bits 10..=31).
    pub fn ppn(self) -> u32 {
        bits::extract(self.0, 10, 31)
    }
}

/// The two-level Sv32 page walker.
#[derive(Debug, Default)]
pub struct Sv32Translator;

impl Sv32Translator {
    pub fn new() -> Self {
        Self
    }

    fn walk(
        &mut self,
        context: &AccessContext,
        memory: &mut PhysicalMemory<'_>,
        virtual_address: u32,
    ) -> Result<u32, BusError> {
        let fault = context.access.page_fault();

        // Physical addresses are 32 bits on this bus; walks through malformed
        // tables wrap rather than widen, and fault on the resulting miss.
        let root = bits::extract(context.satp, 0, 21).wrapping_mul(PAGE_SIZE);
        let vpn = [
            bits::extract(virtual_address, 12, 21),
            bits::extract(virtual_address, 22, 31),
        ];

        let mut table = root;
        let mut level = 1;
        loop {
            let entry_address = table.wrapping_add(vpn[level] * 4);
            let pte = Pte(memory.read_word(entry_address).map_err(|_| fault)?);

            if !pte.valid() {
                return Err(fault);
            }

            if pte.is_pointer() {
                // Pointer entries must not carry W, and level 0 must be a leaf.
                if pte.writable() || level == 0 {
                    return Err(fault);
                }
                table = pte.ppn().wrapping_mul(PAGE_SIZE);
                level -= 1;
                continue;
            }

            // Leaf entry; check the permission the access needs.
            if pte.writable() && !pte.readable() {
                return Err(fault);
            }
            let permitted = match context.access {
                AccessType::Fetch => pte.executable(),
                AccessType::Load => pte.readable(),
                AccessType::Store => pte.writable(),
            };
            if !permitted {
                return Err(fault);
            }
            match context.privilege {
                PrivilegeLevel::User if !pte.user() => return Err(fault),
                PrivilegeLevel::Supervisor if pte.user() && !context.sum => {
                    return Err(fault)
                }
                _ => {}
            }

            // A superpage leaf must be aligned on a 4 MiB boundary.
            if level == 1 && pte.ppn0() != 0 {
                return Err(fault);
            }

            // Maintain the accessed and dirty bits. The writeback must land;
            // a page table in unmapped memory is a translation failure.
            let store = context.access == AccessType::Store;
            if !pte.accessed() || (store && !pte.dirty()) {
                let mut updated = pte.0 | Pte::A;
                if store {
                    updated |= Pte::D;
                }
                memory.write_word(entry_address, updated).map_err(|_| fault)?;
            }

            let offset = virtual_address & (PAGE_SIZE - 1);
            let physical_address = if level == 1 {
                (pte.ppn1() << 22) | (vpn[0] << 12) | offset
            } else {
                (pte.ppn1() << 22) | (pte.ppn0() << 12) | offset
            };
            return Ok(physical_address);
        }
    }
}

impl AddressTranslator for Sv32Translator {
    fn translate(
        &mut self,
        context: &AccessContext,
        memory: &mut PhysicalMemory<'_>,
        address: u32,
    ) -> Result<u32, BusError> {
        // satp.MODE = 0 selects bare mode: virtual equals physical.
        if bits::extract(context.satp, 31, 31) == 0 {
            return Ok(address);
        }
        self.walk(context, memory, address)
    }

    fn invalidate(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address_space::AddressSpace;
    use crate::resources::ram::Ram;

    const SATP_MODE: u32 = bits::bit(31);

    /// Address space with RAM at 0 (holding the page tables) and RAM at
    /// 0x4030_0000 (the superpage test target), plus the Sv32 stage.
    fn sv32_space() -> AddressSpace {
        let mut address_space = AddressSpace::new();
        address_space.map(0, Box::new(Ram::new(0x10_0000))).unwrap();
        address_space
            .map(0x4030_0000, Box::new(Ram::new(0x10_0000)))
            .unwrap();
        address_space.add_translator(Box::new(Sv32Translator::new()));
        address_space
    }

    fn context(access: AccessType, privilege: PrivilegeLevel, satp: u32, sum: bool) -> AccessContext {
        AccessContext {
            access,
            privilege,
            satp,
            sum,
        }
    }

    fn write_pte(address_space: &mut AddressSpace, address: u32, pte: u32) {
        address_space
            .write_physical(address, &pte.to_le_bytes())
            .unwrap();
    }

    fn read_pte(address_space: &mut AddressSpace, address: u32) -> Pte {
        let mut buf = [0u8; 4];
        address_space.read_physical(address, &mut buf).unwrap();
        Pte(u32::from_le_bytes(buf))
    }

    #[test]
    fn test_bare_mode_passes_through() {
        let mut address_space = sv32_space();
        let context = context(AccessType::Load, PrivilegeLevel::Supervisor, 0, false);
        assert_eq!(Ok(0x1234), address_space.translate(&context, 0x1234));
    }

    #[test]
    fn test_superpage_walk() {
        let mut address_space = sv32_space();
        // Root page table at physical 0x1000 (satp PPN = 1).
        let satp = SATP_MODE | 1;
        let virtual_address = 0x1234_5678;
        // VPN1 = 0x48; leaf with V|R, PPN1 = 0x100, PPN0 = 0.
        let entry_address = 0x1000 + 0x48 * 4;
        write_pte(&mut address_space, entry_address, (0x100 << 20) | 0b11);

        let context = context(AccessType::Load, PrivilegeLevel::Supervisor, satp, false);
        assert_eq!(
            Ok(0x4034_5678),
            address_space.translate(&context, virtual_address)
        );
        // The accessed bit is live in memory afterwards.
        assert!(read_pte(&mut address_space, entry_address).accessed());
    }

    #[test]
    fn test_two_level_walk_and_dirty_bit() {
        let mut address_space = sv32_space();
        let satp = SATP_MODE | 1;
        let virtual_address = 0x0040_2084; // VPN1 = 1, VPN0 = 2, offset 0x84
        // Pointer entry at root index 1 to the table in page 3.
        write_pte(&mut address_space, 0x1000 + 4, (3 << 10) | 0b1);
        // Leaf at index 2 of that table: V|R|W, PPN = 5.
        let leaf_address = 0x3000 + 2 * 4;
        write_pte(&mut address_space, leaf_address, (5 << 10) | 0b111);

        let load = context(AccessType::Load, PrivilegeLevel::Supervisor, satp, false);
        assert_eq!(Ok(0x5084), address_space.translate(&load, virtual_address));
        let pte = read_pte(&mut address_space, leaf_address);
        assert!(pte.accessed());
        assert!(!pte.dirty());

        let store = context(AccessType::Store, PrivilegeLevel::Supervisor, satp, false);
        assert_eq!(Ok(0x5084), address_space.translate(&store, virtual_address));
        assert!(read_pte(&mut address_space, leaf_address).dirty());
    }

    #[test]
    fn test_invalid_entry_faults_per_direction() {
        let mut address_space = sv32_space();
        let satp = SATP_MODE | 1;
        // Root table is all zeroes: V = 0 everywhere.
        for (access, expected) in [
            (AccessType::Load, BusError::LoadPageFault),
            (AccessType::Store, BusError::StorePageFault),
            (AccessType::Fetch, BusError::FetchPageFault),
        ] {
            let context = context(access, PrivilegeLevel::Supervisor, satp, false);
            assert_eq!(Err(expected), address_space.translate(&context, 0));
        }
    }

    #[test]
    fn test_permission_bits() {
        let mut address_space = sv32_space();
        let satp = SATP_MODE | 1;
        // Read-only leaf superpage at VPN1 = 0.
        write_pte(&mut address_space, 0x1000, 0b11);

        let load = context(AccessType::Load, PrivilegeLevel::Supervisor, satp, false);
        assert!(address_space.translate(&load, 0x123).is_ok());
        let store = context(AccessType::Store, PrivilegeLevel::Supervisor, satp, false);
        assert_eq!(
            Err(BusError::StorePageFault),
            address_space.translate(&store, 0x123)
        );
        let fetch = context(AccessType::Fetch, PrivilegeLevel::Supervisor, satp, false);
        assert_eq!(
            Err(BusError::FetchPageFault),
            address_space.translate(&fetch, 0x123)
        );
    }

    #[test]
    fn test_write_without_read_is_illegal() {
        let mut address_space = sv32_space();
        let satp = SATP_MODE | 1;
        // W set with R clear is a reserved leaf encoding (X makes it a leaf).
        write_pte(&mut address_space, 0x1000, 0b1101);
        let store = context(AccessType::Store, PrivilegeLevel::Supervisor, satp, false);
        assert_eq!(
            Err(BusError::StorePageFault),
            address_space.translate(&store, 0x123)
        );
    }

    #[test]
    fn test_user_bit_enforcement() {
        let mut address_space = sv32_space();
        let satp = SATP_MODE | 1;
        // Supervisor-only leaf.
        write_pte(&mut address_space, 0x1000, 0b11);
        let user = context(AccessType::Load, PrivilegeLevel::User, satp, false);
        assert_eq!(
            Err(BusError::LoadPageFault),
            address_space.translate(&user, 0x123)
        );

        // User leaf at VPN1 = 1: supervisor needs SUM.
        write_pte(&mut address_space, 0x1000 + 4, 0b1_0011);
        let supervisor = context(AccessType::Load, PrivilegeLevel::Supervisor, satp, false);
        assert_eq!(
            Err(BusError::LoadPageFault),
            address_space.translate(&supervisor, 0x0040_0000)
        );
        let with_sum = context(AccessType::Load, PrivilegeLevel::Supervisor, satp, true);
        assert!(address_space.translate(&with_sum, 0x0040_0000).is_ok());
        // And user mode reaches it directly.
        let user = context(AccessType::Load, PrivilegeLevel::User, satp, false);
        assert!(address_space.translate(&user, 0x0040_0000).is_ok());
    }

    #[test]
    fn test_misaligned_superpage_faults() {
        let mut address_space = sv32_space();
        let satp = SATP_MODE | 1;
        // Level-1 leaf with PPN0 != 0.
        write_pte(&mut address_space, 0x1000, (1 << 10) | 0b11);
        let load = context(AccessType::Load, PrivilegeLevel::Supervisor, satp, false);
        assert_eq!(
            Err(BusError::LoadPageFault),
            address_space.translate(&load, 0x123)
        );
    }

    #[test]
    fn test_pointer_at_level_zero_faults() {
        let mut address_space = sv32_space();
        let satp = SATP_MODE | 1;
        // Pointer to page 3, whose entry 0 is another pointer.
        write_pte(&mut address_space, 0x1000, (3 << 10) | 0b1);
        write_pte(&mut address_space, 0x3000, (4 << 10) | 0b1);
        let load = context(AccessType::Load, PrivilegeLevel::Supervisor, satp, false);
        assert_eq!(
            Err(BusError::LoadPageFault),
            address_space.translate(&load, 0)
        );
    }

    #[test]
    fn test_pointer_with_write_bit_faults() {
        let mut address_space = sv32_space();
        let satp = SATP_MODE | 1;
        // V|W with R = X = 0 is a malformed pointer.
        write_pte(&mut address_space, 0x1000, (3 << 10) | 0b0101);
        let load = context(AccessType::Load, PrivilegeLevel::Supervisor, satp, false);
        assert_eq!(
            Err(BusError::LoadPageFault),
            address_space.translate(&load, 0)
        );
    }

    #[test]
    fn test_walk_outside_memory_faults() {
        let mut address_space = sv32_space();
        // Root page table far outside any mapped region.
        let satp = SATP_MODE | 0x0008_0000;
        let load = context(AccessType::Load, PrivilegeLevel::Supervisor, satp, false);
        assert_eq!(
            Err(BusError::LoadPageFault),
            address_space.translate(&load, 0)
        );
    }
}
