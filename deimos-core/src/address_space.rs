//! Physical address space: a crossbar from 32-bit addresses to memory-mapped
//! peripherals, fronted by a chain of address translators.
//!
//! The address mapping is in the form of a set of non-overlapping memory
//! regions, one per mapped peripheral. Accesses are `(address, size)` pairs;
//! an access is forwarded to the peripheral containing `address` if and only
//! if the entire range `address..address+size` lies within that peripheral's
//! region. Anything else is an access fault of the request direction.
//!
//! Values are serialized in little-endian byte order on both sides of the bus.

use crate::PrivilegeLevel;
use rangemap::RangeInclusiveMap;
use std::fmt::Debug;
use thiserror::Error;

/// The direction of a memory access, used to classify faults and to pick the
/// permission bit a leaf PTE must carry.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AccessType {
    Load,
    Store,
    Fetch,
}

impl AccessType {
    /// The bus error reported when no peripheral claims the address.
    ///
    /// Fetches are reads on the bus; the hart's accessor layer turns the load
    /// classification back into a fetch fault.
    pub fn access_fault(self) -> BusError {
        match self {
            Self::Load | Self::Fetch => BusError::LoadAccessFault,
            Self::Store => BusError::StoreAccessFault,
        }
    }

    /// The bus error reported when address translation fails.
    pub fn page_fault(self) -> BusError {
        match self {
            Self::Load => BusError::LoadPageFault,
            Self::Store => BusError::StorePageFault,
            Self::Fetch => BusError::FetchPageFault,
        }
    }

    /// The bus error reported for a misaligned address.
    pub fn misaligned(self) -> BusError {
        match self {
            Self::Load | Self::Fetch => BusError::LoadMisaligned,
            Self::Store => BusError::StoreMisaligned,
        }
    }
}

/// Everything that can go wrong on the bus.
///
/// This taxonomy is deliberately distinct from the architectural exception
/// causes; the hart's accessor layer owns the single mapping between the two.
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
pub enum BusError {
    #[error("misaligned load address")]
    LoadMisaligned,
    #[error("misaligned store address")]
    StoreMisaligned,
    #[error("load access fault")]
    LoadAccessFault,
    #[error("store access fault")]
    StoreAccessFault,
    #[error("load page fault")]
    LoadPageFault,
    #[error("store page fault")]
    StorePageFault,
    #[error("fetch page fault")]
    FetchPageFault,
}

/// The hart-side state a translator may consult, captured at access time.
#[derive(Debug, Copy, Clone)]
pub struct AccessContext {
    pub access: AccessType,
    pub privilege: PrivilegeLevel,
    /// Value of the `satp` CSR of the accessing hart.
    pub satp: u32,
    /// Value of the `sstatus.SUM` bit of the accessing hart.
    pub sum: bool,
}

/// A memory-mapped peripheral.
///
/// Offsets passed to `read` and `write` are guaranteed to lie in
/// `[0, size())`, and `offset + buf.len()` never exceeds `size()`. A
/// peripheral may still refuse individual offsets by returning a
/// page-fault-class error.
pub trait Peripheral: Debug + Send {
    /// The size of the mapped region in bytes. Must be stable over the
    /// peripheral's lifetime.
    fn size(&self) -> u32;

    /// Invoke a read access for `offset` with size `buf.len()`, filling `buf`.
    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), BusError>;

    /// Invoke a write access for `offset` with size `buf.len()`.
    fn write(&mut self, offset: u32, buf: &[u8]) -> Result<(), BusError>;

    /// Force the peripheral back to its reset state.
    fn reset(&mut self);
}

/// An address translator stage.
///
/// Translators are applied in registration order; the output of one stage is
/// the input of the next. A stage reads and updates in-guest translation
/// structures through the [`PhysicalMemory`] view it is handed.
pub trait AddressTranslator: Debug + Send {
    fn translate(
        &mut self,
        context: &AccessContext,
        memory: &mut PhysicalMemory<'_>,
        address: u32,
    ) -> Result<u32, BusError>;

    /// Drop any cached translation state. Called on trap entry and SFENCE.VMA.
    fn invalidate(&mut self);
}

#[derive(Debug)]
struct PeripheralEntry {
    base: u32,
    peripheral: Box<dyn Peripheral>,
}

/// View of the peripheral table that bypasses translation, handed to
/// translator stages so a page walker can load and write back page-table
/// entries.
#[derive(Debug)]
pub struct PhysicalMemory<'a> {
    regions: &'a RangeInclusiveMap<u32, usize>,
    peripherals: &'a mut Vec<PeripheralEntry>,
}

impl PhysicalMemory<'_> {
    /// Reads a naturally-aligned 32-bit little-endian word.
    pub fn read_word(&mut self, address: u32) -> Result<u32, BusError> {
        let mut buf = [0u8; 4];
        read_physical(self.regions, self.peripherals, address, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Writes a naturally-aligned 32-bit little-endian word.
    pub fn write_word(&mut self, address: u32, value: u32) -> Result<(), BusError> {
        write_physical(self.regions, self.peripherals, address, &value.to_le_bytes())
    }
}

/// The physical address space shared by all harts.
#[derive(Debug, Default)]
pub struct AddressSpace {
    /// Map of physical address range to the index in `peripherals` of the
    /// peripheral the range is mapped to.
    regions: RangeInclusiveMap<u32, usize>,
    peripherals: Vec<PeripheralEntry>,
    translators: Vec<Box<dyn AddressTranslator>>,
}

impl AddressSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `peripheral` at `base`, claiming `base..base + peripheral.size()`.
    ///
    /// The claimed region must not overlap any previously mapped region, and
    /// must fit within the 32-bit address space.
    pub fn map(
        &mut self,
        base: u32,
        peripheral: Box<dyn Peripheral>,
    ) -> Result<(), MappingError> {
        let size = peripheral.size();
        if size == 0 {
            return Err(MappingError::EmptyRegion);
        }
        let end = base
            .checked_add(size - 1)
            .ok_or(MappingError::OutOfAddressSpace)?;
        let range = base..=end;
        if self.regions.overlaps(&range) {
            return Err(MappingError::OverlappingRegions);
        }
        let index = self.peripherals.len();
        self.peripherals.push(PeripheralEntry { base, peripheral });
        self.regions.insert(range, index);
        Ok(())
    }

    /// Appends `translator` to the translation chain.
    pub fn add_translator(&mut self, translator: Box<dyn AddressTranslator>) {
        self.translators.push(translator);
    }

    /// Runs `address` through the translator chain.
    pub fn translate(
        &mut self,
        context: &AccessContext,
        address: u32,
    ) -> Result<u32, BusError> {
        let Self {
            regions,
            peripherals,
            translators,
        } = self;
        let mut memory = PhysicalMemory {
            regions,
            peripherals,
        };
        let mut address = address;
        for translator in translators.iter_mut() {
            address = translator.translate(context, &mut memory, address)?;
        }
        Ok(address)
    }

    /// Invoke a read access for virtual address `address` with size
    /// `buf.len()`, writing the result to `buf`.
    pub fn read(
        &mut self,
        context: &AccessContext,
        address: u32,
        buf: &mut [u8],
    ) -> Result<(), BusError> {
        let physical_address = self.translate(context, address)?;
        self.read_physical_for(context.access, physical_address, buf)
    }

    /// Invoke a write access for virtual address `address` with size
    /// `buf.len()`, reading the data from `buf`.
    ///
    /// Returns the physical address the bytes landed at; the hart uses it for
    /// reservation bookkeeping.
    pub fn write(
        &mut self,
        context: &AccessContext,
        address: u32,
        buf: &[u8],
    ) -> Result<u32, BusError> {
        let physical_address = self.translate(context, address)?;
        self.write_physical(physical_address, buf)?;
        Ok(physical_address)
    }

    /// Reads from physical address `address`, bypassing translation.
    pub fn read_physical(&mut self, address: u32, buf: &mut [u8]) -> Result<(), BusError> {
        read_physical(&self.regions, &mut self.peripherals, address, buf)
    }

    /// Writes to physical address `address`, bypassing translation.
    pub fn write_physical(&mut self, address: u32, buf: &[u8]) -> Result<(), BusError> {
        write_physical(&self.regions, &mut self.peripherals, address, buf)
    }

    fn read_physical_for(
        &mut self,
        access: AccessType,
        address: u32,
        buf: &mut [u8],
    ) -> Result<(), BusError> {
        match locate(&self.regions, &mut self.peripherals, address, buf.len()) {
            Some((entry, offset)) => entry.peripheral.read(offset, buf),
            None => Err(access.access_fault()),
        }
    }

    /// Drops all cached translation state.
    pub fn invalidate(&mut self) {
        for translator in &mut self.translators {
            translator.invalidate();
        }
    }

    /// Invalidates all translators and resets all peripherals.
    pub fn reset(&mut self) {
        self.invalidate();
        for entry in &mut self.peripherals {
            entry.peripheral.reset();
        }
    }
}

/// Resolves `address` to the entry whose region contains the entire
/// `address..address + len` range, along with the offset into the peripheral.
fn locate<'p>(
    regions: &RangeInclusiveMap<u32, usize>,
    peripherals: &'p mut Vec<PeripheralEntry>,
    address: u32,
    len: usize,
) -> Option<(&'p mut PeripheralEntry, u32)> {
    const_assert!(usize::BITS >= 32);
    let (range, &index) = regions.get_key_value(&address)?;
    if len != 0 && len - 1 > (range.end() - address) as usize {
        return None;
    }
    let entry = &mut peripherals[index];
    let offset = address - entry.base;
    Some((entry, offset))
}

fn read_physical(
    regions: &RangeInclusiveMap<u32, usize>,
    peripherals: &mut Vec<PeripheralEntry>,
    address: u32,
    buf: &mut [u8],
) -> Result<(), BusError> {
    match locate(regions, peripherals, address, buf.len()) {
        Some((entry, offset)) => entry.peripheral.read(offset, buf),
        None => Err(BusError::LoadAccessFault),
    }
}

fn write_physical(
    regions: &RangeInclusiveMap<u32, usize>,
    peripherals: &mut Vec<PeripheralEntry>,
    address: u32,
    buf: &[u8],
) -> Result<(), BusError> {
    match locate(regions, peripherals, address, buf.len()) {
        Some((entry, offset)) => entry.peripheral.write(offset, buf),
        None => Err(BusError::StoreAccessFault),
    }
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum MappingError {
    /// The claimed region overlaps with a previously mapped region.
    #[error("memory region overlaps with previously mapped memory region")]
    OverlappingRegions,
    /// The claimed region extends past the end of the 32-bit address space.
    #[error("memory region extends past the end of the address space")]
    OutOfAddressSpace,
    /// The peripheral reports a size of zero.
    #[error("cannot map a peripheral of size zero")]
    EmptyRegion,
}

/// A bare context for accesses that carry no hart state; translators that
/// consult `satp` see translation disabled.
pub fn bare_context(access: AccessType) -> AccessContext {
    AccessContext {
        access,
        privilege: PrivilegeLevel::Machine,
        satp: 0,
        sum: false,
    }
}
