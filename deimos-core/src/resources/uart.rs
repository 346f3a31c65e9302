//! 8250-compatible UART, reduced to a byte sink towards the host terminal and
//! a byte source fed by it.
//!
//! Resources:
//! - <https://uart16550.readthedocs.io>
//! - <https://github.com/qemu/qemu/blob/master/hw/char/serial.c>
//!
//! The register file is the classic eight-byte window: offset 0 is the
//! receive/transmit buffer (or the divisor latch low byte when DLAB is set),
//! offset 1 the interrupt enable register (or the divisor latch high byte),
//! then IIR, LCR, MCR, LSR, MSR. Offsets past 6 are refused with a
//! page-fault-class bus error. Interrupts are not modelled; the line status
//! register permanently advertises an empty transmitter.

use crate::address_space::{BusError, Peripheral};
use bitvec::order::Lsb0;
use bitvec::view::BitView;
use std::collections::VecDeque;
use std::fmt;

/// Callback invoked for every byte the guest writes to the transmit buffer.
pub type ByteSink = Box<dyn FnMut(u8) + Send>;

/// Number of bytes of the mapped region (1 MiB, matching the platform's
/// memory map).
const REGION_SIZE: u32 = 0x10_0000;

mod lsr {
    /// Data Ready: at least one byte is waiting in the receive buffer.
    pub const DR: usize = 0;
    /// Transmitter Holding Register Empty.
    pub const THRE: usize = 5;
    /// Transmitter Shift Register Empty.
    pub const TSRE: usize = 6;
}

pub struct Uart {
    sink: ByteSink,
    rx_queue: VecDeque<u8>,
    /// Interrupt Enable Register
    ier: u8,
    /// Interrupt Identification Register
    iir: u8,
    /// Line Control Register
    lcr: u8,
    /// Modem Control Register
    mcr: u8,
    /// Line Status Register
    lsr: u8,
    /// Modem Status Register
    msr: u8,
    /// Divisor Latch low byte
    dll: u8,
    /// Divisor Latch high byte
    dlm: u8,
}

impl Uart {
    /// Create a new UART in reset state, transmitting through `sink`.
    pub fn new(sink: ByteSink) -> Self {
        let mut uart = Self {
            sink,
            rx_queue: VecDeque::new(),
            ier: 0,
            iir: 0,
            lcr: 0,
            mcr: 0,
            lsr: 0,
            msr: 0,
            dll: 0,
            dlm: 0,
        };
        uart.reset_registers();
        uart
    }

    /// Queue a byte received from the host terminal.
    pub fn push_byte(&mut self, byte: u8) {
        self.rx_queue.push_back(byte);
        self.set_lsr(lsr::DR, true);
    }

    /// Returns `true` if the Divisor Latch Access Bit of the LCR is set.
    fn dlab(&self) -> bool {
        self.lcr.view_bits::<Lsb0>()[7]
    }

    fn set_lsr(&mut self, index: usize, value: bool) {
        self.lsr.view_bits_mut::<Lsb0>().set(index, value);
    }

    /// Pops the next received byte, or `0` if the receive buffer is empty.
    fn pop_rx(&mut self) -> u8 {
        let value = self.rx_queue.pop_front().unwrap_or(0);
        if self.rx_queue.is_empty() {
            self.set_lsr(lsr::DR, false);
        }
        value
    }

    fn read_register(&mut self, offset: u32) -> Result<u8, BusError> {
        let value = match offset {
            0 if self.dlab() => self.dll,
            0 => self.pop_rx(),
            1 if self.dlab() => self.dlm,
            1 => self.ier,
            2 => self.iir,
            3 => self.lcr,
            4 => self.mcr,
            5 => self.lsr,
            6 => self.msr,
            _ => return Err(BusError::LoadPageFault),
        };
        Ok(value)
    }

    fn write_register(&mut self, offset: u32, value: u8) -> Result<(), BusError> {
        match offset {
            0 if self.dlab() => self.dll = value,
            0 => (self.sink)(value),
            1 if self.dlab() => self.dlm = value,
            1 => self.ier = value,
            2 => self.iir = value,
            3 => self.lcr = value,
            4 => self.mcr = value,
            5 => self.lsr = value,
            6 => self.msr = value,
            _ => return Err(BusError::StorePageFault),
        }
        Ok(())
    }

    fn reset_registers(&mut self) {
        self.rx_queue.clear();
        self.ier = 0;
        self.iir = 0;
        self.lcr = 0;
        self.mcr = 0;
        // The transmitter is always drained instantly, so both the holding
        // and shift registers read as empty from reset on.
        self.lsr = 0;
        self.set_lsr(lsr::THRE, true);
        self.set_lsr(lsr::TSRE, true);
        self.msr = 0;
        self.dll = 0;
        self.dlm = 0;
    }
}

impl Peripheral for Uart {
    fn size(&self) -> u32 {
        REGION_SIZE
    }

    /// See [`Peripheral::read`].
    ///
    /// Only the first byte of `buf` receives the register value; wider reads
    /// see zeroes in the remaining bytes.
    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), BusError> {
        let value = self.read_register(offset)?;
        buf.fill(0);
        if let Some(out) = buf.first_mut() {
            *out = value;
        }
        Ok(())
    }

    /// See [`Peripheral::write`].
    ///
    /// Only the first byte of `buf` is written; wider writes discard the rest.
    fn write(&mut self, offset: u32, buf: &[u8]) -> Result<(), BusError> {
        self.write_register(offset, buf.first().copied().unwrap_or(0))
    }

    fn reset(&mut self) {
        self.reset_registers();
    }
}

impl fmt::Debug for Uart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Uart")
            .field("rx_queue", &self.rx_queue)
            .field("ier", &self.ier)
            .field("iir", &self.iir)
            .field("lcr", &self.lcr)
            .field("mcr", &self.mcr)
            .field("lsr", &self.lsr)
            .field("msr", &self.msr)
            .field("dll", &self.dll)
            .field("dlm", &self.dlm)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn uart_with_capture() -> (Uart, Arc<Mutex<Vec<u8>>>) {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&captured);
        let uart = Uart::new(Box::new(move |byte| sink.lock().unwrap().push(byte)));
        (uart, captured)
    }

    #[test]
    fn test_lsr_reset_value() {
        let (mut uart, _) = uart_with_capture();
        let mut buf = [0u8];
        uart.read(5, &mut buf).unwrap();
        // THRE and TSRE set out of reset.
        assert_eq!(0x60, buf[0]);
    }

    #[test]
    fn test_transmit_reaches_sink() {
        let (mut uart, captured) = uart_with_capture();
        for byte in b"ok\n" {
            uart.write(0, &[*byte]).unwrap();
        }
        assert_eq!(b"ok\n".to_vec(), *captured.lock().unwrap());
    }

    #[test]
    fn test_dlab_gates_divisor_latches() {
        let (mut uart, captured) = uart_with_capture();
        // DLAB set: offset 0/1 address the divisor latches.
        uart.write(3, &[0x80]).unwrap();
        uart.write(0, &[0x34]).unwrap();
        uart.write(1, &[0x12]).unwrap();
        assert!(captured.lock().unwrap().is_empty());
        let mut buf = [0u8];
        uart.read(0, &mut buf).unwrap();
        assert_eq!(0x34, buf[0]);
        uart.read(1, &mut buf).unwrap();
        assert_eq!(0x12, buf[0]);
        // DLAB clear: offset 0 transmits again.
        uart.write(3, &[0x00]).unwrap();
        uart.write(0, &[b'x']).unwrap();
        assert_eq!(vec![b'x'], *captured.lock().unwrap());
    }

    #[test]
    fn test_receive_queue() {
        let (mut uart, _) = uart_with_capture();
        let mut buf = [0u8];
        // Empty: reads as zero, DR clear.
        uart.read(0, &mut buf).unwrap();
        assert_eq!(0, buf[0]);
        uart.push_byte(b'a');
        uart.push_byte(b'b');
        uart.read(5, &mut buf).unwrap();
        assert_eq!(1, buf[0] & 1);
        uart.read(0, &mut buf).unwrap();
        assert_eq!(b'a', buf[0]);
        uart.read(0, &mut buf).unwrap();
        assert_eq!(b'b', buf[0]);
        uart.read(5, &mut buf).unwrap();
        assert_eq!(0, buf[0] & 1);
    }

    #[test]
    fn test_invalid_offset_faults() {
        let (mut uart, _) = uart_with_capture();
        let mut buf = [0u8];
        assert_eq!(Err(BusError::LoadPageFault), uart.read(7, &mut buf));
        assert_eq!(Err(BusError::StorePageFault), uart.write(0x1000, &buf));
    }

    #[test]
    fn test_reset_restores_registers() {
        let (mut uart, _) = uart_with_capture();
        uart.write(3, &[0x80]).unwrap();
        uart.push_byte(1);
        uart.reset();
        let mut buf = [0u8];
        uart.read(3, &mut buf).unwrap();
        assert_eq!(0, buf[0]);
        uart.read(5, &mut buf).unwrap();
        assert_eq!(0x60, buf[0]);
        uart.read(0, &mut buf).unwrap();
        assert_eq!(0, buf[0]);
    }
}
