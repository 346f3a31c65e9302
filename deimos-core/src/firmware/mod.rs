//! Machine-mode firmware: the SBI implementation backing the supervisor
//! ecall trampoline.
//!
//! The firmware owns a registry of extension objects, dispatched by extension
//! id in declaration order. Within an extension, functions are a
//! declaration-ordered table of `(function id, handler)` pairs with one
//! uniform signature; handlers that need the calling hart get it as their
//! first parameter.

pub mod extensions;

use crate::core::Hart;
use crate::registers::abi;
use log::{trace, warn};
use std::fmt::Debug;

use extensions::{BaseExtension, StubExtension, TimerExtension};

/// The SBI error codes of the binary encoding.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SbiError {
    Success = 0,
    Failed = -1,
    NotSupported = -2,
    InvalidParam = -3,
    Denied = -4,
    InvalidAddress = -5,
    AlreadyAvailable = -6,
    AlreadyStarted = -7,
    AlreadyStopped = -8,
    NoSharedMemory = -9,
}

impl SbiError {
    /// The signed value returned to the guest in `a0`.
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// What an SBI call hands back: an error code in `a0` and a value in `a1`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SbiResult {
    pub error: SbiError,
    pub value: u32,
}

impl SbiResult {
    pub const NOT_SUPPORTED: Self = Self {
        error: SbiError::NotSupported,
        value: 0,
    };

    pub fn success(value: u32) -> Self {
        Self {
            error: SbiError::Success,
            value,
        }
    }
}

/// One SBI extension in the firmware's registry.
pub trait SbiExtension: Debug + Send {
    /// The 32-bit extension id, either a numeric literal or four packed ASCII
    /// bytes.
    fn id(&self) -> u32;

    /// Dispatches `function_id` within this extension.
    fn call(&mut self, hart: &mut Hart, function_id: u32, args: &[u32; 6]) -> SbiResult;

    /// Hook run after every interpreter step.
    fn update(&mut self, hart: &mut Hart) {
        let _ = hart;
    }

    /// Hook run on machine reset.
    fn reset(&mut self) {}
}

/// The machine-mode firmware.
#[derive(Debug)]
pub struct Firmware {
    extensions: Vec<Box<dyn SbiExtension>>,
}

impl Default for Firmware {
    fn default() -> Self {
        Self::new()
    }
}

impl Firmware {
    /// Builds the standard extension registry: Base, Timer, and the probeable
    /// but functionless SRST/HSM/IPI/RFENCE stubs.
    pub fn new() -> Self {
        let registered = vec![
            extensions::BASE,
            extensions::TIMER,
            extensions::SYSTEM_RESET,
            extensions::HSM,
            extensions::IPI,
            extensions::RFENCE,
        ];
        Self {
            extensions: vec![
                Box::new(BaseExtension::new(registered)),
                Box::new(TimerExtension::new()),
                Box::new(StubExtension::new(extensions::SYSTEM_RESET)),
                Box::new(StubExtension::new(extensions::HSM)),
                Box::new(StubExtension::new(extensions::IPI)),
                Box::new(StubExtension::new(extensions::RFENCE)),
            ],
        }
    }

    /// Services the SBI call a hart parked in the machine trampoline, per the
    /// calling convention: extension id in `a7`, function id in `a6`,
    /// arguments in `a0..a5`, error back in `a0`, value in `a1`.
    ///
    /// Also clears the pending-ecall state the trampoline entry left behind.
    pub fn handle_ecall(&mut self, hart: &mut Hart) {
        use crate::core::csr;

        let registers = hart.registers();
        let extension_id = registers.x(abi::A7);
        let function_id = registers.x(abi::A6);
        let args = [
            registers.x(abi::A0),
            registers.x(abi::A1),
            registers.x(abi::A2),
            registers.x(abi::A3),
            registers.x(abi::A4),
            registers.x(abi::A5),
        ];

        let result = self.dispatch(hart, extension_id, function_id, &args);
        if result.error == SbiError::NotSupported {
            warn!(
                "unimplemented SBI call to [{:#010x} ({})]({:#010x})",
                extension_id,
                extension_name(extension_id),
                function_id,
            );
        } else {
            trace!(
                "SBI call [{:#010x}]({:#010x}) -> ({:?}, {:#x})",
                extension_id,
                function_id,
                result.error,
                result.value,
            );
        }

        let registers = hart.registers_mut();
        registers.set_x(abi::A0, result.error.code() as u32);
        registers.set_x(abi::A1, result.value);
        hart.csrs_mut()
            .set_bit(csr::SIP, csr::interrupt::SUPERVISOR_EXTERNAL as usize, false);
        hart.csrs_mut().write(csr::SCAUSE, 0);
    }

    fn dispatch(
        &mut self,
        hart: &mut Hart,
        extension_id: u32,
        function_id: u32,
        args: &[u32; 6],
    ) -> SbiResult {
        for extension in &mut self.extensions {
            if extension.id() == extension_id {
                return extension.call(hart, function_id, args);
            }
        }
        SbiResult::NOT_SUPPORTED
    }

    /// Runs every extension's update hook against the just-stepped hart.
    pub fn update(&mut self, hart: &mut Hart) {
        for extension in &mut self.extensions {
            extension.update(hart);
        }
    }

    /// Propagates a machine reset to every extension.
    pub fn reset(&mut self) {
        for extension in &mut self.extensions {
            extension.reset();
        }
    }
}

/// Decodes a packed-ASCII extension id for log messages.
fn extension_name(extension_id: u32) -> String {
    extension_id
        .to_be_bytes()
        .iter()
        .map(|&byte| match byte {
            b' '..=b'~' => byte as char,
            _ => '.',
        })
        .collect()
}
