mod runner;

use clap::Parser;
use deimos_core::core::mmu::Sv32Translator;
use deimos_core::emulator::Emulator;
use deimos_core::registers::abi;
use deimos_core::resources::ram::Ram;
use deimos_core::resources::uart::Uart;
use log::info;
use runner::Runner;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

/// Base of main memory.
const RAM_BASE: u32 = 0x0000_0000;
/// 512 MiB of guest RAM.
const RAM_SIZE: u32 = 512 * 1024 * 1024;
/// The 8250 UART sits high in the physical map.
const UART_BASE: u32 = 0xF400_0000;
/// The device tree goes in the top megabyte of RAM.
const DTB_ADDRESS: u32 = RAM_SIZE - 1024 * 1024;
/// Fixed initramfs load address, matching the device tree's chosen node.
const INITRAMFS_ADDRESS: u32 = 0x1F70_0000;

#[derive(Parser, Debug)]
#[command(version, about = "RV32IMA emulator able to boot a supervisor-mode OS image", long_about = None)]
struct Args {
    /// Kernel image, loaded flat at physical address zero.
    kernel: PathBuf,
    /// Device-tree blob, loaded at the top of RAM and handed to the kernel
    /// in a1.
    #[arg(long)]
    dtb: Option<PathBuf>,
    /// Initramfs image, loaded at the address the device tree advertises.
    #[arg(long)]
    initramfs: Option<PathBuf>,
    /// Number of harts.
    #[arg(long, default_value_t = 1)]
    harts: u32,
    /// Stop after this many retired instructions (0 = run until stopped).
    #[arg(long, default_value_t = 0)]
    max_steps: u64,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let emulator = match build_machine(&args) {
        Ok(emulator) => emulator,
        Err(error) => {
            eprintln!("deimos: {error}");
            return ExitCode::FAILURE;
        }
    };

    info!("powered up with {} hart(s)", args.harts);
    let runner = Runner::spawn(emulator, args.max_steps);

    if args.max_steps == 0 {
        // Run until the console closes; ^D stops the machine cleanly.
        wait_for_eof();
    }
    if runner.is_running() {
        info!("stopping emulation");
        runner.stop();
    }
    runner.join();
    ExitCode::SUCCESS
}

/// Blocks until stdin reaches end-of-file, discarding any input.
fn wait_for_eof() {
    let mut stdin = io::stdin().lock();
    let mut buf = [0u8; 256];
    loop {
        match io::Read::read(&mut stdin, &mut buf) {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

fn build_machine(args: &Args) -> io::Result<Emulator> {
    let mut emulator = Emulator::new(args.harts);

    let address_space = emulator.address_space_mut();
    address_space
        .map(RAM_BASE, Box::new(Ram::new(RAM_SIZE)))
        .map_err(|error| io::Error::other(error.to_string()))?;
    address_space
        .map(UART_BASE, Box::new(Uart::new(Box::new(write_to_terminal))))
        .map_err(|error| io::Error::other(error.to_string()))?;
    address_space.add_translator(Box::new(Sv32Translator::new()));

    emulator.power_up();

    load_image(&mut emulator, RAM_BASE, &std::fs::read(&args.kernel)?)?;
    if let Some(dtb) = &args.dtb {
        load_image(&mut emulator, DTB_ADDRESS, &std::fs::read(dtb)?)?;
    }
    if let Some(initramfs) = &args.initramfs {
        load_image(&mut emulator, INITRAMFS_ADDRESS, &std::fs::read(initramfs)?)?;
    }

    // The boot protocol: hart 0 receives the device tree address in a1 (a0
    // already carries the hart id from reset).
    emulator.harts_mut()[0]
        .registers_mut()
        .set_x(abi::A1, DTB_ADDRESS);

    Ok(emulator)
}

fn load_image(emulator: &mut Emulator, address: u32, image: &[u8]) -> io::Result<()> {
    emulator
        .address_space_mut()
        .write_physical(address, image)
        .map_err(|error| io::Error::other(format!("loading {} bytes at {address:#010x}: {error}", image.len())))
}

/// The UART's byte sink: unbuffered so the guest's console output appears as
/// it is written.
fn write_to_terminal(byte: u8) {
    let mut stdout = io::stdout().lock();
    let _ = stdout.write_all(&[byte]);
    let _ = stdout.flush();
}
