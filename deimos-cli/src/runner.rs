//! The worker thread that pumps the emulator, with cooperative stop controls.

use deimos_core::core::ExceptionCause;
use deimos_core::emulator::Emulator;
use log::{trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Owns the emulation thread. The interpreter state lives entirely on that
/// thread; the handle only carries the stop flag, which is checked between
/// steps.
pub struct Runner {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<Emulator>,
}

impl Runner {
    /// Moves `emulator` onto a fresh thread and starts stepping it.
    ///
    /// The thread ends when the stop flag is raised, the machine reports it
    /// is stopped, or `max_steps` (if non-zero) instructions have retired.
    pub fn spawn(mut emulator: Emulator, max_steps: u64) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = std::thread::spawn(move || {
            let mut steps = 0_u64;
            while !flag.load(Ordering::Relaxed) {
                match emulator.step() {
                    Ok(()) => {}
                    Err(ExceptionCause::CoreStopped) => break,
                    Err(cause @ ExceptionCause::UnimplementedInstruction) => {
                        warn!("{cause}");
                    }
                    // Architectural exceptions were already delivered to the
                    // guest's trap handler; they are only diagnostics here.
                    Err(cause) => trace!("guest trap: {cause}"),
                }
                steps += 1;
                if max_steps != 0 && steps >= max_steps {
                    break;
                }
            }
            emulator
        });
        Self { stop, handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Raises the stop flag; the thread exits after the in-flight step.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Waits for the emulation thread and hands the machine back.
    pub fn join(self) -> Emulator {
        self.handle.join().expect("emulation thread panicked")
    }
}
