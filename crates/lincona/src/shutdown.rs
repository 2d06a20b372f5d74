use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use agent_tools::PtyManager;
use session_store::{JsonlEventWriter, SessionLogger};
use signal_hook::iterator::Signals;
use tracing::{debug, warn};

#[derive(Default)]
struct CleanupTasks {
    callbacks: Vec<Box<dyn FnOnce() + Send>>,
    pty_managers: Vec<Arc<PtyManager>>,
    writers: Vec<Arc<Mutex<JsonlEventWriter>>>,
    loggers: Vec<Arc<Mutex<SessionLogger>>>,
}

/// One-shot cleanup coordinator.
///
/// The first trigger (signal, unhandled error, or normal return) runs four
/// fixed phases: callbacks, then PTY close-all, then writer sync+close, then
/// logger close; newest registrations run first within each phase. Session
/// rotation registers replacement writers and loggers without deregistering
/// the old (already-closed) pair, so phase order must not depend on how
/// registrations interleave. Later triggers are no-ops.
pub struct ShutdownCoordinator {
    tasks: Mutex<CleanupTasks>,
    ran: AtomicBool,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(CleanupTasks::default()),
            ran: AtomicBool::new(false),
        }
    }

    pub fn register_callback(&self, callback: impl FnOnce() + Send + 'static) {
        lock_unpoisoned(&self.tasks).callbacks.push(Box::new(callback));
    }

    pub fn register_pty_manager(&self, manager: Arc<PtyManager>) {
        lock_unpoisoned(&self.tasks).pty_managers.push(manager);
    }

    pub fn register_writer(&self, writer: Arc<Mutex<JsonlEventWriter>>) {
        lock_unpoisoned(&self.tasks).writers.push(writer);
    }

    pub fn register_logger(&self, logger: Arc<Mutex<SessionLogger>>) {
        lock_unpoisoned(&self.tasks).loggers.push(logger);
    }

    #[must_use]
    pub fn has_run(&self) -> bool {
        self.ran.load(Ordering::Acquire)
    }

    /// Runs the cleanup phases once; task failures are recorded and never
    /// stop the remaining cleanup.
    pub fn run(&self) {
        if self.ran.swap(true, Ordering::AcqRel) {
            return;
        }

        let tasks = {
            let mut tasks = lock_unpoisoned(&self.tasks);
            std::mem::take(&mut *tasks)
        };

        for callback in tasks.callbacks.into_iter().rev() {
            if catch_unwind(AssertUnwindSafe(callback)).is_err() {
                warn!("shutdown callback panicked; continuing cleanup");
            }
        }

        for manager in tasks.pty_managers.into_iter().rev() {
            debug!("shutdown: closing PTY sessions");
            manager.close_all();
        }

        for writer in tasks.writers.into_iter().rev() {
            let mut writer = lock_unpoisoned(&writer);
            if writer.is_closed() {
                continue;
            }
            if let Err(error) = writer.sync().and_then(|()| writer.close()) {
                warn!(%error, "shutdown: failed to close session writer");
            }
        }

        for logger in tasks.loggers.into_iter().rev() {
            if let Err(error) = lock_unpoisoned(&logger).close() {
                warn!(%error, "shutdown: failed to close session logger");
            }
        }
    }
}

/// Tracks SIGINT intent: the first interrupt cancels the in-flight turn, a
/// second one (while the first is still pending) escalates to full shutdown.
#[derive(Debug, Default)]
pub struct InterruptState {
    cancel_requested: Arc<AtomicBool>,
}

impl InterruptState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when this interrupt escalates to shutdown.
    pub fn interrupt(&self) -> bool {
        self.cancel_requested.swap(true, Ordering::AcqRel)
    }

    #[must_use]
    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    pub fn clear(&self) {
        self.cancel_requested.store(false, Ordering::Release);
    }

    /// Shared flag handed to the streaming client as its cancellation signal.
    #[must_use]
    pub fn cancel_signal(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel_requested)
    }
}

/// Installs the SIGINT/SIGTERM hook thread.
///
/// SIGTERM (and an escalated second SIGINT) runs the coordinator, restores
/// the default disposition, and exits with the conventional 128+signal code.
pub fn install_signal_hooks(
    coordinator: Arc<ShutdownCoordinator>,
    interrupts: Arc<InterruptState>,
) -> std::io::Result<()> {
    let mut signals = Signals::new([libc::SIGINT, libc::SIGTERM])?;

    thread::Builder::new()
        .name("lincona-signals".to_string())
        .spawn(move || {
            for signal in signals.forever() {
                match signal {
                    libc::SIGINT => {
                        let escalate = interrupts.interrupt();
                        if !escalate {
                            debug!("SIGINT: cancelling the in-flight turn");
                            continue;
                        }
                        coordinator.run();
                        restore_default(libc::SIGINT);
                        std::process::exit(130);
                    }
                    libc::SIGTERM => {
                        coordinator.run();
                        restore_default(libc::SIGTERM);
                        std::process::exit(143);
                    }
                    _ => {}
                }
            }
        })?;

    Ok(())
}

fn restore_default(signal: libc::c_int) {
    unsafe {
        libc::signal(signal, libc::SIG_DFL);
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use agent_tools::PtyManager;
    use session_store::{Event, EventKind, JsonlEventWriter, LogLevel, SessionLogger};

    use super::{InterruptState, ShutdownCoordinator};

    #[test]
    fn tasks_run_once_in_reverse_registration_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let coordinator = ShutdownCoordinator::new();

        for label in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            coordinator.register_callback(move || {
                order.lock().expect("order lock").push(label);
            });
        }

        coordinator.run();
        coordinator.run();

        let order = order.lock().expect("order lock");
        assert_eq!(*order, ["third", "second", "first"]);
    }

    #[test]
    fn phase_order_holds_across_interleaved_session_rotations() {
        let dir = tempfile::tempdir().expect("tempdir");
        let coordinator = ShutdownCoordinator::new();

        // First session's pair, closed by rotation before the replacement
        // pair is registered.
        let writer_one = Arc::new(Mutex::new(
            JsonlEventWriter::open(dir.path().join("one.jsonl")).expect("writer one opens"),
        ));
        let logger_one = Arc::new(Mutex::new(
            SessionLogger::open(dir.path().join("one.log"), LogLevel::Info, None)
                .expect("logger one opens"),
        ));

        let writer_two = Arc::new(Mutex::new(
            JsonlEventWriter::open(dir.path().join("two.jsonl")).expect("writer two opens"),
        ));
        let logger_two = Arc::new(Mutex::new(
            SessionLogger::open(dir.path().join("two.log"), LogLevel::Info, None)
                .expect("logger two opens"),
        ));

        let pty = Arc::new(PtyManager::new());
        pty.open("shutdown-probe", "/bin/cat", dir.path(), Some(50), None)
            .expect("probe session opens");

        // The probe is registered before everything else; it must still see
        // the live writer open when it runs.
        let probe_appended = Arc::new(AtomicBool::new(false));
        {
            let writer_two = Arc::clone(&writer_two);
            let probe_appended = Arc::clone(&probe_appended);
            coordinator.register_callback(move || {
                let appended = writer_two
                    .lock()
                    .expect("writer lock")
                    .append(&Event::at(
                        "2026-08-02T00:00:00Z",
                        EventKind::System {
                            text: "shutting down".to_string(),
                        },
                    ))
                    .is_ok();
                probe_appended.store(appended, Ordering::SeqCst);
            });
        }

        coordinator.register_logger(Arc::clone(&logger_one));
        coordinator.register_writer(Arc::clone(&writer_one));
        writer_one
            .lock()
            .expect("writer lock")
            .close()
            .expect("rotation closes writer one");
        logger_one
            .lock()
            .expect("logger lock")
            .close()
            .expect("rotation closes logger one");

        coordinator.register_pty_manager(Arc::clone(&pty));
        coordinator.register_writer(Arc::clone(&writer_two));
        coordinator.register_logger(Arc::clone(&logger_two));

        coordinator.run();

        assert!(
            probe_appended.load(Ordering::SeqCst),
            "callbacks must run before any writer closes"
        );
        assert!(pty.active_ids().is_empty(), "PTY sessions must be closed");
        assert!(writer_two.lock().expect("writer lock").is_closed());

        let transcript =
            std::fs::read_to_string(dir.path().join("two.jsonl")).expect("transcript readable");
        assert!(transcript.contains("shutting down"));

        coordinator.run();
        assert!(coordinator.has_run());
    }

    #[test]
    fn a_panicking_callback_does_not_stop_cleanup() {
        let survivors = Arc::new(AtomicUsize::new(0));
        let coordinator = ShutdownCoordinator::new();

        {
            let survivors = Arc::clone(&survivors);
            coordinator.register_callback(move || {
                survivors.fetch_add(1, Ordering::SeqCst);
            });
        }
        coordinator.register_callback(|| panic!("cleanup failure"));

        coordinator.run();
        assert!(coordinator.has_run());
        assert_eq!(survivors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn second_interrupt_escalates() {
        let interrupts = InterruptState::new();
        assert!(!interrupts.interrupt(), "first interrupt only cancels");
        assert!(interrupts.cancel_requested());
        assert!(interrupts.interrupt(), "second interrupt escalates");

        interrupts.clear();
        assert!(!interrupts.cancel_requested());
        assert!(!interrupts.interrupt());
    }
}
