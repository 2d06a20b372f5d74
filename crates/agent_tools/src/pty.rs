use std::collections::{HashMap, VecDeque};
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tracing::{debug, warn};

use crate::error::ToolError;
use crate::limits::{truncate_output, DEFAULT_MAX_BYTES, DEFAULT_MAX_LINES};

/// Default read window after an open or write.
pub const DEFAULT_YIELD_MS: u64 = 200;
/// Bound on buffered output per session.
pub const OUTPUT_RING_BYTES: usize = 64 * 1024;

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Captured output chunk returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRead {
    pub output: String,
    pub truncated: bool,
}

struct PtySession {
    child: Box<dyn Child + Send + Sync>,
    writer: Box<dyn std::io::Write + Send>,
    // Held for the session lifetime; dropping it hangs up the slave side.
    _master: Box<dyn MasterPty + Send>,
    ring: Arc<Mutex<VecDeque<u8>>>,
}

/// Long-lived PTY process manager.
///
/// Operations on one session are serialized by its own lock; different
/// sessions proceed independently. `close_all` is wired to the shutdown
/// coordinator by the host.
pub struct PtyManager {
    sessions: Mutex<HashMap<String, Arc<Mutex<PtySession>>>>,
}

impl Default for PtyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PtyManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Spawns `cmd` under `/bin/sh -c` attached to a fresh PTY and captures
    /// the initial output window. The id must not already be open.
    pub fn open(
        &self,
        session_id: &str,
        cmd: &str,
        workdir: &Path,
        yield_ms: Option<u64>,
        max_output_bytes: Option<usize>,
    ) -> Result<PtyRead, ToolError> {
        let session = {
            let mut sessions = lock_unpoisoned(&self.sessions);
            if sessions.contains_key(session_id) {
                return Err(ToolError::PtyAlreadyOpen(session_id.to_string()));
            }

            let session = Arc::new(Mutex::new(spawn_session(cmd, workdir)?));
            sessions.insert(session_id.to_string(), Arc::clone(&session));
            session
        };

        let mut session = lock_unpoisoned(&session);
        let raw = read_window(
            &mut session,
            yield_ms.unwrap_or(DEFAULT_YIELD_MS),
            max_output_bytes.unwrap_or(DEFAULT_MAX_BYTES),
        );
        let (output, truncated) = limit_chunk(&raw, max_output_bytes);
        Ok(PtyRead { output, truncated })
    }

    /// Writes `chars` to the session's master side and captures the next
    /// output window. A child that exited since the last call yields its
    /// final chunk plus a termination marker, and the session closes.
    pub fn write(
        &self,
        session_id: &str,
        chars: &str,
        yield_ms: Option<u64>,
        max_output_bytes: Option<usize>,
    ) -> Result<PtyRead, ToolError> {
        let session = self.lookup(session_id)?;
        let mut guard = lock_unpoisoned(&session);

        let already_exited = matches!(guard.child.try_wait(), Ok(Some(_)));
        if !already_exited {
            guard
                .writer
                .write_all(chars.as_bytes())
                .and_then(|()| guard.writer.flush())
                .map_err(|source| ToolError::io(format!("writing to PTY session '{session_id}'"), source))?;
        }

        let raw = read_window(
            &mut guard,
            yield_ms.unwrap_or(DEFAULT_YIELD_MS),
            max_output_bytes.unwrap_or(DEFAULT_MAX_BYTES),
        );
        let (mut output, truncated) = limit_chunk(&raw, max_output_bytes);

        if let Ok(Some(status)) = guard.child.try_wait() {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(&format!("[process exited with code {}]", status.exit_code()));
            drop(guard);
            self.remove(session_id);
        }

        Ok(PtyRead { output, truncated })
    }

    /// Terminates one session: SIGTERM, a 2 s grace window, then SIGKILL.
    pub fn close(&self, session_id: &str) -> Result<(), ToolError> {
        let session = {
            let mut sessions = lock_unpoisoned(&self.sessions);
            sessions
                .remove(session_id)
                .ok_or_else(|| ToolError::PtyUnknownSession(session_id.to_string()))?
        };
        let mut guard = lock_unpoisoned(&session);
        terminate(session_id, &mut guard);
        Ok(())
    }

    /// Terminates every session; used by the shutdown coordinator.
    pub fn close_all(&self) {
        let drained: Vec<(String, Arc<Mutex<PtySession>>)> = {
            let mut sessions = lock_unpoisoned(&self.sessions);
            sessions.drain().collect()
        };
        for (session_id, session) in drained {
            let mut guard = lock_unpoisoned(&session);
            terminate(&session_id, &mut guard);
        }
    }

    #[must_use]
    pub fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock_unpoisoned(&self.sessions).keys().cloned().collect();
        ids.sort();
        ids
    }

    fn lookup(&self, session_id: &str) -> Result<Arc<Mutex<PtySession>>, ToolError> {
        lock_unpoisoned(&self.sessions)
            .get(session_id)
            .cloned()
            .ok_or_else(|| ToolError::PtyUnknownSession(session_id.to_string()))
    }

    fn remove(&self, session_id: &str) {
        if let Some(session) = lock_unpoisoned(&self.sessions).remove(session_id) {
            let mut guard = lock_unpoisoned(&session);
            // Already exited; wait() just reaps.
            let _ = guard.child.wait();
        }
    }
}

impl Drop for PtyManager {
    fn drop(&mut self) {
        self.close_all();
    }
}

fn spawn_session(cmd: &str, workdir: &Path) -> Result<PtySession, ToolError> {
    let pty = native_pty_system()
        .openpty(PtySize {
            rows: 24,
            cols: 80,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|error| ToolError::Internal(format!("failed to open PTY: {error}")))?;

    let mut command = CommandBuilder::new("/bin/sh");
    command.arg("-c");
    command.arg(cmd);
    command.cwd(workdir);

    let child = pty
        .slave
        .spawn_command(command)
        .map_err(|error| ToolError::Internal(format!("failed to spawn PTY command: {error}")))?;
    drop(pty.slave);

    let writer = pty
        .master
        .take_writer()
        .map_err(|error| ToolError::Internal(format!("failed to take PTY writer: {error}")))?;
    let mut reader = pty
        .master
        .try_clone_reader()
        .map_err(|error| ToolError::Internal(format!("failed to clone PTY reader: {error}")))?;

    let ring = Arc::new(Mutex::new(VecDeque::new()));
    let ring_for_reader = Arc::clone(&ring);
    thread::Builder::new()
        .name("lincona-pty-reader".to_string())
        .spawn(move || {
            let mut buffer = [0u8; 4096];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) | Err(_) => break,
                    Ok(read) => {
                        let mut ring = lock_unpoisoned(&ring_for_reader);
                        ring.extend(&buffer[..read]);
                        while ring.len() > OUTPUT_RING_BYTES {
                            ring.pop_front();
                        }
                    }
                }
            }
        })
        .map_err(|source| ToolError::io("spawning PTY reader thread", source))?;

    Ok(PtySession {
        child,
        writer,
        _master: pty.master,
        ring,
    })
}

/// Drains the ring for at most `yield_ms`, stopping early once `max_bytes`
/// are captured or the child has exited with nothing left to read.
fn read_window(session: &mut PtySession, yield_ms: u64, max_bytes: usize) -> Vec<u8> {
    let deadline = Instant::now() + Duration::from_millis(yield_ms);
    let mut captured = Vec::new();

    loop {
        {
            let mut ring = lock_unpoisoned(&session.ring);
            while captured.len() < max_bytes {
                match ring.pop_front() {
                    Some(byte) => captured.push(byte),
                    None => break,
                }
            }
        }

        if captured.len() >= max_bytes || Instant::now() >= deadline {
            break;
        }

        let exited = matches!(session.child.try_wait(), Ok(Some(_)));
        if exited && lock_unpoisoned(&session.ring).is_empty() {
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }

    captured
}

fn limit_chunk(raw: &[u8], max_output_bytes: Option<usize>) -> (String, bool) {
    let text = String::from_utf8_lossy(raw);
    truncate_output(
        &text,
        max_output_bytes.unwrap_or(DEFAULT_MAX_BYTES),
        DEFAULT_MAX_LINES,
    )
}

fn terminate(session_id: &str, session: &mut PtySession) {
    if let Ok(Some(status)) = session.child.try_wait() {
        debug!(session_id, code = status.exit_code(), "PTY child already exited");
        return;
    }

    if let Some(pid) = session.child.process_id() {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }

    let deadline = Instant::now() + CLOSE_GRACE;
    while Instant::now() < deadline {
        if matches!(session.child.try_wait(), Ok(Some(_))) {
            debug!(session_id, "PTY child exited after SIGTERM");
            return;
        }
        thread::sleep(Duration::from_millis(50));
    }

    warn!(session_id, "PTY child ignored SIGTERM; sending SIGKILL");
    let _ = session.child.kill();
    let _ = session.child.wait();
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
