use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64};
use std::sync::Mutex;

use os_pipe::{PipeReader, PipeWriter};

use crate::error::ShellError;
use crate::redirect::Fd;

/// One end of a stage's stdin/stdout/stderr.
///
/// A redirection or a pipe connection replaces the default `Inherit`
/// with one of the other variants. Ownership is moved straight into the
/// spawned `std::process::Command` (or consumed directly by a builtin),
/// so there is no separate "closer" bookkeeping: dropping the handle
/// closes it, and `Command::spawn` has already taken its own copy of the
/// underlying descriptor by the time that happens.
pub enum IoHandle {
    /// Share the shell's own stdin/stdout/stderr.
    Inherit,
    /// Discard (read side yields EOF, write side swallows writes).
    Null,
    File(File),
    PipeReader(PipeReader),
    PipeWriter(PipeWriter),
    /// `<<<text` sugar: fed to the child as a fresh anonymous pipe
    /// pre-loaded with `text`, rather than a real file.
    HereString(String),
}

impl IoHandle {
    /// Converts to a `Stdio` for use as a child's stdin, spawning a
    /// feeder thread first if this is a here-string.
    pub fn into_stdin_stdio(self) -> io::Result<std::process::Stdio> {
        match self {
            IoHandle::Inherit => Ok(std::process::Stdio::inherit()),
            IoHandle::Null => Ok(std::process::Stdio::null()),
            IoHandle::File(f) => Ok(std::process::Stdio::from(f)),
            IoHandle::PipeReader(r) => Ok(std::process::Stdio::from(r)),
            IoHandle::PipeWriter(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "pipe writer used as stdin",
            )),
            IoHandle::HereString(text) => {
                let (reader, mut writer) = os_pipe::pipe()?;
                std::thread::Builder::new()
                    .name("herestring-feeder".into())
                    .spawn(move || {
                        use std::io::Write;
                        let _ = writer.write_all(text.as_bytes());
                        if !text.ends_with('\n') {
                            let _ = writer.write_all(b"\n");
                        }
                    })?;
                Ok(std::process::Stdio::from(reader))
            }
        }
    }

    /// Converts to a `Stdio` for use as a child's stdout/stderr.
    pub fn into_output_stdio(self) -> io::Result<std::process::Stdio> {
        match self {
            IoHandle::Inherit => Ok(std::process::Stdio::inherit()),
            IoHandle::Null => Ok(std::process::Stdio::null()),
            IoHandle::File(f) => Ok(std::process::Stdio::from(f)),
            IoHandle::PipeWriter(w) => Ok(std::process::Stdio::from(w)),
            IoHandle::PipeReader(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "pipe reader used as stdout/stderr",
            )),
            IoHandle::HereString(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "here-string used as stdout/stderr",
            )),
        }
    }

    /// Converts to a boxed reader for in-process (builtin) use.
    pub fn into_read(self) -> io::Result<Box<dyn io::Read + Send>> {
        match self {
            IoHandle::Inherit => Ok(Box::new(io::stdin())),
            IoHandle::Null => Ok(Box::new(io::empty())),
            IoHandle::File(f) => Ok(Box::new(f)),
            IoHandle::PipeReader(r) => Ok(Box::new(r)),
            IoHandle::PipeWriter(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "pipe writer used as reader",
            )),
            IoHandle::HereString(text) => {
                let mut data = text.into_bytes();
                if !data.ends_with(b"\n") {
                    data.push(b'\n');
                }
                Ok(Box::new(io::Cursor::new(data)))
            }
        }
    }

    /// Converts to a boxed writer for in-process (builtin) use. `stderr`
    /// only matters for the `Inherit` case, to pick the right stream.
    pub fn into_write(self, stderr: bool) -> io::Result<Box<dyn io::Write + Send>> {
        match self {
            IoHandle::Inherit if stderr => Ok(Box::new(io::stderr())),
            IoHandle::Inherit => Ok(Box::new(io::stdout())),
            IoHandle::Null => Ok(Box::new(io::sink())),
            IoHandle::File(f) => Ok(Box::new(f)),
            IoHandle::PipeWriter(w) => Ok(Box::new(w)),
            IoHandle::PipeReader(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "pipe reader used as writer",
            )),
            IoHandle::HereString(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "here-string used as writer",
            )),
        }
    }

    /// Duplicates the underlying descriptor where possible. Used by
    /// `N>&M` dup redirections and by `Cmd::clone_for_stage`, neither of
    /// which may consume the original.
    pub fn borrowed_clone(&self) -> io::Result<IoHandle> {
        match self {
            IoHandle::Inherit => Ok(IoHandle::Inherit),
            IoHandle::Null => Ok(IoHandle::Null),
            IoHandle::File(f) => Ok(IoHandle::File(f.try_clone()?)),
            IoHandle::PipeReader(r) => Ok(IoHandle::PipeReader(r.try_clone()?)),
            IoHandle::PipeWriter(w) => Ok(IoHandle::PipeWriter(w.try_clone()?)),
            IoHandle::HereString(s) => Ok(IoHandle::HereString(s.clone())),
        }
    }
}

/// Per-interaction state that outlives any single `Cmd`: the pushback
/// queue a builtin like `history` or a Lua-style callback can use to
/// feed lines back into the REPL ahead of real input.
#[derive(Default)]
pub struct Session {
    unreadline: Mutex<VecDeque<String>>,
}

impl Session {
    pub fn new() -> Session {
        Session::default()
    }

    /// Queues `line` to be returned by the next `next_unread_line` call
    /// before the shell reads real input again.
    pub fn push_unread_line(&self, line: String) {
        self.unreadline.lock().unwrap().push_back(line);
    }

    pub fn next_unread_line(&self) -> Option<String> {
        self.unreadline.lock().unwrap().pop_front()
    }
}

/// Process-wide counters and flags, shared by every `Cmd` cloned from
/// the ambient one. Mirrors NYAGOS's package-level `NoClobber`,
/// `WildCardExpansionAlways`, `LastErrorLevel` and the pipe-sequence
/// counter used to tag each pipeline with a generation number.
#[derive(Default)]
pub struct ShellState {
    no_clobber: AtomicBool,
    wildcard_expansion_always: AtomicBool,
    last_error_level: AtomicI32,
    pipe_seq_gen: AtomicU64,
}

impl ShellState {
    pub fn new() -> ShellState {
        ShellState::default()
    }

    pub fn no_clobber(&self) -> bool {
        self.no_clobber.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn set_no_clobber(&self, v: bool) {
        self.no_clobber.store(v, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn wildcard_expansion_always(&self) -> bool {
        self.wildcard_expansion_always
            .load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn set_wildcard_expansion_always(&self, v: bool) {
        self.wildcard_expansion_always
            .store(v, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn last_error_level(&self) -> i32 {
        self.last_error_level.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn set_last_error_level(&self, v: i32) {
        self.last_error_level.store(v, std::sync::atomic::Ordering::Relaxed);
    }

    /// Allocates the next pipeline generation number, used as the first
    /// half of a `Cmd`'s `pipe_seq`.
    pub fn next_pipe_generation(&self) -> u64 {
        self.pipe_seq_gen.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1
    }
}

/// The execution context threaded through one stage of one pipeline.
///
/// Corresponds to NYAGOS's `interpreter.Cmd`: the argv to run, the three
/// standard streams (each independently redirectable), whether the
/// pipeline backgrounded itself, and `pipe_seq` — `(generation, index)`
/// — used to recognize "am I the last stage of my pipeline" without
/// threading the stage count separately.
pub struct Cmd {
    pub argv: Vec<String>,
    pub raw_argv: Vec<String>,
    stdin: IoHandle,
    stdout: IoHandle,
    stderr: IoHandle,
    pub is_background: bool,
    pub pipe_seq: (u64, u32),
    pub session: std::sync::Arc<Session>,
    pub state: std::sync::Arc<ShellState>,
    /// Opaque per-stage payload a hook can stash and a later hook (or
    /// the same one, on a later call) can read back. The core never
    /// reads or writes this itself — it only carries it through
    /// `clone_for_stage`, the way NYAGOS's `Cmd.Tag` is threaded through
    /// the dispatch chain for hooks to use however they like.
    pub tag: Option<std::sync::Arc<dyn std::any::Any + Send + Sync>>,
}

impl Cmd {
    pub fn new(session: std::sync::Arc<Session>, state: std::sync::Arc<ShellState>) -> Cmd {
        Cmd {
            argv: Vec::new(),
            raw_argv: Vec::new(),
            stdin: IoHandle::Inherit,
            stdout: IoHandle::Inherit,
            stderr: IoHandle::Inherit,
            is_background: false,
            pipe_seq: (0, 0),
            session,
            state,
            tag: None,
        }
    }

    pub fn handle(&self, fd: Fd) -> &IoHandle {
        match fd.get() {
            0 => &self.stdin,
            1 => &self.stdout,
            _ => &self.stderr,
        }
    }

    pub fn set_handle(&mut self, fd: Fd, handle: IoHandle) {
        match fd.get() {
            0 => self.stdin = handle,
            1 => self.stdout = handle,
            _ => self.stderr = handle,
        }
    }

    pub fn take_stdin(&mut self) -> IoHandle {
        std::mem::replace(&mut self.stdin, IoHandle::Inherit)
    }

    pub fn take_stdout(&mut self) -> IoHandle {
        std::mem::replace(&mut self.stdout, IoHandle::Inherit)
    }

    pub fn take_stderr(&mut self) -> IoHandle {
        std::mem::replace(&mut self.stderr, IoHandle::Inherit)
    }

    /// Produces a per-stage `Cmd` that starts from this one's streams
    /// (duplicated, never moved — the ambient `Cmd` keeps its own) and
    /// an empty argv, matching the teacher's "clone, then fill in"
    /// dispatch-chain shape.
    pub fn clone_for_stage(&self) -> io::Result<Cmd> {
        Ok(Cmd {
            argv: Vec::new(),
            raw_argv: Vec::new(),
            stdin: self.stdin.borrowed_clone()?,
            stdout: self.stdout.borrowed_clone()?,
            stderr: self.stderr.borrowed_clone()?,
            is_background: self.is_background,
            pipe_seq: self.pipe_seq,
            session: self.session.clone(),
            state: self.state.clone(),
            tag: self.tag.clone(),
        })
    }

    /// Reports `err` on this stage's own stderr (honoring a `2>` or
    /// `|&` redirection already applied to it) rather than the
    /// process's real stderr, falling back to the latter if the
    /// handle can't be duplicated. No-op if `err` is already marked
    /// "already reported".
    pub fn report(&self, err: &ShellError) {
        if err.is_already_reported() {
            return;
        }
        match self.stderr.borrowed_clone().and_then(|h| h.into_write(true)) {
            Ok(mut w) => {
                let _ = writeln!(w, "{err}");
            }
            Err(_) => eprintln!("{err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ShellError;
    use std::sync::Arc;

    fn cmd() -> Cmd {
        Cmd::new(Arc::new(Session::new()), Arc::new(ShellState::new()))
    }

    #[test]
    fn clone_for_stage_carries_the_tag_along() {
        let mut parent = cmd();
        parent.tag = Some(Arc::new(42i32));
        let clone = parent.clone_for_stage().unwrap();
        assert_eq!(clone.tag.unwrap().downcast_ref::<i32>(), Some(&42));
    }

    #[test]
    fn clone_for_stage_copies_pipe_seq_from_parent() {
        let mut parent = cmd();
        parent.pipe_seq = (7, 2);
        let clone = parent.clone_for_stage().unwrap();
        assert_eq!(clone.pipe_seq, (7, 2));
        assert!(clone.argv.is_empty());
    }

    #[test]
    fn report_writes_to_a_redirected_stderr_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("err.txt");
        let mut c = cmd();
        c.set_handle(Fd::STDERR, IoHandle::File(File::create(&path).unwrap()));

        c.report(&ShellError::CommandNotFound("nope".into()));

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("nope"));
    }

    #[test]
    fn report_is_a_noop_for_already_reported_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("err.txt");
        let mut c = cmd();
        c.set_handle(Fd::STDERR, IoHandle::File(File::create(&path).unwrap()));

        c.report(&ShellError::CommandNotFound("nope".into()).already_reported());

        assert!(std::fs::read_to_string(&path).unwrap().is_empty());
    }

    #[test]
    fn session_unreadline_is_fifo() {
        let session = Session::new();
        session.push_unread_line("first".into());
        session.push_unread_line("second".into());
        assert_eq!(session.next_unread_line(), Some("first".to_string()));
        assert_eq!(session.next_unread_line(), Some("second".to_string()));
        assert_eq!(session.next_unread_line(), None);
    }

    #[test]
    fn shell_state_tracks_no_clobber_and_last_error_level() {
        let state = ShellState::new();
        assert!(!state.no_clobber());
        state.set_no_clobber(true);
        assert!(state.no_clobber());

        state.set_last_error_level(42);
        assert_eq!(state.last_error_level(), 42);

        let first = state.next_pipe_generation();
        let second = state.next_pipe_generation();
        assert!(second > first);
    }
}
