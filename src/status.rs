use std::process::ExitStatus;

/// Result of dispatching one stage: either a real exit code, or one of the
/// two sentinels the driver and hook chain use internally.
///
/// Mirrors `interpreter/interpreter.go`'s `ErrorLevel` type (`CONTINUE`,
/// `THROUGH`, `SHUTDOWN`), generalized into named variants instead of
/// magic negative integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorLevel {
    /// A real child/builtin exit code.
    Continue(i32),
    /// No hook claimed the command; fall through to external exec.
    /// Never escapes the dispatch chain into driver-visible state.
    Through,
    /// Terminate the shell; propagated by the driver as end-of-loop.
    Shutdown,
}

impl ErrorLevel {
    pub fn code(self) -> i32 {
        match self {
            ErrorLevel::Continue(c) => c,
            ErrorLevel::Through => -1,
            ErrorLevel::Shutdown => -2,
        }
    }
}

/// Converts an OS process status into shell exit-code semantics.
///
/// On Unix, a process terminated by signal maps to `128 + signal`,
/// matching both the teacher and NYAGOS's `dos.GetErrorLevel`.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    255
}
