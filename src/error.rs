use std::fmt;
use std::io;

/// Everything the interpreter can fail with.
///
/// `AlreadyReported` mirrors NYAGOS's `AlreadyReportedError`: it wraps an
/// error that has already been printed to the stage's stderr, so callers
/// further up the stack must propagate it without printing it again.
#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    #[error("{0}")]
    Parse(String),

    #[error("{0}")]
    RedirectOpen(io::Error),

    #[error("'{0}' is not recognized as an internal or external command,\noperable program or batch file")]
    CommandNotFound(String),

    #[error("{0}")]
    Spawn(io::Error),

    #[error(transparent)]
    Hook(Box<ShellError>),

    /// Already surfaced to the user; Display renders empty so a second
    /// print site does not repeat the message.
    #[error("")]
    AlreadyReported(Box<ShellError>),
}

impl ShellError {
    pub fn already_reported(self) -> ShellError {
        match self {
            ShellError::AlreadyReported(_) => self,
            other => ShellError::AlreadyReported(Box::new(other)),
        }
    }

    pub fn is_already_reported(&self) -> bool {
        matches!(self, ShellError::AlreadyReported(_))
    }
}

/// Writes `err` to `w` unless it has already been reported once.
pub fn report_once(w: &mut dyn io::Write, err: &ShellError) {
    if err.is_already_reported() {
        return;
    }
    let _ = writeln!(w, "{err}");
}

impl fmt::Display for CommandLineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lightweight newtype used by the parser for syntax errors, so call sites
/// that only ever produce `ShellError::Parse` don't have to match on the
/// full enum.
#[derive(Debug)]
pub struct CommandLineError(pub String);

impl From<CommandLineError> for ShellError {
    fn from(e: CommandLineError) -> Self {
        ShellError::Parse(e.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_reported_is_idempotent() {
        let err = ShellError::CommandNotFound("x".into()).already_reported();
        let twice = err.already_reported();
        assert!(twice.is_already_reported());
        // Only one layer of wrapping, not `AlreadyReported(AlreadyReported(_))`.
        assert_eq!(twice.to_string(), "");
    }

    #[test]
    fn already_reported_displays_as_empty() {
        let err = ShellError::Parse("bad syntax".into()).already_reported();
        assert_eq!(err.to_string(), "");
    }

    #[test]
    fn report_once_skips_already_reported_errors() {
        let err = ShellError::Parse("bad syntax".into()).already_reported();
        let mut buf = Vec::new();
        report_once(&mut buf, &err);
        assert!(buf.is_empty());
    }

    #[test]
    fn report_once_writes_fresh_errors() {
        let err = ShellError::Parse("bad syntax".into());
        let mut buf = Vec::new();
        report_once(&mut buf, &err);
        assert_eq!(String::from_utf8(buf).unwrap().trim(), "bad syntax");
    }
}
