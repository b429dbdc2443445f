use std::fs::{File, OpenOptions};
use std::io;

use crate::error::ShellError;
use crate::session::{Cmd, IoHandle};

/// A file descriptor restricted to the three standard streams, per
/// spec.md §3: "`fileno ∉ {0,1,2}` is a programmer error."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fd(u8);

impl Fd {
    pub const STDIN: Fd = Fd(0);
    pub const STDOUT: Fd = Fd(1);
    pub const STDERR: Fd = Fd(2);

    pub fn new(n: u8) -> Option<Fd> {
        (n <= 2).then_some(Fd(n))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

/// How a redirection changes a stage's fd.
#[derive(Debug, Clone)]
pub enum RedirectMode {
    /// fd 0 from a file.
    Read,
    /// Truncate-create and write.
    Write,
    /// Append-create and write.
    Append,
    /// Duplicate another stage fd (`dup_from`) onto `fileno`.
    Dup,
}

/// One I/O redirection instruction, applied in source order by
/// [`apply`]. A later redirection for the same fd overrides an earlier
/// one — the driver simply applies them in order and lets the last write
/// win, which gives that semantics for free.
#[derive(Debug, Clone)]
pub struct Redirection {
    pub fileno: Fd,
    pub mode: RedirectMode,
    pub path: Option<String>,
    pub dup_from: Option<Fd>,
    /// Overrides the process-wide `NoClobber` guard for `>|`.
    pub force: bool,
}

impl Redirection {
    fn file(fileno: Fd, mode: RedirectMode, path: String, force: bool) -> Redirection {
        Redirection { fileno, mode, path: Some(path), dup_from: None, force }
    }

    fn dup(fileno: Fd, from: Fd) -> Redirection {
        Redirection { fileno, mode: RedirectMode::Dup, path: None, dup_from: Some(from), force: false }
    }

    /// Synthetic redirection used for `<<<text`: stdin reads from an
    /// in-memory buffer rather than a file. Not part of spec.md's token
    /// set, but every reference shell in the pack treats it as sugar over
    /// stdin, and it costs nothing to support (see SPEC_FULL.md §4.A).
    fn here_string(text: String) -> Redirection {
        Redirection { fileno: Fd::STDIN, mode: RedirectMode::Read, path: Some(format!("\0herestring\0{text}")), dup_from: None, force: false }
    }
}

const HERE_STRING_MARKER: &str = "\0herestring\0";

/// Apply one redirection to `cmd`, opening a file if needed.
///
/// Matches spec.md §4.B: `READ` opens for reading and sets stdin; `WRITE`
/// truncate-creates (honoring `NoClobber` unless `force`); `APPEND`
/// append-creates; `DUP` reassigns a borrowed handle with no OS-level
/// `dup`. Any newly opened file handle is pushed onto `cmd`'s closer list
/// so it survives for the stage's entire run (including background
/// stages) rather than being closed the moment this call returns.
pub fn apply(redir: &Redirection, cmd: &mut Cmd, no_clobber: bool) -> Result<(), ShellError> {
    match redir.mode {
        RedirectMode::Dup => {
            let from = redir.dup_from.expect("DUP redirection without dup_from");
            let handle = cmd.handle(from).borrowed_clone().map_err(ShellError::RedirectOpen)?;
            cmd.set_handle(redir.fileno, handle);
        }
        RedirectMode::Read => {
            let path = redir.path.as_deref().expect("READ redirection without path");
            if let Some(text) = path.strip_prefix(HERE_STRING_MARKER) {
                cmd.set_handle(Fd::STDIN, IoHandle::HereString(text.to_string()));
            } else {
                let file = File::open(path).map_err(ShellError::RedirectOpen)?;
                cmd.set_handle(Fd::STDIN, IoHandle::File(file));
            }
        }
        RedirectMode::Write => {
            let path = redir.path.as_deref().expect("WRITE redirection without path");
            if no_clobber && !redir.force && std::path::Path::new(path).exists() {
                return Err(ShellError::RedirectOpen(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{path}: already exists"),
                )));
            }
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(path)
                .map_err(ShellError::RedirectOpen)?;
            cmd.set_handle(redir.fileno, IoHandle::File(file));
        }
        RedirectMode::Append => {
            let path = redir.path.as_deref().expect("APPEND redirection without path");
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(ShellError::RedirectOpen)?;
            cmd.set_handle(redir.fileno, IoHandle::File(file));
        }
    }
    Ok(())
}

/// Separate redirect operators from regular arguments.
///
/// Recognizes the full token set from spec.md §4.A: `<file`, `>file`,
/// `>>file`, `N>file`, `N>>file`, `1>&2`, `2>&1`, `N>&M` for
/// `N ∈ {0,1,2}`, `>|file` (force, bypassing `NoClobber`), and the
/// here-string sugar `<<<text`. An fd number outside `{0,1,2}` aborts
/// parsing, matching "Unrecognised fd numbers abort parsing."
pub fn extract_redirections(tokens: &[String]) -> Result<(Vec<String>, Vec<Redirection>), String> {
    let (kept, redirections) = extract_redirections_indexed(tokens)?;
    let args = kept.into_iter().map(|i| tokens[i].clone()).collect();
    Ok((args, redirections))
}

/// Same as [`extract_redirections`] but returns the indices of the
/// tokens that remain as arguments instead of cloning them, so a caller
/// holding a parallel array (e.g. `raw_argv`) can filter it in lockstep.
pub fn extract_redirections_indexed(tokens: &[String]) -> Result<(Vec<usize>, Vec<Redirection>), String> {
    let mut args = Vec::new();
    let mut redirections = Vec::new();
    let mut i = 0;

    while i < tokens.len() {
        let token = tokens[i].as_str();

        if let Some((fileno, rest)) = split_fd_prefixed(token) {
            i = parse_after_prefix(fileno, rest, tokens, i, &mut redirections)?;
        } else if token == "<" {
            i += 1;
            let path = expect_filename(i, tokens, "<")?;
            redirections.push(Redirection::file(Fd::STDIN, RedirectMode::Read, path, false));
        } else if token == "<<<" {
            i += 1;
            let text = expect_filename(i, tokens, "<<<")?;
            redirections.push(Redirection::here_string(text));
        } else if token == ">" {
            i += 1;
            let path = expect_filename(i, tokens, ">")?;
            redirections.push(Redirection::file(Fd::STDOUT, RedirectMode::Write, path, false));
        } else if token == ">|" {
            i += 1;
            let path = expect_filename(i, tokens, ">|")?;
            redirections.push(Redirection::file(Fd::STDOUT, RedirectMode::Write, path, true));
        } else if token == ">>" {
            i += 1;
            let path = expect_filename(i, tokens, ">>")?;
            redirections.push(Redirection::file(Fd::STDOUT, RedirectMode::Append, path, false));
        } else {
            args.push(i);
        }

        i += 1;
    }

    Ok((args, redirections))
}

/// Splits a token like `"2>"`, `"1>>"`, `"2>&1"` into its leading fd digit
/// and the remaining operator text. Returns `None` for tokens that don't
/// start with an fd digit immediately followed by `>` or `<`.
fn split_fd_prefixed(token: &str) -> Option<(u8, &str)> {
    let mut chars = token.char_indices();
    let (_, c) = chars.next()?;
    let digit = c.to_digit(10)? as u8;
    let rest_start = chars.next()?.0;
    let rest = &token[rest_start..];
    if rest.starts_with('>') || rest.starts_with('<') {
        Some((digit, rest))
    } else {
        None
    }
}

fn parse_after_prefix(
    fileno: u8,
    rest: &str,
    tokens: &[String],
    i: usize,
    out: &mut Vec<Redirection>,
) -> Result<usize, String> {
    let fileno = Fd::new(fileno).ok_or_else(|| format!("jsh: invalid file descriptor: {fileno}"))?;
    let mut i = i;

    if let Some(target) = rest.strip_prefix(">&") {
        let dup_from = parse_fd(target)?;
        out.push(Redirection::dup(fileno, dup_from));
    } else if rest == ">>" {
        i += 1;
        let path = expect_filename(i, tokens, "N>>")?;
        out.push(Redirection::file(fileno, RedirectMode::Append, path, false));
    } else if rest == ">|" {
        i += 1;
        let path = expect_filename(i, tokens, "N>|")?;
        out.push(Redirection::file(fileno, RedirectMode::Write, path, true));
    } else if rest == ">" {
        i += 1;
        let path = expect_filename(i, tokens, "N>")?;
        out.push(Redirection::file(fileno, RedirectMode::Write, path, false));
    } else if rest == "<" {
        i += 1;
        let path = expect_filename(i, tokens, "N<")?;
        out.push(Redirection::file(fileno, RedirectMode::Read, path, false));
    } else if let Some(attached) = rest.strip_prefix('>') {
        out.push(Redirection::file(fileno, RedirectMode::Write, attached.to_string(), false));
    } else if let Some(attached) = rest.strip_prefix('<') {
        out.push(Redirection::file(fileno, RedirectMode::Read, attached.to_string(), false));
    } else {
        return Err(format!("jsh: syntax error: unrecognised redirection '{rest}'"));
    }

    Ok(i)
}

fn parse_fd(s: &str) -> Result<Fd, String> {
    let n: u8 = s.parse().map_err(|_| format!("jsh: invalid file descriptor: {s}"))?;
    Fd::new(n).ok_or_else(|| format!("jsh: invalid file descriptor: {s}"))
}

fn expect_filename(i: usize, tokens: &[String], operator: &str) -> Result<String, String> {
    tokens
        .get(i)
        .cloned()
        .ok_or_else(|| format!("jsh: syntax error: expected filename after '{operator}'"))
}

/// True if `path` refers to a null device (cross-platform).
pub fn is_null_device(path: &str) -> bool {
    if cfg!(windows) {
        path.eq_ignore_ascii_case("NUL") || path.eq_ignore_ascii_case("/dev/null")
    } else {
        path == "/dev/null"
    }
}

/// Implements the command-line's quoting rule from spec.md §4.C:
/// quote argument `i` if it was originally quoted (`raw_argv[i]` begins
/// with `"`) or contains a character that would otherwise be
/// misinterpreted by a single-string process-creation API.
pub fn quote_for_cmdline(arg: &str, was_quoted: bool) -> String {
    let needs_quotes = was_quoted || arg.chars().any(|c| " &|<>\t\"".contains(c));
    if needs_quotes {
        format!("\"{}\"", arg.replace('"', "\\\""))
    } else {
        arg.to_string()
    }
}

/// Joins `argv` into a single command-line string, quoting per
/// [`quote_for_cmdline`]. Only needed on platforms whose process-creation
/// API takes one string (Windows); elsewhere `argv` is passed directly
/// and this is only useful for echoing the reconstructed line.
pub fn make_cmdline(argv: &[String], raw_argv: &[String]) -> String {
    let mut out = String::new();
    for (i, arg) in argv.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let was_quoted = raw_argv.get(i).map(|r| r.starts_with('"')).unwrap_or(false);
        out.push_str(&quote_for_cmdline(arg, was_quoted));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tok(s: &[&str]) -> Vec<String> {
        s.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn simple_stdout_redirect() {
        let (args, redirs) = extract_redirections(&tok(&["echo", "hello", ">", "out.txt"])).unwrap();
        assert_eq!(args, vec!["echo", "hello"]);
        assert_eq!(redirs.len(), 1);
        assert_eq!(redirs[0].fileno, Fd::STDOUT);
        assert!(matches!(redirs[0].mode, RedirectMode::Write));
        assert_eq!(redirs[0].path.as_deref(), Some("out.txt"));
    }

    #[test]
    fn append_redirect() {
        let (_, redirs) = extract_redirections(&tok(&["echo", "hi", ">>", "out.txt"])).unwrap();
        assert!(matches!(redirs[0].mode, RedirectMode::Append));
    }

    #[test]
    fn noclobber_force_override() {
        let (_, redirs) = extract_redirections(&tok(&["echo", "hi", ">|", "out.txt"])).unwrap();
        assert!(redirs[0].force);
    }

    #[test]
    fn stdin_redirect() {
        let (args, redirs) = extract_redirections(&tok(&["sort", "<", "data.txt"])).unwrap();
        assert_eq!(args, vec!["sort"]);
        assert_eq!(redirs[0].fileno, Fd::STDIN);
        assert!(matches!(redirs[0].mode, RedirectMode::Read));
    }

    #[test]
    fn stderr_redirect() {
        let (args, redirs) = extract_redirections(&tok(&["ls", "/bad", "2>", "err.txt"])).unwrap();
        assert_eq!(args, vec!["ls", "/bad"]);
        assert_eq!(redirs[0].fileno, Fd::STDERR);
    }

    #[test]
    fn stderr_to_stdout_dup() {
        let (args, redirs) = extract_redirections(&tok(&["ls", "2>&1"])).unwrap();
        assert_eq!(args, vec!["ls"]);
        assert_eq!(redirs[0].fileno, Fd::STDERR);
        assert!(matches!(redirs[0].mode, RedirectMode::Dup));
        assert_eq!(redirs[0].dup_from, Some(Fd::STDOUT));
    }

    #[test]
    fn stdout_to_stderr_dup() {
        let (_, redirs) = extract_redirections(&tok(&["ls", "1>&2"])).unwrap();
        assert_eq!(redirs[0].fileno, Fd::STDOUT);
        assert_eq!(redirs[0].dup_from, Some(Fd::STDERR));
    }

    #[test]
    fn here_string() {
        let (args, redirs) = extract_redirections(&tok(&["cat", "<<<", "hello world"])).unwrap();
        assert_eq!(args, vec!["cat"]);
        assert_eq!(redirs[0].fileno, Fd::STDIN);
    }

    #[test]
    fn missing_filename_is_error() {
        assert!(extract_redirections(&tok(&["echo", ">"])).is_err());
    }

    #[test]
    fn invalid_fd_is_error() {
        assert!(extract_redirections(&tok(&["echo", "9>", "out.txt"])).is_err());
    }

    #[test]
    fn multiple_redirections_same_fd_last_wins_in_order() {
        let (args, redirs) =
            extract_redirections(&tok(&["cmd", ">", "a.txt", ">", "b.txt"])).unwrap();
        assert_eq!(args, vec!["cmd"]);
        assert_eq!(redirs.len(), 2);
        assert_eq!(redirs[1].path.as_deref(), Some("b.txt"));
    }

    #[test]
    fn null_device_detection() {
        assert!(is_null_device("/dev/null"));
    }

    #[test]
    fn quoting_rule_quotes_originally_quoted_tokens() {
        assert_eq!(quote_for_cmdline("hello", true), "\"hello\"");
    }

    #[test]
    fn quoting_rule_quotes_tokens_with_special_chars() {
        assert_eq!(quote_for_cmdline("a b", false), "\"a b\"");
        assert_eq!(quote_for_cmdline("a|b", false), "\"a|b\"");
    }

    #[test]
    fn quoting_rule_leaves_plain_tokens_alone() {
        assert_eq!(quote_for_cmdline("hello", false), "hello");
    }

    #[test]
    fn quoting_rule_escapes_embedded_quotes() {
        assert_eq!(quote_for_cmdline("a\"b", true), "\"a\\\"b\"");
    }

    #[test]
    fn make_cmdline_joins_with_quoting() {
        let argv = tok(&["echo", "hello world"]);
        let raw = tok(&["echo", "\"hello world\""]);
        assert_eq!(make_cmdline(&argv, &raw), "echo \"hello world\"");
    }
}
