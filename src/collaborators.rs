use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use crate::error::ShellError;

/// Resolves a bare command name to an executable path.
///
/// The default walks `PATH` the way `std::process::Command` already
/// would for a bare name, plus `extra_path_env` prepended — NYAGOS's
/// `NYAGOSPATH`, a second search list consulted before the OS one.
pub trait PathResolver: Send + Sync {
    fn look_path(&self, name: &str, extra_path_env: &str) -> Option<PathBuf>;
}

/// Distinguishes console programs from windowed ones, so the driver
/// knows whether to wait on them inline or dispatch-and-forget.
pub trait GuiClassifier: Send + Sync {
    fn is_gui(&self, path: &Path) -> bool;
}

/// `ShellExecute`-style "open with the registered handler" launch, used
/// for targets that aren't directly runnable (documents, URLs).
pub trait ShellExecutor: Send + Sync {
    fn shell_execute(&self, verb: &str, path: &Path, args: &str, cwd: &Path) -> io::Result<()>;
}

/// Runs a `.bat`/`.cmd`-style batch file, possibly nested inside the
/// current interpreter rather than as a child process.
pub trait BatchRunner: Send + Sync {
    fn source(
        &self,
        argv: &[String],
        nested: bool,
        stdin: Stdio,
        stdout: Stdio,
        stderr: Stdio,
    ) -> (i32, Option<ShellError>);
}

/// Expands wildcard tokens in an argv into the matching path list.
pub trait Globber: Send + Sync {
    fn globs(&self, argv: &[String]) -> Vec<String>;
}

/// Walks `extra_path_env` (`;`- or `:`-separated, platform-appropriate)
/// followed by the process `PATH`, appending executable extensions on
/// Windows the way `CreateProcess` implicitly does.
pub struct DefaultPathResolver;

impl PathResolver for DefaultPathResolver {
    fn look_path(&self, name: &str, extra_path_env: &str) -> Option<PathBuf> {
        let candidate = Path::new(name);
        if candidate.is_absolute() || name.contains(std::path::MAIN_SEPARATOR) {
            return resolve_with_extensions(candidate);
        }

        for dir in path_dirs(extra_path_env) {
            if let Some(found) = resolve_with_extensions(&dir.join(name)) {
                return Some(found);
            }
        }

        None
    }
}

fn path_dirs(extra_path_env: &str) -> impl Iterator<Item = PathBuf> {
    let extra: Vec<PathBuf> = std::env::split_paths(extra_path_env).collect();
    let system: Vec<PathBuf> = std::env::var_os("PATH")
        .map(|p| std::env::split_paths(&p).collect())
        .unwrap_or_default();
    extra.into_iter().chain(system)
}

#[cfg(windows)]
const EXECUTABLE_EXTENSIONS: &[&str] = &["", ".exe", ".com", ".bat", ".cmd"];
#[cfg(not(windows))]
const EXECUTABLE_EXTENSIONS: &[&str] = &[""];

fn resolve_with_extensions(base: &Path) -> Option<PathBuf> {
    for ext in EXECUTABLE_EXTENSIONS {
        let candidate = if ext.is_empty() {
            base.to_path_buf()
        } else {
            base.with_extension(&ext[1..])
        };
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// Off Windows there is no PE header to inspect, so every program is
/// treated as a console program — the only classification that makes
/// `wait()`-before-prompt semantics correct on this platform.
pub struct DefaultGuiClassifier;

impl GuiClassifier for DefaultGuiClassifier {
    #[cfg(windows)]
    fn is_gui(&self, path: &Path) -> bool {
        windows_pe_subsystem::is_gui_subsystem(path).unwrap_or(false)
    }

    #[cfg(not(windows))]
    fn is_gui(&self, _path: &Path) -> bool {
        false
    }
}

#[cfg(windows)]
mod windows_pe_subsystem {
    use std::fs::File;
    use std::io::{self, Read, Seek, SeekFrom};
    use std::path::Path;

    const IMAGE_SUBSYSTEM_WINDOWS_GUI: u16 = 2;

    /// Reads just enough of the PE header to recover `IMAGE_OPTIONAL_HEADER.Subsystem`,
    /// mirroring what NYAGOS's `frame` package inspects via `debug/pe`.
    pub fn is_gui_subsystem(path: &Path) -> io::Result<bool> {
        let mut f = File::open(path)?;
        let mut dos_header = [0u8; 0x40];
        f.read_exact(&mut dos_header)?;
        if &dos_header[0..2] != b"MZ" {
            return Ok(false);
        }
        let pe_offset = u32::from_le_bytes(dos_header[0x3c..0x40].try_into().unwrap());
        f.seek(SeekFrom::Start(pe_offset as u64))?;
        let mut pe_sig = [0u8; 4];
        f.read_exact(&mut pe_sig)?;
        if &pe_sig != b"PE\0\0" {
            return Ok(false);
        }
        // COFF header (20 bytes) then the optional header, whose 69th/70th
        // bytes hold Subsystem for both PE32 and PE32+.
        f.seek(SeekFrom::Current(20 + 68))?;
        let mut subsystem = [0u8; 2];
        f.read_exact(&mut subsystem)?;
        Ok(u16::from_le_bytes(subsystem) == IMAGE_SUBSYSTEM_WINDOWS_GUI)
    }
}

/// Off Windows there is no shell namespace to hand a path to.
pub struct DefaultShellExecutor;

impl ShellExecutor for DefaultShellExecutor {
    fn shell_execute(&self, _verb: &str, path: &Path, _args: &str, _cwd: &Path) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("no shell-execute collaborator configured for {}", path.display()),
        ))
    }
}

/// No batch-file dialect is implemented by default; a host embedding the
/// interpreter with a scripting layer supplies its own.
pub struct DefaultBatchRunner;

impl BatchRunner for DefaultBatchRunner {
    fn source(
        &self,
        argv: &[String],
        _nested: bool,
        _stdin: Stdio,
        _stdout: Stdio,
        _stderr: Stdio,
    ) -> (i32, Option<ShellError>) {
        let name = argv.first().cloned().unwrap_or_default();
        (1, Some(ShellError::CommandNotFound(name)))
    }
}

/// Expands each `*`/`?`-containing argument against the filesystem with
/// the `glob` crate, leaving literal arguments untouched. An argument
/// that matches nothing is left as-is, matching shell convention rather
/// than silently dropping it.
pub struct DefaultGlobber;

impl Globber for DefaultGlobber {
    fn globs(&self, argv: &[String]) -> Vec<String> {
        let mut out = Vec::with_capacity(argv.len());
        for arg in argv {
            if !has_wildcard(arg) {
                out.push(arg.clone());
                continue;
            }
            match glob::glob(arg) {
                Ok(paths) => {
                    let mut matched: Vec<String> = paths
                        .filter_map(Result::ok)
                        .map(|p| p.to_string_lossy().into_owned())
                        .collect();
                    if matched.is_empty() {
                        out.push(arg.clone());
                    } else {
                        out.append(&mut matched);
                    }
                }
                Err(_) => out.push(arg.clone()),
            }
        }
        out
    }
}

fn has_wildcard(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn globber_leaves_literal_arguments_untouched() {
        let out = DefaultGlobber.globs(&["hello".to_string(), "world".to_string()]);
        assert_eq!(out, vec!["hello", "world"]);
    }

    #[test]
    fn globber_keeps_a_non_matching_pattern_literal() {
        let out = DefaultGlobber.globs(&["*.definitely-not-a-real-extension-xyz".to_string()]);
        assert_eq!(out, vec!["*.definitely-not-a-real-extension-xyz"]);
    }

    #[test]
    fn globber_expands_a_matching_pattern() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"").unwrap();
        let pattern = dir.path().join("*.txt").to_string_lossy().into_owned();

        let out = DefaultGlobber.globs(&[pattern]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn path_resolver_finds_an_absolute_executable() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("myexe");
        std::fs::write(&script, b"#!/bin/sh\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let found = DefaultPathResolver.look_path(&script.to_string_lossy(), "");
        assert_eq!(found.as_deref(), Some(script.as_path()));
    }

    #[test]
    fn path_resolver_returns_none_for_unknown_name() {
        assert!(DefaultPathResolver.look_path("definitely_not_a_real_binary_xyz", "").is_none());
    }
}
