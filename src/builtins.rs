use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::ShellError;
use crate::hooks::DispatchHook;
use crate::redirect::Fd;
use crate::session::Cmd;
use crate::status::ErrorLevel;

/// The list of all builtin command names.
const BUILTINS: &[&str] = &["cd", "pwd", "exit", "echo", "export", "unset", "type"];

/// Returns true if the command name is a shell builtin.
pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

/// The dispatch hook that implements the shell's minimal builtin table.
/// Registered by `Shell::new()` ahead of any hook a host adds, so a host
/// wanting to shadow a builtin must register its own dispatch hook first
/// (hooks run in registration order; the first to claim wins).
pub fn dispatch_hook() -> DispatchHook {
    Box::new(|cmd: &Cmd| -> (ErrorLevel, bool, Option<ShellError>) {
        let Some(program) = cmd.argv.first().cloned() else {
            return (ErrorLevel::Continue(0), false, None);
        };
        if !is_builtin(&program) {
            return (ErrorLevel::Continue(0), false, None);
        }

        let args = &cmd.argv[1..];

        if program == "exit" {
            return builtin_exit(cmd, args);
        }

        match run(cmd, &program, args) {
            Ok(code) => (ErrorLevel::Continue(code), true, None),
            Err(e) => (ErrorLevel::Continue(255), true, Some(e)),
        }
    })
}

fn run(cmd: &Cmd, program: &str, args: &[String]) -> Result<i32, ShellError> {
    let mut stdout = cmd
        .handle(Fd::STDOUT)
        .borrowed_clone()
        .and_then(|h| h.into_write(false))
        .map_err(ShellError::Spawn)?;
    let mut stderr = cmd
        .handle(Fd::STDERR)
        .borrowed_clone()
        .and_then(|h| h.into_write(true))
        .map_err(ShellError::Spawn)?;

    let code = match program {
        "cd" => builtin_cd(args, stderr.as_mut()),
        "pwd" => builtin_pwd(stdout.as_mut(), stderr.as_mut()),
        "echo" => builtin_echo(args, stdout.as_mut()),
        "export" => builtin_export(args, stderr.as_mut()),
        "unset" => builtin_unset(args),
        "type" => builtin_type(args, stdout.as_mut(), stderr.as_mut()),
        _ => unreachable!("checked by is_builtin in dispatch_hook"),
    };

    let _ = stdout.flush();
    let _ = stderr.flush();
    Ok(code)
}

/// `exit` ends the shell rather than the stage: it reports through
/// `ErrorLevel::Shutdown` (spec.md §4.F) instead of calling
/// `std::process::exit` directly, so a host embedding `Shell` gets to
/// decide what "the shell ends" means instead of the process dying out
/// from under it. The requested code is stashed in `LastErrorLevel` for
/// the caller to read back as its own process exit code.
fn builtin_exit(cmd: &Cmd, args: &[String]) -> (ErrorLevel, bool, Option<ShellError>) {
    let code = match args.first() {
        None => 0,
        Some(s) => match s.parse::<i32>() {
            Ok(code) => code,
            Err(_) => {
                if let Ok(mut stderr) = cmd
                    .handle(Fd::STDERR)
                    .borrowed_clone()
                    .and_then(|h| h.into_write(true))
                {
                    let _ = writeln!(stderr, "exit: {s}: numeric argument required");
                }
                2
            }
        },
    };
    cmd.state.set_last_error_level(code);
    (ErrorLevel::Shutdown, true, None)
}

fn builtin_cd(args: &[String], stderr: &mut dyn Write) -> i32 {
    let target = match args.first() {
        Some(dir) if dir == "-" => match std::env::var("OLDPWD") {
            Ok(prev) => prev,
            Err(_) => {
                let _ = writeln!(stderr, "cd: OLDPWD not set");
                return 1;
            }
        },
        Some(dir) => dir.clone(),
        None => std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    };

    // SAFETY: env vars are only mutated here, on the thread that dispatches
    // a foreground/synchronous builtin; no other thread reads or writes
    // OLDPWD/PWD concurrently with this call.
    if let Ok(cwd) = std::env::current_dir() {
        unsafe { std::env::set_var("OLDPWD", cwd) };
    }

    if let Err(e) = std::env::set_current_dir(&target) {
        let _ = writeln!(stderr, "cd: {target}: {e}");
        return 1;
    }

    0
}

fn builtin_pwd(stdout: &mut dyn Write, stderr: &mut dyn Write) -> i32 {
    match std::env::current_dir() {
        Ok(path) => {
            let _ = writeln!(stdout, "{}", path.display());
            0
        }
        Err(e) => {
            let _ = writeln!(stderr, "pwd: {e}");
            1
        }
    }
}

fn builtin_echo(args: &[String], stdout: &mut dyn Write) -> i32 {
    let _ = writeln!(stdout, "{}", args.join(" "));
    0
}

fn builtin_export(args: &[String], stderr: &mut dyn Write) -> i32 {
    for arg in args {
        if let Some((key, value)) = arg.split_once('=') {
            // SAFETY: see builtin_cd.
            unsafe { std::env::set_var(key, value) };
        } else {
            let _ = writeln!(stderr, "export: usage: export VAR=value");
        }
    }
    0
}

fn builtin_unset(args: &[String]) -> i32 {
    for arg in args {
        // SAFETY: see builtin_cd.
        unsafe { std::env::remove_var(arg) };
    }
    0
}

fn builtin_type(args: &[String], stdout: &mut dyn Write, stderr: &mut dyn Write) -> i32 {
    let mut exit_code = 0;
    for arg in args {
        if is_builtin(arg) {
            let _ = writeln!(stdout, "{arg} is a shell builtin");
        } else {
            match find_in_path(arg) {
                Some(path) => {
                    let _ = writeln!(stdout, "{arg} is {}", path.display());
                }
                None => {
                    let _ = writeln!(stderr, "{arg}: not found");
                    exit_code = 1;
                }
            }
        }
    }
    exit_code
}

fn is_executable(path: &Path) -> bool {
    let Ok(meta) = path.metadata() else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        return meta.permissions().mode() & 0o111 != 0;
    }

    #[cfg(not(unix))]
    {
        let extension = match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) => ext.to_ascii_lowercase(),
            None => return false,
        };
        let pathext = std::env::var("PATHEXT").unwrap_or_else(|_| ".COM;.EXE;.BAT;.CMD".to_string());
        pathext
            .split(';')
            .any(|ext| extension == ext.trim_start_matches('.').to_ascii_lowercase())
    }
}

fn find_in_path(cmd: &str) -> Option<PathBuf> {
    let path_var = std::env::var("PATH").ok()?;
    let separator = if cfg!(windows) { ';' } else { ':' };

    for dir in path_var.split(separator) {
        let full_path = Path::new(dir).join(cmd);
        if is_executable(&full_path) {
            return Some(full_path);
        }
        if cfg!(windows) {
            for ext in &["exe", "cmd", "bat", "com"] {
                let with_ext = full_path.with_extension(ext);
                if is_executable(&with_ext) {
                    return Some(with_ext);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_builtins() {
        assert!(is_builtin("cd"));
        assert!(is_builtin("echo"));
        assert!(!is_builtin("ls"));
    }
}
