use std::io;
use std::process::Command;

use crate::error::ShellError;
use crate::redirect::{make_cmdline, Fd};
use crate::session::Cmd;
use crate::status::{self, ErrorLevel};
use crate::Shell;

/// Runs the five-step dispatch chain for one stage whose stdio has
/// already been wired up by the driver (pipes connected, redirections
/// applied). Returns the stage's error level and, on failure, the error
/// that produced it — already marked "already reported" if this
/// function printed it itself.
pub fn execute_stage(shell: &Shell, mut cmd: Cmd, single_stage: bool) -> (ErrorLevel, Option<ShellError>) {
    // ── 1. Argv-rewrite hook ──
    match shell.hooks().rewrite_argv(&cmd, &cmd.argv) {
        Ok(argv) => cmd.argv = argv,
        Err(e) => return (ErrorLevel::Continue(255), Some(e)),
    }

    if cmd.argv.is_empty() {
        return (ErrorLevel::Continue(0), None);
    }

    // Wildcard expansion runs after the rewrite hook (it may itself have
    // introduced globs) and before path resolution.
    if shell.state().wildcard_expansion_always() {
        let program = cmd.argv[0].clone();
        let mut expanded = shell.globber().globs(&cmd.argv[1..]);
        let mut argv = Vec::with_capacity(expanded.len() + 1);
        argv.push(program);
        argv.append(&mut expanded);
        cmd.argv = argv;
    }

    // ── 2. Command-dispatch hook ──
    if let Some(result) = shell.hooks().dispatch(&cmd) {
        return match result {
            Ok(level) => (level, None),
            Err(e) => (ErrorLevel::Continue(255), Some(e)),
        };
    }

    // ── 3. Path resolution ──
    let extra_path_env = std::env::var("SHELL_EXTRA_PATH").unwrap_or_default();
    let resolved = shell.path_resolver().look_path(&cmd.argv[0], &extra_path_env);
    let path = match resolved {
        Some(path) => path,
        None => {
            let err = shell
                .hooks()
                .reword_not_found(&cmd, ShellError::CommandNotFound(cmd.argv[0].clone()));
            cmd.report(&err);
            return (ErrorLevel::Continue(255), Some(err.already_reported()));
        }
    };

    // ── 4. Extension dispatch ──
    let suffix_lower = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    if matches!(suffix_lower.as_deref(), Some("bat") | Some("cmd")) {
        let (code, err) = shell.batch_runner().source(
            &cmd.argv,
            false,
            cmd.take_stdin().into_stdin_stdio().unwrap_or(std::process::Stdio::inherit()),
            cmd.take_stdout().into_output_stdio().unwrap_or(std::process::Stdio::inherit()),
            cmd.take_stderr().into_output_stdio().unwrap_or(std::process::Stdio::inherit()),
        );
        return (ErrorLevel::Continue(code), err);
    }

    if single_stage && shell.gui_classifier().is_gui(&path) {
        let cwd = std::env::current_dir().unwrap_or_default();
        let args = make_cmdline(&cmd.argv[1..], cmd.raw_argv.get(1..).unwrap_or(&[]));
        return match shell.shell_executor().shell_execute("open", &path, &args, &cwd) {
            Ok(()) => (ErrorLevel::Continue(0), None),
            Err(e) => (ErrorLevel::Continue(255), Some(ShellError::Spawn(e))),
        };
    }

    log::debug!("spawn: {}", make_cmdline(&cmd.argv, &cmd.raw_argv));

    spawn_external(shell, cmd, &path)
}

fn spawn_external(
    shell: &Shell,
    mut cmd: Cmd,
    path: &std::path::Path,
) -> (ErrorLevel, Option<ShellError>) {
    let mut process = Command::new(path);
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        let raw = make_cmdline(&cmd.argv[1..], cmd.raw_argv.get(1..).unwrap_or(&[]));
        process.raw_arg(&raw);
    }
    #[cfg(not(windows))]
    {
        process.args(&cmd.argv[1..]);
    }

    let stdin = match cmd.take_stdin().into_stdin_stdio() {
        Ok(s) => s,
        Err(e) => return (ErrorLevel::Continue(255), Some(ShellError::Spawn(e))),
    };
    let stdout = match cmd.take_stdout().into_output_stdio() {
        Ok(s) => s,
        Err(e) => return (ErrorLevel::Continue(255), Some(ShellError::Spawn(e))),
    };
    // Hand the child a duplicate of the stage's stderr rather than taking
    // it, so `cmd` still owns a usable handle to report through (honoring
    // a `2>`/`|&` redirection) if spawn or wait fails below.
    let stderr = match cmd.handle(Fd::STDERR).borrowed_clone().and_then(|h| h.into_output_stdio()) {
        Ok(s) => s,
        Err(e) => return (ErrorLevel::Continue(255), Some(ShellError::Spawn(e))),
    };
    process.stdin(stdin).stdout(stdout).stderr(stderr);

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        unsafe {
            process.pre_exec(reset_inherited_signals);
        }
    }

    let mut child = match process.spawn() {
        Ok(child) => child,
        Err(e) => {
            let err = ShellError::Spawn(e);
            cmd.report(&err);
            return (ErrorLevel::Continue(255), Some(err.already_reported()));
        }
    };

    if let Err(e) = shell.hooks().run_on_fork(&cmd) {
        eprintln!("{e}");
    }

    let exit_status = match child.wait() {
        Ok(exit_status) => exit_status,
        Err(e) => {
            let err = ShellError::Spawn(e);
            cmd.report(&err);
            return (ErrorLevel::Continue(255), Some(err.already_reported()));
        }
    };

    if let Err(e) = shell.hooks().run_off_fork(&cmd) {
        eprintln!("{e}");
    }

    (ErrorLevel::Continue(status::exit_code(exit_status)), None)
}

/// Resets signal dispositions the shell process ignores (or has set up
/// for its own line-editing loop) back to default before `exec`, so
/// children don't inherit them. `SIG_IGN` survives `exec`; without this
/// a spawned process would ignore `SIGINT`/`SIGQUIT` just like the shell.
#[cfg(unix)]
fn reset_inherited_signals() -> io::Result<()> {
    let signals = [libc::SIGINT, libc::SIGQUIT, libc::SIGPIPE];
    for &sig in &signals {
        if unsafe { libc::signal(sig, libc::SIG_DFL) } == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
