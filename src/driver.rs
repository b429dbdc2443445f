use crate::ast::{Pipeline, Terminator};
use crate::builtins;
use crate::error::ShellError;
use crate::executor;
use crate::redirect::{self, Fd};
use crate::session::IoHandle;
use crate::status::ErrorLevel;
use crate::Shell;

/// Runs every parsed pipeline in order, applying `&&`/`||`/`;` sequencing
/// and stopping early on a dispatch hook's `Shutdown` sentinel.
pub fn run_pipelines(shell: &Shell, pipelines: &[Pipeline]) -> (i32, Option<ShellError>) {
    let mut last_code = shell.state().last_error_level();
    let mut last_err = None;

    for pipeline in pipelines {
        let (level, err) = run_pipeline(shell, pipeline);

        if let ErrorLevel::Continue(code) = level {
            shell.state().set_last_error_level(code);
            last_code = code;
        }
        last_err = err;

        if let ErrorLevel::Shutdown = level {
            return (level.code(), last_err);
        }

        match pipeline.terminator() {
            Terminator::And if last_code != 0 => break,
            Terminator::Or if last_code == 0 => break,
            _ => {}
        }
    }

    (last_code, last_err)
}

fn run_pipeline(shell: &Shell, pipeline: &Pipeline) -> (ErrorLevel, Option<ShellError>) {
    if pipeline.stages.iter().any(|s| s.argv.is_empty()) {
        let err = ShellError::Parse("The syntax of the command is incorrect.".into());
        eprintln!("{err}");
        return (ErrorLevel::Continue(255), Some(err.already_reported()));
    }

    let generation = shell.state().next_pipe_generation();
    let is_background = pipeline.is_background();
    let n = pipeline.stages.len();

    let mut pipe_in: Option<IoHandle> = None;
    let mut join_handles: Vec<std::thread::JoinHandle<(ErrorLevel, Option<ShellError>)>> =
        Vec::new();
    let mut foreground_result = (ErrorLevel::Continue(0), None);
    let mut early_exit: Option<(ErrorLevel, Option<ShellError>)> = None;

    for (i, stage) in pipeline.stages.iter().enumerate() {
        let is_last = i + 1 == n;

        let mut cmd = match shell.ambient_cmd().clone_for_stage() {
            Ok(cmd) => cmd,
            Err(e) => {
                early_exit = Some((ErrorLevel::Continue(255), Some(ShellError::Spawn(e))));
                break;
            }
        };
        cmd.argv = stage.argv.clone();
        cmd.raw_argv = stage.raw_argv.clone();
        // pipe_seq is copied from the ambient Cmd by clone_for_stage, then
        // immediately overwritten with this stage's own coordinates.
        cmd.pipe_seq = (generation, (i + 1) as u32);
        // Every stage past the first never reads the parent's keyboard —
        // its stdin is always the previous stage's pipe — so it's marked
        // background-for-stdin purposes regardless of the pipeline's own
        // `&` termination, matching `shell/interpreter.go`'s
        // `if i > 0 { cmd.IsBackGround = true }`.
        cmd.is_background = is_background || i > 0;

        if let Some(reader) = pipe_in.take() {
            cmd.set_handle(Fd::STDIN, reader);
        }

        let mut next_pipe_in = None;
        if stage.term.starts_pipe() {
            let (reader, writer) = match os_pipe::pipe() {
                Ok(pair) => pair,
                Err(e) => {
                    early_exit = Some((ErrorLevel::Continue(255), Some(ShellError::Spawn(e))));
                    break;
                }
            };
            cmd.set_handle(Fd::STDOUT, IoHandle::PipeWriter(writer));
            if stage.term == Terminator::PipeBoth {
                match cmd.handle(Fd::STDOUT).borrowed_clone() {
                    Ok(dup) => cmd.set_handle(Fd::STDERR, dup),
                    Err(e) => {
                        early_exit = Some((ErrorLevel::Continue(255), Some(ShellError::Spawn(e))));
                        break;
                    }
                }
            }
            next_pipe_in = Some(IoHandle::PipeReader(reader));
        }

        let mut redirect_failed = false;
        for redir in &stage.redirects {
            if let Err(e) = redirect::apply(redir, &mut cmd, shell.state().no_clobber()) {
                cmd.report(&e);
                early_exit = Some((ErrorLevel::Continue(255), Some(e.already_reported())));
                redirect_failed = true;
                break;
            }
        }
        if redirect_failed {
            break;
        }

        let single_stage = n == 1;
        let is_builtin_stage = cmd.argv.first().map(|p| builtins::is_builtin(p)).unwrap_or(false);

        if is_last && !is_background {
            foreground_result = executor::execute_stage(shell, cmd, single_stage);
        } else if is_builtin_stage {
            // Builtins (`cd`/`export`/`unset`) mutate process-wide state
            // via `std::env::set_var`; run them on the calling thread
            // instead of a background worker so concurrent stages never
            // race on the environment table. Background flag is ignored,
            // matching the teacher's "builtins always run in the
            // foreground" rule.
            let _ = executor::execute_stage(shell, cmd, single_stage);
        } else {
            let shell = shell.clone();
            let handle =
                std::thread::spawn(move || executor::execute_stage(&shell, cmd, single_stage));
            if is_background {
                drop(handle);
            } else {
                join_handles.push(handle);
            }
        }

        pipe_in = next_pipe_in;
    }

    for handle in join_handles {
        let _ = handle.join();
    }

    early_exit.unwrap_or(foreground_result)
}
