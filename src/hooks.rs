use std::sync::RwLock;

use crate::error::ShellError;
use crate::session::Cmd;
use crate::status::ErrorLevel;

/// Rewrites a stage's argv before dispatch (aliasing, history expansion,
/// `sudo`-style prefix injection).
pub type ArgvRewriteHook = Box<dyn Fn(&Cmd, &[String]) -> Result<Vec<String>, ShellError> + Send + Sync>;

/// First chance to handle a stage, ahead of builtin/path lookup.
///
/// Returns `(level, claimed, error)`: `claimed == false` declines and
/// falls through to the next dispatch step (or to path resolution, if
/// this was the last one); `claimed == true` ends the stage here, with
/// `error` set on failure.
pub type DispatchHook =
    Box<dyn Fn(&Cmd) -> (ErrorLevel, bool, Option<ShellError>) + Send + Sync>;

/// Last chance before reporting "command not found"; may replace the
/// error (e.g. a batch-file collaborator found and ran the command
/// after all, or wants to reword the message).
pub type NotFoundHook = Box<dyn Fn(&Cmd, &ShellError) -> ShellError + Send + Sync>;

/// Runs immediately after a stage's child process is spawned (and for
/// builtins, immediately after they return), in the parent.
pub type OnForkHook = Box<dyn Fn(&Cmd) -> Result<(), ShellError> + Send + Sync>;

/// Runs once the stage has fully exited (after `wait`), in the parent.
pub type OffForkHook = Box<dyn Fn(&Cmd) -> Result<(), ShellError> + Send + Sync>;

/// The process-wide collection of dispatch-chain hooks.
///
/// Read-heavy by construction: every stage consults every populated slot,
/// but hooks are set rarely (once at startup, or interactively via a
/// builtin). An `RwLock` lets concurrent pipeline stages dispatch without
/// contending on a single mutex, matching how the registry is actually
/// used rather than reaching for an arc-swap the rest of the stack
/// doesn't otherwise need.
#[derive(Default)]
pub struct HookSet {
    argv_rewrite: RwLock<Option<ArgvRewriteHook>>,
    dispatch: RwLock<Vec<DispatchHook>>,
    not_found: RwLock<Option<NotFoundHook>>,
    on_fork: RwLock<Vec<OnForkHook>>,
    off_fork: RwLock<Vec<OffForkHook>>,
}

impl HookSet {
    pub fn new() -> HookSet {
        HookSet::default()
    }

    pub fn set_argv_rewrite(&self, hook: Option<ArgvRewriteHook>) -> Option<ArgvRewriteHook> {
        std::mem::replace(&mut self.argv_rewrite.write().unwrap(), hook)
    }

    pub fn rewrite_argv(&self, cmd: &Cmd, argv: &[String]) -> Result<Vec<String>, ShellError> {
        match self.argv_rewrite.read().unwrap().as_ref() {
            Some(hook) => hook(cmd, argv),
            None => Ok(argv.to_vec()),
        }
    }

    pub fn add_dispatch(&self, hook: DispatchHook) {
        self.dispatch.write().unwrap().push(hook);
    }

    /// Runs every registered dispatch hook in registration order, stopping
    /// at the first one that claims the stage.
    pub fn dispatch(&self, cmd: &Cmd) -> Option<Result<ErrorLevel, ShellError>> {
        for hook in self.dispatch.read().unwrap().iter() {
            let (level, claimed, err) = hook(cmd);
            if claimed {
                return Some(match err {
                    Some(e) => Err(e),
                    None => Ok(level),
                });
            }
        }
        None
    }

    pub fn set_not_found(&self, hook: Option<NotFoundHook>) -> Option<NotFoundHook> {
        std::mem::replace(&mut self.not_found.write().unwrap(), hook)
    }

    /// Gives the not-found hook a chance to replace `err` before it is
    /// reported to the user.
    pub fn reword_not_found(&self, cmd: &Cmd, err: ShellError) -> ShellError {
        match self.not_found.read().unwrap().as_ref() {
            Some(hook) => hook(cmd, &err),
            None => err,
        }
    }

    pub fn add_on_fork(&self, hook: OnForkHook) {
        self.on_fork.write().unwrap().push(hook);
    }

    pub fn run_on_fork(&self, cmd: &Cmd) -> Result<(), ShellError> {
        for hook in self.on_fork.read().unwrap().iter() {
            hook(cmd)?;
        }
        Ok(())
    }

    pub fn add_off_fork(&self, hook: OffForkHook) {
        self.off_fork.write().unwrap().push(hook);
    }

    pub fn run_off_fork(&self, cmd: &Cmd) -> Result<(), ShellError> {
        for hook in self.off_fork.read().unwrap().iter() {
            hook(cmd)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Cmd, Session, ShellState};
    use std::sync::Arc;

    fn test_cmd() -> Cmd {
        Cmd::new(Arc::new(Session::new()), Arc::new(ShellState::new()))
    }

    #[test]
    fn first_dispatch_hook_to_claim_wins() {
        let hooks = HookSet::new();
        hooks.add_dispatch(Box::new(|_cmd| (ErrorLevel::Continue(1), false, None)));
        hooks.add_dispatch(Box::new(|_cmd| (ErrorLevel::Continue(9), true, None)));
        hooks.add_dispatch(Box::new(|_cmd| (ErrorLevel::Continue(255), true, None)));

        let result = hooks.dispatch(&test_cmd());
        assert!(matches!(result, Some(Ok(ErrorLevel::Continue(9)))));
    }

    #[test]
    fn no_dispatch_hook_claims_falls_through() {
        let hooks = HookSet::new();
        hooks.add_dispatch(Box::new(|_cmd| (ErrorLevel::Continue(0), false, None)));
        assert!(hooks.dispatch(&test_cmd()).is_none());
    }

    #[test]
    fn argv_rewrite_defaults_to_identity() {
        let hooks = HookSet::new();
        let argv = vec!["echo".to_string(), "hi".to_string()];
        assert_eq!(hooks.rewrite_argv(&test_cmd(), &argv).unwrap(), argv);
    }

    #[test]
    fn setting_argv_rewrite_returns_previous_hook() {
        let hooks = HookSet::new();
        let first: ArgvRewriteHook = Box::new(|_cmd, argv| Ok(argv.to_vec()));
        assert!(hooks.set_argv_rewrite(Some(first)).is_none());

        let second: ArgvRewriteHook = Box::new(|_cmd, argv| Ok(argv.to_vec()));
        assert!(hooks.set_argv_rewrite(Some(second)).is_some());
    }

    #[test]
    fn not_found_hook_can_reword_the_error() {
        let hooks = HookSet::new();
        hooks.set_not_found(Some(Box::new(|_cmd, _err| {
            ShellError::CommandNotFound("reworded".into())
        })));
        let reworded = hooks.reword_not_found(&test_cmd(), ShellError::CommandNotFound("orig".into()));
        assert!(matches!(reworded, ShellError::CommandNotFound(name) if name == "reworded"));
    }
}
