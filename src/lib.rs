//! A pipeline shell interpreter core: parses one line of input into a
//! sequence of pipelines, dispatches each stage through a pluggable hook
//! chain, wires up process I/O, and runs pipelines with fire-and-forget
//! background semantics.
//!
//! The line editor, history store, completion engine, alias table,
//! scripting language and wildcard-expansion UI are all out of scope —
//! consumed here as the collaborator traits in [`collaborators`]. A host
//! application supplies its own implementations to get the full
//! experience; this crate ships no-op/minimal defaults so it is usable
//! standalone.

pub mod ast;
pub mod builtins;
pub mod collaborators;
pub mod driver;
pub mod error;
pub mod executor;
pub mod hooks;
pub mod parser;
pub mod redirect;
pub mod session;
pub mod status;

use std::sync::Arc;

use collaborators::{
    BatchRunner, DefaultBatchRunner, DefaultGlobber, DefaultGuiClassifier, DefaultPathResolver,
    DefaultShellExecutor, GuiClassifier, Globber, PathResolver, ShellExecutor,
};
use error::ShellError;
use hooks::HookSet;
use session::{Cmd, Session, ShellState};

struct ShellInner {
    hooks: HookSet,
    path_resolver: Box<dyn PathResolver>,
    gui_classifier: Box<dyn GuiClassifier>,
    shell_executor: Box<dyn ShellExecutor>,
    batch_runner: Box<dyn BatchRunner>,
    globber: Box<dyn Globber>,
    state: Arc<ShellState>,
    session: Arc<Session>,
    ambient: Cmd,
}

/// The interpreter's public handle. Cheap to clone — every clone shares
/// the same hook registry, collaborators and process-wide state, which
/// is what lets the pipeline driver hand a `Shell` to each stage's
/// worker thread.
#[derive(Clone)]
pub struct Shell {
    inner: Arc<ShellInner>,
}

impl Shell {
    /// Builds a shell with every collaborator at its built-in default
    /// and the minimal builtin table (`cd`, `pwd`, `exit`, `echo`,
    /// `export`, `unset`, `type`) already registered as the first
    /// dispatch hook.
    pub fn new() -> Shell {
        let state = Arc::new(ShellState::new());
        let session = Arc::new(Session::new());
        let hooks = HookSet::new();
        hooks.add_dispatch(builtins::dispatch_hook());

        if std::env::var("SHELL_NOCLOBBER").is_ok() {
            state.set_no_clobber(true);
        }
        if std::env::var("SHELL_GLOB_ALWAYS").is_ok() {
            state.set_wildcard_expansion_always(true);
        }

        Shell {
            inner: Arc::new(ShellInner {
                hooks,
                path_resolver: Box::new(DefaultPathResolver),
                gui_classifier: Box::new(DefaultGuiClassifier),
                shell_executor: Box::new(DefaultShellExecutor),
                batch_runner: Box::new(DefaultBatchRunner),
                globber: Box::new(DefaultGlobber),
                ambient: Cmd::new(session.clone(), state.clone()),
                state,
                session,
            }),
        }
    }

    /// Parses and runs one line of input, applying `&&`/`||`/`;`/`&`
    /// sequencing across the pipelines it contains. Returns the error
    /// level of the last foreground stage and, if something failed, the
    /// error that caused it (already "reported" if it was printed here).
    pub fn interpret(&self, text: &str) -> (i32, Option<ShellError>) {
        let pipelines = match parser::parse(text) {
            Ok(pipelines) => pipelines,
            Err(e) => {
                eprintln!("{e}");
                return (0, Some(e.already_reported()));
            }
        };

        if pipelines.is_empty() {
            return (self.inner.state.last_error_level(), None);
        }

        driver::run_pipelines(self, &pipelines)
    }

    /// A fresh `Cmd` seeded from the shell's ambient streams (normally
    /// all three inherited from the process), ready to be specialized
    /// by the driver for one stage.
    pub fn ambient_cmd(&self) -> Cmd {
        self.inner
            .ambient
            .clone_for_stage()
            .unwrap_or_else(|_| Cmd::new(self.inner.session.clone(), self.inner.state.clone()))
    }

    pub fn hooks(&self) -> &HookSet {
        &self.inner.hooks
    }

    pub fn state(&self) -> &ShellState {
        &self.inner.state
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.inner.session
    }

    pub fn path_resolver(&self) -> &dyn PathResolver {
        self.inner.path_resolver.as_ref()
    }

    pub fn gui_classifier(&self) -> &dyn GuiClassifier {
        self.inner.gui_classifier.as_ref()
    }

    pub fn shell_executor(&self) -> &dyn ShellExecutor {
        self.inner.shell_executor.as_ref()
    }

    pub fn batch_runner(&self) -> &dyn BatchRunner {
        self.inner.batch_runner.as_ref()
    }

    pub fn globber(&self) -> &dyn Globber {
        self.inner.globber.as_ref()
    }
}

impl Default for Shell {
    fn default() -> Self {
        Shell::new()
    }
}

/// Builder-style collaborator overrides, for a host that wants its own
/// path resolver, GUI classifier, shell-execute glue, batch runner or
/// globber in place of the defaults. Hooks are still added after
/// construction via `shell.hooks()`.
pub struct ShellBuilder {
    path_resolver: Box<dyn PathResolver>,
    gui_classifier: Box<dyn GuiClassifier>,
    shell_executor: Box<dyn ShellExecutor>,
    batch_runner: Box<dyn BatchRunner>,
    globber: Box<dyn Globber>,
}

impl ShellBuilder {
    pub fn new() -> ShellBuilder {
        ShellBuilder {
            path_resolver: Box::new(DefaultPathResolver),
            gui_classifier: Box::new(DefaultGuiClassifier),
            shell_executor: Box::new(DefaultShellExecutor),
            batch_runner: Box::new(DefaultBatchRunner),
            globber: Box::new(DefaultGlobber),
        }
    }

    pub fn path_resolver(mut self, resolver: Box<dyn PathResolver>) -> Self {
        self.path_resolver = resolver;
        self
    }

    pub fn gui_classifier(mut self, classifier: Box<dyn GuiClassifier>) -> Self {
        self.gui_classifier = classifier;
        self
    }

    pub fn shell_executor(mut self, executor: Box<dyn ShellExecutor>) -> Self {
        self.shell_executor = executor;
        self
    }

    pub fn batch_runner(mut self, runner: Box<dyn BatchRunner>) -> Self {
        self.batch_runner = runner;
        self
    }

    pub fn globber(mut self, globber: Box<dyn Globber>) -> Self {
        self.globber = globber;
        self
    }

    pub fn build(self) -> Shell {
        let state = Arc::new(ShellState::new());
        let session = Arc::new(Session::new());
        let hooks = HookSet::new();
        hooks.add_dispatch(builtins::dispatch_hook());

        Shell {
            inner: Arc::new(ShellInner {
                hooks,
                path_resolver: self.path_resolver,
                gui_classifier: self.gui_classifier,
                shell_executor: self.shell_executor,
                batch_runner: self.batch_runner,
                globber: self.globber,
                ambient: Cmd::new(session.clone(), state.clone()),
                state,
                session,
            }),
        }
    }
}

impl Default for ShellBuilder {
    fn default() -> Self {
        ShellBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_writes_to_stdout_and_reports_zero() {
        let shell = Shell::new();
        let (code, err) = shell.interpret("echo hello");
        assert_eq!(code, 0);
        assert!(err.is_none());
    }

    #[test]
    fn and_sequencing_skips_on_failure() {
        let shell = Shell::new();
        let (code, _) = shell.interpret("cd /does/not/exist && echo skipped");
        assert_ne!(code, 0);
    }

    #[test]
    fn blank_line_preserves_last_error_level() {
        let shell = Shell::new();
        shell.interpret("cd /does/not/exist");
        let before = shell.state().last_error_level();
        let (code, _) = shell.interpret("");
        assert_eq!(code, before);
    }
}
