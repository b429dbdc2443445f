//! End-to-end tests against the `pipeshell` binary, exercising the
//! scenarios from spec.md §8 through its `-c` one-shot entrypoint.

use std::io::Write;
use std::process::{Command, Stdio};

fn run_c(line: &str) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_pipeshell"))
        .arg("-c")
        .arg(line)
        .output()
        .expect("spawn pipeshell -c")
}

fn run_repl(lines: &[&str]) -> std::process::Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_pipeshell"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn pipeshell");

    {
        let stdin = child.stdin.as_mut().expect("stdin");
        for line in lines {
            writeln!(stdin, "{line}").expect("write line");
        }
    }

    child.wait_with_output().expect("wait pipeshell")
}

#[test]
fn echo_writes_stdout_and_exits_zero() {
    let out = run_c("echo hello");
    assert!(out.status.success());
    assert_eq!(String::from_utf8_lossy(&out.stdout), "hello\n");
}

#[test]
fn pipe_connects_stdout_to_stdin() {
    let out = run_c("echo hi | cat");
    assert!(out.status.success());
    assert_eq!(String::from_utf8_lossy(&out.stdout), "hi\n");
}

#[test]
fn not_found_reports_once_with_windows_style_message() {
    let out = run_c("nosuchcmd_xyz");
    assert!(!out.status.success());
    assert_eq!(out.status.code(), Some(255));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert_eq!(stderr.matches("is not recognized").count(), 1);
}

#[test]
fn and_then_sequence_skips_after_failure_but_continues_past_semicolon() {
    let out = run_c("false && echo skipped ; echo ran");
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(!stdout.contains("skipped"));
    assert!(stdout.contains("ran"));
}

#[test]
fn or_sequence_runs_only_after_nonzero() {
    let out = run_c("true || echo unreached ; false || echo reached");
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(!stdout.contains("unreached"));
    assert!(stdout.contains("reached"));
}

#[test]
fn noclobber_blocks_overwrite_of_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.txt");
    std::fs::write(&path, "original\n").unwrap();

    let out = Command::new(env!("CARGO_BIN_EXE_pipeshell"))
        .env("SHELL_NOCLOBBER", "1")
        .arg("-c")
        .arg(format!("echo a > {}", path.display()))
        .output()
        .expect("spawn pipeshell");

    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("already exists"));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "original\n");
}

#[test]
fn force_redirect_bypasses_noclobber() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.txt");
    std::fs::write(&path, "original\n").unwrap();

    let out = Command::new(env!("CARGO_BIN_EXE_pipeshell"))
        .env("SHELL_NOCLOBBER", "1")
        .arg("-c")
        .arg(format!("echo replaced >| {}", path.display()))
        .output()
        .expect("spawn pipeshell");

    assert!(out.status.success());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "replaced\n");
}

#[test]
fn background_pipeline_returns_promptly_and_repl_keeps_going() {
    let out = run_repl(&["sleep 2 &", "echo after", "exit"]);
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("after"));
}

#[test]
fn exit_builtin_stops_the_repl_with_requested_code() {
    let out = run_repl(&["exit 7"]);
    assert_eq!(out.status.code(), Some(7));
}

#[test]
fn stderr_redirect_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("err.txt");

    let out = Command::new(env!("CARGO_BIN_EXE_pipeshell"))
        .arg("-c")
        .arg(format!("nosuchcmd_xyz 2> {}", path.display()))
        .output()
        .expect("spawn pipeshell");

    assert!(!out.status.success());
    assert!(out.stderr.is_empty());
    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.contains("is not recognized"));
}

#[test]
fn syntax_error_on_dangling_pipe() {
    let out = run_c("echo hi |");
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("syntax of the command is incorrect"));
}

#[test]
fn cd_and_pwd_builtins_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let canonical = std::fs::canonicalize(dir.path()).unwrap();
    let out = run_c(&format!("cd {} ; pwd", dir.path().display()));
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert_eq!(stdout.trim(), canonical.to_string_lossy());
}
