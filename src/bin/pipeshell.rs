use std::io::{self, Write};

use pipeshell::Shell;

fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    if let Some(flag) = args.next() {
        if flag == "-c" {
            let command: String = args.collect::<Vec<_>>().join(" ");
            let shell = Shell::new();
            let (code, err) = shell.interpret(&command);
            if let Some(e) = err {
                print_unreported(&e);
            }
            std::process::exit(code);
        }
        eprintln!("pipeshell: unrecognized argument '{flag}'");
        std::process::exit(2);
    }

    run_repl();
}

fn run_repl() {
    ctrlc::set_handler(|| {
        println!();
        let _ = io::stdout().flush();
    })
    .expect("failed to set Ctrl-C handler");

    let shell = Shell::new();
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        let prompt_code = shell.state().last_error_level();
        print!("pipeshell[{prompt_code}]> ");
        if stdout.flush().is_err() {
            break;
        }

        let mut input = String::new();
        match stdin.read_line(&mut input) {
            Ok(0) => {
                println!();
                break;
            }
            Ok(_) => {
                let (code, err) = shell.interpret(input.trim_end_matches(['\n', '\r']));
                if let Some(e) = err {
                    print_unreported(&e);
                }
                if code == pipeshell::status::ErrorLevel::Shutdown.code() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                eprintln!("pipeshell: error reading input: {e}");
                break;
            }
        }
    }

    std::process::exit(shell.state().last_error_level());
}

fn print_unreported(err: &pipeshell::error::ShellError) {
    let mut stderr = io::stderr();
    pipeshell::error::report_once(&mut stderr, err);
}
