//! Command-line entry point.
//!
//! `schemelet [options] [script]` runs a script file, or the piped
//! standard input, through the interpreter. With no script and a
//! terminal on stdin it starts an interactive line-edited REPL instead.

use std::cell::RefCell;
use std::io::{self, IsTerminal, Read, Write};
use std::process;
use std::rc::Rc;
use std::time::Duration;

use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use schemelet::interpreter::{Interpreter, OutputSink};
use schemelet::scheme::Parser;
use schemelet::value::Value;

const USAGE: &str = "usage: schemelet [options] [script]

options:
  -t, --timeout <seconds>   abandon any top-level form running longer
                            than this (0 disables the limit, default)
  -h, --help                show this help
";

struct Options {
    timeout: Duration,
    script: Option<String>,
}

fn parse_args() -> Result<Options, String> {
    let mut timeout = Duration::ZERO;
    let mut script = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-t" | "--timeout" => {
                let text = args
                    .next()
                    .ok_or_else(|| "--timeout needs a value in seconds".to_owned())?;
                let seconds: f64 = text
                    .parse()
                    .map_err(|_| format!("invalid timeout value: {text}"))?;
                if seconds < 0.0 || seconds.is_nan() {
                    return Err(format!("invalid timeout value: {text}"));
                }
                timeout = Duration::from_secs_f64(seconds);
            }
            "-h" | "--help" => {
                print!("{USAGE}");
                process::exit(0);
            }
            _ if arg.starts_with('-') && arg.len() > 1 => {
                return Err(format!("unknown option: {arg}"));
            }
            _ if script.is_none() => script = Some(arg),
            _ => return Err("only one script may be given".to_owned()),
        }
    }

    Ok(Options { timeout, script })
}

fn stdout_sink() -> OutputSink {
    Rc::new(RefCell::new(io::stdout()))
}

fn run_source(source: &str, timeout: Duration) {
    let interpreter = Interpreter::new(Parser::from_source(source), stdout_sink(), timeout);
    interpreter.read_loop();
}

fn main() {
    let options = match parse_args() {
        Ok(options) => options,
        Err(message) => {
            eprintln!("{message}");
            eprint!("{USAGE}");
            process::exit(2);
        }
    };

    match options.script {
        Some(path) => match std::fs::read_to_string(&path) {
            Ok(source) => run_source(&source, options.timeout),
            Err(e) => {
                eprintln!("could not read {path}: {e}");
                process::exit(1);
            }
        },
        None if io::stdin().is_terminal() => run_repl(options.timeout),
        None => {
            let mut source = String::new();
            if let Err(e) = io::stdin().read_to_string(&mut source) {
                eprintln!("could not read standard input: {e}");
                process::exit(1);
            }
            run_source(&source, options.timeout);
        }
    }
}

enum Command {
    NotACommand,
    Handled,
    Quit,
}

fn run_repl(timeout: Duration) {
    println!("Schemelet interactive interpreter");
    println!("Enter forms like: (+ 1 2)");
    println!("Type :help for commands, or Ctrl+C to exit.");
    println!();

    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("could not initialize line editor: {e}");
            process::exit(1);
        }
    };

    let interpreter = Interpreter::new(Parser::new(), stdout_sink(), timeout);
    let mut pending = false;

    loop {
        let prompt = if pending { "  " } else { "> " };
        match editor.readline(prompt) {
            Ok(line) => {
                if line.trim().is_empty() && !pending {
                    continue;
                }
                let _ = editor.add_history_entry(line.as_str());

                if !pending {
                    match handle_command(&interpreter, line.trim()) {
                        Command::Handled => continue,
                        Command::Quit => {
                            println!("Goodbye!");
                            break;
                        }
                        Command::NotACommand => {}
                    }
                }

                interpreter.feed(&line);
                interpreter.feed("\n");
                pending = interpreter.pump();
            }
            Err(ReadlineError::Eof | ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(e) => {
                println!("Error: {e:?}");
                break;
            }
        }
    }
}

fn handle_command(interpreter: &Interpreter, line: &str) -> Command {
    match line {
        ":help" => {
            print_help();
            Command::Handled
        }
        ":env" => {
            print_environment(interpreter);
            Command::Handled
        }
        ":quit" | ":exit" => Command::Quit,
        _ => Command::NotACommand,
    }
}

fn print_help() {
    println!("Commands:");
    println!("  :help      - show this help message");
    println!("  :env       - show current global bindings");
    println!("  :quit      - exit the interpreter");
    println!("  :exit      - exit the interpreter");
    println!("  Ctrl+C     - exit the interpreter");
    println!();
    println!("Anything else is read as Scheme forms, for example:");
    println!("  (define (double x) (* x 2))");
    println!("  (double 21)");
    println!("  (define-syntax when (syntax-rules () ((_ p b1 ...) (if p (begin b1 ...)))))");
    println!();
}

fn print_environment(interpreter: &Interpreter) {
    let bindings = interpreter.global_env().bindings_snapshot();

    let mut builtins = Vec::new();
    let mut user_defined = Vec::new();
    for (name, value) in bindings {
        match value {
            Value::Builtin(_) => builtins.push(name),
            other => user_defined.push((name, other)),
        }
    }

    if !builtins.is_empty() {
        println!("Built-in functions ({}):", builtins.len());
        let mut col = 0;
        for name in builtins {
            print!("  {name:<15}");
            col += 1;
            if col % 4 == 0 {
                println!();
            }
        }
        if col % 4 != 0 {
            println!();
        }
        println!();
    }

    if user_defined.is_empty() {
        println!("No user-defined values.");
    } else {
        println!("User-defined values ({}):", user_defined.len());
        for (name, value) in user_defined {
            println!("  {name} = {value}");
        }
    }
    let _ = io::stdout().flush();
}
