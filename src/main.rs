mod ast;
mod builtins;
mod bytecode;
mod compiler;
mod config;
mod env;
mod error;
mod eval;
mod highlighter;
mod lexer;
mod module;
mod parser;
mod token;
mod value;
mod vm;

use clap::{Parser, Subcommand};
use compiler::compile_program;
use config::{DEFAULT_RECURSION_LIMIT, HELP_TEXT, HISTORY_FILE, WELCOME_MESSAGE, WELCOME_SUBTITLE};
use error::{LoadError, PyRafError};
use eval::Evaluator;
use highlighter::PyRafHelper;
use module::read_source;
use parser::parse;
use rustyline::error::ReadlineError;
use rustyline::{Config, Editor};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use value::Value;
use vm::Vm;

/// PyRaf: a small dynamically-typed scripting language
#[derive(Parser, Debug)]
#[command(name = "pyraf")]
#[command(version = config::VERSION)]
#[command(about = "Lexer, Pratt parser, tree-walking evaluator and bytecode VM for PyRaf")]
struct CliArgs {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Lex, parse and run a script
    Run {
        /// Script file to execute
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Execute on the bytecode VM instead of the tree-walking evaluator
        #[arg(long)]
        vm: bool,

        /// Override the recursion depth limit
        #[arg(long = "max-depth", value_name = "N", default_value_t = DEFAULT_RECURSION_LIMIT)]
        max_depth: usize,
    },
    /// Lex, parse, compile and print disassembly
    Dis {
        /// Script file to disassemble
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
    /// Start an interactive read-eval-print loop
    Repl {
        /// Evaluate each line on the bytecode VM instead of the evaluator
        #[arg(long)]
        vm: bool,

        /// Override the recursion depth limit
        #[arg(long = "max-depth", value_name = "N", default_value_t = DEFAULT_RECURSION_LIMIT)]
        max_depth: usize,
    },
}

fn main() -> ExitCode {
    let args = CliArgs::parse();

    let result = match args.command {
        Command::Run { path, vm, max_depth } => run_file(&path, vm, max_depth),
        Command::Dis { path } => disassemble_file(&path),
        Command::Repl { vm, max_depth } => {
            run_repl(vm, max_depth);
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{}", message);
            ExitCode::FAILURE
        }
    }
}

fn run_file(path: &Path, use_vm: bool, max_depth: usize) -> Result<(), String> {
    let source = read_source(path).map_err(|e| load_error_message(path, e))?;
    let program = parse(&source).map_err(|e| format!("ParseError: {}", e))?;
    let base_dir = base_dir_of(path);

    if use_vm {
        let chunk = std::rc::Rc::new(compile_program(&program));
        let mut vm = Vm::new(base_dir, max_depth);
        vm.run(chunk)
            .map_err(|e| runtime_error_message(path, &e))?;
    } else {
        let mut evaluator = Evaluator::new(base_dir, max_depth);
        evaluator
            .run(&program)
            .map_err(|e| runtime_error_message(path, &e))?;
    }
    Ok(())
}

fn disassemble_file(path: &Path) -> Result<(), String> {
    let source = read_source(path).map_err(|e| load_error_message(path, e))?;
    let program = parse(&source).map_err(|e| format!("ParseError: {}", e))?;
    let chunk = compile_program(&program);
    print!("{}", chunk.disassemble("main"));
    Ok(())
}

fn run_repl(use_vm: bool, max_depth: usize) {
    let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let mut evaluator = Evaluator::new(base_dir.clone(), max_depth);
    let mut vm = Vm::new(base_dir, max_depth);

    let rl_config = Config::builder().auto_add_history(true).build();
    let mut rl = match Editor::with_config(rl_config) {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("Failed to initialize REPL: {}", e);
            return;
        }
    };
    rl.set_helper(Some(PyRafHelper::new()));
    let _ = rl.load_history(HISTORY_FILE);

    println!("{}", WELCOME_MESSAGE);
    println!("{}", WELCOME_SUBTITLE);

    loop {
        let readline = rl.readline("pyraf> ");
        match readline {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match trimmed {
                    ":quit" | ":exit" => break,
                    ":clear" => {
                        print!("\x1B[2J\x1B[H");
                        continue;
                    }
                    ":help" => {
                        println!("{}", HELP_TEXT);
                        continue;
                    }
                    _ => {}
                }

                match parse(&line) {
                    Ok(program) => {
                        let outcome = if use_vm {
                            run_repl_stmts_vm(&mut vm, &program)
                        } else {
                            run_repl_stmts_eval(&mut evaluator, &program)
                        };
                        if let Err(e) = outcome {
                            eprintln!("{}: {}", e.kind.label(), e.kind);
                        }
                    }
                    Err(e) => eprintln!("ParseError: {}", e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("{}", err);
                break;
            }
        }
    }

    let _ = rl.save_history(HISTORY_FILE);
}

/// Evaluates each statement and echoes non-nil expression-statement results
/// (but not assignments, which parse as `Stmt::Expr(Expr::Assign, _)`),
/// matching the REPL convention of printing `=> <value>` for bare expressions.
fn run_repl_stmts_eval(evaluator: &mut Evaluator, program: &[ast::Stmt]) -> Result<(), PyRafError> {
    for stmt in program {
        match stmt {
            ast::Stmt::Expr(expr, _) if !matches!(expr, ast::Expr::Assign { .. }) => {
                let value = evaluator.eval_top_expr(expr)?;
                echo_if_not_nil(&value);
            }
            other => {
                evaluator.run(std::slice::from_ref(other))?;
            }
        }
    }
    Ok(())
}

fn run_repl_stmts_vm(vm: &mut Vm, program: &[ast::Stmt]) -> Result<(), PyRafError> {
    for stmt in program {
        match stmt {
            ast::Stmt::Expr(expr, _) if !matches!(expr, ast::Expr::Assign { .. }) => {
                let chunk = std::rc::Rc::new(compiler::compile_standalone_expr(expr));
                let value = vm.run_for_value(chunk)?;
                echo_if_not_nil(&value);
            }
            other => {
                let chunk = std::rc::Rc::new(compile_program(std::slice::from_ref(other)));
                vm.run(chunk)?;
            }
        }
    }
    Ok(())
}

fn echo_if_not_nil(value: &Value) {
    if !matches!(value, Value::Nil) {
        println!("=> {}", value);
    }
}

fn base_dir_of(path: &Path) -> PathBuf {
    path.parent()
        .map(Path::to_path_buf)
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from("."))
}

fn load_error_message(path: &Path, e: LoadError) -> String {
    format!("could not read '{}': {}", path.display(), e)
}

fn runtime_error_message(path: &Path, e: &PyRafError) -> String {
    e.render(&path.display().to_string())
}
