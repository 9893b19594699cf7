use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use oleander::{ast, AstCache, lexer::Lexer, parse_source, OleanderError, Repl, Runtime};

#[derive(Parser)]
#[command(author, version, about = "The Oleander scripting language")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run an Oleander script file
    Run {
        script: PathBuf,
        /// Reuse parsed ASTs from this cache directory
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
    /// Evaluate a snippet of source and print its result
    Eval { source: String },
    /// Start an interactive session
    Repl,
    /// Parse a script and print the canonical rendering
    Parse { script: PathBuf },
    /// Lex a script and print its token stream
    Tokenize { script: PathBuf },
}

fn main() -> ExitCode {
    let args = Args::parse();
    match args.command.unwrap_or(Command::Repl) {
        Command::Run { script, cache_dir } => run_script(&script, cache_dir.as_deref()),
        Command::Eval { source } => eval_source(&source),
        Command::Repl => match Repl::new().run() {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("error: {err}");
                ExitCode::FAILURE
            }
        },
        Command::Parse { script } => parse_script(&script),
        Command::Tokenize { script } => tokenize_script(&script),
    }
}

fn run_script(script: &std::path::Path, cache_dir: Option<&std::path::Path>) -> ExitCode {
    let filename = script.display().to_string();
    let source = match fs::read_to_string(script) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error: cannot read `{filename}`: {err}");
            return ExitCode::FAILURE;
        }
    };
    let nodes = match cache_dir {
        Some(dir) => AstCache::new(dir).load_or_parse(&source),
        None => parse_source(&source).map_err(OleanderError::from),
    };
    let nodes = match nodes {
        Ok(nodes) => nodes,
        Err(err) => {
            report(&err, &filename, &source);
            return ExitCode::FAILURE;
        }
    };
    let runtime = Runtime::new();
    match guard(|| runtime.execute(&nodes)) {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err, &filename, &source);
            ExitCode::FAILURE
        }
    }
}

fn eval_source(source: &str) -> ExitCode {
    let runtime = Runtime::new();
    match guard(|| runtime.eval_source(source)) {
        Ok(Some(value)) => {
            println!("{value}");
            ExitCode::SUCCESS
        }
        Ok(None) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err, "eval", source);
            ExitCode::FAILURE
        }
    }
}

fn parse_script(script: &std::path::Path) -> ExitCode {
    let filename = script.display().to_string();
    let source = match fs::read_to_string(script) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error: cannot read `{filename}`: {err}");
            return ExitCode::FAILURE;
        }
    };
    match parse_source(&source) {
        Ok(nodes) => {
            print!("{}", ast::render(&nodes));
            ExitCode::SUCCESS
        }
        Err(diagnostic) => {
            eprintln!("{}", diagnostic.render(&filename, &source));
            ExitCode::FAILURE
        }
    }
}

fn tokenize_script(script: &std::path::Path) -> ExitCode {
    let filename = script.display().to_string();
    let source = match fs::read_to_string(script) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error: cannot read `{filename}`: {err}");
            return ExitCode::FAILURE;
        }
    };
    match Lexer::new(&source).tokenize() {
        Ok(tokens) => {
            for token in tokens {
                println!(
                    "{:>4}..{:<4} {:?} {}",
                    token.span.start, token.span.end, token.kind, token.lexeme
                );
            }
            ExitCode::SUCCESS
        }
        Err(diagnostic) => {
            eprintln!("{}", diagnostic.render(&filename, &source));
            ExitCode::FAILURE
        }
    }
}

/// Safety net around execution: a panic inside the interpreter reports as
/// a fatal error instead of unwinding out of main.
fn guard<T>(body: impl FnOnce() -> oleander::Result<T>) -> oleander::Result<T> {
    panic::catch_unwind(AssertUnwindSafe(body))
        .unwrap_or_else(|_| Err(OleanderError::Fatal("execution panicked".to_string())))
}

fn report(err: &OleanderError, filename: &str, source: &str) {
    match err {
        OleanderError::Diagnostic(diagnostic) => {
            eprintln!("{}", diagnostic.render(filename, source));
        }
        other => eprintln!("error: {other}"),
    }
}
