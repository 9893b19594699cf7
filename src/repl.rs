use rustyline::{DefaultEditor, error::ReadlineError};

use crate::{
    diagnostics::{OleanderError, Result},
    parser::parse_source,
    runtime::Runtime,
    scope::{Scope, ScopeKind, ScopeRef},
};

/// Interactive session. Every line executes into one persistent File
/// scope, so bindings and namespaces carry over between entries.
pub struct Repl {
    runtime: Runtime,
    scope: ScopeRef,
}

impl Repl {
    pub fn new() -> Self {
        let runtime = Runtime::new();
        let scope = Scope::child(&runtime.globals(), "repl", ScopeKind::File);
        Self { runtime, scope }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut editor = DefaultEditor::new()
            .map_err(|err| OleanderError::from(std::io::Error::other(err)))?;
        loop {
            match editor.readline(">> ") {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed == ":quit" || trimmed == ":exit" {
                        break;
                    }
                    if trimmed.is_empty() {
                        continue;
                    }
                    editor.add_history_entry(trimmed).ok();
                    let result = parse_source(trimmed)
                        .map_err(OleanderError::from)
                        .and_then(|nodes| self.runtime.execute_in(&self.scope, &nodes));
                    match result {
                        Ok(Some(value)) => println!("{value}"),
                        Ok(None) => {}
                        Err(OleanderError::Diagnostic(diagnostic)) => {
                            eprintln!("{}", diagnostic.render("repl", trimmed));
                        }
                        Err(other) => eprintln!("error: {other}"),
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(err) => {
                    return Err(OleanderError::from(std::io::Error::other(err)));
                }
            }
        }
        Ok(())
    }
}

impl Default for Repl {
    fn default() -> Self {
        Self::new()
    }
}
