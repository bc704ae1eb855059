//! `hula repl` -- an interactive prompt. Each submitted construct is
//! compiled in REPL mode (so top-level variable bindings persist across
//! inputs) and its value, if any, is echoed back.

use hulascript_core::{install_stdlib, Instance, Value};
use hulascript_repl::ReplCompleter;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::error::Result;

pub fn run_repl() -> Result<()> {
    let mut instance = Instance::new();
    install_stdlib(&mut instance);

    let mut editor = DefaultEditor::new().map_err(|e| anyhow::anyhow!("failed to start line editor: {e}"))?;
    let mut completer = ReplCompleter::new();

    loop {
        let prompt = if completer_is_fresh(&completer) { "hula> " } else { "...>  " };
        match editor.readline(prompt) {
            Ok(line) => {
                let _ = editor.add_history_entry(line.as_str());
                if let Some(snippet) = completer.write_input(&line) {
                    let snippet = snippet.to_string();
                    completer.reset();
                    match instance.run_checked(&snippet, None, true) {
                        Ok(Value::Nil) => {}
                        Ok(value) => println!("{}", instance.get_value_print_string(value)),
                        Err(e) => eprintln!("error: {e}"),
                    }
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(anyhow::anyhow!("readline error: {e}").into()),
        }
    }
    Ok(())
}

/// A fresh completer has no partial construct pending -- used only to pick
/// the right prompt string, not to drive compilation.
fn completer_is_fresh(completer: &ReplCompleter) -> bool {
    completer.is_empty()
}
