//! `hula run <FILE>` -- compile and execute a script file once, printing
//! its result value if running it produced one.

use std::path::PathBuf;

use hulascript_core::{install_stdlib, Instance, Value};

use crate::error::{HulaCliError, Result};

pub struct RunArgs {
    pub path: PathBuf,
}

pub fn run_file(args: RunArgs) -> Result<()> {
    let source = std::fs::read_to_string(&args.path).map_err(|source| HulaCliError::ReadScript {
        path: args.path.display().to_string(),
        source,
    })?;

    let file_name = args.path.to_str().map(str::to_string);
    let mut instance = Instance::new();
    install_stdlib(&mut instance);

    let value = instance.run_checked(&source, file_name, false)?;
    if !matches!(value, Value::Nil) {
        println!("{}", instance.get_value_print_string(value));
    }
    Ok(())
}
