//! Error handling for the `hula` CLI.
//!
//! CLI-level concerns (a missing script file, and so on) get their own
//! `thiserror` variants; a script's own compilation or runtime failure is
//! already an `anyhow::Error` by the time it reaches here (from
//! `Instance::run_checked`), so it's wrapped rather than re-modeled.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HulaCliError {
    #[error("could not read {path}: {source}")]
    ReadScript { path: String, source: std::io::Error },

    #[error(transparent)]
    Script(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, HulaCliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_script_error_names_the_path() {
        let err = HulaCliError::ReadScript {
            path: "missing.hs".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert!(err.to_string().contains("missing.hs"));
    }

    #[test]
    fn script_error_wraps_anyhow() {
        let err: HulaCliError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, HulaCliError::Script(_)));
    }
}
