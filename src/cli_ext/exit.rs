//! CLI error taxonomy and exit-code mapping.
//!
//! 0 success, 2 some edit blocks skipped, 3 invalid input, 5 internal.
//! Errors without a typed cause exit with 1.

/// Domain-specific error taxonomy for exit-code mapping
#[derive(thiserror::Error, Debug, Clone)]
pub enum CliError
{
    /// Unusable or malformed input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Some edit blocks were not applied
    #[error("{skipped} of {total} edit blocks skipped")]
    Skipped
    {
        skipped: usize, total: usize
    },

    /// Internal failures or unexpected bugs
    #[error("internal error: {0}")]
    Internal(String),
}

pub fn exit_code_for(e: &anyhow::Error) -> i32
{
    match e.downcast_ref::<CliError>()
    {
        Some(CliError::Skipped { .. }) => 2,
        Some(CliError::InvalidInput(_)) => 3,
        Some(CliError::Internal(_)) => 5,
        None => 1,
    }
}

/// Convert Result<()> to exit codes for the CLI harness
pub fn finish_with_exit(result: anyhow::Result<()>) -> !
{
    match result
    {
        Ok(()) => std::process::exit(0),
        Err(e) =>
        {
            eprintln!("Error: {e:#}");
            std::process::exit(exit_code_for(&e));
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn typed_errors_map_to_codes()
    {
        let skipped: anyhow::Error = CliError::Skipped { skipped: 1, total: 3 }.into();
        let invalid: anyhow::Error = CliError::InvalidInput("empty".into()).into();
        let internal: anyhow::Error = CliError::Internal("boom".into()).into();
        let other = anyhow::anyhow!("plain");

        assert_eq!(exit_code_for(&skipped), 2);
        assert_eq!(exit_code_for(&invalid), 3);
        assert_eq!(exit_code_for(&internal), 5);
        assert_eq!(exit_code_for(&other), 1);
    }

    #[test]
    fn context_keeps_the_typed_cause()
    {
        use anyhow::Context;

        let res: anyhow::Result<()> = Err(CliError::InvalidInput("bad".into())).context("reading edits");
        assert_eq!(exit_code_for(&res.unwrap_err()), 3);
    }
}
