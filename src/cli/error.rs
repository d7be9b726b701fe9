use miette::Diagnostic;
use thiserror::Error;

use crate::orchestrator::OrchestratorError;
use crate::peer::PubSubError;

#[derive(Error, Diagnostic, Debug)]
pub enum CliError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Startup(#[from] OrchestratorError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Bus(#[from] PubSubError),

    #[error("Failed to listen for Ctrl-C")]
    #[diagnostic(code(gitsync::cli::signal))]
    Signal {
        #[source]
        source: std::io::Error,
    },
}

pub type CliResult<T> = Result<T, CliError>;
