//! Supervisor error taxonomy. Launch failures are the only errors surfaced
//! to callers; everything mid-session degrades to a logged event instead.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("server launch command is empty")]
    EmptyCommand,

    #[error("server is already running")]
    AlreadyRunning,

    #[error("failed to spawn server process: {0}")]
    Spawn(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_strings() {
        assert_eq!(SupervisorError::EmptyCommand.to_string(), "server launch command is empty");
        assert_eq!(SupervisorError::AlreadyRunning.to_string(), "server is already running");
        let err = SupervisorError::from(std::io::Error::new(std::io::ErrorKind::NotFound, "no shell"));
        assert!(err.to_string().contains("failed to spawn server process"));
    }
}
