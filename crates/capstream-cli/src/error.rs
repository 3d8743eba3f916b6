// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use std::fmt;
use std::process::ExitCode;

/// CLI-specific error type with exit code mapping
#[derive(Debug)]
pub enum CliError {
    /// Invalid command-line arguments
    InvalidArgs(String),
    /// Device node missing or not accessible
    DeviceNotFound(String),
    /// Device lacks a capability or rejected the negotiated settings
    DeviceUnsuitable(String),
    /// Operation timed out
    Timeout(String),
    /// General error from the capstream library
    General(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::InvalidArgs(msg) => write!(f, "Invalid arguments: {}", msg),
            CliError::DeviceNotFound(msg) => write!(f, "Device not found: {}", msg),
            CliError::DeviceUnsuitable(msg) => write!(f, "Device unsuitable: {}", msg),
            CliError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            CliError::General(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for CliError {}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> ExitCode {
        match self {
            CliError::InvalidArgs(_) => ExitCode::from(2),
            CliError::DeviceNotFound(_) => ExitCode::from(3),
            CliError::DeviceUnsuitable(_) => ExitCode::from(4),
            CliError::Timeout(_) => ExitCode::from(6),
            CliError::General(_) => ExitCode::from(1),
        }
    }
}

/// Map capstream::Error to CliError with appropriate exit codes
impl From<capstream::Error> for CliError {
    fn from(err: capstream::Error) -> Self {
        use capstream::{Error, ErrorKind};

        match &err {
            Error::Open { source, .. } => match source.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    CliError::DeviceNotFound(err.to_string())
                }
                _ => CliError::General(err.to_string()),
            },
            Error::NotCharDevice(_) => CliError::DeviceNotFound(err.to_string()),
            _ => match err.kind() {
                ErrorKind::Capability | ErrorKind::Protocol => {
                    CliError::DeviceUnsuitable(err.to_string())
                }
                ErrorKind::Io | ErrorKind::Precondition => CliError::General(err.to_string()),
            },
        }
    }
}

/// Helper function to convert result to exit code
pub fn result_to_exit_code<T>(result: Result<T, CliError>) -> ExitCode {
    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            e.exit_code()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capstream::v4l2::{BufferDirection, Capabilities};
    use std::io;
    use std::path::PathBuf;

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            CliError::InvalidArgs("test".into()).exit_code(),
            ExitCode::from(2)
        );
        assert_eq!(
            CliError::DeviceNotFound("test".into()).exit_code(),
            ExitCode::from(3)
        );
        assert_eq!(
            CliError::DeviceUnsuitable("test".into()).exit_code(),
            ExitCode::from(4)
        );
        assert_eq!(
            CliError::Timeout("test".into()).exit_code(),
            ExitCode::from(6)
        );
        assert_eq!(
            CliError::General("test".into()).exit_code(),
            ExitCode::from(1)
        );
    }

    #[test]
    fn test_library_error_mapping() {
        let err: CliError = capstream::Error::Open {
            path: PathBuf::from("/dev/video42"),
            source: io::Error::from(io::ErrorKind::NotFound),
        }
        .into();
        assert!(matches!(err, CliError::DeviceNotFound(_)));

        let err: CliError = capstream::Error::CapabilityMismatch {
            device: "/dev/video0".to_string(),
            missing: Capabilities::STREAMING,
            forbidden: Capabilities::empty(),
        }
        .into();
        assert!(matches!(err, CliError::DeviceUnsuitable(_)));

        let err: CliError = capstream::Error::CountMismatch {
            direction: BufferDirection::Capture,
            requested: 8,
            granted: 3,
        }
        .into();
        assert!(matches!(err, CliError::DeviceUnsuitable(_)));

        let err: CliError = capstream::Error::Dequeue {
            direction: BufferDirection::Capture,
            source: io::Error::from_raw_os_error(5),
        }
        .into();
        assert!(matches!(err, CliError::General(_)));
    }

    #[test]
    fn test_error_display() {
        let err = CliError::DeviceNotFound("/dev/video0".to_string());
        assert_eq!(format!("{}", err), "Device not found: /dev/video0");
    }
}
