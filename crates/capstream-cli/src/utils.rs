// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use capstream::fourcc::FourCC;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use signal_hook::consts::SIGINT;
use signal_hook::flag;
use std::os::fd::BorrowedFd;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Readiness wait before a dequeue, in milliseconds
pub const POLL_TIMEOUT_MS: u16 = 1000;

/// Parse resolution string in format "WxH" or "W*H"
pub fn parse_resolution(s: &str) -> Result<(u32, u32), CliError> {
    let (width_str, height_str) = s
        .split_once('x')
        .or_else(|| s.split_once('*'))
        .ok_or_else(|| {
            CliError::InvalidArgs(format!(
                "Invalid resolution format (expected WxH or W*H): {}",
                s
            ))
        })?;

    let width = width_str
        .parse::<u32>()
        .map_err(|_| CliError::InvalidArgs(format!("Invalid width in resolution: {}", s)))?;
    let height = height_str
        .parse::<u32>()
        .map_err(|_| CliError::InvalidArgs(format!("Invalid height in resolution: {}", s)))?;

    if width == 0 || height == 0 {
        return Err(CliError::InvalidArgs(format!(
            "Resolution dimensions must be positive: {}",
            s
        )));
    }

    Ok((width, height))
}

/// Parse a pixel or codec FOURCC such as "YUYV" or "H264"
pub fn parse_fourcc(s: &str) -> Result<FourCC, CliError> {
    s.parse::<FourCC>().map_err(CliError::InvalidArgs)
}

/// Install signal handler for graceful shutdown on Ctrl+C
///
/// Returns an Arc<AtomicBool> that will be set to true when SIGINT is received.
pub fn install_signal_handler() -> Result<Arc<AtomicBool>, CliError> {
    let term = Arc::new(AtomicBool::new(false));

    flag::register(SIGINT, Arc::clone(&term))
        .map_err(|e| CliError::General(format!("Failed to register signal handler: {}", e)))?;

    log::debug!("Installed SIGINT handler");
    Ok(term)
}

/// Wait until one of `fds` is ready
///
/// Returns the revents of each entry, or `None` when interrupted by a
/// signal. A timeout is an error.
pub fn wait_ready(fds: &[(BorrowedFd<'_>, PollFlags)]) -> Result<Option<Vec<PollFlags>>, CliError> {
    let mut pollfds: Vec<PollFd> = fds
        .iter()
        .map(|(fd, events)| PollFd::new(*fd, *events))
        .collect();

    match poll(&mut pollfds, PollTimeout::from(POLL_TIMEOUT_MS)) {
        Ok(0) => Err(CliError::Timeout(format!(
            "no buffer ready within {} ms",
            POLL_TIMEOUT_MS
        ))),
        Ok(_) => Ok(Some(
            pollfds
                .iter()
                .map(|p| p.revents().unwrap_or(PollFlags::empty()))
                .collect(),
        )),
        Err(Errno::EINTR) => Ok(None),
        Err(e) => Err(CliError::General(format!("poll failed: {}", e))),
    }
}

/// Whether `count` is still below `limit`, zero meaning unlimited
pub fn below_limit(count: u64, limit: u64) -> bool {
    limit == 0 || count < limit
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::AsFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_parse_resolution_valid() {
        assert_eq!(parse_resolution("1920x1080").unwrap(), (1920, 1080));
        assert_eq!(parse_resolution("1280x720").unwrap(), (1280, 720));
        assert_eq!(parse_resolution("640x480").unwrap(), (640, 480));
        assert_eq!(parse_resolution("1920*1080").unwrap(), (1920, 1080));
    }

    #[test]
    fn test_parse_resolution_invalid() {
        assert!(parse_resolution("1920").is_err());
        assert!(parse_resolution("1920x").is_err());
        assert!(parse_resolution("x1080").is_err());
        assert!(parse_resolution("1920x1080x60").is_err());
        assert!(parse_resolution("widthxheight").is_err());
        assert!(parse_resolution("0x0").is_err());
        assert!(parse_resolution("-1920x1080").is_err());
    }

    #[test]
    fn test_parse_fourcc() {
        assert_eq!(parse_fourcc("YUYV").unwrap(), FourCC::YUYV);
        assert_eq!(parse_fourcc("M420").unwrap(), FourCC::M420);
        assert_eq!(parse_fourcc("H264").unwrap().as_u32(), 0x3436_3248);
        assert!(parse_fourcc("").is_err());
        assert!(parse_fourcc("YUYVV").is_err());
    }

    #[test]
    fn test_wait_ready_times_out() {
        let (idle, _peer) = UnixStream::pair().unwrap();
        let err = wait_ready(&[(idle.as_fd(), PollFlags::POLLIN)]).unwrap_err();
        assert!(matches!(err, CliError::Timeout(_)));
        assert_eq!(err.exit_code(), std::process::ExitCode::from(6));
    }

    #[test]
    fn test_wait_ready_reports_events() {
        let (reader, mut writer) = UnixStream::pair().unwrap();
        writer.write_all(b"x").unwrap();
        let revents = wait_ready(&[(reader.as_fd(), PollFlags::POLLIN)])
            .unwrap()
            .unwrap();
        assert!(revents[0].contains(PollFlags::POLLIN));
    }

    #[test]
    fn test_below_limit() {
        assert!(below_limit(1_000_000, 0));
        assert!(below_limit(9, 10));
        assert!(!below_limit(10, 10));
    }
}
