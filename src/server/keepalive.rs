//! TCP keep-alive tuning for accepted connections
//!
//! Rebuilds can keep a connection silent for minutes, so dead peers are
//! detected with aggressive keep-alive probes rather than read timeouts.

use serde::{Deserialize, Serialize};
use std::io;
use std::net::TcpStream;

/// Keep-alive probe schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepAlive {
    /// Idle seconds before the first probe
    pub idle_secs: u32,
    /// Seconds between probes
    pub interval_secs: u32,
    /// Unanswered probes before the connection is dropped
    pub probes: u32,
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self {
            idle_secs: 1,
            interval_secs: 3,
            probes: 5,
        }
    }
}

impl KeepAlive {
    /// Enable keep-alive on `stream` with this schedule
    #[cfg(unix)]
    pub fn apply(&self, stream: &TcpStream) -> io::Result<()> {
        use std::os::unix::io::AsRawFd;

        let fd = stream.as_raw_fd();
        set_option(fd, libc::SOL_SOCKET, libc::SO_KEEPALIVE, 1)?;

        #[cfg(any(target_os = "linux", target_os = "android"))]
        set_option(fd, libc::IPPROTO_TCP, libc::TCP_KEEPIDLE, to_c_int(self.idle_secs))?;
        #[cfg(any(target_os = "macos", target_os = "ios"))]
        set_option(fd, libc::IPPROTO_TCP, libc::TCP_KEEPALIVE, to_c_int(self.idle_secs))?;

        #[cfg(any(target_os = "linux", target_os = "android", target_os = "macos", target_os = "ios"))]
        {
            set_option(fd, libc::IPPROTO_TCP, libc::TCP_KEEPINTVL, to_c_int(self.interval_secs))?;
            set_option(fd, libc::IPPROTO_TCP, libc::TCP_KEEPCNT, to_c_int(self.probes))?;
        }

        Ok(())
    }

    #[cfg(not(unix))]
    pub fn apply(&self, _stream: &TcpStream) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "keep-alive tuning is only supported on unix",
        ))
    }
}

#[cfg(unix)]
fn to_c_int(value: u32) -> libc::c_int {
    libc::c_int::try_from(value).unwrap_or(libc::c_int::MAX)
}

#[cfg(unix)]
fn set_option(
    fd: libc::c_int,
    level: libc::c_int,
    name: libc::c_int,
    value: libc::c_int,
) -> io::Result<()> {
    let ret = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &value as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}
