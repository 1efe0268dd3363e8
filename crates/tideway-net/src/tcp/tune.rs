use std::{io, net::TcpStream, os::fd::AsRawFd, time::Duration};

use tracing::{error, warn};

use crate::tcp::DEF_SNDBUF;

#[cfg(target_os = "macos")]
const TCP_KEEPIDLE: libc::c_int = libc::TCP_KEEPALIVE;
#[cfg(not(target_os = "macos"))]
const TCP_KEEPIDLE: libc::c_int = libc::TCP_KEEPIDLE;

/// Socket knobs carried by a persistent endpoint and applied on every
/// (re)connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Tuning {
    /// Tri-state: unset means "use the persist-mode default".
    pub keepalive: Option<bool>,
    /// Zero means "leave the kernel default".
    pub keepidle: u32,
    pub keepintvl: u32,
    pub keepcnt: u32,
    pub sndbuf: usize,
    pub sndtimeo: Option<Duration>,
    pub nodelay: bool,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            keepalive: None,
            keepidle: 0,
            keepintvl: 0,
            keepcnt: 0,
            sndbuf: DEF_SNDBUF,
            sndtimeo: None,
            nodelay: true,
        }
    }
}

impl Tuning {
    /// Applies keepalive and send tuning to a connected socket. The
    /// sub-settings are best effort and only logged on failure; failing
    /// to enable `SO_KEEPALIVE` itself is the one hard error.
    pub(crate) fn apply(&self, stream: &TcpStream, iface: &str) -> io::Result<()> {
        let fd = stream.as_raw_fd();
        if self.keepalive == Some(true) {
            if let Err(err) = set_opt(fd, libc::SOL_SOCKET, libc::SO_KEEPALIVE, 1) {
                error!(iface, ?err, "could not enable keepalives on tcp socket");
                return Err(err);
            }
            if self.keepidle != 0
                && let Err(err) = set_opt(fd, libc::IPPROTO_TCP, TCP_KEEPIDLE, self.keepidle as libc::c_int)
            {
                warn!(iface, ?err, "could not set tcp keepidle");
            }
            if self.keepintvl != 0
                && let Err(err) =
                    set_opt(fd, libc::IPPROTO_TCP, libc::TCP_KEEPINTVL, self.keepintvl as libc::c_int)
            {
                warn!(iface, ?err, "could not set tcp keepintvl");
            }
            if self.keepcnt != 0
                && let Err(err) =
                    set_opt(fd, libc::IPPROTO_TCP, libc::TCP_KEEPCNT, self.keepcnt as libc::c_int)
            {
                warn!(iface, ?err, "could not set tcp keepcnt");
            }
        }
        if let Some(timeo) = self.sndtimeo {
            // A send timeout without room to buffer behind it is useless,
            // so the two travel together.
            if let Err(err) = set_sndtimeo(fd, timeo) {
                warn!(iface, ?err, "could not set tcp send timeout");
            }
            if let Err(err) = set_opt(fd, libc::SOL_SOCKET, libc::SO_SNDBUF, self.sndbuf as libc::c_int) {
                warn!(iface, ?err, "could not set tcp send buffer");
            }
        }
        Ok(())
    }
}

fn set_opt(fd: i32, level: libc::c_int, opt: libc::c_int, value: libc::c_int) -> io::Result<()> {
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            opt,
            &value as *const _ as *const libc::c_void,
            core::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc == 0 { Ok(()) } else { Err(io::Error::last_os_error()) }
}

fn set_sndtimeo(fd: i32, timeo: Duration) -> io::Result<()> {
    let tv = libc::timeval {
        tv_sec: timeo.as_secs() as libc::time_t,
        tv_usec: timeo.subsec_micros() as libc::suseconds_t,
    };
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_SNDTIMEO,
            &tv as *const _ as *const libc::c_void,
            core::mem::size_of::<libc::timeval>() as libc::socklen_t,
        )
    };
    if rc == 0 { Ok(()) } else { Err(io::Error::last_os_error()) }
}

#[cfg(test)]
mod tests {
    use std::net::{TcpListener, TcpStream};

    use super::*;

    fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let a = TcpStream::connect(addr).unwrap();
        let (b, _) = listener.accept().unwrap();
        (a, b)
    }

    #[test]
    fn full_tuning_applies() {
        let (a, _b) = connected_pair();
        let tuning = Tuning {
            keepalive: Some(true),
            keepidle: 30,
            keepintvl: 10,
            keepcnt: 4,
            sndbuf: 4096,
            sndtimeo: Some(Duration::from_secs(5)),
            nodelay: true,
        };
        tuning.apply(&a, "test").unwrap();
    }

    #[test]
    fn keepalive_off_leaves_socket_alone() {
        let (a, _b) = connected_pair();
        Tuning { keepalive: Some(false), ..Tuning::default() }.apply(&a, "test").unwrap();
    }
}
