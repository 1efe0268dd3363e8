use std::{
    ffi::{CStr, CString},
    mem,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV6},
    ptr,
};

use thiserror::Error;

use crate::tcp::DEFAULT_PORT;

/// A failed name lookup, keeping the resolver code so callers can decide
/// between retrying and giving up.
#[derive(Debug, Error)]
#[error("{reason}")]
pub(crate) struct ResolveError {
    pub code: i32,
    pub reason: String,
}

impl ResolveError {
    /// Worth retrying after a delay: the name or service may appear, the
    /// resolver may recover. Anything else is structural and must not
    /// spin.
    pub fn transient(&self) -> bool {
        matches!(self.code, libc::EAI_NONAME | libc::EAI_SERVICE | libc::EAI_AGAIN | libc::EAI_FAIL)
    }

    /// The narrower set that lets an instant-persist init defer its
    /// first connect instead of failing.
    pub fn deferrable(&self) -> bool {
        matches!(self.code, libc::EAI_AGAIN | libc::EAI_FAIL)
    }
}

/// Stream-socket name resolution. `host = None` with `passive` resolves
/// the wildcard address for binding.
pub(crate) fn resolve(
    host: Option<&str>,
    port: &str,
    passive: bool,
) -> Result<Vec<SocketAddr>, ResolveError> {
    let bad_input = |what: &str| ResolveError { code: libc::EAI_NONAME, reason: what.to_owned() };
    let chost = match host {
        Some(h) => Some(CString::new(h).map_err(|_| bad_input("NUL byte in host"))?),
        None => None,
    };
    let cport = CString::new(port).map_err(|_| bad_input("NUL byte in service"))?;

    let mut hints: libc::addrinfo = unsafe { mem::zeroed() };
    hints.ai_family = libc::AF_UNSPEC;
    hints.ai_socktype = libc::SOCK_STREAM;
    if passive {
        hints.ai_flags = libc::AI_PASSIVE;
    }

    let mut res: *mut libc::addrinfo = ptr::null_mut();
    let rc = unsafe {
        libc::getaddrinfo(
            chost.as_ref().map_or(ptr::null(), |h| h.as_ptr()),
            cport.as_ptr(),
            &hints,
            &mut res,
        )
    };
    if rc != 0 {
        let reason =
            unsafe { CStr::from_ptr(libc::gai_strerror(rc)) }.to_string_lossy().into_owned();
        return Err(ResolveError { code: rc, reason });
    }

    let mut addrs = Vec::new();
    let mut cur = res;
    while !cur.is_null() {
        let ai = unsafe { &*cur };
        if let Some(addr) = unsafe { sockaddr_to_addr(ai.ai_addr) } {
            addrs.push(addr);
        }
        cur = ai.ai_next;
    }
    unsafe { libc::freeaddrinfo(res) };
    Ok(addrs)
}

unsafe fn sockaddr_to_addr(sa: *const libc::sockaddr) -> Option<SocketAddr> {
    if sa.is_null() {
        return None;
    }
    match i32::from(unsafe { (*sa).sa_family }) {
        libc::AF_INET => {
            let v4 = unsafe { &*(sa as *const libc::sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(v4.sin_addr.s_addr));
            Some(SocketAddr::from((ip, u16::from_be(v4.sin_port))))
        }
        libc::AF_INET6 => {
            let v6 = unsafe { &*(sa as *const libc::sockaddr_in6) };
            let ip = Ipv6Addr::from(v6.sin6_addr.s6_addr);
            Some(SocketAddr::V6(SocketAddrV6::new(
                ip,
                u16::from_be(v6.sin6_port),
                v6.sin6_flowinfo,
                v6.sin6_scope_id,
            )))
        }
        _ => None,
    }
}

/// Default service: the IANA `nmea-0183` name when the resolver knows
/// it, otherwise the numeric fallback.
pub(crate) fn default_port() -> String {
    let known = unsafe { !libc::getservbyname(c"nmea-0183".as_ptr(), c"tcp".as_ptr()).is_null() };
    if known { "nmea-0183".to_owned() } else { DEFAULT_PORT.to_owned() }
}
