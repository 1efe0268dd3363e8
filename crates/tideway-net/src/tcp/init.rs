use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use socket2::{Domain, SockAddr, Socket, Type};
use strum::EnumString;
use tideway_core::{Direction, IfFlags, Iface, Options, SentenceQueue};
use tracing::{debug, warn};

use crate::tcp::{
    DEF_KEEPCNT, DEF_KEEPIDLE, DEF_KEEPINTVL, DEF_RETRY, DEF_SNDTIMEO, GPSD_PORT, Role, TcpIface,
    TcpIo,
    connect::connect_candidates,
    error::TcpError,
    preamble::Preamble,
    resolve::{default_port, resolve},
    shared::{Link, Shared},
    tune::Tuning,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum Mode {
    #[default]
    Client,
    Server,
}

/// The enumerated options of a TCP interface, validated and with
/// persist-mode defaults applied.
#[derive(Debug)]
pub struct TcpSettings {
    pub mode: Mode,
    pub host: Option<String>,
    pub port: String,
    pub retry: Duration,
    pub(crate) tuning: Tuning,
    pub(crate) preamble: Option<Preamble>,
}

impl TcpSettings {
    pub fn preamble_bytes(&self) -> Option<&[u8]> {
        self.preamble.as_ref().map(Preamble::as_bytes)
    }

    pub fn from_options(ifa: &Iface, opts: &Options) -> Result<Self, TcpError> {
        let persist = ifa.persist();
        let mut mode = Mode::Client;
        let mut host = None;
        let mut port: Option<String> = None;
        let mut retry = DEF_RETRY;
        let mut keepalive = None;
        let mut keepidle = 0;
        let mut keepintvl = 0;
        let mut keepcnt = 0;
        let mut sndbuf = None;
        let mut timeout = None;
        let mut nodelay = true;
        let mut gpsd = false;
        let mut preamble: Option<Preamble> = None;

        let persist_only = |key: &str| -> Result<(), TcpError> {
            if persist {
                Ok(())
            } else {
                Err(TcpError::InvalidOption(format!("{key} only valid with persist option")))
            }
        };
        let sending_only = |key: &str| -> Result<(), TcpError> {
            if ifa.direction == Direction::In {
                Err(TcpError::InvalidOption(format!(
                    "{key} option is for sending tcp data only (not receiving)"
                )))
            } else {
                Ok(())
            }
        };

        for (key, val) in opts.iter() {
            match key.to_ascii_lowercase().as_str() {
                "address" => host = Some(val.to_owned()),
                "port" => port = Some(val.to_owned()),
                "mode" => {
                    mode = val.parse().map_err(|_| {
                        TcpError::InvalidOption(format!(
                            "unknown tcp mode {val:?} (must be \"client\" or \"server\")"
                        ))
                    })?;
                }
                "retry" => {
                    persist_only("retry")?;
                    retry = val.parse::<u64>().ok().filter(|r| *r > 0).ok_or_else(|| {
                        TcpError::InvalidOption(format!("retry value {val:?} out of range"))
                    })?;
                }
                "keepalive" => {
                    persist_only("keepalive")?;
                    keepalive = Some(yes_no("keepalive", val)?);
                }
                "keepcnt" => keepcnt = positive("keepcnt", val)?,
                "keepintvl" => keepintvl = positive("keepintvl", val)?,
                "keepidle" => keepidle = positive("keepidle", val)?,
                "timeout" => {
                    persist_only("timeout")?;
                    sending_only("timeout")?;
                    timeout = Some(u64::from(positive("timeout", val)?));
                }
                "sndbuf" => {
                    persist_only("sndbuf")?;
                    sending_only("sndbuf")?;
                    sndbuf = Some(positive("sndbuf", val)? as usize);
                }
                "gpsd" => gpsd = yes_no("gpsd", val)?,
                "preamble" => {
                    if preamble.is_some() {
                        return Err(TcpError::InvalidOption(
                            "can only specify preamble once".into(),
                        ));
                    }
                    preamble = Some(Preamble::parse(val)?);
                }
                "nodelay" => nodelay = yes_no("nodelay", val)?,
                _ => return Err(TcpError::UnknownOption(key.to_owned())),
            }
        }

        if persist {
            if keepalive.is_none() {
                keepalive = Some(true);
                if keepidle == 0 {
                    keepidle = DEF_KEEPIDLE;
                }
                if keepintvl == 0 {
                    keepintvl = DEF_KEEPINTVL;
                }
                if keepcnt == 0 {
                    keepcnt = DEF_KEEPCNT;
                }
            }
            if timeout.is_none() {
                timeout = Some(DEF_SNDTIMEO);
            }
        }

        match mode {
            Mode::Client => {
                if host.is_none() {
                    return Err(TcpError::InvalidOption(
                        "must specify address for tcp client mode".into(),
                    ));
                }
                if gpsd {
                    if preamble.is_some() {
                        return Err(TcpError::InvalidOption(
                            "can't specify preamble with gpsd".into(),
                        ));
                    }
                    preamble = Some(Preamble::gpsd_watch());
                    if port.is_none() {
                        port = Some(GPSD_PORT.to_owned());
                    }
                }
            }
            Mode::Server => {
                if persist {
                    return Err(TcpError::InvalidOption(
                        "persist option not valid for tcp servers".into(),
                    ));
                }
                if preamble.is_some() {
                    return Err(TcpError::InvalidOption(
                        "preamble option not valid for servers".into(),
                    ));
                }
                if gpsd {
                    return Err(TcpError::InvalidOption("gpsd not valid for servers".into()));
                }
            }
        }

        let mut tuning = Tuning {
            keepalive,
            keepidle,
            keepintvl,
            keepcnt,
            sndtimeo: timeout.map(Duration::from_secs),
            nodelay,
            ..Tuning::default()
        };
        if let Some(sndbuf) = sndbuf {
            tuning.sndbuf = sndbuf;
        }

        Ok(Self {
            mode,
            host,
            port: port.unwrap_or_else(default_port),
            retry: Duration::from_secs(retry),
            tuning,
            preamble,
        })
    }
}

/// Builds the runnable interface (or sibling pair) for the parsed
/// options: resolves the role, performs the initial connect or bind and
/// wires queues and I/O loops. The caller spawns what comes back.
pub fn init(ifa: Iface, opts: &Options) -> Result<Vec<TcpIface>, TcpError> {
    let settings = TcpSettings::from_options(&ifa, opts)?;
    match settings.mode {
        Mode::Client => init_client(ifa, settings),
        Mode::Server => init_server(ifa, settings),
    }
}

fn init_client(mut ifa: Iface, settings: TcpSettings) -> Result<Vec<TcpIface>, TcpError> {
    let TcpSettings { host, port, retry, tuning, preamble, .. } = settings;
    let host = host
        .ok_or_else(|| TcpError::InvalidOption("must specify address for tcp client mode".into()))?;
    let persist = ifa.persist();
    let ipersist = ifa.flags.contains(IfFlags::IPERSIST);

    // One pass over the candidates; retrying is the recovery protocol's
    // business, not init's.
    let stream = match resolve(Some(&host), &port, false) {
        Ok(addrs) => match connect_candidates(&addrs) {
            Ok(stream) => Some(stream),
            Err(source) => {
                if !ipersist {
                    return Err(TcpError::Open { role: "connection", host, port, source });
                }
                debug!(iface = %ifa.name, host = %host, port = %port, "initial connection failed");
                None
            }
        },
        Err(err) => {
            if ipersist && err.deferrable() {
                debug!(iface = %ifa.name, host = %host, port = %port, "initial lookup failed");
                None
            } else {
                return Err(TcpError::Lookup { host, port, reason: err.to_string() });
            }
        }
    };

    if ifa.direction == Direction::In {
        ifa.q = Some(Arc::clone(ifa.engine.q()));
    } else {
        // A client that writes owns its egress queue. This covers the
        // unusual but supported outbound-server-less combination too.
        ifa.q = Some(SentenceQueue::new(ifa.qsize, ifa.ofilter.clone(), &ifa.name));
        if let Some(stream) = &stream
            && tuning.nodelay
            && let Err(err) = stream.set_nodelay(true)
        {
            warn!(iface = %ifa.name, ?err, "could not disable nagle algorithm for tcp socket");
        }
    }

    if persist && let Some(stream) = &stream {
        let _ = tuning.apply(stream, &ifa.name);
    }
    if let Some(stream) = &stream
        && let Some(preamble) = &preamble
        && let Err(err) = preamble.send(stream)
    {
        warn!(iface = %ifa.name, ?err, "preamble send failed");
    }

    let deferred = stream.is_none();
    let io = if persist {
        let link = match stream {
            Some(stream) => Link::Open(Arc::new(stream)),
            None => Link::Unconnected,
        };
        TcpIo::Persist(Shared::new(host, port, retry, tuning, preamble, link))
    } else {
        match stream {
            Some(stream) => TcpIo::Plain(Arc::new(stream)),
            // Unreachable: a non-persistent client either connected above
            // or failed init.
            None => return Err(TcpError::LinkDead),
        }
    };

    let role_for = |direction: Direction| {
        if deferred {
            Role::Deferred
        } else if direction == Direction::In {
            Role::Read
        } else {
            Role::Write
        }
    };

    debug!(iface = %ifa.name, "initialised");
    if ifa.direction == Direction::Both {
        let mut inbound = ifa.dup(Direction::In);
        inbound.q = Some(Arc::clone(ifa.engine.q()));
        ifa.direction = Direction::Out;
        let io2 = io
            .share()
            .ok_or_else(|| TcpError::InvalidOption("listener cannot be paired".into()))?;
        Ok(vec![
            TcpIface { ifa: Arc::new(ifa), io, role: role_for(Direction::Out) },
            TcpIface { ifa: Arc::new(inbound), io: io2, role: role_for(Direction::In) },
        ])
    } else {
        let role = role_for(ifa.direction);
        Ok(vec![TcpIface { ifa: Arc::new(ifa), io, role }])
    }
}

fn init_server(ifa: Iface, settings: TcpSettings) -> Result<Vec<TcpIface>, TcpError> {
    let TcpSettings { host, port, .. } = settings;
    let shown_host = host.clone().unwrap_or_else(|| "*".into());
    let addrs = resolve(host.as_deref(), &port, true).map_err(|err| TcpError::Lookup {
        host: shown_host.clone(),
        port: port.clone(),
        reason: err.to_string(),
    })?;
    let sock = bind_candidates(&addrs)
        .map_err(|source| TcpError::Open { role: "server", host: shown_host, port, source })?;
    debug!(iface = %ifa.name, "initialised");
    Ok(vec![TcpIface { ifa: Arc::new(ifa), io: TcpIo::Listener(sock), role: Role::Accept }])
}

fn bind_candidates(addrs: &[SocketAddr]) -> io::Result<Socket> {
    let mut last = None;
    for addr in addrs {
        let sock = match Socket::new(Domain::for_address(*addr), Type::STREAM, None) {
            Ok(sock) => sock,
            Err(err) => {
                last = Some(err);
                continue;
            }
        };
        let _ = sock.set_reuse_address(true);
        if let SocketAddr::V6(v6) = addr
            && v6.ip().is_unspecified()
        {
            // Wildcard binds should take IPv4-mapped peers as well.
            if let Err(err) = sock.set_only_v6(false) {
                warn!(?err, "failed to allow ipv4-mapped addresses on socket");
            }
        }
        match sock.bind(&SockAddr::from(*addr)) {
            Ok(()) => return Ok(sock),
            Err(err) => last = Some(err),
        }
    }
    Err(last.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::AddrNotAvailable, "no usable addresses resolved")
    }))
}

fn yes_no(key: &str, val: &str) -> Result<bool, TcpError> {
    if val.eq_ignore_ascii_case("yes") {
        Ok(true)
    } else if val.eq_ignore_ascii_case("no") {
        Ok(false)
    } else {
        Err(TcpError::InvalidOption(format!("{key} must be \"yes\" or \"no\"")))
    }
}

fn positive(key: &str, val: &str) -> Result<u32, TcpError> {
    val.parse::<u32>()
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| TcpError::InvalidOption(format!("invalid {key} value specified: {val}")))
}
