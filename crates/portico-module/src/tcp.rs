//! Plain TCP: the default `Transport` and listening-socket setup.

use portico_core::transport::Transport;

use std::io::{self, Read, Write};
use std::mem;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// An accepted plain TCP connection.
pub struct TcpTransport {
    stream: TcpStream,
    shut: bool,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            shut: false,
        }
    }

    pub fn get_ref(&self) -> &TcpStream {
        &self.stream
    }

    pub fn into_inner(self) -> TcpStream {
        self.stream
    }
}

impl Read for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TcpTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Transport for TcpTransport {
    fn shutdown(&mut self) {
        if !self.shut {
            // ENOTCONN after a peer reset is expected here
            let _ = self.stream.shutdown(Shutdown::Both);
            self.shut = true;
        }
    }

    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.peer_addr().ok()
    }

    fn set_blocking(&mut self, blocking: bool) -> io::Result<()> {
        self.stream.set_nonblocking(!blocking)
    }
}

/// Which step of listening-socket setup failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenStage {
    Socket,
    Bind,
    Listen,
}

#[derive(Debug, thiserror::Error)]
#[error("{stage:?} failed: {source}")]
pub struct ListenError {
    pub stage: ListenStage,
    #[source]
    pub source: io::Error,
}

impl ListenError {
    fn last_os(stage: ListenStage) -> Self {
        Self {
            stage,
            source: io::Error::last_os_error(),
        }
    }
}

/// Resolve the configured bind host.
///
/// `*` (or an empty host) means every IPv4 interface; anything else goes
/// through the system resolver and the first address wins.
pub fn resolve_bind_addr(host: &str, port: u16) -> io::Result<SocketAddr> {
    let host = host.trim();
    if host.is_empty() || host == "*" {
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    (host, port).to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no address found for {host}"),
        )
    })
}

/// Common socket setup: create, setsockopt, bind, listen.
///
/// The returned listener is still blocking; the caller switches it.
pub fn bind_listener(addr: SocketAddr, backlog: i32) -> Result<TcpListener, ListenError> {
    let domain = match addr {
        SocketAddr::V4(_) => libc::AF_INET,
        SocketAddr::V6(_) => libc::AF_INET6,
    };
    let fd = unsafe { libc::socket(domain, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(ListenError::last_os(ListenStage::Socket));
    }
    let owned = unsafe { OwnedFd::from_raw_fd(fd) };

    unsafe {
        libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);

        let opt: libc::c_int = 1;
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &opt as *const _ as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
    }

    let ret = match addr {
        SocketAddr::V4(v4) => {
            let mut sin: libc::sockaddr_in = unsafe { mem::zeroed() };
            sin.sin_family = libc::AF_INET as libc::sa_family_t;
            sin.sin_port = v4.port().to_be();
            sin.sin_addr = libc::in_addr {
                s_addr: u32::from_ne_bytes(v4.ip().octets()),
            };
            unsafe {
                libc::bind(
                    fd,
                    &sin as *const libc::sockaddr_in as *const libc::sockaddr,
                    mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
                )
            }
        }
        SocketAddr::V6(v6) => {
            let mut sin6: libc::sockaddr_in6 = unsafe { mem::zeroed() };
            sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sin6.sin6_port = v6.port().to_be();
            sin6.sin6_flowinfo = v6.flowinfo();
            sin6.sin6_scope_id = v6.scope_id();
            sin6.sin6_addr = libc::in6_addr {
                s6_addr: v6.ip().octets(),
            };
            unsafe {
                libc::bind(
                    fd,
                    &sin6 as *const libc::sockaddr_in6 as *const libc::sockaddr,
                    mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
                )
            }
        }
    };
    if ret < 0 {
        return Err(ListenError::last_os(ListenStage::Bind));
    }

    if unsafe { libc::listen(fd, backlog) } < 0 {
        return Err(ListenError::last_os(ListenStage::Listen));
    }

    Ok(TcpListener::from(owned))
}

/// Loopback address of the same family, for tests and health checks.
pub fn loopback_for(addr: SocketAddr) -> SocketAddr {
    let ip = match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, addr.port())
}
