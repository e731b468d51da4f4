use std::net::SocketAddr;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

/// Binds a listening socket. IPv6 listeners accept IPv4-mapped peers too
/// (`IPV6_V6ONLY` off), so `[::]` serves both families.
pub fn new_tcp_listener(
    bind_address: SocketAddr,
    backlog: u32,
) -> std::io::Result<tokio::net::TcpListener> {
    let domain = if bind_address.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    if bind_address.is_ipv6() {
        socket.set_only_v6(false)?;
    }

    #[cfg(unix)]
    socket.set_reuse_address(true)?;

    socket.set_nonblocking(true)?;
    socket.bind(&SockAddr::from(bind_address))?;
    socket.listen(i32::try_from(backlog).unwrap_or(i32::MAX))?;

    tokio::net::TcpListener::from_std(socket.into())
}
