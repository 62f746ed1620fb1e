//! Conversions between `std::net::SocketAddr` and libc socket addresses.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::{io, mem};

/// Size of a `sockaddr_storage`, the capacity every address buffer starts at.
pub(crate) const STORAGE_LEN: libc::socklen_t =
  mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;

/// Reads an IPv4 or IPv6 address out of `storage`.
///
/// # Safety
/// `storage` must point to an initialized `sockaddr_storage`.
pub(crate) unsafe fn libc_socketaddr_into_std(
  storage: *const libc::sockaddr_storage,
) -> io::Result<SocketAddr> {
  // SAFETY: caller guarantees a valid pointer.
  let family = unsafe { (*storage).ss_family } as libc::c_int;

  match family {
    libc::AF_INET => {
      // SAFETY: family checked; sockaddr_in fits in sockaddr_storage.
      let sin = unsafe { *storage.cast::<libc::sockaddr_in>() };
      let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
      Ok(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(sin.sin_port))))
    }
    libc::AF_INET6 => {
      // SAFETY: as above.
      let sin6 = unsafe { *storage.cast::<libc::sockaddr_in6>() };
      Ok(SocketAddr::V6(SocketAddrV6::new(
        Ipv6Addr::from(sin6.sin6_addr.s6_addr),
        u16::from_be(sin6.sin6_port),
        sin6.sin6_flowinfo,
        sin6.sin6_scope_id,
      )))
    }
    _ => Err(io::Error::from_raw_os_error(libc::EAFNOSUPPORT)),
  }
}

/// Writes `addr` into a zeroed `sockaddr_storage`, returning it with the
/// length the kernel expects for its family.
pub(crate) fn std_socketaddr_into_libc(
  addr: SocketAddr,
) -> (libc::sockaddr_storage, libc::socklen_t) {
  // SAFETY: all-zero is a valid sockaddr_storage.
  let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };

  let len = match addr {
    SocketAddr::V4(v4) => {
      // SAFETY: sockaddr_in fits in sockaddr_storage and both are plain data.
      unsafe { *(&mut storage as *mut _ as *mut libc::sockaddr_in) = into_addr(v4) };
      mem::size_of::<libc::sockaddr_in>()
    }
    SocketAddr::V6(v6) => {
      // SAFETY: as above.
      unsafe {
        *(&mut storage as *mut _ as *mut libc::sockaddr_in6) = into_addr6(v6)
      };
      mem::size_of::<libc::sockaddr_in6>()
    }
  };

  (storage, len as libc::socklen_t)
}

/// An empty address buffer ready for the kernel to fill.
pub(crate) fn empty_storage() -> Box<libc::sockaddr_storage> {
  // SAFETY: all-zero is a valid sockaddr_storage.
  Box::new(unsafe { mem::zeroed() })
}

fn into_addr(addr: SocketAddrV4) -> libc::sockaddr_in {
  // SAFETY: every field accepts zero.
  let mut sin: libc::sockaddr_in = unsafe { mem::zeroed() };

  #[cfg(kqueue)]
  {
    sin.sin_len = mem::size_of::<libc::sockaddr_in>() as u8;
  }
  sin.sin_family = libc::AF_INET as libc::sa_family_t;
  sin.sin_port = addr.port().to_be();
  sin.sin_addr = libc::in_addr { s_addr: u32::from(*addr.ip()).to_be() };
  sin
}

fn into_addr6(addr: SocketAddrV6) -> libc::sockaddr_in6 {
  // SAFETY: every field accepts zero.
  let mut sin6: libc::sockaddr_in6 = unsafe { mem::zeroed() };

  #[cfg(kqueue)]
  {
    sin6.sin6_len = mem::size_of::<libc::sockaddr_in6>() as u8;
  }
  sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
  sin6.sin6_port = addr.port().to_be();
  sin6.sin6_addr = libc::in6_addr { s6_addr: addr.ip().octets() };
  sin6.sin6_flowinfo = addr.flowinfo();
  sin6.sin6_scope_id = addr.scope_id();
  sin6
}
