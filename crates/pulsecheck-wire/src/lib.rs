//! Wire format for the pulsecheck IPC channel: the [`RequestFrame`] a client
//! sends to ask "is this endpoint serving HTTP?" and the [`Verdict`] the
//! worker answers with.
//!
//! Both frames are fixed-size and meant to be written/read with a single
//! fully-drained call on each end — no length prefixes, no framing beyond
//! "the struct's byte size".

use std::hash::{Hash, Hasher};

/// Largest socket address this worker speaks: `sockaddr_in6` is 28 bytes,
/// `sockaddr_in` is 16. Every [`RemoteAddress`] is stored padded out to this
/// width so that pool-key equality is a plain byte comparison.
pub const ADDR_CAPACITY: usize = 28;

/// An opaque, fixed-width socket address used as the keep-alive pool's key.
///
/// Two `RemoteAddress` values compare equal iff their on-wire bytes are
/// equal *after* zero-padding each one's trailing unused bytes — which is
/// why [`RemoteAddress::new`] always stores the buffer already
/// zero-padded, and why [`PartialEq`]/[`Hash`] below only ever look at the
/// padded `bytes` array rather than `used_len`.
#[derive(Clone, Copy)]
pub struct RemoteAddress {
    bytes: [u8; ADDR_CAPACITY],
    used_len: u8,
}

impl RemoteAddress {
    /// Build a `RemoteAddress` from a raw address buffer, zeroing
    /// `[used_len, ADDR_CAPACITY)` before it is ever used as a pool key.
    ///
    /// Panics if `raw.len() > ADDR_CAPACITY` or `used_len as usize >
    /// raw.len()` — both indicate a malformed request frame and are
    /// checked by the caller before construction.
    pub fn new(raw: &[u8], used_len: u8) -> Self {
        assert!(raw.len() <= ADDR_CAPACITY, "address longer than ADDR_CAPACITY");
        assert!((used_len as usize) <= raw.len(), "used_len exceeds supplied bytes");
        let mut bytes = [0u8; ADDR_CAPACITY];
        bytes[..raw.len()].copy_from_slice(raw);
        for b in &mut bytes[used_len as usize..] {
            *b = 0;
        }
        Self { bytes, used_len }
    }

    /// Build from a standard library [`std::net::SocketAddr`], the shape a
    /// client already resolved its `(host, port)` into.
    pub fn from_socket_addr(addr: std::net::SocketAddr) -> Self {
        match addr {
            std::net::SocketAddr::V4(v4) => {
                let mut raw = [0u8; 16];
                raw[0..2].copy_from_slice(&(libc_af_inet() as u16).to_ne_bytes());
                raw[2..4].copy_from_slice(&v4.port().to_be_bytes());
                raw[4..8].copy_from_slice(&v4.ip().octets());
                Self::new(&raw, 16)
            }
            std::net::SocketAddr::V6(v6) => {
                let mut raw = [0u8; ADDR_CAPACITY];
                raw[0..2].copy_from_slice(&(libc_af_inet6() as u16).to_ne_bytes());
                raw[2..4].copy_from_slice(&v6.port().to_be_bytes());
                raw[8..24].copy_from_slice(&v6.ip().octets());
                Self::new(&raw, ADDR_CAPACITY as u8)
            }
        }
    }

    /// The number of meaningful leading bytes; everything beyond this is
    /// the zero padding described on the type.
    pub fn used_len(&self) -> u8 {
        self.used_len
    }

    /// The full padded buffer — the only thing equality/hashing looks at.
    pub fn padded_bytes(&self) -> &[u8; ADDR_CAPACITY] {
        &self.bytes
    }

    /// Recover a [`std::net::SocketAddr`] for logging/diagnostics. Returns
    /// `None` for address families this worker doesn't speak (there are
    /// none reachable in practice since only v4/v6 are ever constructed).
    pub fn to_socket_addr(&self) -> Option<std::net::SocketAddr> {
        let family = u16::from_ne_bytes([self.bytes[0], self.bytes[1]]);
        if family == libc_af_inet() as u16 && self.used_len >= 8 {
            let port = u16::from_be_bytes([self.bytes[2], self.bytes[3]]);
            let ip = std::net::Ipv4Addr::new(self.bytes[4], self.bytes[5], self.bytes[6], self.bytes[7]);
            Some(std::net::SocketAddr::new(ip.into(), port))
        } else if family == libc_af_inet6() as u16 && self.used_len >= 24 {
            let port = u16::from_be_bytes([self.bytes[2], self.bytes[3]]);
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&self.bytes[8..24]);
            Some(std::net::SocketAddr::new(std::net::Ipv6Addr::from(octets).into(), port))
        } else {
            None
        }
    }
}

// Kept local (rather than a `libc` dependency in this crate) since only the
// two numeric family constants are needed and this crate has no other use
// for raw syscall bindings.
#[cfg(target_os = "linux")]
fn libc_af_inet() -> i32 {
    2
}
#[cfg(target_os = "linux")]
fn libc_af_inet6() -> i32 {
    10
}
#[cfg(not(target_os = "linux"))]
fn libc_af_inet() -> i32 {
    2
}
#[cfg(not(target_os = "linux"))]
fn libc_af_inet6() -> i32 {
    30
}

impl PartialEq for RemoteAddress {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}
impl Eq for RemoteAddress {}

impl Hash for RemoteAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl std::fmt::Debug for RemoteAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_socket_addr() {
            Some(addr) => write!(f, "RemoteAddress({addr})"),
            None => write!(f, "RemoteAddress(used_len={})", self.used_len),
        }
    }
}

/// Total on-wire size of a [`RequestFrame`]: the padded address, the used
/// length, and one byte of reserved padding to keep the struct's size a
/// round number.
pub const REQUEST_FRAME_LEN: usize = ADDR_CAPACITY + 1 + 1;

/// The request a client sends: "check this address". Framed as raw bytes
/// with [`RequestFrame::to_bytes`]/[`RequestFrame::from_bytes`] so both
/// sides agree on layout without depending on each other's memory layout.
#[derive(Clone, Copy, Debug)]
pub struct RequestFrame {
    pub addr: RemoteAddress,
}

impl RequestFrame {
    pub fn new(addr: RemoteAddress) -> Self {
        Self { addr }
    }

    pub fn to_bytes(&self) -> [u8; REQUEST_FRAME_LEN] {
        let mut out = [0u8; REQUEST_FRAME_LEN];
        out[..ADDR_CAPACITY].copy_from_slice(&self.addr.bytes);
        out[ADDR_CAPACITY] = self.addr.used_len;
        out
    }

    /// Parse a frame, re-zeroing trailing bytes per the canonicalization
    /// rule even if a misbehaving client sent garbage there.
    pub fn from_bytes(buf: &[u8; REQUEST_FRAME_LEN]) -> Self {
        let used_len = buf[ADDR_CAPACITY];
        let addr = RemoteAddress::new(&buf[..ADDR_CAPACITY], used_len.min(ADDR_CAPACITY as u8));
        Self { addr }
    }
}

/// The worker's one-word answer to a check, sent as a native-endian `u16`.
///
/// Native-endian rather than a fixed wire endianness is deliberate: both
/// ends of this channel are always the same host (it's a local abstract
/// Unix socket), so there is no cross-host byte-order concern, and a fixed
/// endianness would just add a conversion neither side needs.
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// The check failed terminally (dial failure, bad status, timeout, ...).
    Fail = 0,
    /// The endpoint responded with an acceptable HTTP status line.
    Ok = 1,
    /// Internal: the connection handed to this check was stale. The client
    /// library is expected to re-issue once on a fresh connection and never
    /// surface this value to its caller.
    Retry = 3,
    /// Client-side transport error. Never sent by the worker; produced by
    /// [`pulsecheck-client`](https://docs.rs/pulsecheck-client) when it
    /// cannot reach the worker at all.
    ClientError = 4,
}

impl Verdict {
    pub fn to_bytes(self) -> [u8; 2] {
        (self as u16).to_ne_bytes()
    }

    pub fn from_bytes(buf: [u8; 2]) -> Option<Self> {
        match u16::from_ne_bytes(buf) {
            0 => Some(Verdict::Fail),
            1 => Some(Verdict::Ok),
            3 => Some(Verdict::Retry),
            4 => Some(Verdict::ClientError),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_is_applied_on_construction() {
        let raw = [0xFFu8; ADDR_CAPACITY];
        let addr = RemoteAddress::new(&raw, 4);
        assert_eq!(&addr.bytes[0..4], &[0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(addr.bytes[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn equality_ignores_used_len_once_padded() {
        // Same padded bytes, constructed via different used_len values,
        // must compare equal: the wire-equality rule is defined over the
        // padded bytes only.
        let mut raw_a = [0u8; ADDR_CAPACITY];
        raw_a[0..4].copy_from_slice(&[1, 2, 3, 4]);
        let a = RemoteAddress::new(&raw_a, 4);

        let mut raw_b = [0u8; ADDR_CAPACITY];
        raw_b[0..4].copy_from_slice(&[1, 2, 3, 4]);
        let b = RemoteAddress::new(&raw_b, ADDR_CAPACITY as u8);

        assert_eq!(a, b);
    }

    #[test]
    fn distinct_addresses_are_not_equal() {
        let a = RemoteAddress::new(&[1, 2, 3, 4], 4);
        let b = RemoteAddress::new(&[1, 2, 3, 5], 4);
        assert_ne!(a, b);
    }

    #[test]
    fn socket_addr_roundtrip_v4() {
        let sa: std::net::SocketAddr = "203.13.161.80:80".parse().unwrap();
        let addr = RemoteAddress::from_socket_addr(sa);
        assert_eq!(addr.to_socket_addr(), Some(sa));
    }

    #[test]
    fn socket_addr_roundtrip_v6() {
        let sa: std::net::SocketAddr = "[2001:db8::1]:443".parse().unwrap();
        let addr = RemoteAddress::from_socket_addr(sa);
        assert_eq!(addr.to_socket_addr(), Some(sa));
    }

    #[test]
    fn request_frame_roundtrip() {
        let sa: std::net::SocketAddr = "127.0.0.1:18080".parse().unwrap();
        let frame = RequestFrame::new(RemoteAddress::from_socket_addr(sa));
        let bytes = frame.to_bytes();
        let parsed = RequestFrame::from_bytes(&bytes);
        assert_eq!(parsed.addr, frame.addr);
    }

    #[test]
    fn verdict_roundtrip_is_native_endian() {
        for v in [Verdict::Fail, Verdict::Ok, Verdict::Retry, Verdict::ClientError] {
            assert_eq!(Verdict::from_bytes(v.to_bytes()), Some(v));
        }
    }
}
