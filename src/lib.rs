//! A no-std, panic-never, heapless IPv6 bring-up core for bare-metal.
//!
//! Brings an interface from link-up to a fully addressed, routable IPv6
//! endpoint: SLAAC via Router Solicitation/Advertisement, Neighbour
//! Discovery for link-layer resolution, and a DHCPv6 client state machine
//! for managed configuration.
//!
//! This crate currently relies on the nightly channel, and as a result, may break regularly
//! until the required features stabilize.
//!
//! Makes use of const generic expressions to provide flexibility in,
//! and guaranteed correctness of, lengths of headers and data segments without an allocator.
//!
//! This library is under active development; major functionality is yet to
//! be implemented and I'm sure some bugs are yet to be found.
//!
//! ```rust
//! use ip6core::*;
//!
//! let src = Ipv6Addr::LOOPBACK;
//! let dst = Ipv6Addr::ALL_ROUTERS;
//! let header = Ipv6Header::new(8, NextHeader::Icmpv6, src, dst);
//!
//! // Reduce to bytes
//! let bytes = header.to_be_bytes();
//!
//! // Parse from bytes
//! let header_parsed = Ipv6Header::read_bytes(&bytes);
//! assert_eq!(header_parsed, header);
//! ```

#![no_std]
#![allow(dead_code)]
#![deny(missing_docs)]
#![feature(generic_const_exprs)]
#![feature(test)]

#[cfg(feature = "panic_never")]
use panic_never as _;

pub use byte_struct::{ByteStruct, ByteStructLen};
pub use modular_bitfield;
pub use ufmt::{derive::uDebug, uDebug, uDisplay, uWrite};

pub mod enet; // Link Layer

pub mod errors; // Shared error taxonomy
pub mod debug; // debug_log! diagnostic tracing, gated by the `log-debug` feature
pub mod scheduler; // monojob_wait-equivalent cooperative job/timer pump

pub mod ipv6; // IPv6 header, routing table, TX/RX
pub mod icmp6; // ICMPv6 dispatcher
pub mod ndp; // Neighbour Discovery: neighbour cache, pending-solicit table, RS/RA/NS/NA
pub mod dhcp6; // DHCPv6 client state machine
pub mod autoconf; // ip6_autoconf orchestrator, NetDevice/SettingsSink collaborator traits

pub use enet::*;

pub use autoconf::*;
pub use debug::*;
pub use dhcp6::*;
pub use errors::*;
pub use icmp6::*;
pub use ndp::*;
pub use scheduler::*;
pub use ipv6::{pseudo_header_checksum_incomplete, Ipv6Header, Ipv6RoutingTable, NextHeader};

/// Standard 6-byte MAC address.
/// Split 24/24 format, Block ID | Device ID .
/// Locally-administered addresses are [0x02, ...], [0x06, ...], [0x0A, ...], [0x0E, ...]
pub type MacAddr = ByteArray<6>;

impl MacAddr {
    /// New from bytes
    pub fn new(v: [u8; 6]) -> Self {
        ByteArray(v)
    }

    /// Broadcast address (all ones)
    pub const BROADCAST: MacAddr = ByteArray([0xFF_u8; 6]);

    /// Any address (all zeroes)
    pub const ANY: MacAddr = ByteArray([0x0_u8; 6]);
}

/// 128-bit IPv6 address.
pub type Ipv6Addr = ByteArray<16>;

impl Ipv6Addr {
    /// New from bytes
    pub fn new(v: [u8; 16]) -> Self {
        ByteArray(v)
    }

    /// The unspecified address, `::`.
    pub const UNSPECIFIED: Ipv6Addr = ByteArray([0_u8; 16]);

    /// The loopback address, `::1`.
    pub const LOOPBACK: Ipv6Addr = ByteArray([
        0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1,
    ]);

    /// All-nodes multicast, `ff02::1`.
    pub const ALL_NODES: Ipv6Addr =
        ByteArray([0xff, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);

    /// All-routers multicast, `ff02::2`.
    pub const ALL_ROUTERS: Ipv6Addr =
        ByteArray([0xff, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2]);

    /// All-DHCP-servers-and-relay-agents multicast, `ff02::1:2`.
    ///
    /// Constructed as the literal 16 octets rather than derived from a
    /// byte-swapped `0xFF02` constant, which is the class of bug flagged
    /// as suspect in the original source (see DESIGN.md).
    pub const ALL_DHCP_SERVERS: Ipv6Addr =
        ByteArray([0xff, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 2, 0, 0]);

    /// The link-local prefix, `fe80::/10` (first two octets only are fixed).
    pub const LINK_LOCAL_PREFIX: [u8; 2] = [0xfe, 0x80];

    /// `true` if the first octet is `0xFF` (RFC 4291 §2.7).
    pub fn is_multicast(&self) -> bool {
        self.0[0] == 0xff
    }

    /// `true` for the all-zero address.
    pub fn is_unspecified(&self) -> bool {
        self.0 == [0_u8; 16]
    }

    /// The Ethernet multicast MAC for this address: `33:33:` followed by
    /// the low 32 bits of the address (RFC 2464 §7).
    pub fn multicast_mac(&self) -> MacAddr {
        MacAddr::new([0x33, 0x33, self.0[12], self.0[13], self.0[14], self.0[15]])
    }

    /// Build a link-local address (`fe80::/64`) whose host identifier is
    /// derived from a link-layer address, per the original source's
    /// `ip6_autoconf`: a modified EUI-64 when the link-layer address is at
    /// least 6 octets, otherwise a right-aligned copy into the low octets.
    pub fn link_local_from_ll(ll: &[u8]) -> Self {
        let mut addr = [0_u8; 16];
        addr[0] = Self::LINK_LOCAL_PREFIX[0];
        addr[1] = Self::LINK_LOCAL_PREFIX[1];
        write_host_id(&mut addr[8..16], ll);
        ByteArray(addr)
    }
}

/// Synthesise the 8-octet host identifier into `out` (always exactly 8
/// bytes) from a link-layer address `ll`, following the original source's
/// `ip6_autoconf`/NDP prefix-info logic: a modified EUI-64 for `ll.len() >=
/// 6`, otherwise a right-aligned copy of the raw bytes.
pub(crate) fn write_host_id(out: &mut [u8], ll: &[u8]) {
    debug_assert_eq!(out.len(), 8);
    if ll.len() < 6 {
        let offset = 8 - ll.len();
        out[offset..8].copy_from_slice(ll);
    } else {
        out[0] = ll[0];
        out[1] = ll[1];
        out[2] = ll[2];
        out[3] = 0xff;
        out[4] = 0xfe;
        out[5] = ll[3];
        out[6] = ll[4];
        out[7] = ll[5];
        // Designate this as a modified EUI-64 (universal/local bit).
        // gPXE's literal form is `|= 0x2`; see DESIGN.md for why this
        // crate keeps that form rather than RFC 4291 Appendix A's `^=`.
        out[0] |= 0x02;
    }
}

/// Newtype for [u8; N] in order to be able to implement traits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ByteArray<const N: usize>(pub [u8; N]);

impl<const N: usize> ByteStructLen for ByteArray<N> {
    const BYTE_LEN: usize = N;
}

impl<const N: usize> ByteStruct for ByteArray<N> {
    fn read_bytes(bytes: &[u8]) -> Self {
        let mut out = [0_u8; N];
        out.copy_from_slice(&bytes[0..N]);
        ByteArray(out)
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        for i in 0..N {
            bytes[i] = self.0[i];
        }
    }
}

impl<const N: usize> ByteArray<N> {
    /// Convert to big-endian byte array
    pub fn to_be_bytes(&self) -> [u8; N] {
        self.0
    }
}

impl uDebug for ByteArray<4> {
    fn fmt<W>(&self, f: &mut ufmt::Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        <[u8; 4] as uDebug>::fmt(&self.0, f)
    }
}

impl uDebug for ByteArray<6> {
    fn fmt<W>(&self, f: &mut ufmt::Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        <[u8; 6] as uDebug>::fmt(&self.0, f)
    }
}

impl uDebug for ByteArray<16> {
    fn fmt<W>(&self, f: &mut ufmt::Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        <[u8; 16] as uDebug>::fmt(&self.0, f)
    }
}

fn write_hex_group<W>(f: &mut ufmt::Formatter<'_, W>, group: u16) -> Result<(), W::Error>
where
    W: uWrite + ?Sized,
{
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    let mut out = [0_u8; 4];
    let mut n = 0;
    for shift in [12, 8, 4, 0] {
        let nibble = (group >> shift) & 0xf;
        if nibble != 0 || n != 0 || shift == 0 {
            out[n] = DIGITS[nibble as usize];
            n += 1;
        }
    }
    f.write_str(core::str::from_utf8(&out[..n]).unwrap_or("?"))
}

/// Canonical (RFC 5952) text form: 16-bit groups in hex, the longest run of
/// two-or-more all-zero groups collapsed to `::` (first-found longest wins
/// on a tie).
impl uDisplay for ByteArray<16> {
    fn fmt<W>(&self, f: &mut ufmt::Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        let mut groups = [0_u16; 8];
        for (i, group) in groups.iter_mut().enumerate() {
            *group = ((self.0[i * 2] as u16) << 8) | self.0[i * 2 + 1] as u16;
        }

        let mut best_start = 8;
        let mut best_len = 0;
        let mut run_start = 0;
        let mut run_len = 0;
        for (i, &group) in groups.iter().enumerate() {
            if group == 0 {
                if run_len == 0 {
                    run_start = i;
                }
                run_len += 1;
            } else {
                run_len = 0;
            }
            if run_len > best_len {
                best_len = run_len;
                best_start = run_start;
            }
        }
        if best_len < 2 {
            best_start = 8;
            best_len = 0;
        }

        let mut first = true;
        let mut i = 0;
        while i < 8 {
            if i == best_start {
                f.write_str("::")?;
                i += best_len;
                first = true;
                continue;
            }
            if !first {
                f.write_str(":")?;
            }
            write_hex_group(f, groups[i])?;
            first = false;
            i += 1;
        }
        Ok(())
    }
}

/// Derive To/From with an added "Unknown" variant catch-all for converting
/// from numerical values that do not match a valid variant in order to
/// avoid either panicking or cumbersome error handling.
///
/// Yoinked shamelessly (with some modification) from smoltcp.
#[macro_export]
macro_rules! enum_with_unknown {
    (
        $( #[$enum_attr:meta] )*
        pub enum $name:ident($ty:ty) {
            $(
              $( #[$variant_attr:meta] )*
              $variant:ident = $value:expr
            ),+ $(,)?
        }
    ) => {
        #[derive(Debug, uDebug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
        $( #[$enum_attr] )*
        pub enum $name {
            $(
              $( #[$variant_attr] )*
              $variant
            ),*,
            /// Catch-all for values that do not match a variant
            Unknown($ty)
        }

        impl ::core::convert::From<$ty> for $name {
            fn from(value: $ty) -> Self {
                match value {
                    $( $value => $name::$variant ),*,
                    other => $name::Unknown(other)
                }
            }
        }

        impl ::core::convert::From<$name> for $ty {
            fn from(value: $name) -> Self {
                match value {
                    $( $name::$variant => $value ),*,
                    $name::Unknown(other) => other
                }
            }
        }
    }
}

/// Calculate IP checksum per IETF-RFC-768
/// following implementation guide in IETF-RFC-1071 section 4.1 .
/// See <https://datatracker.ietf.org/doc/html/rfc1071#section-4> .
/// This function is provided for convenience and is not used directly.
pub fn calc_ip_checksum(data: &[u8]) -> u16 {
    // Partial calc
    let sum = calc_ip_checksum_incomplete(data);
    // Fold and flip
    let checksum = calc_ip_checksum_finalize(sum);

    checksum
}

/// Finalize an IP checksum by folding the accumulator from an [i32]
/// to a [u16] and taking the one's complement
pub fn calc_ip_checksum_finalize(sum: u32) -> u16 {
    // Copy to avoid mutating the input, which may be used for something else
    // since some checksums relate to overlapping data
    let mut sum = sum;

    // Fold 32-bit accumulator into 16 bits
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    // Convert to u16 and take bitwise complement
    let checksum = !(sum as u16);

    checksum
}

/// Calculate an IP checksum on incomplete data
/// returning the unfolded accumulator as [i32]
/// 
/// This is a slowish method by about a factor of 2-4.
/// It would be faster to case pairs of bytes to u16,
/// but this method avoids generating panic branches in slice operations.
pub fn calc_ip_checksum_incomplete(data: &[u8]) -> u32 {
    let mut sum: u32 = 0;
    let mut i: usize = 0;

    for x in data {
        if i % 2 == 0 {
            sum += (*x as u32) << 8;
        } else {
            sum += *x as u32;
        };

        i += 1;
    }

    sum
}

#[cfg(test)]
mod test {

    use crate::*;
    extern crate std;
    use std::*;

    #[test]
    fn test_calc_ip_checksum() -> () {
        // Folding a correct checksum back into the data it was computed
        // over always yields zero (RFC 1071 §4.1).
        let mut data = vec![0x45_u8, 0x00, 0x00, 0x3c, 0xac, 0x14, 0x00, 0x01, 0xac, 0x14, 0x00, 0x02];
        let checksum = calc_ip_checksum(&data);
        data.extend_from_slice(&checksum.to_be_bytes());
        assert!(calc_ip_checksum(&data) == 0)
    }

    struct FixedSink {
        buf: [u8; 64],
        len: usize,
    }

    impl ufmt::uWrite for FixedSink {
        type Error = ();
        fn write_str(&mut self, s: &str) -> Result<(), Self::Error> {
            let bytes = s.as_bytes();
            self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
            self.len += bytes.len();
            Ok(())
        }
    }

    fn render(addr: Ipv6Addr) -> std::string::String {
        let mut sink = FixedSink { buf: [0_u8; 64], len: 0 };
        ufmt::uwrite!(&mut sink, "{}", addr).unwrap();
        std::string::String::from(core::str::from_utf8(&sink.buf[..sink.len]).unwrap())
    }

    #[test]
    fn ipv6_display_compresses_longest_zero_run() {
        let addr = Ipv6Addr::new([0xfe, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(render(addr), "fe80::1");

        let addr = Ipv6Addr::new([0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(render(addr), "2001:db8::");

        assert_eq!(render(Ipv6Addr::UNSPECIFIED), "::");

        // An isolated single zero group is not long enough to compress.
        let addr = Ipv6Addr::new([0xfe, 0x80, 0, 0, 0, 0, 0, 2, 0, 2, 0, 0, 0, 1, 0, 1]);
        assert_eq!(render(addr), "fe80::2:2:0:1:1");
    }
}
