//! Internet layer: IPv6 header construction, routing table, and TX/RX.
//!
//! Grounded on `examples/original_source/src/net/ipv6.c` (gPXE), generalising
//! this crate's existing IPv4 header/frame idiom (`src/ip.rs`) to the 40-byte
//! fixed IPv6 header and a bit-granular routing lookup.

use crate::errors::{StackError, StackResult};
use crate::ndp::{NeighbourCache, Resolution};
use crate::{calc_ip_checksum_incomplete, calc_ip_checksum_finalize, enum_with_unknown, Ipv6Addr, MacAddr};

use byte_struct::*;
use static_assertions::const_assert;

bitfields!(
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    VersionTrafficClassFlowLabel: u32 {
        pub version: 4,
        pub traffic_class: 8,
        pub flow_label: 20
    }
);

enum_with_unknown! {
    /// IPv6 "next header" values actually handled by this core; see
    /// <https://www.iana.org/assignments/protocol-numbers>.
    pub enum NextHeader(u8) {
        /// Hop-by-Hop Options
        HopByHop = 0,
        /// TCP (passed through unparsed; transport layer is out of scope here)
        Tcp = 6,
        /// User Datagram Protocol
        Udp = 17,
        /// Routing header
        Routing = 43,
        /// Fragment header
        Fragment = 44,
        /// Encapsulating Security Payload
        Esp = 50,
        /// Authentication Header
        Ah = 51,
        /// ICMPv6
        Icmpv6 = 58,
        /// Destination Options
        DestOpts = 60,
        /// No next header
        NoNextHeader = 59,
    }
}

impl ByteStructLen for NextHeader {
    const BYTE_LEN: usize = 1;
}

impl ByteStruct for NextHeader {
    fn read_bytes(bytes: &[u8]) -> Self {
        Self::from(bytes[0])
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        bytes[0] = u8::from(*self);
    }
}

impl NextHeader {
    /// Extension headers this core declines to parse (RX fails with
    /// `NotSupported`, matching the distilled next-header sanity check).
    pub fn is_unsupported_extension(&self) -> bool {
        matches!(
            self,
            NextHeader::HopByHop
                | NextHeader::Routing
                | NextHeader::Fragment
                | NextHeader::Ah
                | NextHeader::DestOpts
                | NextHeader::Esp
        )
    }
}

/// Fixed 40-byte IPv6 header (RFC 8200 §3); no extension headers.
#[derive(ByteStruct, Clone, Copy, Debug, PartialEq)]
#[byte_struct_be]
pub struct Ipv6Header {
    /// Version (always 6), traffic class, flow label
    pub version_tc_fl: VersionTrafficClassFlowLabel,
    /// Length of the payload following this header, in octets
    pub payload_length: u16,
    /// Identifies the type of header immediately following this one
    pub next_header: NextHeader,
    /// Decremented by each forwarding router; not touched by this core
    pub hop_limit: u8,
    /// Source address
    pub src: Ipv6Addr,
    /// Destination address
    pub dst: Ipv6Addr,
}

impl Ipv6Header {
    /// Build a header for a fresh outgoing packet: version 6, traffic
    /// class 0, flow label 0, hop limit 255, per the original source's
    /// `ipv6_tx`.
    pub fn new(payload_length: u16, next_header: NextHeader, src: Ipv6Addr, dst: Ipv6Addr) -> Self {
        Ipv6Header {
            version_tc_fl: VersionTrafficClassFlowLabel::new().with_version(6),
            payload_length,
            next_header,
            hop_limit: 255,
            src,
            dst,
        }
    }

    /// Pack into a big-endian (network) byte array.
    pub fn to_be_bytes(&self) -> [u8; Self::BYTE_LEN] {
        let mut out = [0_u8; Self::BYTE_LEN];
        self.write_bytes(&mut out);
        out
    }
}

const_assert!(Ipv6Header::BYTE_LEN == 40);

/// Partial (unfolded) pseudo-header checksum per RFC 2460 §8.1: source,
/// destination, upper-layer packet length (as a 32-bit value), and the
/// next-header octet in the low byte of its 32-bit field.
pub fn pseudo_header_checksum_incomplete(
    src: &Ipv6Addr,
    dst: &Ipv6Addr,
    upper_layer_length: u32,
    next_header: NextHeader,
) -> u32 {
    let mut sum = calc_ip_checksum_incomplete(&src.to_be_bytes());
    sum += calc_ip_checksum_incomplete(&dst.to_be_bytes());
    sum += calc_ip_checksum_incomplete(&upper_layer_length.to_be_bytes());
    sum += calc_ip_checksum_incomplete(&[0, 0, 0, u8::from(next_header)]);
    sum
}

/// One entry in the routing table (§3: "Routing entry").
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RouteEntry<Dev: Copy + PartialEq> {
    /// Owning network device handle
    pub netdev: Dev,
    /// Destination prefix
    pub prefix: Ipv6Addr,
    /// Prefix length in bits
    pub prefix_len: u8,
    /// This interface's address within the prefix
    pub local_address: Ipv6Addr,
    /// Next-hop gateway; all-zero means on-link
    pub gateway: Ipv6Addr,
}

impl<Dev: Copy + PartialEq> RouteEntry<Dev> {
    fn is_on_link(&self) -> bool {
        self.gateway.is_unspecified()
    }

    /// Bit-granular longest-prefix match (the resolved "suspect behaviour"
    /// from §9: the original source instead truncates `prefix_len` to whole
    /// octets via `memcmp`, which this crate does not reproduce).
    fn matches(&self, dest: &Ipv6Addr) -> bool {
        prefix_match(&self.prefix.0, &dest.0, self.prefix_len)
    }
}

/// Bit-granular prefix match: the first `prefix_len` bits of `a` and `b`
/// are equal. `prefix_len` is clamped to 128.
pub fn prefix_match(a: &[u8; 16], b: &[u8; 16], prefix_len: u8) -> bool {
    let prefix_len = prefix_len.min(128) as usize;
    let full_bytes = prefix_len / 8;
    let rem_bits = prefix_len % 8;
    if a[..full_bytes] != b[..full_bytes] {
        return false;
    }
    if rem_bits == 0 {
        return true;
    }
    let mask: u8 = 0xFF_u8 << (8 - rem_bits);
    (a[full_bytes] & mask) == (b[full_bytes] & mask)
}

/// Ordered routing table: on-link entries (all-zero gateway) at the head,
/// gateway'd entries at the tail; fixed capacity `N` (§9 "Global mutable
/// state": this replaces the process-wide singleton with an explicit,
/// test-instantiable context value).
#[derive(Clone, Copy, Debug)]
pub struct Ipv6RoutingTable<Dev: Copy + PartialEq, const N: usize> {
    entries: [Option<RouteEntry<Dev>>; N],
    len: usize,
}

impl<Dev: Copy + PartialEq, const N: usize> Ipv6RoutingTable<Dev, N> {
    /// A table with no entries.
    pub fn new() -> Self {
        Ipv6RoutingTable {
            entries: [None; N],
            len: 0,
        }
    }

    /// Remove any existing entry for `netdev`, then insert the new one: at
    /// the head if on-link, at the tail otherwise (§4.2 "Add semantics").
    pub fn add(&mut self, entry: RouteEntry<Dev>) -> StackResult<()> {
        self.remove_by_netdev(entry.netdev);
        if self.len >= N {
            return Err(StackError::NoMemory);
        }
        if entry.is_on_link() {
            // Shift everything right by one and insert at the head.
            let mut i = self.len;
            while i > 0 {
                self.entries[i] = self.entries[i - 1];
                i -= 1;
            }
            self.entries[0] = Some(entry);
        } else {
            self.entries[self.len] = Some(entry);
        }
        self.len += 1;
        Ok(())
    }

    /// Remove the (at most one) entry belonging to `netdev`.
    pub fn remove_by_netdev(&mut self, netdev: Dev) {
        if let Some(idx) = (0..self.len).find(|&i| self.entries[i].map(|e| e.netdev) == Some(netdev))
        {
            for i in idx..self.len - 1 {
                self.entries[i] = self.entries[i + 1];
            }
            self.entries[self.len - 1] = None;
            self.len -= 1;
        }
    }

    /// Longest-match-first lookup (§4.2 "Lookup semantics"): the first
    /// entry (in head-to-tail order, so on-link entries are preferred)
    /// whose prefix matches `dest` wins. Falling that, the first on-link
    /// entry is used with `next_hop = dest`. Otherwise `NetUnreachable`.
    pub fn lookup(&self, dest: &Ipv6Addr) -> StackResult<(Dev, Ipv6Addr, Ipv6Addr)> {
        for entry in self.entries[..self.len].iter().copied().flatten() {
            if entry.matches(dest) {
                let next_hop = if entry.is_on_link() { *dest } else { entry.gateway };
                return Ok((entry.netdev, entry.local_address, next_hop));
            }
        }
        for entry in self.entries[..self.len].iter().copied().flatten() {
            if entry.is_on_link() {
                return Ok((entry.netdev, entry.local_address, *dest));
            }
        }
        Err(StackError::NetUnreachable)
    }

    /// Number of installed entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` if no entries are installed.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// `true` if some installed entry's local address matches `addr` (used
    /// by the NS handler's `net_protocol.check` ownership test, §4.6
    /// "Process NS").
    pub fn owns(&self, addr: &Ipv6Addr) -> bool {
        self.entries[..self.len]
            .iter()
            .flatten()
            .any(|e| &e.local_address == addr)
    }
}

impl<Dev: Copy + PartialEq, const N: usize> Default for Ipv6RoutingTable<Dev, N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of `ipv6_tx`'s next-hop resolution (§4.7 "TX").
#[derive(Debug, PartialEq)]
pub enum TxOutcome {
    /// The frame is ready to hand to the driver for `dst_ll`.
    Ready {
        /// Destination link-layer address
        dst_ll: MacAddr,
    },
    /// No link-layer address yet; the caller must send a Neighbour
    /// Solicitation (if `needs_solicit`) and retry later.
    Pending {
        /// The next-hop address a solicitation should target
        target: Ipv6Addr,
        /// `true` if this call is the one that should emit the solicitation
        needs_solicit: bool,
    },
}

/// Build a 40-byte IPv6 header in front of an already-encoded payload,
/// resolve the next-hop link-layer address via the routing table and
/// neighbour cache, and finalise the transport checksum if requested (§4.7
/// "TX"). `buf` must be at least `40 + payload_len` bytes; the header is
/// written into `buf[..40]` and the payload is assumed already present at
/// `buf[40..40 + payload_len]`.
pub fn ipv6_tx<Dev: Copy + PartialEq, const NROUTE: usize, const NCACHE: usize>(
    buf: &mut [u8],
    payload_len: usize,
    checksum_offset: Option<usize>,
    next_header: NextHeader,
    dst: Ipv6Addr,
    routes: &Ipv6RoutingTable<Dev, NROUTE>,
    cache: &mut NeighbourCache<Dev, NCACHE>,
) -> StackResult<(Dev, TxOutcome)> {
    if buf.len() < Ipv6Header::BYTE_LEN + payload_len {
        return Err(StackError::NoMemory);
    }
    let (netdev, src, next_hop) = routes.lookup(&dst)?;

    let header = Ipv6Header::new(payload_len as u16, next_header, src, dst);
    header.write_bytes(&mut buf[..Ipv6Header::BYTE_LEN]);

    if let Some(offset) = checksum_offset {
        let payload = &buf[Ipv6Header::BYTE_LEN..Ipv6Header::BYTE_LEN + payload_len];
        let sum = pseudo_header_checksum_incomplete(&src, &dst, payload_len as u32, next_header)
            + calc_ip_checksum_incomplete(payload);
        let checksum = calc_ip_checksum_finalize(sum);
        let at = Ipv6Header::BYTE_LEN + offset;
        buf[at] = (checksum >> 8) as u8;
        buf[at + 1] = checksum as u8;
    }

    if next_hop.is_multicast() {
        return Ok((netdev, TxOutcome::Ready { dst_ll: next_hop.multicast_mac() }));
    }

    let outcome = cache.resolve(netdev, &next_hop);
    let tx_outcome = match outcome.resolution {
        Resolution::Resolved(ll) => TxOutcome::Ready { dst_ll: ll },
        Resolution::Pending => TxOutcome::Pending {
            target: next_hop,
            needs_solicit: outcome.solicit,
        },
    };
    Ok((netdev, tx_outcome))
}

/// A validated, demultiplexed IPv6 packet (§4.7 "RX").
pub struct RxPacket<'a> {
    /// The parsed fixed header
    pub header: Ipv6Header,
    /// The upper-layer payload, trimmed to `payload_length`
    pub payload: &'a [u8],
    /// The partial pseudo-header checksum, for the upper-layer handler to
    /// continue over its own body
    pub pseudo_header_sum: u32,
}

/// Validate and demultiplex a received IPv6 packet (§4.7 "RX"): `iob_len ≥
/// 40`, version == 6, `payload_length ≤ iob_len − 40`, trailing padding
/// stripped, and the next-header checked against the unsupported-extension
/// set before handing back to the caller for dispatch.
pub fn ipv6_rx(buf: &[u8]) -> StackResult<RxPacket<'_>> {
    if buf.len() < Ipv6Header::BYTE_LEN {
        return Err(StackError::Invalid);
    }
    let header = Ipv6Header::read_bytes(&buf[..Ipv6Header::BYTE_LEN]);
    if header.version_tc_fl.version() != 6 {
        return Err(StackError::Invalid);
    }
    let payload_length = header.payload_length as usize;
    if payload_length > buf.len() - Ipv6Header::BYTE_LEN {
        return Err(StackError::Invalid);
    }
    if header.next_header.is_unsupported_extension() {
        return Err(StackError::NotSupported);
    }

    let payload = &buf[Ipv6Header::BYTE_LEN..Ipv6Header::BYTE_LEN + payload_length];
    let pseudo_header_sum = pseudo_header_checksum_incomplete(
        &header.src,
        &header.dst,
        payload_length as u32,
        header.next_header,
    );
    Ok(RxPacket {
        header,
        payload,
        pseudo_header_sum,
    })
}
