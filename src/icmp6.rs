//! ICMPv6 receive dispatcher (RFC 4443).
//!
//! Grounded on `examples/original_source/src/net/icmpv6.c`'s `icmp6_rx`:
//! verify the pseudo-header-continued checksum, then demultiplex by type.

use crate::errors::{StackError, StackResult};
use crate::ipv6::Ipv6RoutingTable;
use crate::ndp::{self, NeighbourCache, PendingSolicitTable};
use crate::{calc_ip_checksum_incomplete, calc_ip_checksum_finalize, Ipv6Addr, MacAddr};

use byte_struct::*;

enum_with_unknown! {
    /// ICMPv6 message types this core recognises on RX (§6).
    pub enum Icmp6Type(u8) {
        /// Echo Request
        EchoRequest = 128,
        /// Echo Reply
        EchoReply = 129,
        /// Router Solicitation (not handled: router role)
        RouterSolicit = 133,
        /// Router Advertisement
        RouterAdvert = 134,
        /// Neighbour Solicitation
        NeighbourSolicit = 135,
        /// Neighbour Advertisement
        NeighbourAdvert = 136,
    }
}

impl ByteStructLen for Icmp6Type {
    const BYTE_LEN: usize = 1;
}

impl ByteStruct for Icmp6Type {
    fn read_bytes(bytes: &[u8]) -> Self {
        Self::from(bytes[0])
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        bytes[0] = u8::from(*self);
    }
}

/// Fixed 4-octet ICMPv6 header common to every message (RFC 4443 §2.1).
#[derive(ByteStruct, Clone, Copy, Debug, PartialEq)]
#[byte_struct_be]
pub struct Icmp6Header {
    /// Message type
    pub kind: Icmp6Type,
    /// Type-specific code
    pub code: u8,
    /// Checksum over the ICMPv6 message plus the IPv6 pseudo-header
    pub checksum: u16,
}

/// Outcome of dispatching one ICMPv6 message, telling the caller whether a
/// reply must be transmitted. This crate has no heap-allocated IOB: the
/// caller passes a mutable buffer and reads back how many bytes of it now
/// hold the reply (§4.5's borrow-discipline realisation of IOB ownership).
#[derive(Debug, PartialEq)]
pub enum DispatchOutcome {
    /// Nothing further to transmit; the message was fully handled in place
    /// (e.g. a Neighbour/Router Advertisement was applied to local state).
    Handled,
    /// `buf[..len]` now holds a reply to transmit to `dest`.
    Reply { len: usize },
}

/// Verify the checksum and demultiplex by type (§4.5).
///
/// `pseudo_header_sum` is the unfolded partial checksum of the IPv6
/// pseudo-header computed by the caller (C7) before this function runs.
/// `buf` holds exactly the ICMPv6 message (header + body); `buf[..len]` is
/// valid. On an Echo Request, the buffer is rewritten in place to hold the
/// Echo Reply, matching `icmp6_handle_echo`'s "flip type, zero checksum,
/// recompute" behaviour. Router/Neighbour Advertisements and Neighbour
/// Solicitations are handed to the `ndp` handlers (§4.6, C6); a Neighbour
/// Solicitation for one of `routes`'s addresses produces a Neighbour
/// Advertisement reply the same way Echo Request does.
#[allow(clippy::too_many_arguments)]
pub fn icmp6_rx<Dev: Copy + PartialEq, const NCACHE: usize, const NPEND: usize, const NROUTE: usize>(
    buf: &mut [u8],
    len: usize,
    pseudo_header_sum: u32,
    netdev: Dev,
    src: Ipv6Addr,
    own_ll: MacAddr,
    cache: &mut NeighbourCache<Dev, NCACHE>,
    pending: &mut PendingSolicitTable<Dev, NPEND>,
    routes: &mut Ipv6RoutingTable<Dev, NROUTE>,
) -> StackResult<(Icmp6Type, DispatchOutcome)> {
    if len < Icmp6Header::BYTE_LEN {
        return Err(StackError::Invalid);
    }

    let full_sum = pseudo_header_sum + calc_ip_checksum_incomplete(&buf[..len]);
    if calc_ip_checksum_finalize(full_sum) != 0 {
        return Err(StackError::Invalid);
    }

    let header = Icmp6Header::read_bytes(&buf[..Icmp6Header::BYTE_LEN]);
    match header.kind {
        Icmp6Type::EchoRequest => {
            let reply = Icmp6Header {
                kind: Icmp6Type::EchoReply,
                code: 0,
                checksum: 0,
            };
            reply.write_bytes(&mut buf[..Icmp6Header::BYTE_LEN]);
            let sum = pseudo_header_sum + calc_ip_checksum_incomplete(&buf[..len]);
            let checksum = calc_ip_checksum_finalize(sum);
            buf[2] = (checksum >> 8) as u8;
            buf[3] = checksum as u8;
            Ok((Icmp6Type::EchoReply, DispatchOutcome::Reply { len }))
        }
        Icmp6Type::RouterSolicit => Err(StackError::NotSupported),
        Icmp6Type::RouterAdvert => {
            let _ = ndp::process_router_advert(&buf[..len], netdev, src, cache, pending, routes, &own_ll.0);
            Ok((Icmp6Type::RouterAdvert, DispatchOutcome::Handled))
        }
        Icmp6Type::NeighbourSolicit => {
            let target = ndp::neighbour_solicit_target(&buf[..len])?;
            if routes.owns(&target) {
                let na_len = ndp::build_neighbour_advert(buf, target, own_ll);
                let sum = pseudo_header_sum + calc_ip_checksum_incomplete(&buf[..na_len]);
                let checksum = calc_ip_checksum_finalize(sum);
                buf[2] = (checksum >> 8) as u8;
                buf[3] = checksum as u8;
                Ok((Icmp6Type::NeighbourSolicit, DispatchOutcome::Reply { len: na_len }))
            } else {
                Ok((Icmp6Type::NeighbourSolicit, DispatchOutcome::Handled))
            }
        }
        Icmp6Type::NeighbourAdvert => {
            let _ = ndp::process_neighbour_advert(&buf[..len], cache);
            Ok((Icmp6Type::NeighbourAdvert, DispatchOutcome::Handled))
        }
        Icmp6Type::EchoReply => Ok((Icmp6Type::EchoReply, DispatchOutcome::Handled)),
        Icmp6Type::Unknown(_) => Err(StackError::NotSupported),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipv6::RouteEntry;
    extern crate std;

    fn mac(last: u8) -> MacAddr {
        MacAddr::new([0x02, 0x00, 0x00, 0x00, 0x00, last])
    }

    fn addr(last: u8) -> Ipv6Addr {
        let mut a = [0_u8; 16];
        a[0] = 0xfe;
        a[1] = 0x80;
        a[15] = last;
        Ipv6Addr::new(a)
    }

    #[allow(clippy::type_complexity)]
    fn fresh_context() -> (NeighbourCache<u8, 4>, PendingSolicitTable<u8, 4>, Ipv6RoutingTable<u8, 4>) {
        (
            NeighbourCache::new(0),
            PendingSolicitTable::new(0),
            Ipv6RoutingTable::new(),
        )
    }

    fn checksummed_echo_request(payload: &[u8]) -> std::vec::Vec<u8> {
        let mut buf = std::vec![0_u8; Icmp6Header::BYTE_LEN + payload.len()];
        let header = Icmp6Header {
            kind: Icmp6Type::EchoRequest,
            code: 0,
            checksum: 0,
        };
        header.write_bytes(&mut buf[..Icmp6Header::BYTE_LEN]);
        buf[Icmp6Header::BYTE_LEN..].copy_from_slice(payload);
        let sum = calc_ip_checksum_incomplete(&buf);
        let checksum = calc_ip_checksum_finalize(sum);
        buf[2] = (checksum >> 8) as u8;
        buf[3] = checksum as u8;
        buf
    }

    #[test]
    fn echo_request_minimum_size_produces_echo_reply() {
        let mut buf = checksummed_echo_request(&[0, 0, 0, 0]);
        let len = buf.len();
        assert_eq!(len, 8);
        let (mut cache, mut pending, mut routes) = fresh_context();
        let (kind, outcome) =
            icmp6_rx(&mut buf, len, 0, 1_u8, addr(1), mac(1), &mut cache, &mut pending, &mut routes).unwrap();
        assert_eq!(kind, Icmp6Type::EchoReply);
        assert_eq!(outcome, DispatchOutcome::Reply { len: 8 });
        assert_eq!(buf[0], u8::from(Icmp6Type::EchoReply));
        let verify_sum = calc_ip_checksum_incomplete(&buf);
        assert_eq!(calc_ip_checksum_finalize(verify_sum), 0);
    }

    #[test]
    fn bad_checksum_is_invalid() {
        let mut buf = checksummed_echo_request(&[1, 2, 3, 4]);
        let len = buf.len();
        buf[len - 1] ^= 0xFF;
        let (mut cache, mut pending, mut routes) = fresh_context();
        assert_eq!(
            icmp6_rx(&mut buf, len, 0, 1_u8, addr(1), mac(1), &mut cache, &mut pending, &mut routes),
            Err(StackError::Invalid)
        );
    }

    #[test]
    fn too_short_is_invalid() {
        let mut buf = [0_u8; 2];
        let (mut cache, mut pending, mut routes) = fresh_context();
        assert_eq!(
            icmp6_rx(&mut buf, 2, 0, 1_u8, addr(1), mac(1), &mut cache, &mut pending, &mut routes),
            Err(StackError::Invalid)
        );
    }

    #[test]
    fn router_solicit_is_not_supported_here() {
        let mut buf = [0_u8; Icmp6Header::BYTE_LEN];
        let header = Icmp6Header {
            kind: Icmp6Type::RouterSolicit,
            code: 0,
            checksum: 0,
        };
        header.write_bytes(&mut buf);
        let sum = calc_ip_checksum_incomplete(&buf);
        let checksum = calc_ip_checksum_finalize(sum);
        buf[2] = (checksum >> 8) as u8;
        buf[3] = checksum as u8;
        let (mut cache, mut pending, mut routes) = fresh_context();
        let len = buf.len();
        assert_eq!(
            icmp6_rx(&mut buf, len, 0, 1_u8, addr(1), mac(1), &mut cache, &mut pending, &mut routes),
            Err(StackError::NotSupported)
        );
    }

    fn checksummed_neighbour_solicit(target: Ipv6Addr, own_ll: MacAddr) -> std::vec::Vec<u8> {
        let mut buf = std::vec![0_u8; 32];
        let len = ndp::build_neighbour_solicit(&mut buf, target, own_ll);
        buf.truncate(len);
        let sum = calc_ip_checksum_incomplete(&buf);
        let checksum = calc_ip_checksum_finalize(sum);
        buf[2] = (checksum >> 8) as u8;
        buf[3] = checksum as u8;
        buf
    }

    #[test]
    fn neighbour_solicit_for_owned_address_replies_with_advert() {
        let target = addr(9);
        let mut buf = checksummed_neighbour_solicit(target, mac(0xaa));
        let len = buf.len();
        let (mut cache, mut pending, mut routes) = fresh_context();
        routes
            .add(RouteEntry {
                netdev: 1,
                prefix: addr(0),
                prefix_len: 64,
                local_address: target,
                gateway: Ipv6Addr::UNSPECIFIED,
            })
            .unwrap();
        let (kind, outcome) =
            icmp6_rx(&mut buf, len, 0, 1_u8, addr(5), mac(1), &mut cache, &mut pending, &mut routes).unwrap();
        assert_eq!(kind, Icmp6Type::NeighbourSolicit);
        match outcome {
            DispatchOutcome::Reply { len } => {
                assert_eq!(buf[0], 136); // Neighbour Advertisement
                let verify_sum = calc_ip_checksum_incomplete(&buf[..len]);
                assert_eq!(calc_ip_checksum_finalize(verify_sum), 0);
            }
            other => panic!("expected a reply, got {:?}", other),
        }
    }

    #[test]
    fn neighbour_solicit_for_unowned_address_is_silently_ignored() {
        let target = addr(9);
        let mut buf = checksummed_neighbour_solicit(target, mac(0xaa));
        let len = buf.len();
        let (mut cache, mut pending, mut routes) = fresh_context();
        let (kind, outcome) =
            icmp6_rx(&mut buf, len, 0, 1_u8, addr(5), mac(1), &mut cache, &mut pending, &mut routes).unwrap();
        assert_eq!(kind, Icmp6Type::NeighbourSolicit);
        assert_eq!(outcome, DispatchOutcome::Handled);
    }
}
