//! `ip6_autoconf` orchestrator: link-wait, link-local address, Router
//! Solicitation, and the DHCPv6 fallback, wired together the way
//! `examples/original_source/src/usr/ip6mgmt.c`'s `ip6_autoconf` and
//! `examples/original_source/src/net/ndp.c`'s `ndp_send_rsolicit` do, plus
//! the DHCPv6 hookup that file's `dhcp6` command left as a stub.
//!
//! The embedding application owns the network device and its poll loop;
//! this module only needs two collaborator traits so it can stay generic
//! over that device and be exercised with an in-memory fake in tests.

use crate::dhcp6::{Dhcp6Client, Dhcp6Mode, TimerOutcome};
use crate::errors::{StackError, StackResult};
use crate::icmp6::{icmp6_rx, DispatchOutcome, Icmp6Type};
use crate::ndp::{self, router_solicit_code, NeighbourCache, PendingSolicitTable};
use crate::ipv6::{pseudo_header_checksum_incomplete, Ipv6RoutingTable, NextHeader, RouteEntry};
use crate::{write_host_id, Ipv6Addr, MacAddr};

/// How long to wait for link-up before giving up (§4.9 step 1).
pub const LINK_WAIT_MS: u64 = 15_000;

/// A network device as seen by the autoconf orchestrator: IPv6 payloads in
/// and out, plus enough link state to drive the wait-for-carrier step. This
/// sits above the Ethernet framing in `enet.rs` deliberately: encapsulating
/// and transmitting the frame is the embedding application's job, the same
/// division `ip6_autoconf` draws against `netdev_tx`/`netdev_poll`.
pub trait NetDevice {
    /// This device's link-layer address, e.g. the 6-octet Ethernet MAC.
    fn link_layer_address(&self) -> MacAddr;

    /// `true` once the link has carrier.
    fn link_is_up(&mut self) -> bool;

    /// Current time, milliseconds, on whatever clock the caller's poll loop
    /// uses. Must be monotonically non-decreasing across calls.
    fn now_ms(&mut self) -> u64;

    /// Send one already-built ICMPv6/UDP payload (this module does not
    /// touch the IPv6 header: the caller wraps it, per §4.5's checksum
    /// split between this core and the caller).
    fn send(&mut self, dst: Ipv6Addr, payload: &[u8]) -> StackResult<()>;

    /// Non-blocking receive of the next available payload, if any, along
    /// with its sender. `buf` is filled with the payload; the return value
    /// is its length.
    fn recv(&mut self, buf: &mut [u8]) -> Option<(Ipv6Addr, usize)>;
}

/// Where the orchestrator deposits what it learns, so the embedding
/// application can persist it however it likes (a settings DB, in the
/// original source's terms) without this crate needing to know the
/// storage format.
pub trait SettingsSink {
    /// Record an address assigned to this interface.
    fn store_address(&mut self, addr: Ipv6Addr, prefix_len: u8);
    /// Record a default gateway.
    fn store_gateway(&mut self, gateway: Ipv6Addr);
    /// Record a DNS server address.
    fn store_dns(&mut self, dns: Ipv6Addr);
}

/// Outcome of a full `ip6_autoconf` run (§4.9 step 5).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AutoconfOutcome {
    /// SLAAC alone was sufficient; no DHCPv6 was needed.
    SlaacOnly,
    /// DHCPv6 ran to completion and committed configuration.
    Dhcp6Completed,
    /// Neither the router solicitation nor the DHCPv6 full exchange got an
    /// answer.
    TimedOut,
}

const ICMP6_BUF_LEN: usize = 256;
const DHCP6_BUF_LEN: usize = 256;

/// Bring `dev` up: link-wait, link-local address, SLAAC, and DHCPv6 if the
/// router's flags call for it (§4.9, the full 5-step algorithm). `Dev` is
/// fixed at `()` throughout: autoconf always drives exactly one interface,
/// so the neighbour cache / pending-solicit table / routing table it's
/// handed don't need a richer device handle.
pub fn ip6_autoconf<D, S, const NCACHE: usize, const NPEND: usize, const NROUTE: usize>(
    dev: &mut D,
    settings: &mut S,
    cache: &mut NeighbourCache<(), NCACHE>,
    pending: &mut PendingSolicitTable<(), NPEND>,
    routes: &mut Ipv6RoutingTable<(), NROUTE>,
) -> StackResult<AutoconfOutcome>
where
    D: NetDevice,
    S: SettingsSink,
{
    let start = dev.now_ms();
    while !dev.link_is_up() {
        if dev.now_ms().saturating_sub(start) >= LINK_WAIT_MS {
            return Err(StackError::TimedOut);
        }
    }

    let own_ll = dev.link_layer_address();
    let local_address = Ipv6Addr::link_local_from_ll(&own_ll.0);
    let _ = routes.add(RouteEntry {
        netdev: (),
        prefix: local_address,
        prefix_len: 64,
        local_address,
        gateway: Ipv6Addr::UNSPECIFIED,
    });
    settings.store_address(local_address, 64);

    let (ra_outcome, router) = solicit_router(dev, cache, pending, routes, own_ll, local_address);

    let code = match ra_outcome {
        Some(Ok(code)) => code,
        _ => router_solicit_code::NONE,
    };

    if let Some(info) = &router {
        settings.store_gateway(info.router);
        if !info.no_address {
            let global_address = derive_global_address(info.prefix, info.prefix_length, &own_ll);
            settings.store_address(global_address, info.prefix_length);
        }
    }

    if code & router_solicit_code::MANAGED != 0 {
        run_dhcp6(dev, settings, own_ll, local_address, Dhcp6Mode::FullExchange, router)
    } else if code & router_solicit_code::OTHER_CONF != 0 {
        run_dhcp6(dev, settings, own_ll, local_address, Dhcp6Mode::InfoOnly, router)
    } else if router.is_some() {
        Ok(AutoconfOutcome::SlaacOnly)
    } else {
        // No router answered at all: fall back to a full DHCPv6 exchange
        // (§4.9 step 4, "RS failure").
        run_dhcp6(dev, settings, own_ll, local_address, Dhcp6Mode::FullExchange, None)
    }
}

/// Reconstruct the SLAAC global address the same way
/// `ndp::process_router_advert` derives it for the routing table, so the
/// caller can also hand it to `SettingsSink`.
fn derive_global_address(prefix: Ipv6Addr, prefix_length: u8, own_ll: &MacAddr) -> Ipv6Addr {
    let rounded_bytes = (((prefix_length as usize) + 7) / 8).min(16);
    let mut bytes = [0_u8; 16];
    bytes[..rounded_bytes].copy_from_slice(&prefix.to_be_bytes()[..rounded_bytes]);
    if (prefix_length as usize) < 128 {
        let mut host_id = [0_u8; 8];
        write_host_id(&mut host_id, &own_ll.0);
        bytes[8..16].copy_from_slice(&host_id);
    }
    Ipv6Addr::new(bytes)
}

/// Send one Router Solicitation and wait for its job to complete or time
/// out (§4.9 step 3), returning the terminal outcome and whatever SLAAC
/// result was recorded against it before completion.
fn solicit_router<D: NetDevice, const NCACHE: usize, const NPEND: usize, const NROUTE: usize>(
    dev: &mut D,
    cache: &mut NeighbourCache<(), NCACHE>,
    pending: &mut PendingSolicitTable<(), NPEND>,
    routes: &mut Ipv6RoutingTable<(), NROUTE>,
    own_ll: MacAddr,
    local_address: Ipv6Addr,
) -> (Option<StackResult<u8>>, Option<ndp::RouterInfo>) {
    let now = dev.now_ms();
    let handle = pending.insert_almost((), now);

    let mut buf = [0_u8; ICMP6_BUF_LEN];
    let len = ndp::build_router_solicit(&mut buf, own_ll);
    if dev.send(Ipv6Addr::ALL_ROUTERS, &buf[..len]).is_err() {
        pending.kill(handle);
        return (Some(Err(StackError::NotSupported)), None);
    }
    pending.promote(handle);

    let mut rx_buf = [0_u8; ICMP6_BUF_LEN];
    loop {
        let now = dev.now_ms();
        pending.expire_timeouts(now);
        if pending.outcome(handle).is_some() {
            let info = pending.take_result(handle);
            let outcome = pending.outcome(handle).copied();
            return (outcome, info);
        }

        if let Some((src, len)) = dev.recv(&mut rx_buf) {
            let pseudo_header_sum = pseudo_header_checksum_incomplete(
                &src,
                &local_address,
                len as u32,
                NextHeader::Icmpv6,
            );
            if let Ok((Icmp6Type::NeighbourSolicit, DispatchOutcome::Reply { len: reply_len })) =
                icmp6_rx(&mut rx_buf, len, pseudo_header_sum, (), src, own_ll, cache, pending, routes)
            {
                let _ = dev.send(src, &rx_buf[..reply_len]);
            }
        }
    }
}

/// Run a DHCPv6 session to completion or timeout (§4.9 step 5), applying
/// whatever it commits through `SettingsSink`.
fn run_dhcp6<D: NetDevice, S: SettingsSink>(
    dev: &mut D,
    settings: &mut S,
    own_ll: MacAddr,
    local_address: Ipv6Addr,
    mode: Dhcp6Mode,
    router: Option<ndp::RouterInfo>,
) -> StackResult<AutoconfOutcome> {
    let now = dev.now_ms();
    let mut client = Dhcp6Client::new(own_ll, local_address, mode, router, now);

    let mut tx_buf = [0_u8; DHCP6_BUF_LEN];
    let mut rx_buf = [0_u8; DHCP6_BUF_LEN];

    let len = client.build_tx(&mut tx_buf)?;
    dev.send(Ipv6Addr::ALL_DHCP_SERVERS, &tx_buf[..len])?;

    loop {
        let now = dev.now_ms();
        match client.poll_timer(now) {
            TimerOutcome::TimedOut => return Ok(AutoconfOutcome::TimedOut),
            TimerOutcome::Retransmit => {
                let len = client.build_tx(&mut tx_buf)?;
                dev.send(Ipv6Addr::ALL_DHCP_SERVERS, &tx_buf[..len])?;
            }
            TimerOutcome::Waiting => {}
        }

        if let Some((_, len)) = dev.recv(&mut rx_buf) {
            if let Some(result) = client.process_rx(&rx_buf[..len], now)? {
                if let Some(addr) = result.address {
                    settings.store_address(addr, 64);
                }
                if let Some(dns) = result.dns_server {
                    settings.store_dns(dns);
                }
                return Ok(AutoconfOutcome::Dhcp6Completed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    extern crate std;
    use std::vec::Vec;

    struct FakeDevice {
        ll: MacAddr,
        now: u64,
        link_up_at: u64,
        outbox: Vec<(Ipv6Addr, Vec<u8>)>,
        inbox: Vec<(Ipv6Addr, Vec<u8>)>,
    }

    impl NetDevice for FakeDevice {
        fn link_layer_address(&self) -> MacAddr {
            self.ll
        }
        fn link_is_up(&mut self) -> bool {
            self.now >= self.link_up_at
        }
        fn now_ms(&mut self) -> u64 {
            // Jump the clock forward by more than any deadline this module
            // arms, so tests converge in a handful of calls instead of
            // looping millisecond-by-millisecond.
            self.now += 6_001;
            self.now
        }
        fn send(&mut self, dst: Ipv6Addr, payload: &[u8]) -> StackResult<()> {
            self.outbox.push((dst, payload.to_vec()));
            Ok(())
        }
        fn recv(&mut self, buf: &mut [u8]) -> Option<(Ipv6Addr, usize)> {
            let (src, payload) = self.inbox.pop()?;
            let len = payload.len();
            buf[..len].copy_from_slice(&payload);
            Some((src, len))
        }
    }

    #[derive(Default)]
    struct RecordingSettings {
        addresses: Vec<(Ipv6Addr, u8)>,
        gateway: Option<Ipv6Addr>,
        dns: Option<Ipv6Addr>,
    }

    impl SettingsSink for RecordingSettings {
        fn store_address(&mut self, addr: Ipv6Addr, prefix_len: u8) {
            self.addresses.push((addr, prefix_len));
        }
        fn store_gateway(&mut self, gateway: Ipv6Addr) {
            self.gateway = Some(gateway);
        }
        fn store_dns(&mut self, dns: Ipv6Addr) {
            self.dns = Some(dns);
        }
    }

    #[test]
    fn link_wait_times_out_without_carrier() {
        let mut dev = FakeDevice {
            ll: MacAddr::new([0x02, 0, 0, 0, 0, 1]),
            now: 0,
            link_up_at: u64::MAX,
            outbox: Vec::new(),
            inbox: Vec::new(),
        };
        let mut settings = RecordingSettings::default();
        let mut cache: NeighbourCache<(), 4> = NeighbourCache::new(());
        let mut pending: PendingSolicitTable<(), 4> = PendingSolicitTable::new(());
        let mut routes: Ipv6RoutingTable<(), 4> = Ipv6RoutingTable::new();

        let result = ip6_autoconf(&mut dev, &mut settings, &mut cache, &mut pending, &mut routes);
        assert_eq!(result, Err(StackError::TimedOut));
    }

    #[test]
    fn no_router_answer_falls_back_to_dhcp6_and_times_out() {
        let mut dev = FakeDevice {
            ll: MacAddr::new([0x02, 0, 0, 0, 0, 1]),
            now: 0,
            link_up_at: 0,
            outbox: Vec::new(),
            inbox: Vec::new(),
        };
        let mut settings = RecordingSettings::default();
        let mut cache: NeighbourCache<(), 4> = NeighbourCache::new(());
        let mut pending: PendingSolicitTable<(), 4> = PendingSolicitTable::new(());
        let mut routes: Ipv6RoutingTable<(), 4> = Ipv6RoutingTable::new();

        let result = ip6_autoconf(&mut dev, &mut settings, &mut cache, &mut pending, &mut routes);
        assert_eq!(result, Ok(AutoconfOutcome::TimedOut));
        // Link-local address is still installed even when nothing answers.
        assert!(settings.addresses.iter().any(|(_, len)| *len == 64));
    }
}
