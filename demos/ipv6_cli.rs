//! `ipv6`/`dhcp6` command-line demo.
//!
//! Mirrors `examples/original_source/src/hci/commands/ipv6_cmd.c`'s
//! argument parsing and dispatch (`ipv6_exec`, `ipv6_each_device[_name]`,
//! `dhcp6_exec`) over a couple of in-memory interfaces, since this crate
//! is `no_std`/driver-agnostic and has no real network device of its own.
//! `dhcp6` remains the original source's literal stub.

use std::collections::VecDeque;
use std::env;

use ip6core::*;

/// A fake interface: no real medium, just a queue of canned replies the
/// demo's scenario preloads before running `ip6_autoconf`.
struct DemoNic {
    name: &'static str,
    mac: MacAddr,
    now: u64,
    inbox: VecDeque<(Ipv6Addr, Vec<u8>)>,
    sent: Vec<(Ipv6Addr, Vec<u8>)>,
}

impl DemoNic {
    fn new(name: &'static str, mac: [u8; 6]) -> Self {
        DemoNic {
            name,
            mac: MacAddr::new(mac),
            now: 0,
            inbox: VecDeque::new(),
            sent: Vec::new(),
        }
    }
}

impl NetDevice for DemoNic {
    fn link_layer_address(&self) -> MacAddr {
        self.mac
    }

    fn link_is_up(&mut self) -> bool {
        true
    }

    fn now_ms(&mut self) -> u64 {
        self.now += 500;
        self.now
    }

    fn send(&mut self, dst: Ipv6Addr, payload: &[u8]) -> StackResult<()> {
        self.sent.push((dst, payload.to_vec()));
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8]) -> Option<(Ipv6Addr, usize)> {
        let (src, payload) = self.inbox.pop_front()?;
        let len = payload.len();
        buf[..len].copy_from_slice(&payload);
        Some((src, len))
    }
}

/// Settings sink that just prints what autoconf learned, standing in for
/// the original source's settings DB.
struct PrintingSettings<'a> {
    iface: &'a str,
}

impl<'a> SettingsSink for PrintingSettings<'a> {
    fn store_address(&mut self, addr: Ipv6Addr, prefix_len: u8) {
        println!("{}: ip6 = {}/{}", self.iface, format_addr(&addr), prefix_len);
    }
    fn store_gateway(&mut self, gateway: Ipv6Addr) {
        println!("{}: gateway6 = {}", self.iface, format_addr(&gateway));
    }
    fn store_dns(&mut self, dns: Ipv6Addr) {
        println!("{}: dns6 = {}", self.iface, format_addr(&dns));
    }
}

struct StringSink(String);

impl uWrite for StringSink {
    type Error = core::convert::Infallible;
    fn write_str(&mut self, s: &str) -> Result<(), Self::Error> {
        self.0.push_str(s);
        Ok(())
    }
}

fn format_addr(addr: &Ipv6Addr) -> String {
    let mut sink = StringSink(String::new());
    ufmt::uwrite!(&mut sink, "{}", addr).expect("formatting an address cannot fail");
    sink.0
}

fn addr_from_octets(octets: [u8; 16]) -> Ipv6Addr {
    Ipv6Addr::new(octets)
}

fn write_prefix_info(buf: &mut [u8], prefix_length: u8, flags: u8, prefix: Ipv6Addr) {
    buf[0] = 3; // Prefix Information
    buf[1] = 4; // length, 8-byte units
    buf[2] = prefix_length;
    buf[3] = flags;
    buf[4..8].copy_from_slice(&2_592_000_u32.to_be_bytes()); // valid lifetime
    buf[8..12].copy_from_slice(&604_800_u32.to_be_bytes()); // preferred lifetime
    buf[12..16].copy_from_slice(&[0, 0, 0, 0]); // reserved
    buf[16..32].copy_from_slice(&prefix.to_be_bytes());
}

/// Build a canned Router Advertisement: one Prefix Information option,
/// optionally carrying the Managed/Other-Config flags. `router`/`local` are
/// the source/destination addresses `solicit_router` will use to verify the
/// checksum, so the canned message carries a real one.
fn router_advert(
    flags: u8,
    prefix_length: u8,
    prefix_flags: u8,
    prefix: Ipv6Addr,
    router: Ipv6Addr,
    local: Ipv6Addr,
) -> Vec<u8> {
    let mut buf = vec![0_u8; 16 + 32];
    buf[0] = 134; // Router Advertisement
    buf[5] = flags;
    write_prefix_info(&mut buf[16..], prefix_length, prefix_flags, prefix);
    let sum = pseudo_header_checksum_incomplete(&router, &local, buf.len() as u32, NextHeader::Icmpv6)
        + calc_ip_checksum_incomplete(&buf);
    let checksum = calc_ip_checksum_finalize(sum);
    buf[2] = (checksum >> 8) as u8;
    buf[3] = checksum as u8;
    buf
}

/// Derive the same transaction ID `Dhcp6Client` would for this MAC, so a
/// canned Reply matches it (the low 24 bits of the link-layer address,
/// per `dhcp6_tx`).
fn derive_xid(mac: [u8; 6]) -> u32 {
    ((mac[3] as u32) << 16) | ((mac[4] as u32) << 8) | mac[5] as u32
}

/// Build a canned rapid-commit DHCPv6 Reply: CLIENTID echoing `client_mac`,
/// a SERVERID, RAPID_COMMIT, an IA_NA/IAADDR assigning `address`, and a
/// DNS_SERVERS option carrying `dns`.
fn dhcp6_reply(client_mac: [u8; 6], server_duid: &[u8], address: Ipv6Addr, dns: Ipv6Addr) -> Vec<u8> {
    let client_duid = Duid::new_ll(MacAddr::new(client_mac));
    let server_duid = Duid::from_bytes(server_duid).expect("valid demo DUID");

    let mut buf = vec![0_u8; 256];
    let mut header = [0_u8; 4];
    encode_header(&mut header, MessageType::Reply, derive_xid(client_mac));
    buf[..4].copy_from_slice(&header);
    let mut pos = 4;

    pos = write_opt(&mut buf, pos, OptionCode::ClientId, client_duid.as_bytes());
    pos = write_opt(&mut buf, pos, OptionCode::ServerId, server_duid.as_bytes());
    pos = write_opt(&mut buf, pos, OptionCode::RapidCommit, &[]);

    let ia_addr_len = OptionHeader::BYTE_LEN + IaAddrFixed::BYTE_LEN;
    let ia_na_len = IaNaFixed::BYTE_LEN + ia_addr_len;
    OptionHeader { code: OptionCode::IaNa, length: ia_na_len as u16 }
        .write_bytes(&mut buf[pos..pos + OptionHeader::BYTE_LEN]);
    pos += OptionHeader::BYTE_LEN;
    IaNaFixed { iaid: 0xdead_beef, t1: 3600, t2: 3600 }.write_bytes(&mut buf[pos..pos + IaNaFixed::BYTE_LEN]);
    pos += IaNaFixed::BYTE_LEN;
    OptionHeader { code: OptionCode::IaAddr, length: IaAddrFixed::BYTE_LEN as u16 }
        .write_bytes(&mut buf[pos..pos + OptionHeader::BYTE_LEN]);
    pos += OptionHeader::BYTE_LEN;
    IaAddrFixed { addr: address, preferred_lifetime: 3600, valid_lifetime: 3600 }
        .write_bytes(&mut buf[pos..pos + IaAddrFixed::BYTE_LEN]);
    pos += IaAddrFixed::BYTE_LEN;

    pos = write_opt(&mut buf, pos, OptionCode::DnsServers, &dns.to_be_bytes());

    buf.truncate(pos);
    buf
}

fn write_opt(buf: &mut [u8], pos: usize, code: OptionCode, data: &[u8]) -> usize {
    OptionHeader { code, length: data.len() as u16 }.write_bytes(&mut buf[pos..pos + OptionHeader::BYTE_LEN]);
    let start = pos + OptionHeader::BYTE_LEN;
    buf[start..start + data.len()].copy_from_slice(data);
    start + data.len()
}

/// Build the two demo interfaces: `eth0` has a router that authorises
/// SLAAC outright, `eth1` has a router that sets Managed and hands the
/// address off to a (simulated) DHCPv6 server instead.
fn demo_interfaces() -> Vec<DemoNic> {
    let mut eth0 = DemoNic::new("eth0", [0x52, 0x54, 0x00, 0x12, 0x34, 0x56]);
    let local0 = Ipv6Addr::link_local_from_ll(&eth0.mac.0);
    let router0 = addr_from_octets([0xfe, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
    let prefix0 = addr_from_octets([0x20, 0x01, 0x0d, 0xb8, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    eth0.inbox
        .push_back((router0, router_advert(0, 64, 0x40, prefix0, router0, local0)));

    let mut eth1 = DemoNic::new("eth1", [0x52, 0x54, 0x00, 0xab, 0xcd, 0xef]);
    let local1 = Ipv6Addr::link_local_from_ll(&eth1.mac.0);
    let router1 = addr_from_octets([0xfe, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2]);
    let prefix1 = addr_from_octets([0x20, 0x01, 0x0d, 0xb8, 0, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    eth1.inbox
        .push_back((router1, router_advert(0x80, 64, 0, prefix1, router1, local1)));
    let assigned1 = addr_from_octets([0x20, 0x01, 0x0d, 0xb8, 0, 2, 0, 0, 0, 0, 0, 0, 0x10, 0, 0, 0]);
    let dns1 = addr_from_octets([0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x53]);
    eth1.inbox
        .push_back((router1, dhcp6_reply(eth1.mac.0, &[0, 2, 1, 2], assigned1, dns1)));

    vec![eth0, eth1]
}

fn ipv6_one_device(nic: &mut DemoNic) -> i32 {
    let mut settings = PrintingSettings { iface: nic.name };
    let mut cache: NeighbourCache<(), 8> = NeighbourCache::new(());
    let mut pending: PendingSolicitTable<(), 4> = PendingSolicitTable::new(());
    let mut routes: Ipv6RoutingTable<(), 4> = Ipv6RoutingTable::new();

    match ip6_autoconf(nic, &mut settings, &mut cache, &mut pending, &mut routes) {
        Ok(_) => 0,
        Err(err) => {
            println!("Could not configure {}: {:?}", nic.name, err);
            1
        }
    }
}

fn ipv6_each_device_name(names: &[&str], fleet: &mut [DemoNic]) -> i32 {
    for name in names {
        match fleet.iter_mut().find(|n| &n.name == name) {
            Some(nic) => {
                if ipv6_one_device(nic) == 0 {
                    return 0;
                }
            }
            None => println!("No such interface: {}", name),
        }
    }
    println!("Could not configure any interface.");
    1
}

fn ipv6_each_device(fleet: &mut [DemoNic]) -> i32 {
    for nic in fleet.iter_mut() {
        if ipv6_one_device(nic) == 0 {
            return 0;
        }
    }
    println!("Could not configure any interface.");
    1
}

fn ipv6_syntax() {
    println!(
        "Usage:\n  ipv6_cli ipv6 <interface> [<interface> ...]\n  ipv6_cli ipv6 any\n\n\
         Prepare a network interface for use with IPv6"
    );
}

fn ipv6_exec(argv: &[String]) -> i32 {
    let mut names: Vec<&str> = Vec::new();
    for arg in argv {
        match arg.as_str() {
            "-h" | "--help" => {
                ipv6_syntax();
                return 1;
            }
            other if other.starts_with('-') => {
                ipv6_syntax();
                return 1;
            }
            other => names.push(other),
        }
    }
    if names.is_empty() {
        ipv6_syntax();
        return 1;
    }

    let mut fleet = demo_interfaces();
    if names == ["any"] {
        ipv6_each_device(&mut fleet)
    } else {
        ipv6_each_device_name(&names, &mut fleet)
    }
}

fn dhcp6_exec(_argv: &[String]) -> i32 {
    println!("DHCPv6 is not yet implemented.");
    0
}

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        println!("Usage:\n  ipv6_cli ipv6 ...\n  ipv6_cli dhcp6");
        std::process::exit(1);
    }
    let rc = match args[1].as_str() {
        "ipv6" => ipv6_exec(&args[2..]),
        "dhcp6" => dhcp6_exec(&args[2..]),
        _ => {
            println!("Usage:\n  ipv6_cli ipv6 ...\n  ipv6_cli dhcp6");
            1
        }
    };
    std::process::exit(rc);
}
