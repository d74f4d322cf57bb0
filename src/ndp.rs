//! Neighbour Discovery Protocol (RFC 4861): options, neighbour cache,
//! pending router-solicit table, and the RS/RA/NS/NA handlers.
//!
//! Grounded on `examples/original_source/src/net/ndp.c` and
//! `examples/original_source/src/include/gpxe/ndp.h`.

use crate::errors::{StackError, StackResult};
use crate::ipv6::{NextHeader, Ipv6RoutingTable, RouteEntry};
use crate::{enum_with_unknown, write_host_id, MacAddr, Ipv6Addr};

use byte_struct::*;

enum_with_unknown! {
    /// NDP option type codes (§4.1: Source-LL, Target-LL, Prefix-Info, MTU).
    pub enum NdpOptionType(u8) {
        /// Source Link-Layer Address
        SourceLinkLayer = 1,
        /// Target Link-Layer Address
        TargetLinkLayer = 2,
        /// Prefix Information
        PrefixInfo = 3,
        /// MTU
        Mtu = 5,
    }
}

impl ByteStructLen for NdpOptionType {
    const BYTE_LEN: usize = 1;
}

impl ByteStruct for NdpOptionType {
    fn read_bytes(bytes: &[u8]) -> Self {
        Self::from(bytes[0])
    }
    fn write_bytes(&self, bytes: &mut [u8]) {
        bytes[0] = u8::from(*self);
    }
}

/// Source/Target Link-Layer Address option, Ethernet-sized (RFC 4861 §4.6.1).
#[derive(ByteStruct, Clone, Copy, Debug, PartialEq)]
#[byte_struct_be]
pub struct LinkLayerOption {
    /// 1 (Source) or 2 (Target)
    pub option_type: NdpOptionType,
    /// Length in 8-byte units; always 1 for a 6-byte Ethernet address
    pub length: u8,
    /// Link-layer address
    pub address: MacAddr,
}

impl LinkLayerOption {
    /// Build a Source-LL option for `address`.
    pub fn source(address: MacAddr) -> Self {
        LinkLayerOption {
            option_type: NdpOptionType::SourceLinkLayer,
            length: 1,
            address,
        }
    }

    /// Build a Target-LL option for `address`.
    pub fn target(address: MacAddr) -> Self {
        LinkLayerOption {
            option_type: NdpOptionType::TargetLinkLayer,
            length: 1,
            address,
        }
    }
}

/// Prefix Information option (RFC 4861 §4.6.2), fixed at 4 8-byte units.
#[derive(ByteStruct, Clone, Copy, Debug, PartialEq)]
#[byte_struct_be]
pub struct PrefixInfoOption {
    /// 3
    pub option_type: NdpOptionType,
    /// Always 4
    pub length: u8,
    /// Number of leading bits of the prefix that are valid
    pub prefix_length: u8,
    /// Bit 0x80 = on-link (L), bit 0x40 = autonomous address-configuration (A)
    pub flags: u8,
    /// Valid lifetime, seconds
    pub valid_lifetime: u32,
    /// Preferred lifetime, seconds
    pub preferred_lifetime: u32,
    _reserved: u32,
    /// The advertised prefix
    pub prefix: Ipv6Addr,
}

impl PrefixInfoOption {
    const FLAG_AUTONOMOUS: u8 = 0x40;

    /// Whether the Autonomous (SLAAC) flag is set.
    pub fn autoconf_allowed(&self) -> bool {
        self.flags & Self::FLAG_AUTONOMOUS != 0
    }
}

/// MTU option (RFC 4861 §4.6.4).
#[derive(ByteStruct, Clone, Copy, Debug, PartialEq)]
#[byte_struct_be]
pub struct MtuOption {
    /// 5
    pub option_type: NdpOptionType,
    /// Always 1
    pub length: u8,
    _reserved: u16,
    /// Recommended MTU
    pub mtu: u32,
}

/// One decoded NDP option.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NdpOption {
    /// Source Link-Layer Address
    SourceLinkLayer(MacAddr),
    /// Target Link-Layer Address
    TargetLinkLayer(MacAddr),
    /// Prefix Information
    PrefixInfo(PrefixInfoOption),
    /// MTU
    Mtu(u32),
    /// A recognised-but-unhandled or unknown option type; skipped.
    Other { option_type: u8, length_words: u8 },
}

/// Iterator over a stream of NDP TLV options (§4.1). Restartable from any
/// option boundary; a zero `length` field aborts the whole sequence with
/// `Invalid` (it would otherwise loop forever), matching the distilled
/// parsing rule.
pub struct NdpOptions<'a> {
    buf: &'a [u8],
    failed: bool,
}

impl<'a> NdpOptions<'a> {
    /// Start parsing from the beginning of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        NdpOptions { buf, failed: false }
    }
}

impl<'a> Iterator for NdpOptions<'a> {
    type Item = StackResult<NdpOption>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.buf.is_empty() {
            return None;
        }
        if self.buf.len() < 2 {
            self.failed = true;
            return Some(Err(StackError::Invalid));
        }
        let option_type = self.buf[0];
        let length_words = self.buf[1];
        if length_words == 0 {
            self.failed = true;
            return Some(Err(StackError::Invalid));
        }
        let total_len = length_words as usize * 8;
        if self.buf.len() < total_len {
            self.failed = true;
            return Some(Err(StackError::Invalid));
        }
        let this_option = &self.buf[..total_len];
        self.buf = &self.buf[total_len..];

        let parsed = match option_type {
            1 if total_len >= LinkLayerOption::BYTE_LEN => {
                NdpOption::SourceLinkLayer(LinkLayerOption::read_bytes(this_option).address)
            }
            2 if total_len >= LinkLayerOption::BYTE_LEN => {
                NdpOption::TargetLinkLayer(LinkLayerOption::read_bytes(this_option).address)
            }
            3 if total_len >= PrefixInfoOption::BYTE_LEN => {
                NdpOption::PrefixInfo(PrefixInfoOption::read_bytes(this_option))
            }
            5 if total_len >= MtuOption::BYTE_LEN => {
                NdpOption::Mtu(MtuOption::read_bytes(this_option).mtu)
            }
            other => NdpOption::Other {
                option_type: other,
                length_words,
            },
        };
        Some(Ok(parsed))
    }
}

/// Neighbour cache entry state (§3).
#[derive(uDebug, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighbourState {
    /// Empty/evicted slot
    Invalid,
    /// Resolution in flight, no answer yet
    Incomplete,
    /// Confirmed good
    Reachable,
    /// Reserved for future reachability-confirmation timers (unused by this core)
    Delay,
    /// Reserved for future reachability-confirmation timers (unused by this core)
    Probe,
    /// Reserved for future reachability-confirmation timers (unused by this core)
    Stale,
}

use ufmt::derive::uDebug;

/// One neighbour cache slot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NeighbourEntry<Dev: Copy + PartialEq> {
    /// Owning network device
    pub netdev: Dev,
    /// The neighbour's IPv6 address
    pub addr: Ipv6Addr,
    /// The neighbour's link-layer address, if known
    pub ll_addr: MacAddr,
    /// Current state
    pub state: NeighbourState,
}

impl<Dev: Copy + PartialEq> NeighbourEntry<Dev> {
    fn invalid(netdev: Dev) -> Self {
        NeighbourEntry {
            netdev,
            addr: Ipv6Addr::UNSPECIFIED,
            ll_addr: MacAddr::ANY,
            state: NeighbourState::Invalid,
        }
    }
}

/// Outcome of a resolution attempt (§4.3 `resolve`).
#[derive(Debug, PartialEq)]
pub enum Resolution {
    /// The link-layer address to use right away.
    Resolved(MacAddr),
    /// No answer yet; an NS has been (or was already) sent.
    Pending,
}

/// Bounded FIFO neighbour table; insertion overwrites the oldest slot
/// (§3). `Dev` is a netdev handle supplied by the embedding application
/// (e.g. an index or a `&'static str` name); it must be small and `Copy`.
pub struct NeighbourCache<Dev: Copy + PartialEq, const N: usize> {
    entries: [NeighbourEntry<Dev>; N],
    next_index: usize,
}

impl<Dev: Copy + PartialEq, const N: usize> NeighbourCache<Dev, N> {
    /// An empty cache, `default_netdev` filling unused slots (never matched,
    /// since their state is Invalid).
    pub fn new(default_netdev: Dev) -> Self {
        NeighbourCache {
            entries: [NeighbourEntry::invalid(default_netdev); N],
            next_index: 0,
        }
    }

    /// First non-Invalid entry with a matching address.
    pub fn find(&self, addr: &Ipv6Addr) -> Option<&NeighbourEntry<Dev>> {
        self.entries
            .iter()
            .find(|e| e.state != NeighbourState::Invalid && &e.addr == addr)
    }

    fn find_mut(&mut self, addr: &Ipv6Addr) -> Option<&mut NeighbourEntry<Dev>> {
        self.entries
            .iter_mut()
            .find(|e| e.state != NeighbourState::Invalid && &e.addr == addr)
    }

    /// Overwrite the next ring slot (§4.3 `insert`).
    pub fn insert(&mut self, netdev: Dev, addr: Ipv6Addr, ll_addr: MacAddr, state: NeighbourState) {
        self.entries[self.next_index] = NeighbourEntry {
            netdev,
            addr,
            ll_addr,
            state,
        };
        self.next_index = (self.next_index + 1) % N;
    }

    /// Mark a matching entry's link-layer address known and Reachable, if
    /// present (used when a Router Advertisement carries Source-LL, and
    /// when a solicited NA confirms a neighbour).
    pub fn confirm(&mut self, addr: &Ipv6Addr, ll_addr: MacAddr) -> bool {
        if let Some(entry) = self.find_mut(addr) {
            entry.ll_addr = ll_addr;
            entry.state = NeighbourState::Reachable;
            true
        } else {
            false
        }
    }

    /// Number of occupied (non-Invalid) slots. Bounded by `N` (§8 invariant).
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.state != NeighbourState::Invalid)
            .count()
    }

    /// Resolve `dest` to a link-layer address (§4.3 `resolve`). A Reachable
    /// hit returns it immediately; an Incomplete hit returns `Pending`
    /// without retransmitting; a miss inserts an Incomplete entry and tells
    /// the caller to send one Neighbour Solicitation. This core relies on
    /// upper-layer retransmission rather than a periodic retry here.
    pub fn resolve(&mut self, netdev: Dev, dest: &Ipv6Addr) -> ResolveOutcome {
        match self.find(dest) {
            Some(entry) if entry.state == NeighbourState::Reachable => ResolveOutcome {
                resolution: Resolution::Resolved(entry.ll_addr),
                solicit: false,
            },
            Some(_) => ResolveOutcome {
                resolution: Resolution::Pending,
                solicit: false,
            },
            None => {
                self.insert(netdev, *dest, MacAddr::ANY, NeighbourState::Incomplete);
                ResolveOutcome {
                    resolution: Resolution::Pending,
                    solicit: true,
                }
            }
        }
    }
}

/// Result of `NeighbourCache::resolve`, bundling whether an NS needs to be
/// transmitted by the caller.
pub struct ResolveOutcome {
    /// What the caller should do with the destination address right now.
    pub resolution: Resolution,
    /// `true` if the caller must now transmit a Neighbour Solicitation.
    pub solicit: bool,
}

/// Status-code bitset accumulated while processing a Router Advertisement
/// (§3 "Pending router-solicit entry", §6 DHCPv6-trigger semantics).
pub mod router_solicit_code {
    /// No DHCPv6 follow-up required.
    pub const NONE: u8 = 0;
    /// The `M` (Managed) flag was set: run the full DHCPv6 exchange.
    pub const MANAGED: u8 = 1;
    /// The `O` (Other-config) flag was set: run DHCPv6 Information-Request only.
    pub const OTHER_CONF: u8 = 2;
}

/// Pending router-solicit entry state (§3).
#[derive(uDebug, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingState {
    /// Empty/evicted slot
    Invalid,
    /// RS built and about to be transmitted
    Almost,
    /// RS transmitted, awaiting RA
    Pending,
    /// RA processed; result available for one poll
    Complete,
}

/// SLAAC result extracted from a processed Router Advertisement (§4.6 step 6).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RouterInfo {
    /// The advertising router's address
    pub router: Ipv6Addr,
    /// The advertised prefix
    pub prefix: Ipv6Addr,
    /// The advertised prefix length, in bits
    pub prefix_length: u8,
    /// `true` if the router did not authorise SLAAC for this prefix
    pub no_address: bool,
}

/// One pending-solicit slot.
#[derive(Clone, Copy, Debug)]
struct PendingEntry<Dev: Copy + PartialEq> {
    netdev: Dev,
    state: PendingState,
    generation: u32,
    code: u8,
    result: Option<RouterInfo>,
    outcome: Option<StackResult<u8>>,
    deadline: u64,
}

impl<Dev: Copy + PartialEq> PendingEntry<Dev> {
    fn invalid(netdev: Dev) -> Self {
        PendingEntry {
            netdev,
            state: PendingState::Invalid,
            generation: 0,
            code: router_solicit_code::NONE,
            result: None,
            outcome: None,
            deadline: 0,
        }
    }
}

/// Handle to a pending-solicit slot: index plus a generation counter so a
/// late completion on a reused slot is ignored (§9 "Cyclic ownership" —
/// the arena + slot-index + generation pattern, here without the job
/// callback cycle since this core polls to completion instead).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JobHandle {
    index: usize,
    generation: u32,
}

/// Fixed retry timeout for a Router Solicit (§4.4), in milliseconds.
pub const ROUTER_SOLICIT_TIMEOUT_MS: u64 = 6_000;

/// Bounded FIFO pending-solicit table; same ring lifecycle as the
/// neighbour cache (§3, §4.4).
pub struct PendingSolicitTable<Dev: Copy + PartialEq, const N: usize> {
    entries: [PendingEntry<Dev>; N],
    next_index: usize,
}

impl<Dev: Copy + PartialEq, const N: usize> PendingSolicitTable<Dev, N> {
    /// An empty table.
    pub fn new(default_netdev: Dev) -> Self {
        PendingSolicitTable {
            entries: [PendingEntry::invalid(default_netdev); N],
            next_index: 0,
        }
    }

    /// Allocate a slot in state Almost for `netdev` (§4.4 step 2).
    pub fn insert_almost(&mut self, netdev: Dev, now: u64) -> JobHandle {
        let index = self.next_index;
        self.next_index = (self.next_index + 1) % N;
        let generation = self.entries[index].generation.wrapping_add(1);
        self.entries[index] = PendingEntry {
            netdev,
            state: PendingState::Almost,
            generation,
            code: router_solicit_code::NONE,
            result: None,
            outcome: None,
            deadline: now + ROUTER_SOLICIT_TIMEOUT_MS,
        };
        JobHandle { index, generation }
    }

    fn get_mut(&mut self, handle: JobHandle) -> Option<&mut PendingEntry<Dev>> {
        let entry = &mut self.entries[handle.index];
        if entry.generation == handle.generation && entry.state != PendingState::Invalid {
            Some(entry)
        } else {
            None
        }
    }

    /// Promote an Almost entry to Pending after a successful transmit
    /// (§4.4 step 4).
    pub fn promote(&mut self, handle: JobHandle) {
        if let Some(entry) = self.get_mut(handle) {
            entry.state = PendingState::Pending;
        }
    }

    /// Linear scan for the one Pending entry belonging to `netdev`
    /// (§4.4 "Find-by-netdev"): only its RA response is honoured.
    pub fn find_pending_by_netdev(&mut self, netdev: Dev) -> Option<JobHandle> {
        self.entries.iter().position(|e| e.netdev == netdev && e.state == PendingState::Pending).map(|index| JobHandle {
            index,
            generation: self.entries[index].generation,
        })
    }

    fn code_mut(&mut self, handle: JobHandle) -> Option<&mut u8> {
        self.get_mut(handle).map(|e| &mut e.code)
    }

    /// OR a status-code bit into the pending entry (§4.6 step 3).
    pub fn accumulate_code(&mut self, handle: JobHandle, bit: u8) {
        if let Some(code) = self.code_mut(handle) {
            *code |= bit;
        }
    }

    /// Complete the job with a terminal outcome (§4.6 step 8). The slot
    /// stays readable (state `Complete`, not `Invalid`) so `take_result`/
    /// `code` can still be read back after `outcome` first reports done;
    /// it is only actually freed when the ring later overwrites it via
    /// `insert_almost`, or explicitly via `kill`.
    pub fn complete(&mut self, handle: JobHandle, outcome: StackResult<u8>) {
        if let Some(entry) = self.get_mut(handle) {
            entry.outcome = Some(outcome);
            entry.state = PendingState::Complete;
        }
    }

    /// Store the SLAAC result extracted from an RA (§4.6 step 6).
    pub fn set_result(&mut self, handle: JobHandle, result: RouterInfo) {
        if let Some(entry) = self.get_mut(handle) {
            entry.result = Some(result);
        }
    }

    /// Take the accumulated status code, for completing with the right bits.
    pub fn code(&mut self, handle: JobHandle) -> u8 {
        self.get_mut(handle).map(|e| e.code).unwrap_or(router_solicit_code::NONE)
    }

    /// Take the RA-derived result, if any was recorded before completion.
    pub fn take_result(&mut self, handle: JobHandle) -> Option<RouterInfo> {
        self.get_mut(handle).and_then(|e| e.result.take())
    }

    /// Poll for a terminal outcome without consuming it.
    pub fn outcome(&self, handle: JobHandle) -> Option<&StackResult<u8>> {
        let entry = &self.entries[handle.index];
        if entry.generation == handle.generation {
            entry.outcome.as_ref()
        } else {
            None
        }
    }

    /// Cancel every entry whose retry deadline has passed: per §4.4 "Timer
    /// expiry", there is no retransmission, so this is cancellation, not a
    /// resend.
    pub fn expire_timeouts(&mut self, now: u64) {
        for entry in self.entries.iter_mut() {
            if entry.state == PendingState::Pending && now >= entry.deadline {
                entry.outcome = Some(Err(StackError::Canceled));
                entry.state = PendingState::Invalid;
            }
        }
    }

    /// External cancellation (§4.4 "Kill"): idempotent.
    pub fn kill(&mut self, handle: JobHandle) {
        if let Some(entry) = self.get_mut(handle) {
            entry.code = router_solicit_code::NONE;
            entry.outcome = Some(Err(StackError::Canceled));
            entry.state = PendingState::Invalid;
        }
    }
}

/// Build a Router Solicitation body: ICMPv6 type 133, code 0, 4 reserved
/// octets, then a Source-LL option (§4.4 step 1; adopts "RS with
/// Source-LL" per §9).
pub fn build_router_solicit(buf: &mut [u8], own_ll: MacAddr) -> usize {
    buf[0] = 133; // type
    buf[1] = 0; // code
    buf[2] = 0;
    buf[3] = 0; // checksum placeholder, filled by caller
    buf[4] = 0;
    buf[5] = 0;
    buf[6] = 0;
    buf[7] = 0; // reserved
    let opt = LinkLayerOption::source(own_ll);
    opt.write_bytes(&mut buf[8..8 + LinkLayerOption::BYTE_LEN]);
    8 + LinkLayerOption::BYTE_LEN
}

/// Build a Neighbour Solicitation body: type 135, code 0, reserved,
/// target, then Source-LL (§4.6 "Emit NS").
pub fn build_neighbour_solicit(buf: &mut [u8], target: Ipv6Addr, own_ll: MacAddr) -> usize {
    buf[0] = 135;
    buf[1] = 0;
    buf[2] = 0;
    buf[3] = 0;
    for b in &mut buf[4..8] {
        *b = 0;
    }
    buf[8..24].copy_from_slice(&target.to_be_bytes());
    let opt = LinkLayerOption::source(own_ll);
    opt.write_bytes(&mut buf[24..24 + LinkLayerOption::BYTE_LEN]);
    24 + LinkLayerOption::BYTE_LEN
}

/// Build a Neighbour Advertisement body: type 136, flags Solicited|Override,
/// target, then Target-LL (§4.6 "Emit NA").
pub fn build_neighbour_advert(buf: &mut [u8], target: Ipv6Addr, own_ll: MacAddr) -> usize {
    const FLAG_SOLICITED: u8 = 0x40;
    const FLAG_OVERRIDE: u8 = 0x20;
    buf[0] = 136;
    buf[1] = 0;
    buf[2] = 0;
    buf[3] = 0;
    buf[4] = FLAG_SOLICITED | FLAG_OVERRIDE;
    buf[5] = 0;
    buf[6] = 0;
    buf[7] = 0;
    buf[8..24].copy_from_slice(&target.to_be_bytes());
    let opt = LinkLayerOption::target(own_ll);
    opt.write_bytes(&mut buf[24..24 + LinkLayerOption::BYTE_LEN]);
    24 + LinkLayerOption::BYTE_LEN
}

const RA_FIXED_LEN: usize = 16; // 4-byte ICMPv6 header + 12-byte RA body
const NA_FIXED_LEN: usize = 24; // 4-byte ICMPv6 header + 4-byte flags + 16-byte target
const FLAG_MANAGED: u8 = 0x80;
const FLAG_OTHER_CONF: u8 = 0x40;
const FLAG_SOLICITED: u8 = 0x40;

/// Process a Router Advertisement (§4.6 "Process RA"). `msg` is the full
/// ICMPv6 message (4-byte common header included). Returns `Ok(None)` if
/// there was no matching pending solicit (discarded as unsolicited);
/// otherwise the job handle that was completed, so the caller (the
/// orchestrator) can read its outcome.
pub fn process_router_advert<Dev: Copy + PartialEq, const NCACHE: usize, const NPEND: usize, const NROUTE: usize>(
    msg: &[u8],
    netdev: Dev,
    router_src: Ipv6Addr,
    cache: &mut NeighbourCache<Dev, NCACHE>,
    pending: &mut PendingSolicitTable<Dev, NPEND>,
    routes: &mut Ipv6RoutingTable<Dev, NROUTE>,
    own_ll: &[u8],
) -> StackResult<Option<JobHandle>> {
    let handle = match pending.find_pending_by_netdev(netdev) {
        Some(h) => h,
        None => return Ok(None),
    };

    if msg.len() < RA_FIXED_LEN {
        pending.complete(handle, Err(StackError::Invalid));
        return Err(StackError::Invalid);
    }

    let flags = msg[5];
    if flags & FLAG_MANAGED != 0 {
        pending.accumulate_code(handle, router_solicit_code::MANAGED);
    }
    if flags & FLAG_OTHER_CONF != 0 {
        pending.accumulate_code(handle, router_solicit_code::OTHER_CONF);
    }

    let mut saw_prefix = false;
    let mut host_id = [0_u8; 8];
    write_host_id(&mut host_id, own_ll);

    for option in NdpOptions::new(&msg[RA_FIXED_LEN..]) {
        match option {
            Ok(NdpOption::PrefixInfo(info)) => {
                saw_prefix = true;
                // Round the prefix length up to the next multiple of 8 for
                // byte-granular copy (§9 "prefix-length rounding": the
                // round-up revision is adopted).
                let rounded_bytes = ((info.prefix_length as usize) + 7) / 8;
                let rounded_bytes = rounded_bytes.min(16);

                let mut host_address = [0_u8; 16];
                host_address[..rounded_bytes].copy_from_slice(&info.prefix.to_be_bytes()[..rounded_bytes]);
                if (info.prefix_length as usize) < 128 {
                    host_address[8..16].copy_from_slice(&host_id);
                }

                let router_info = RouterInfo {
                    router: router_src,
                    prefix: info.prefix,
                    prefix_length: info.prefix_length,
                    no_address: !info.autoconf_allowed(),
                };
                pending.set_result(handle, router_info);

                if info.autoconf_allowed() && routes.lookup(&info.prefix).is_err() {
                    let _ = routes.add(RouteEntry {
                        netdev,
                        prefix: info.prefix,
                        prefix_len: info.prefix_length,
                        local_address: Ipv6Addr::new(host_address),
                        gateway: router_src,
                    });
                }
            }
            Ok(NdpOption::SourceLinkLayer(ll)) => {
                if cache.find(&router_src).is_none() {
                    cache.insert(netdev, router_src, ll, NeighbourState::Reachable);
                }
            }
            Ok(_) => {}
            Err(e) => {
                pending.complete(handle, Err(e));
                return Err(e);
            }
        }
    }

    if !saw_prefix {
        pending.complete(handle, Err(StackError::NotFound));
        return Ok(Some(handle));
    }

    let code = pending.code(handle);
    pending.complete(handle, Ok(code));
    Ok(Some(handle))
}

/// Process a Neighbour Advertisement (§4.6 "Process NA").
pub fn process_neighbour_advert<Dev: Copy + PartialEq, const N: usize>(
    msg: &[u8],
    cache: &mut NeighbourCache<Dev, N>,
) -> StackResult<()> {
    if msg.len() < NA_FIXED_LEN + LinkLayerOption::BYTE_LEN {
        return Err(StackError::Invalid);
    }
    let flags = msg[4];
    if flags & FLAG_SOLICITED == 0 {
        return Ok(()); // dropped: unsolicited
    }
    let mut target_bytes = [0_u8; 16];
    target_bytes.copy_from_slice(&msg[8..24]);
    let target = Ipv6Addr::new(target_bytes);

    if cache.find(&target).is_none() {
        return Ok(()); // not present: log and drop
    }

    for option in NdpOptions::new(&msg[NA_FIXED_LEN..]) {
        match option {
            Ok(NdpOption::TargetLinkLayer(ll)) => {
                cache.confirm(&target, ll);
                break;
            }
            Ok(_) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Process a Neighbour Solicitation (§4.6 "Process NS"): emit an NA if
/// `target` is one of ours. `is_ours` stands in for
/// `net_protocol.check(netdev, target)`.
pub fn neighbour_solicit_target(msg: &[u8]) -> StackResult<Ipv6Addr> {
    if msg.len() < 24 {
        return Err(StackError::Invalid);
    }
    let mut target_bytes = [0_u8; 16];
    target_bytes.copy_from_slice(&msg[8..24]);
    Ok(Ipv6Addr::new(target_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[test]
    fn option_round_trip() {
        let opt = LinkLayerOption::source(mac(1));
        let mut buf = [0_u8; LinkLayerOption::BYTE_LEN];
        opt.write_bytes(&mut buf);
        let mut options = NdpOptions::new(&buf);
        let parsed = options.next().unwrap().unwrap();
        assert_eq!(parsed, NdpOption::SourceLinkLayer(mac(1)));
        assert!(options.next().is_none());
    }

    #[test]
    fn zero_length_option_rejected() {
        let buf = [1_u8, 0, 0, 0, 0, 0, 0, 0];
        let mut options = NdpOptions::new(&buf);
        assert_eq!(options.next(), Some(Err(StackError::Invalid)));
    }

    #[test]
    fn empty_options_is_valid_empty_set() {
        let buf: [u8; 0] = [];
        let mut options = NdpOptions::new(&buf);
        assert!(options.next().is_none());
    }

    #[test]
    fn neighbour_cache_resolves_after_na() {
        let mut cache: NeighbourCache<u8, 4> = NeighbourCache::new(0);
        cache.insert(1, addr(1), MacAddr::ANY, NeighbourState::Incomplete);
        assert!(cache.find(&addr(1)).unwrap().state == NeighbourState::Incomplete);

        let mut msg = std::vec![0_u8; NA_FIXED_LEN + LinkLayerOption::BYTE_LEN];
        msg[0] = 136;
        msg[4] = FLAG_SOLICITED;
        msg[8..24].copy_from_slice(&addr(1).to_be_bytes());
        LinkLayerOption::target(mac(0xaa)).write_bytes(&mut msg[NA_FIXED_LEN..]);

        process_neighbour_advert(&msg, &mut cache).unwrap();
        let entry = cache.find(&addr(1)).unwrap();
        assert_eq!(entry.state, NeighbourState::Reachable);
        assert_eq!(entry.ll_addr, mac(0xaa));
    }

    #[test]
    fn unsolicited_na_is_dropped() {
        let mut cache: NeighbourCache<u8, 4> = NeighbourCache::new(0);
        cache.insert(1, addr(1), MacAddr::ANY, NeighbourState::Incomplete);
        let mut msg = std::vec![0_u8; NA_FIXED_LEN + LinkLayerOption::BYTE_LEN];
        msg[0] = 136;
        msg[4] = 0; // Solicited flag clear
        msg[8..24].copy_from_slice(&addr(1).to_be_bytes());
        process_neighbour_advert(&msg, &mut cache).unwrap();
        assert_eq!(cache.find(&addr(1)).unwrap().state, NeighbourState::Incomplete);
    }

    #[test]
    fn ring_overwrites_oldest_slot() {
        let mut cache: NeighbourCache<u8, 2> = NeighbourCache::new(0);
        cache.insert(1, addr(1), mac(1), NeighbourState::Reachable);
        cache.insert(1, addr(2), mac(2), NeighbourState::Reachable);
        cache.insert(1, addr(3), mac(3), NeighbourState::Reachable);
        assert!(cache.find(&addr(1)).is_none());
        assert!(cache.find(&addr(2)).is_some());
        assert!(cache.find(&addr(3)).is_some());
    }

    #[test]
    fn pending_solicit_lifecycle_and_ra_completion() {
        let mut cache: NeighbourCache<u8, 4> = NeighbourCache::new(0);
        let mut pending: PendingSolicitTable<u8, 4> = PendingSolicitTable::new(0);
        let mut routes: Ipv6RoutingTable<u8, 4> = Ipv6RoutingTable::new();

        let handle = pending.insert_almost(1, 0);
        pending.promote(handle);
        assert!(pending.find_pending_by_netdev(1).is_some());

        // Build an RA: flags=0, one Prefix-Info option for 2001:db8:1::/64, autoconf set.
        let mut prefix_bytes = [0_u8; 16];
        prefix_bytes[0] = 0x20;
        prefix_bytes[1] = 0x01;
        prefix_bytes[2] = 0x0d;
        prefix_bytes[3] = 0xb8;
        prefix_bytes[4] = 0x00;
        prefix_bytes[5] = 0x01;
        let prefix_info = PrefixInfoOption {
            option_type: NdpOptionType::PrefixInfo,
            length: 4,
            prefix_length: 64,
            flags: 0x40,
            valid_lifetime: 2_592_000,
            preferred_lifetime: 604_800,
            _reserved: 0,
            prefix: Ipv6Addr::new(prefix_bytes),
        };
        let mut msg = std::vec![0_u8; RA_FIXED_LEN + PrefixInfoOption::BYTE_LEN];
        msg[0] = 134;
        msg[5] = 0; // neither Managed nor OtherConf
        prefix_info.write_bytes(&mut msg[RA_FIXED_LEN..]);

        let router = addr(1);
        let own_ll = [0x52, 0x54, 0x00, 0x12, 0x34, 0x56];
        let result = process_router_advert(&msg, 1_u8, router, &mut cache, &mut pending, &mut routes, &own_ll)
            .unwrap()
            .unwrap();
        assert_eq!(result, handle);
        assert_eq!(pending.outcome(handle), Some(&Ok(router_solicit_code::NONE)));
        assert_eq!(routes.len(), 1);
    }

    #[test]
    fn ra_without_prefix_info_completes_not_found() {
        let mut cache: NeighbourCache<u8, 4> = NeighbourCache::new(0);
        let mut pending: PendingSolicitTable<u8, 4> = PendingSolicitTable::new(0);
        let mut routes: Ipv6RoutingTable<u8, 4> = Ipv6RoutingTable::new();
        let handle = pending.insert_almost(1, 0);
        pending.promote(handle);

        let msg = std::vec![0_u8; RA_FIXED_LEN];
        let own_ll = [0x52, 0x54, 0x00, 0x12, 0x34, 0x56];
        process_router_advert(&msg, 1_u8, addr(1), &mut cache, &mut pending, &mut routes, &own_ll)
            .unwrap();
        assert_eq!(pending.outcome(handle), Some(&Err(StackError::NotFound)));
    }

    #[test]
    fn ra_without_matching_pending_is_discarded() {
        let mut cache: NeighbourCache<u8, 4> = NeighbourCache::new(0);
        let mut pending: PendingSolicitTable<u8, 4> = PendingSolicitTable::new(0);
        let mut routes: Ipv6RoutingTable<u8, 4> = Ipv6RoutingTable::new();
        let msg = std::vec![0_u8; RA_FIXED_LEN];
        let own_ll = [0x52, 0x54, 0x00, 0x12, 0x34, 0x56];
        let result = process_router_advert(&msg, 1_u8, addr(1), &mut cache, &mut pending, &mut routes, &own_ll)
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn timer_expiry_cancels_without_retry() {
        let mut pending: PendingSolicitTable<u8, 4> = PendingSolicitTable::new(0);
        let handle = pending.insert_almost(1, 0);
        pending.promote(handle);
        pending.expire_timeouts(ROUTER_SOLICIT_TIMEOUT_MS);
        assert_eq!(pending.outcome(handle), Some(&Err(StackError::Canceled)));
    }
}
