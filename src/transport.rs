//! Reliable large-payload transport: fragmentation, SYNC/ACK/LOST state
//! machines, RFC 6298-style RTT estimation (§4.F).
//!
//! The state machines here never touch the radio or the packet queue
//! directly — they return an outcome enum and the caller (the dispatcher and
//! the timeout-manager task in [`crate::engine`]) turns that into packets on
//! the wire. This mirrors the teacher's habit of keeping protocol state
//! machines as plain structs driven from the outside by a task loop.

use std::collections::HashMap;

use embassy_time::{Duration, Instant};

use crate::address::Address;
use crate::routing::RouteEntry;

const RTT_CLAMP: Duration = Duration::from_secs(100);
const HOP_FACTOR_MS: u64 = 5_000;
const CEILING_BASE_MS: u64 = 60_000;
const BACKOFF_LN_SCALE_MS: f64 = 50_000.0;
const BACKOFF_QUEUE_FACTOR_MS: u64 = 3_000;

/// Monotone 8-bit sequence-id allocator, single writer (§4.F step 3).
#[derive(Debug, Default)]
pub struct SeqIdAllocator(u8);

impl SeqIdAllocator {
    pub fn next(&mut self) -> u8 {
        let id = self.0;
        self.0 = self.0.wrapping_add(1);
        id
    }
}

/// Folds one RTT sample into a routing entry's SRTT/RTTVAR (RFC 6298 style).
pub fn sample_rtt(entry: &mut RouteEntry, sample: Duration) {
    let sample = if sample > RTT_CLAMP { RTT_CLAMP } else { sample };
    match (entry.srtt, entry.rttvar) {
        (None, _) | (_, None) => {
            entry.srtt = Some(sample);
            entry.rttvar = Some(sample / 2);
        }
        (Some(srtt), Some(rttvar)) => {
            let diff = if srtt > sample { srtt - sample } else { sample - srtt };
            let new_rttvar = (rttvar * 3 + diff) / 4;
            let new_srtt = (srtt * 7 + sample) / 8;
            entry.rttvar = Some(new_rttvar);
            entry.srtt = Some(new_srtt);
        }
    }
}

/// Base retransmit timeout for a routing entry at `hops` away (§4.F).
pub fn base_timeout(entry: &RouteEntry, hops: u8, min_timeout: Duration) -> Duration {
    let hop_ms = hops as u64 * HOP_FACTOR_MS;
    let floor_ms = min_timeout.as_millis() as u64 + hop_ms;
    let rtt_based_ms = match (entry.srtt, entry.rttvar) {
        (Some(srtt), Some(rttvar)) => (srtt + rttvar * 4).as_millis() as u64,
        _ => 0,
    };
    let base_ms = floor_ms.max(rtt_based_ms);
    let ceiling_ms = CEILING_BASE_MS + hop_ms;
    Duration::from_millis(base_ms.min(ceiling_ms))
}

/// Exponential back-off applied on retry (§4.F).
pub fn back_off_timeout(
    entry: &RouteEntry,
    hops: u8,
    min_timeout: Duration,
    n_timeouts: u32,
    queue_length: usize,
) -> Duration {
    let base = base_timeout(entry, hops, min_timeout);
    let hop_ms = hops as u64 * HOP_FACTOR_MS;
    let ceiling_ms = CEILING_BASE_MS + hop_ms;
    let backoff_ms = (((n_timeouts + 1) as f64).ln() * BACKOFF_LN_SCALE_MS) as u64
        + queue_length as u64 * BACKOFF_QUEUE_FACTOR_MS;
    let timeout_ms = base.as_millis() as u64;
    Duration::from_millis(timeout_ms.max(backoff_ms).min(ceiling_ms))
}

/// What the caller should transmit (or do) after driving a send sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    TransmitSync,
    TransmitFragment(u16),
    Done,
    DeliveryFailed,
    DuplicateAck,
}

/// Sender-side state for one outbound reliable sequence (§3 WSP entry).
#[derive(Debug, Clone)]
pub struct SendSequence {
    pub dst: Address,
    pub seq_id: u8,
    fragments: Vec<Vec<u8>>,
    last_ack: u16,
    first_ack_received: bool,
    number_of_timeouts: u32,
    last_tx_at: Instant,
    pub deadline: Instant,
}

impl SendSequence {
    pub fn new(dst: Address, seq_id: u8, fragments: Vec<Vec<u8>>, now: Instant, timeout: Duration) -> Self {
        SendSequence {
            dst,
            seq_id,
            fragments,
            last_ack: 0,
            first_ack_received: false,
            number_of_timeouts: 0,
            last_tx_at: now,
            deadline: now + timeout,
        }
    }

    pub fn count(&self) -> u16 {
        self.fragments.len() as u16
    }

    pub fn fragment(&self, number: u16) -> Option<&[u8]> {
        self.fragments.get(number.checked_sub(1)? as usize).map(Vec::as_slice)
    }

    pub fn on_ack(
        &mut self,
        number: u16,
        entry: &mut RouteEntry,
        hops: u8,
        min_timeout: Duration,
        now: Instant,
    ) -> SendOutcome {
        if number < self.last_ack {
            return SendOutcome::DuplicateAck;
        }
        if number == self.count() {
            return SendOutcome::Done;
        }
        self.last_ack = number;
        self.first_ack_received = true;
        sample_rtt(entry, now.saturating_duration_since(self.last_tx_at));
        self.last_tx_at = now;
        self.deadline = now + base_timeout(entry, hops, min_timeout);
        SendOutcome::TransmitFragment(number + 1)
    }

    pub fn on_lost(
        &mut self,
        number: u16,
        entry: &mut RouteEntry,
        hops: u8,
        min_timeout: Duration,
        queue_length: usize,
        now: Instant,
    ) -> SendOutcome {
        sample_rtt(entry, now.saturating_duration_since(self.last_tx_at));
        self.first_ack_received = true;
        self.number_of_timeouts += 1;
        self.last_tx_at = now;
        self.deadline = now
            + back_off_timeout(entry, hops, min_timeout, self.number_of_timeouts, queue_length);
        SendOutcome::TransmitFragment(number)
    }

    pub fn on_timeout(
        &mut self,
        entry: &RouteEntry,
        hops: u8,
        min_timeout: Duration,
        max_timeouts: u32,
        queue_length: usize,
        now: Instant,
    ) -> SendOutcome {
        self.number_of_timeouts += 1;
        if self.number_of_timeouts >= max_timeouts {
            return SendOutcome::DeliveryFailed;
        }
        self.last_tx_at = now;
        self.deadline = now
            + back_off_timeout(entry, hops, min_timeout, self.number_of_timeouts, queue_length);
        if !self.first_ack_received {
            SendOutcome::TransmitSync
        } else {
            SendOutcome::TransmitFragment(self.last_ack + 1)
        }
    }
}

/// What the caller should do after driving a receive sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecvOutcome {
    Ack(u16),
    AckAndDeliver(u16, Vec<u8>),
    Lost(u16),
    DuplicateSync,
    TimeoutCapReached,
}

/// Receiver-side state for one inbound reliable sequence (§3 WRP entry).
#[derive(Debug, Clone)]
pub struct ReceiveSequence {
    pub src: Address,
    pub seq_id: u8,
    count: u16,
    last_ack: u16,
    fragments: Vec<Vec<u8>>,
    number_of_timeouts: u32,
    last_activity_at: Instant,
    pub deadline: Instant,
}

impl ReceiveSequence {
    pub fn new(src: Address, seq_id: u8, count: u16, now: Instant, timeout: Duration) -> Self {
        ReceiveSequence {
            src,
            seq_id,
            count,
            last_ack: 0,
            fragments: Vec::with_capacity(count as usize),
            number_of_timeouts: 0,
            last_activity_at: now,
            deadline: now + timeout,
        }
    }

    pub fn on_fragment(
        &mut self,
        number: u16,
        payload: Vec<u8>,
        entry: &mut RouteEntry,
        hops: u8,
        min_timeout: Duration,
        now: Instant,
    ) -> RecvOutcome {
        if number != self.last_ack + 1 {
            return RecvOutcome::Lost(self.last_ack + 1);
        }
        self.fragments.push(payload);
        self.last_ack = number;
        sample_rtt(entry, now.saturating_duration_since(self.last_activity_at));
        self.last_activity_at = now;
        self.deadline = now + base_timeout(entry, hops, min_timeout);
        if self.last_ack == self.count {
            let reassembled = self.fragments.concat();
            RecvOutcome::AckAndDeliver(number, reassembled)
        } else {
            RecvOutcome::Ack(number)
        }
    }

    pub fn on_timeout(
        &mut self,
        entry: &RouteEntry,
        hops: u8,
        min_timeout: Duration,
        max_timeouts: u32,
        queue_length: usize,
        now: Instant,
    ) -> RecvOutcome {
        self.number_of_timeouts += 1;
        if self.number_of_timeouts >= max_timeouts {
            return RecvOutcome::TimeoutCapReached;
        }
        self.last_activity_at = now;
        self.deadline = now
            + back_off_timeout(entry, hops, min_timeout, self.number_of_timeouts, queue_length);
        RecvOutcome::Lost(self.last_ack + 1)
    }
}

/// Creates a context for a brand-new inbound SYNC, or reports a duplicate.
pub fn on_sync(
    existing: Option<&ReceiveSequence>,
    src: Address,
    seq_id: u8,
    count: u16,
    now: Instant,
    initial_timeout: Duration,
) -> Result<ReceiveSequence, RecvOutcome> {
    if existing.is_some() {
        return Err(RecvOutcome::DuplicateSync);
    }
    Ok(ReceiveSequence::new(src, seq_id, count, now, initial_timeout))
}

/// Splits `bytes` into fragments no larger than `max_fragment_len` (§4.F step 4).
pub fn fragment(bytes: &[u8], max_fragment_len: usize) -> Vec<Vec<u8>> {
    if bytes.is_empty() {
        return vec![Vec::new()];
    }
    bytes.chunks(max_fragment_len.max(1)).map(|c| c.to_vec()).collect()
}

/// WSP/WRP sequence-context tables, keyed by peer address and sequence id.
#[derive(Debug, Default)]
pub struct TransportTables {
    pub wsp: HashMap<(Address, u8), SendSequence>,
    pub wrp: HashMap<(Address, u8), ReceiveSequence>,
}

impl TransportTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn due_send_timeouts(&self, now: Instant) -> Vec<(Address, u8)> {
        self.wsp
            .iter()
            .filter(|(_, ctx)| ctx.deadline < now)
            .map(|(k, _)| *k)
            .collect()
    }

    pub fn due_recv_timeouts(&self, now: Instant) -> Vec<(Address, u8)> {
        self.wrp
            .iter()
            .filter(|(_, ctx)| ctx.deadline < now)
            .map(|(k, _)| *k)
            .collect()
    }

    /// Drops every context referencing an address whose routing entry has
    /// just expired (§4.C / §8 scenario 6).
    pub fn purge_for_addresses(&mut self, addresses: &[Address]) {
        self.wsp.retain(|(dst, _), _| !addresses.contains(dst));
        self.wrp.retain(|(src, _), _| !addresses.contains(src));
    }
}
