//! Radio scheduler: the embassy tasks that actually move bytes (§4.D).
//!
//! Three cooperating tasks share one [`crate::engine::EngineShared`]: a
//! receive loop that feeds the dispatcher, a transmit loop that drains the
//! priority queue with collision avoidance and duty-cycle pacing, and a
//! periodic Hello beacon. This mirrors the teacher's `node_task` shape — a
//! context struct plus a `select`-driven loop — but split into one task per
//! concern instead of one `select3` because each concern here runs on its
//! own independent tick rather than reacting to a shared small set of
//! channels.

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{Duration, Instant, Ticker, Timer};

use crate::dispatcher::{self, DispatchAction, DispatchContext};
use crate::engine::EngineShared;
use crate::hello;
use crate::packet::{ControlFrame, DataFrame, Packet, PacketKind};
use crate::queue::DEFAULT_PRIORITY;
use crate::radio::RadioLink;
use crate::uplink::Uplink;

const FORWARD_PRIORITY: u8 = 25;
const REPLY_PRIORITY: u8 = 30;
const APPLICATION_SEND_PRIORITY: u8 = 20;

/// Channel-busy sampling interval during the pre-TX listen window.
const LISTEN_POLL: Duration = Duration::from_millis(10);

/// Collision-avoidance scale factor applied to `retry + table_size` in the
/// pre-TX listen window, in milliseconds per unit.
const LISTEN_SCALE_MS: u64 = 100;

/// How often a task blocked on an indefinite wait re-checks `stop()` (§6).
const STOP_POLL: Duration = Duration::from_secs(1);

/// Randomized pre-TX listen with collision-avoidance retry escalation
/// (§4.D): waits a random interval drawn from `[T, 3T + (retry +
/// table_size)*100] ms`, T being `air_time`; a preamble heard mid-wait
/// restarts the listen with `retry` incremented, capped at `rt_max_size`.
async fn pre_tx_listen<R, M>(shared: &EngineShared<M>, radio: &Mutex<M, R>, air_time: Duration)
where
    R: RadioLink + 'static,
    M: RawMutex + 'static,
{
    let t_ms = air_time.as_millis().max(1);
    let mut retry: u64 = 0;
    let max_retry = shared.config.rt_max_size as u64;

    'listen: loop {
        let table_size = shared.routing.lock().await.size() as u64;
        let high_ms = 3 * t_ms + (retry + table_size) * LISTEN_SCALE_MS;
        let delay_ms = t_ms + rand::random::<u64>() % (high_ms - t_ms + 1);
        let delay = Duration::from_millis(delay_ms);

        let start = Instant::now();
        loop {
            if Instant::now().saturating_duration_since(start) >= delay {
                break 'listen;
            }
            if radio.lock().await.channel_busy() {
                retry = (retry + 1).min(max_retry);
                continue 'listen;
            }
            Timer::after(LISTEN_POLL).await;
        }
    }
}

fn ack_frame(dst: crate::address::Address, local: crate::address::Address, seq_id: u8, number: u16) -> Packet {
    Packet::Ack(ControlFrame {
        dst,
        src: local,
        id: 0,
        via: dst,
        seq_id,
        number,
        payload: Vec::new(),
    })
}

fn lost_frame(dst: crate::address::Address, local: crate::address::Address, seq_id: u8, number: u16) -> Packet {
    Packet::Lost(ControlFrame {
        dst,
        src: local,
        id: 0,
        via: dst,
        seq_id,
        number,
        payload: Vec::new(),
    })
}

fn sync_frame(dst: crate::address::Address, local: crate::address::Address, seq_id: u8, count: u16) -> Packet {
    Packet::Sync(ControlFrame {
        dst,
        src: local,
        id: 0,
        via: dst,
        seq_id,
        number: count,
        payload: Vec::new(),
    })
}

fn fragment_frame(
    dst: crate::address::Address,
    local: crate::address::Address,
    seq_id: u8,
    number: u16,
    payload: Vec<u8>,
) -> Packet {
    Packet::XlData(ControlFrame {
        dst,
        src: local,
        id: 0,
        via: dst,
        seq_id,
        number,
        payload,
    })
}

async fn enqueue_action<M: RawMutex + 'static>(shared: &EngineShared<M>, local: crate::address::Address, action: DispatchAction) {
    match action {
        DispatchAction::RouteLearned | DispatchAction::Drop => {}
        DispatchAction::Deliver(from, payload) => shared.inbox.push_ordered((from, payload), DEFAULT_PRIORITY).await,
        DispatchAction::SendAck { to, seq_id, number } => {
            shared
                .send_queue
                .push_ordered(ack_frame(to, local, seq_id, number), REPLY_PRIORITY)
                .await
        }
        DispatchAction::SendLost { to, seq_id, number } => {
            shared
                .send_queue
                .push_ordered(lost_frame(to, local, seq_id, number), REPLY_PRIORITY)
                .await
        }
        DispatchAction::TransmitSync { to, seq_id } => {
            let count = {
                let tables = shared.tables.lock().await;
                tables.wsp.get(&(to, seq_id)).map(|s| s.count()).unwrap_or(0)
            };
            shared
                .send_queue
                .push_ordered(sync_frame(to, local, seq_id, count), REPLY_PRIORITY)
                .await
        }
        DispatchAction::TransmitFragment { to, seq_id, number } => {
            let payload = {
                let tables = shared.tables.lock().await;
                tables
                    .wsp
                    .get(&(to, seq_id))
                    .and_then(|s| s.fragment(number))
                    .map(<[u8]>::to_vec)
            };
            if let Some(payload) = payload {
                shared
                    .send_queue
                    .push_ordered(fragment_frame(to, local, seq_id, number, payload), REPLY_PRIORITY)
                    .await;
            }
        }
        DispatchAction::SequenceFailed { .. } => {}
        DispatchAction::Forward(packet) => shared.send_queue.push_ordered(packet, FORWARD_PRIORITY).await,
    }
}

/// Receives frames off the radio, decodes and dispatches them (§4.D, §4.G).
#[embassy_executor::task]
pub async fn receive_task<R, M>(shared: &'static EngineShared<M>, radio: &'static Mutex<M, R>)
where
    R: RadioLink + 'static,
    M: RawMutex + 'static,
{
    let mut buf = [0u8; 255];
    loop {
        if !shared.is_running() {
            return;
        }
        let (len, snr) = {
            let mut r = radio.lock().await;
            match select(r.receive(&mut buf), Timer::after(STOP_POLL)).await {
                Either::First(Ok(len)) => (len, r.snr()),
                Either::First(Err(_)) => {
                    shared.stats.radio_errors();
                    continue;
                }
                Either::Second(()) => continue,
            }
        };

        let packet = match shared.codec.decode(&buf[..len]) {
            Ok(p) => p,
            Err(crate::error::CodecError::Oversize(_, _)) => {
                shared.stats.oversize_frame();
                continue;
            }
            Err(_) => {
                shared.stats.truncated_frame();
                continue;
            }
        };

        let mut routing = shared.routing.lock().await;
        let mut tables = shared.tables.lock().await;
        let queue_len = shared.send_queue.length().await;
        let mut ctx = DispatchContext {
            local: shared.local,
            min_timeout: Duration::from_secs(shared.config.min_timeout_s),
            max_timeouts: shared.config.max_timeouts,
            send_queue_length: queue_len,
            now: Instant::now(),
            routing: &mut routing,
            tables: &mut tables,
            stats: &shared.stats,
        };
        let actions = dispatcher::dispatch(&mut ctx, packet, snr);
        drop(routing);
        drop(tables);

        for action in actions {
            enqueue_action(shared, shared.local, action).await;
        }
    }
}

/// Drains the priority queue, applying collision avoidance and duty-cycle
/// pacing before each transmission (§4.D).
#[embassy_executor::task]
pub async fn transmit_task<R, M>(shared: &'static EngineShared<M>, radio: &'static Mutex<M, R>)
where
    R: RadioLink + 'static,
    M: RawMutex + 'static,
{
    loop {
        if !shared.is_running() {
            return;
        }
        let packet = match select(shared.send_queue.pop_highest(), Timer::after(STOP_POLL)).await {
            Either::First(packet) => packet,
            Either::Second(()) => continue,
        };

        let bytes = match shared.codec.encode(&packet) {
            Ok(b) => b,
            Err(_) => {
                shared.stats.oversize_frame();
                continue;
            }
        };
        let air_time = radio.lock().await.time_on_air(bytes.len());

        pre_tx_listen(shared, radio, air_time).await;

        let mut r = radio.lock().await;
        match r.transmit(&bytes).await {
            Ok(()) => {}
            Err(_) => {
                shared.stats.radio_errors();
                continue;
            }
        }
        drop(r);

        if shared.config.duty_cycle_pct > 0 && shared.config.duty_cycle_pct < 100 {
            let idle_factor = (100 - shared.config.duty_cycle_pct) as u32;
            let idle = air_time * idle_factor / shared.config.duty_cycle_pct as u32;
            Timer::after(idle).await;
        }
    }
}

/// Emits a Hello beacon (fragmented over several frames when oversize) on
/// a fixed period (§4.E).
#[embassy_executor::task]
pub async fn hello_task<M>(shared: &'static EngineShared<M>)
where
    M: RawMutex + 'static,
{
    let mut ticker = Ticker::every(Duration::from_secs(shared.config.hello_delay_s));
    let mut next_id: u8 = 0;
    loop {
        ticker.next().await;
        if !shared.is_running() {
            return;
        }
        let routing = shared.routing.lock().await;
        let frames = hello::build_hello_frames(
            shared.local,
            shared.config.role,
            &routing,
            &shared.codec,
            next_id,
        );
        drop(routing);
        next_id = next_id.wrapping_add(frames.len() as u8);
        for frame in frames {
            shared
                .send_queue
                .push_ordered(Packet::Hello(frame), DEFAULT_PRIORITY)
                .await;
        }
    }
}

/// Periodically expires stale routing entries and sweeps WSP/WRP for
/// timed-out sequences (§4.C expiry, §4.F timeout manager).
#[embassy_executor::task]
pub async fn timeout_task<M>(shared: &'static EngineShared<M>)
where
    M: RawMutex + 'static,
{
    let mut ticker = Ticker::every(Duration::from_secs(shared.config.min_timeout_s));
    loop {
        ticker.next().await;
        if !shared.is_running() {
            return;
        }
        let now = Instant::now();

        let mut routing = shared.routing.lock().await;
        let expired = routing.expire_stale(now);
        let mut tables = shared.tables.lock().await;
        if !expired.is_empty() {
            tables.purge_for_addresses(&expired);
        }

        let queue_len = shared.send_queue.length().await;
        let mut ctx = DispatchContext {
            local: shared.local,
            min_timeout: Duration::from_secs(shared.config.min_timeout_s),
            max_timeouts: shared.config.max_timeouts,
            send_queue_length: queue_len,
            now,
            routing: &mut routing,
            tables: &mut tables,
            stats: &shared.stats,
        };
        let actions = dispatcher::sweep_timeouts(&mut ctx);
        drop(routing);
        drop(tables);

        for action in actions {
            enqueue_action(shared, shared.local, action).await;
        }
    }
}

/// Sends a periodic routing-table snapshot (up to 5 entries per packet) to
/// the uplink while it reports connected (§4.H).
#[embassy_executor::task]
pub async fn uplink_snapshot_task<U, M>(shared: &'static EngineShared<M>, uplink: &'static Mutex<M, U>)
where
    U: Uplink + 'static,
    M: RawMutex + 'static,
{
    const MAX_ENTRIES_PER_SNAPSHOT: usize = 5;
    let mut ticker = Ticker::every(Duration::from_secs(shared.config.routing_table_update_delay_s));
    let mut next_id: u8 = 0;
    loop {
        ticker.next().await;
        if !shared.is_running() {
            return;
        }
        let mut u = uplink.lock().await;
        if !u.connected() {
            continue;
        }
        let routing = shared.routing.lock().await;
        let frames = hello::build_hello_frames_sized(
            shared.local,
            shared.config.role,
            &routing,
            MAX_ENTRIES_PER_SNAPSHOT,
            next_id,
        );
        drop(routing);
        next_id = next_id.wrapping_add(frames.len() as u8);
        for frame in frames {
            if let Ok(bytes) = shared.codec.encode(&Packet::RouteTable(frame)) {
                let len = bytes.len();
                u.send(&bytes, len).await;
            }
        }
    }
}

/// Forwards a plain application `send()` call into the priority queue,
/// resolving the next hop from the routing table (§6).
pub async fn enqueue_application_frame<M: RawMutex + 'static>(
    shared: &EngineShared<M>,
    dst: crate::address::Address,
    need_ack: bool,
    id: u8,
    payload: Vec<u8>,
) -> Result<(), crate::error::EngineError> {
    let via = {
        let routing = shared.routing.lock().await;
        routing.next_hop(dst).ok_or(crate::error::EngineError::Unreachable(dst))?
    };
    let frame = DataFrame {
        dst,
        src: shared.local,
        id,
        via,
        payload,
    };
    let packet = if need_ack { Packet::NeedAck(frame) } else { Packet::Data(frame) };
    debug_assert_eq!(
        packet.kind() as u8,
        if need_ack { PacketKind::NeedAck as u8 } else { PacketKind::Data as u8 }
    );
    shared.send_queue.push_ordered(packet, APPLICATION_SEND_PRIORITY).await;
    Ok(())
}
