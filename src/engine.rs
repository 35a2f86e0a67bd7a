//! Composition root (§4.I, §6 Application API).
//!
//! `Engine` owns the routing table, packet queue, WSP/WRP tables, the
//! sequence-id allocator and the stats block, and spawns the scheduler
//! tasks of §4.D/§4.F/§4.H through an `embassy_executor::Spawner`. As in the
//! teacher's `RadioCommunicationManager::initialize`, no part of the engine
//! lives behind a `static` declared inside this crate — the caller leaks
//! (or `static_cell`s) an [`EngineShared`] and hands back a `'static`
//! reference, the same way the teacher's binary leaks its per-node queues.

use std::sync::atomic::{AtomicBool, Ordering};

use embassy_executor::Spawner;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::Duration;

use crate::address::{Address, Role};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::packet::{Packet, PacketCodec};
use crate::queue::PacketQueue;
use crate::radio::RadioLink;
use crate::routing::{RouteEntry, RoutingTable};
use crate::scheduler;
use crate::selector::{self, Destination};
use crate::stats::{Stats, StatsSnapshot};
use crate::transport::{SeqIdAllocator, TransportTables};
use crate::uplink::Uplink;

/// State shared by every task the engine spawns. Allocated once by the
/// caller with `'static` lifetime (§4.I).
pub struct EngineShared<M: RawMutex + 'static> {
    pub local: Address,
    pub config: EngineConfig,
    pub codec: PacketCodec,
    pub routing: Mutex<M, RoutingTable>,
    pub tables: Mutex<M, TransportTables>,
    pub seq_alloc: Mutex<M, SeqIdAllocator>,
    pub send_queue: PacketQueue<M, Packet>,
    pub inbox: PacketQueue<M, (Address, Vec<u8>)>,
    pub stats: Stats,
    running: AtomicBool,
}

impl<M: RawMutex + 'static> EngineShared<M> {
    pub fn new(local: Address, config: EngineConfig) -> Self {
        let codec = PacketCodec::new(config.max_packet_size, config.crc_enabled);
        let routing = RoutingTable::new(
            local,
            config.rt_max_size,
            Duration::from_secs(config.routing_expire_s),
        );
        EngineShared {
            local,
            config,
            codec,
            routing: Mutex::new(routing),
            tables: Mutex::new(TransportTables::new()),
            seq_alloc: Mutex::new(SeqIdAllocator::default()),
            send_queue: PacketQueue::new(),
            inbox: PacketQueue::new(),
            stats: Stats::new(),
            running: AtomicBool::new(true),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

/// The library's public handle: a thin wrapper binding shared state to its
/// `RadioLink`/`Uplink` collaborators (§6 Application API).
pub struct Engine<R, U, M>
where
    R: RadioLink + 'static,
    U: Uplink + 'static,
    M: RawMutex + 'static,
{
    shared: &'static EngineShared<M>,
    radio: &'static Mutex<M, R>,
    uplink: &'static Mutex<M, U>,
}

impl<R, U, M> Engine<R, U, M>
where
    R: RadioLink + 'static,
    U: Uplink + 'static,
    M: RawMutex + 'static,
{
    /// Validates `shared.config` and builds an engine bound to `radio` and
    /// `uplink`. All three arguments are expected to already have `'static`
    /// lifetime, created by the caller (§4.I).
    pub fn new(
        shared: &'static EngineShared<M>,
        radio: &'static Mutex<M, R>,
        uplink: &'static Mutex<M, U>,
    ) -> Result<Self, EngineError> {
        shared.config.validate()?;
        Ok(Engine { shared, radio, uplink })
    }

    pub fn local_address(&self) -> Address {
        self.shared.local
    }

    /// Spawns the receive, transmit, Hello-beacon, timeout-sweep, and
    /// uplink-snapshot tasks (§4.D/§4.E/§4.F/§4.H).
    pub fn start(&self, spawner: Spawner) -> Result<(), EngineError> {
        spawner
            .spawn(scheduler::receive_task(self.shared, self.radio))
            .map_err(|_| EngineError::QueueFull)?;
        spawner
            .spawn(scheduler::transmit_task(self.shared, self.radio))
            .map_err(|_| EngineError::QueueFull)?;
        spawner
            .spawn(scheduler::hello_task(self.shared))
            .map_err(|_| EngineError::QueueFull)?;
        spawner
            .spawn(scheduler::timeout_task(self.shared))
            .map_err(|_| EngineError::QueueFull)?;
        spawner
            .spawn(scheduler::uplink_snapshot_task(self.shared, self.uplink))
            .map_err(|_| EngineError::QueueFull)?;
        Ok(())
    }

    /// Signals every spawned task to exit at its next loop iteration. The
    /// engine itself is inert afterward; tasks already blocked in
    /// `radio.receive()`/`send_queue.pop_highest()` only observe the flag on
    /// their next wakeup (§6).
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Relaxed);
    }

    /// Fire-and-forget single-frame send (§6). Fragmented delivery is
    /// [`Engine::send_reliable`].
    pub async fn send(&self, dst: Address, bytes: Vec<u8>) -> Result<(), EngineError> {
        self.send_internal(dst, false, bytes).await
    }

    async fn send_internal(&self, dst: Address, need_ack: bool, payload: Vec<u8>) -> Result<(), EngineError> {
        let resolved = self.resolve_destination(dst).await?;
        let mut seq_alloc = self.shared.seq_alloc.lock().await;
        let id = seq_alloc.next();
        drop(seq_alloc);
        scheduler::enqueue_application_frame(self.shared, resolved, need_ack, id, payload).await
    }

    /// Reliable, fragmented, ACK-driven delivery (§4.F send path).
    pub async fn send_reliable(&self, dst: Address, bytes: Vec<u8>) -> Result<(), EngineError> {
        if dst == crate::address::ADDR_BROADCAST {
            let targets: Vec<Address> = {
                let routing = self.shared.routing.lock().await;
                routing.all_nodes().map(|e| e.address).collect()
            };
            for target in targets {
                Box::pin(self.send_reliable(target, bytes.clone())).await?;
            }
            return Ok(());
        }

        let resolved = self.resolve_destination(dst).await?;
        let max_fragment = self.shared.codec.max_payload_for(crate::packet::PacketKind::XlData);
        let fragments = crate::transport::fragment(&bytes, max_fragment);
        let count = fragments.len() as u16;

        let mut seq_alloc = self.shared.seq_alloc.lock().await;
        let seq_id = seq_alloc.next();
        drop(seq_alloc);

        let (hops, base) = {
            let routing = self.shared.routing.lock().await;
            let hops = routing.find(resolved).map(|e| e.metric).unwrap_or(1);
            let base = routing
                .find(resolved)
                .map(|e| crate::transport::base_timeout(e, hops, Duration::from_secs(self.shared.config.min_timeout_s)))
                .unwrap_or(Duration::from_secs(self.shared.config.min_timeout_s));
            (hops, base)
        };
        let _ = hops;

        let context = crate::transport::SendSequence::new(
            resolved,
            seq_id,
            fragments,
            embassy_time::Instant::now(),
            base,
        );
        let mut tables = self.shared.tables.lock().await;
        tables.wsp.insert((resolved, seq_id), context);
        drop(tables);

        let sync = Packet::Sync(crate::packet::ControlFrame {
            dst: resolved,
            src: self.shared.local,
            id: 0,
            via: resolved,
            seq_id,
            number: count,
            payload: Vec::new(),
        });
        self.shared.send_queue.push_ordered(sync, 30).await;
        Ok(())
    }

    /// Receives the next application payload delivered by the dispatcher,
    /// tagged with the node that sent it (§6).
    pub async fn receive(&self) -> (Address, Vec<u8>) {
        self.shared.inbox.pop_highest().await
    }

    /// Snapshot of the routing table (§6).
    pub async fn routing_table(&self) -> Vec<RouteEntry> {
        self.shared.routing.lock().await.all_nodes().cloned().collect()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    async fn resolve_destination(&self, dst: Address) -> Result<Address, EngineError> {
        if dst != crate::address::ADDR_BROADCAST {
            let routing = self.shared.routing.lock().await;
            return routing.next_hop(dst).ok_or(EngineError::Unreachable(dst));
        }
        let routing = self.shared.routing.lock().await;
        match selector::select_destination(self.shared.config.role, &routing) {
            Destination::Wifi => Ok(crate::address::ADDR_WIFI),
            Destination::Cellular => Ok(crate::address::ADDR_4G),
            Destination::Mesh(addr) => Ok(addr),
            Destination::None => {
                self.shared.stats.no_destination();
                Err(EngineError::Unreachable(dst))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use futures::executor::block_on;

    struct NullRadio;
    impl RadioLink for NullRadio {
        async fn configure(&mut self, _phy: &crate::config::RadioPhyConfig) -> Result<(), crate::error::RadioError> {
            Ok(())
        }
        async fn transmit(&mut self, _bytes: &[u8]) -> Result<(), crate::error::RadioError> {
            Ok(())
        }
        async fn receive(&mut self, _buf: &mut [u8]) -> Result<usize, crate::error::RadioError> {
            std::future::pending().await
        }
        fn rssi(&self) -> i16 {
            -80
        }
        fn snr(&self) -> i8 {
            5
        }
        fn channel_busy(&self) -> bool {
            false
        }
        fn time_on_air(&self, _payload_len: usize) -> Duration {
            Duration::from_millis(50)
        }
    }

    struct NullUplink;
    impl Uplink for NullUplink {
        fn connected(&self) -> bool {
            false
        }
        async fn send(&mut self, _bytes: &[u8], _len: usize) -> bool {
            true
        }
    }

    fn leaked_shared(local: Address, config: EngineConfig) -> &'static EngineShared<NoopRawMutex> {
        Box::leak(Box::new(EngineShared::new(local, config)))
    }

    #[test]
    fn new_rejects_invalid_config() {
        let mut config = EngineConfig::default();
        config.max_packet_size = 4;
        let shared = leaked_shared(1, config);
        let radio: &'static Mutex<NoopRawMutex, NullRadio> = Box::leak(Box::new(Mutex::new(NullRadio)));
        let uplink: &'static Mutex<NoopRawMutex, NullUplink> = Box::leak(Box::new(Mutex::new(NullUplink)));
        assert!(Engine::new(shared, radio, uplink).is_err());
    }

    #[test]
    fn send_without_a_route_is_unreachable() {
        let shared = leaked_shared(1, EngineConfig::default());
        let radio: &'static Mutex<NoopRawMutex, NullRadio> = Box::leak(Box::new(Mutex::new(NullRadio)));
        let uplink: &'static Mutex<NoopRawMutex, NullUplink> = Box::leak(Box::new(Mutex::new(NullUplink)));
        let engine = Engine::new(shared, radio, uplink).unwrap();

        let result = block_on(engine.send(99, vec![1, 2, 3]));
        assert_eq!(result, Err(EngineError::Unreachable(99)));
    }

    #[test]
    fn send_to_known_route_enqueues_a_frame() {
        let shared = leaked_shared(1, EngineConfig::default());
        block_on(async {
            let mut routing = shared.routing.lock().await;
            routing.process_route_frame(
                2,
                10,
                &crate::packet::TableFrame {
                    dst: crate::address::ADDR_BROADCAST,
                    src: 2,
                    id: 0,
                    role: Role::DEFAULT,
                    routes: vec![],
                },
                embassy_time::Instant::from_secs(0),
            );
        });
        let radio: &'static Mutex<NoopRawMutex, NullRadio> = Box::leak(Box::new(Mutex::new(NullRadio)));
        let uplink: &'static Mutex<NoopRawMutex, NullUplink> = Box::leak(Box::new(Mutex::new(NullUplink)));
        let engine = Engine::new(shared, radio, uplink).unwrap();

        block_on(engine.send(2, vec![9])).unwrap();
        assert_eq!(block_on(shared.send_queue.length()), 1);
    }

    #[test]
    fn receive_returns_sender_address_and_payload() {
        let shared = leaked_shared(1, EngineConfig::default());
        let radio: &'static Mutex<NoopRawMutex, NullRadio> = Box::leak(Box::new(Mutex::new(NullRadio)));
        let uplink: &'static Mutex<NoopRawMutex, NullUplink> = Box::leak(Box::new(Mutex::new(NullUplink)));
        let engine = Engine::new(shared, radio, uplink).unwrap();

        block_on(shared.inbox.push_ordered((2, vec![1, 2, 3]), crate::queue::DEFAULT_PRIORITY));
        assert_eq!(block_on(engine.receive()), (2, vec![1, 2, 3]));
    }

    #[test]
    fn stats_start_at_zero() {
        let shared = leaked_shared(1, EngineConfig::default());
        let radio: &'static Mutex<NoopRawMutex, NullRadio> = Box::leak(Box::new(Mutex::new(NullRadio)));
        let uplink: &'static Mutex<NoopRawMutex, NullUplink> = Box::leak(Box::new(Mutex::new(NullUplink)));
        let engine = Engine::new(shared, radio, uplink).unwrap();
        assert_eq!(engine.stats(), StatsSnapshot::default());
    }
}
