//! Packet-dispatch state machine (§4.G).
//!
//! Classifies a decoded frame and drives routing-table ingestion or the
//! reliable-transport state machines, returning a list of actions for the
//! scheduler to carry out (transmit a reply, forward a frame, hand a payload
//! to the application). Keeping dispatch as a pure function of its inputs,
//! returning data instead of performing I/O, is the same shape as the
//! teacher's `ConnectionMatrixParser::parse_line`.

use embassy_time::{Duration, Instant};

use crate::address::{Address, ADDR_BROADCAST};
use crate::packet::{ControlFrame, Packet};
use crate::routing::RoutingTable;
use crate::stats::Stats;
use crate::transport::{self, RecvOutcome, ReceiveSequence, SendOutcome, TransportTables};

/// One thing the caller should do in response to a received frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchAction {
    /// The frame was folded into the routing table; nothing to transmit.
    RouteLearned,
    /// Payload ready for the application (plain DATA, or a completed
    /// reliable-transport reassembly), tagged with the originating node.
    Deliver(Address, Vec<u8>),
    SendAck { to: Address, seq_id: u8, number: u16 },
    SendLost { to: Address, seq_id: u8, number: u16 },
    TransmitSync { to: Address, seq_id: u8 },
    TransmitFragment { to: Address, seq_id: u8, number: u16 },
    SequenceFailed { to: Address, seq_id: u8 },
    /// Frame is addressed elsewhere but routed through us; re-enqueue as-is.
    Forward(Packet),
    Drop,
}

/// Parameters that don't change frame-to-frame, grouped to keep the
/// `dispatch` signature manageable.
pub struct DispatchContext<'a> {
    pub local: Address,
    pub min_timeout: Duration,
    pub max_timeouts: u32,
    pub send_queue_length: usize,
    pub now: Instant,
    pub routing: &'a mut RoutingTable,
    pub tables: &'a mut TransportTables,
    pub stats: &'a Stats,
}

fn hops_for(routing: &RoutingTable, peer: Address) -> u8 {
    routing.find(peer).map(|e| e.metric).unwrap_or(1)
}

/// Dispatches one decoded, already SNR/RSSI-tagged frame (§4.G).
pub fn dispatch(ctx: &mut DispatchContext<'_>, packet: Packet, snr: i8) -> Vec<DispatchAction> {
    match packet {
        Packet::Hello(frame) | Packet::RouteTable(frame) => {
            let updates = ctx.routing.process_route_frame(frame.src, snr, &frame, ctx.now);
            for u in updates {
                if u == crate::routing::RouteUpdate::RejectedFull {
                    ctx.stats.routing_table_full();
                }
            }
            vec![DispatchAction::RouteLearned]
        }

        Packet::Data(f) if f.dst == ADDR_BROADCAST => {
            let _ = f;
            vec![DispatchAction::Drop]
        }
        Packet::Data(f) if f.dst == ctx.local => vec![DispatchAction::Deliver(f.src, f.payload)],
        Packet::Data(f) if f.via == ctx.local => vec![DispatchAction::Forward(Packet::Data(f))],
        Packet::Data(_) => vec![DispatchAction::Drop],

        Packet::NeedAck(f) if f.dst == ADDR_BROADCAST => {
            let _ = f;
            vec![DispatchAction::Drop]
        }
        Packet::NeedAck(f) if f.dst == ctx.local => vec![
            DispatchAction::Deliver(f.src, f.payload),
            DispatchAction::SendAck {
                to: f.src,
                seq_id: f.id,
                number: 0,
            },
        ],
        Packet::NeedAck(f) if f.via == ctx.local => vec![DispatchAction::Forward(Packet::NeedAck(f))],
        Packet::NeedAck(_) => vec![DispatchAction::Drop],

        Packet::Ack(f) if f.dst == ctx.local => dispatch_ack(ctx, f),
        Packet::Ack(f) if f.via == ctx.local => vec![DispatchAction::Forward(Packet::Ack(f))],
        Packet::Ack(_) => vec![DispatchAction::Drop],

        Packet::Lost(f) if f.dst == ctx.local => dispatch_lost(ctx, f),
        Packet::Lost(f) if f.via == ctx.local => vec![DispatchAction::Forward(Packet::Lost(f))],
        Packet::Lost(_) => vec![DispatchAction::Drop],

        Packet::Sync(f) if f.dst == ctx.local => dispatch_sync(ctx, f),
        Packet::Sync(f) if f.via == ctx.local => vec![DispatchAction::Forward(Packet::Sync(f))],
        Packet::Sync(_) => vec![DispatchAction::Drop],

        Packet::XlData(f) if f.dst == ctx.local => dispatch_fragment(ctx, f),
        Packet::XlData(f) if f.via == ctx.local => vec![DispatchAction::Forward(Packet::XlData(f))],
        Packet::XlData(_) => vec![DispatchAction::Drop],
    }
}

fn dispatch_ack(ctx: &mut DispatchContext<'_>, f: ControlFrame) -> Vec<DispatchAction> {
    let key = (f.src, f.seq_id);
    let hops = hops_for(ctx.routing, f.src);
    let Some(seq) = ctx.tables.wsp.get_mut(&key) else {
        return vec![DispatchAction::Drop];
    };
    let Some(entry) = ctx.routing.find_mut(f.src) else {
        return vec![DispatchAction::Drop];
    };
    match seq.on_ack(f.number, entry, hops, ctx.min_timeout, ctx.now) {
        SendOutcome::DuplicateAck => {
            ctx.stats.duplicate_ack();
            vec![DispatchAction::Drop]
        }
        SendOutcome::Done => {
            ctx.tables.wsp.remove(&key);
            vec![DispatchAction::Drop]
        }
        SendOutcome::TransmitFragment(number) => vec![DispatchAction::TransmitFragment {
            to: f.src,
            seq_id: f.seq_id,
            number,
        }],
        SendOutcome::TransmitSync | SendOutcome::DeliveryFailed => unreachable!("on_ack never returns these"),
    }
}

fn dispatch_lost(ctx: &mut DispatchContext<'_>, f: ControlFrame) -> Vec<DispatchAction> {
    let key = (f.src, f.seq_id);
    let hops = hops_for(ctx.routing, f.src);
    let queue_len = ctx.send_queue_length;
    let Some(seq) = ctx.tables.wsp.get_mut(&key) else {
        return vec![DispatchAction::Drop];
    };
    let Some(entry) = ctx.routing.find_mut(f.src) else {
        return vec![DispatchAction::Drop];
    };
    match seq.on_lost(f.number, entry, hops, ctx.min_timeout, queue_len, ctx.now) {
        SendOutcome::TransmitFragment(number) => vec![DispatchAction::TransmitFragment {
            to: f.src,
            seq_id: f.seq_id,
            number,
        }],
        _ => unreachable!("on_lost always retransmits"),
    }
}

fn dispatch_sync(ctx: &mut DispatchContext<'_>, f: ControlFrame) -> Vec<DispatchAction> {
    let key = (f.src, f.seq_id);
    let hops = hops_for(ctx.routing, f.src);
    let count = f.number;
    let timeout = ctx
        .routing
        .find(f.src)
        .map(|e| transport::base_timeout(e, hops, ctx.min_timeout))
        .unwrap_or(ctx.min_timeout);

    match transport::on_sync(ctx.tables.wrp.get(&key), f.src, f.seq_id, count, ctx.now, timeout) {
        Ok(ctx_seq) => {
            ctx.tables.wrp.insert(key, ctx_seq);
            vec![DispatchAction::SendAck {
                to: f.src,
                seq_id: f.seq_id,
                number: 0,
            }]
        }
        Err(RecvOutcome::DuplicateSync) => {
            ctx.stats.duplicate_sync();
            vec![DispatchAction::Drop]
        }
        Err(_) => unreachable!("on_sync only ever reports DuplicateSync"),
    }
}

fn dispatch_fragment(ctx: &mut DispatchContext<'_>, f: ControlFrame) -> Vec<DispatchAction> {
    let key = (f.src, f.seq_id);
    let hops = hops_for(ctx.routing, f.src);
    let Some(seq): Option<&mut ReceiveSequence> = ctx.tables.wrp.get_mut(&key) else {
        return vec![DispatchAction::Drop];
    };
    let Some(entry) = ctx.routing.find_mut(f.src) else {
        return vec![DispatchAction::Drop];
    };
    match seq.on_fragment(f.number, f.payload, entry, hops, ctx.min_timeout, ctx.now) {
        RecvOutcome::Ack(number) => vec![DispatchAction::SendAck {
            to: f.src,
            seq_id: f.seq_id,
            number,
        }],
        RecvOutcome::AckAndDeliver(number, payload) => {
            ctx.tables.wrp.remove(&key);
            vec![
                DispatchAction::SendAck {
                    to: f.src,
                    seq_id: f.seq_id,
                    number,
                },
                DispatchAction::Deliver(f.src, payload),
            ]
        }
        RecvOutcome::Lost(number) => {
            ctx.stats.out_of_order_fragment();
            vec![DispatchAction::SendLost {
                to: f.src,
                seq_id: f.seq_id,
                number,
            }]
        }
        RecvOutcome::DuplicateSync | RecvOutcome::TimeoutCapReached => {
            unreachable!("on_fragment never reports these")
        }
    }
}

/// Sweeps WSP/WRP for expired deadlines and drives the timeout handlers
/// (§4.F "Timeout manager"). Called from a periodic embassy task.
pub fn sweep_timeouts(ctx: &mut DispatchContext<'_>) -> Vec<DispatchAction> {
    let mut actions = Vec::new();

    for key in ctx.tables.due_send_timeouts(ctx.now) {
        let hops = hops_for(ctx.routing, key.0);
        let queue_len = ctx.send_queue_length;
        let Some(entry) = ctx.routing.find(key.0).cloned() else {
            ctx.tables.wsp.remove(&key);
            continue;
        };
        let Some(seq) = ctx.tables.wsp.get_mut(&key) else {
            continue;
        };
        match seq.on_timeout(&entry, hops, ctx.min_timeout, ctx.max_timeouts, queue_len, ctx.now) {
            SendOutcome::TransmitSync => actions.push(DispatchAction::TransmitSync {
                to: key.0,
                seq_id: key.1,
            }),
            SendOutcome::TransmitFragment(number) => actions.push(DispatchAction::TransmitFragment {
                to: key.0,
                seq_id: key.1,
                number,
            }),
            SendOutcome::DeliveryFailed => {
                ctx.stats.delivery_failed();
                ctx.tables.wsp.remove(&key);
                actions.push(DispatchAction::SequenceFailed {
                    to: key.0,
                    seq_id: key.1,
                });
            }
            SendOutcome::Done | SendOutcome::DuplicateAck => unreachable!(),
        }
    }

    for key in ctx.tables.due_recv_timeouts(ctx.now) {
        let hops = hops_for(ctx.routing, key.0);
        let queue_len = ctx.send_queue_length;
        let Some(entry) = ctx.routing.find(key.0).cloned() else {
            ctx.tables.wrp.remove(&key);
            continue;
        };
        let Some(seq) = ctx.tables.wrp.get_mut(&key) else {
            continue;
        };
        match seq.on_timeout(&entry, hops, ctx.min_timeout, ctx.max_timeouts, queue_len, ctx.now) {
            RecvOutcome::Lost(number) => actions.push(DispatchAction::SendLost {
                to: key.0,
                seq_id: key.1,
                number,
            }),
            RecvOutcome::TimeoutCapReached => {
                ctx.stats.timeout_cap_reached();
                ctx.tables.wrp.remove(&key);
            }
            RecvOutcome::Ack(_) | RecvOutcome::AckAndDeliver(_, _) | RecvOutcome::DuplicateSync => {
                unreachable!()
            }
        }
    }

    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Role;
    use crate::packet::{DataFrame, RouteTuple, TableFrame};

    fn routing() -> RoutingTable {
        RoutingTable::new(1, 256, Duration::from_secs(30))
    }

    fn ctx<'a>(
        routing: &'a mut RoutingTable,
        tables: &'a mut TransportTables,
        stats: &'a Stats,
    ) -> DispatchContext<'a> {
        DispatchContext {
            local: 1,
            min_timeout: Duration::from_secs(20),
            max_timeouts: 10,
            send_queue_length: 0,
            now: Instant::from_secs(0),
            routing,
            tables,
            stats,
        }
    }

    #[test]
    fn hello_updates_routing_table_and_emits_no_reply() {
        let mut rt = routing();
        let mut tables = TransportTables::new();
        let stats = Stats::new();
        let mut c = ctx(&mut rt, &mut tables, &stats);

        let frame = TableFrame {
            dst: ADDR_BROADCAST,
            src: 2,
            id: 0,
            role: Role::DEFAULT,
            routes: vec![],
        };
        let actions = dispatch(&mut c, Packet::Hello(frame), 5);
        assert_eq!(actions, vec![DispatchAction::RouteLearned]);
        assert!(rt.find(2).is_some());
    }

    #[test]
    fn broadcast_data_is_dropped() {
        let mut rt = routing();
        let mut tables = TransportTables::new();
        let stats = Stats::new();
        let mut c = ctx(&mut rt, &mut tables, &stats);

        let frame = DataFrame {
            dst: ADDR_BROADCAST,
            src: 2,
            id: 0,
            via: 2,
            payload: vec![1],
        };
        assert_eq!(dispatch(&mut c, Packet::Data(frame), 5), vec![DispatchAction::Drop]);
    }

    #[test]
    fn local_data_is_delivered() {
        let mut rt = routing();
        let mut tables = TransportTables::new();
        let stats = Stats::new();
        let mut c = ctx(&mut rt, &mut tables, &stats);

        let frame = DataFrame {
            dst: 1,
            src: 2,
            id: 0,
            via: 2,
            payload: vec![9, 9],
        };
        assert_eq!(
            dispatch(&mut c, Packet::Data(frame), 5),
            vec![DispatchAction::Deliver(2, vec![9, 9])]
        );
    }

    #[test]
    fn need_ack_delivers_and_replies_with_ack() {
        let mut rt = routing();
        let mut tables = TransportTables::new();
        let stats = Stats::new();
        let mut c = ctx(&mut rt, &mut tables, &stats);

        let frame = DataFrame {
            dst: 1,
            src: 2,
            id: 7,
            via: 2,
            payload: vec![1],
        };
        let actions = dispatch(&mut c, Packet::NeedAck(frame), 5);
        assert_eq!(
            actions,
            vec![
                DispatchAction::Deliver(2, vec![1]),
                DispatchAction::SendAck {
                    to: 2,
                    seq_id: 7,
                    number: 0
                }
            ]
        );
    }

    #[test]
    fn frame_via_local_is_forwarded() {
        let mut rt = routing();
        let mut tables = TransportTables::new();
        let stats = Stats::new();
        let mut c = ctx(&mut rt, &mut tables, &stats);

        let frame = DataFrame {
            dst: 3,
            src: 2,
            id: 0,
            via: 1,
            payload: vec![5],
        };
        let actions = dispatch(&mut c, Packet::Data(frame.clone()), 5);
        assert_eq!(actions, vec![DispatchAction::Forward(Packet::Data(frame))]);
    }

    #[test]
    fn sync_then_fragments_deliver_reassembled_payload() {
        let mut rt = routing();
        rt.process_route_frame(
            2,
            10,
            &TableFrame {
                dst: ADDR_BROADCAST,
                src: 2,
                id: 0,
                role: Role::DEFAULT,
                routes: vec![],
            },
            Instant::from_secs(0),
        );
        let mut tables = TransportTables::new();
        let stats = Stats::new();
        let mut c = ctx(&mut rt, &mut tables, &stats);

        let sync = ControlFrame {
            dst: 1,
            src: 2,
            id: 0,
            via: 2,
            seq_id: 9,
            number: 2,
            payload: vec![],
        };
        let actions = dispatch(&mut c, Packet::Sync(sync), 10);
        assert_eq!(
            actions,
            vec![DispatchAction::SendAck {
                to: 2,
                seq_id: 9,
                number: 0
            }]
        );

        let frag1 = ControlFrame {
            dst: 1,
            src: 2,
            id: 0,
            via: 2,
            seq_id: 9,
            number: 1,
            payload: vec![1, 2],
        };
        let actions = dispatch(&mut c, Packet::XlData(frag1), 10);
        assert_eq!(
            actions,
            vec![DispatchAction::SendAck {
                to: 2,
                seq_id: 9,
                number: 1
            }]
        );

        let frag2 = ControlFrame {
            dst: 1,
            src: 2,
            id: 0,
            via: 2,
            seq_id: 9,
            number: 2,
            payload: vec![3, 4],
        };
        let actions = dispatch(&mut c, Packet::XlData(frag2), 10);
        assert_eq!(
            actions,
            vec![
                DispatchAction::SendAck {
                    to: 2,
                    seq_id: 9,
                    number: 2
                },
                DispatchAction::Deliver(2, vec![1, 2, 3, 4]),
            ]
        );
    }

    #[test]
    fn duplicate_sync_is_counted_and_dropped() {
        let mut rt = routing();
        let mut tables = TransportTables::new();
        let stats = Stats::new();
        let mut c = ctx(&mut rt, &mut tables, &stats);

        let sync = ControlFrame {
            dst: 1,
            src: 2,
            id: 0,
            via: 2,
            seq_id: 9,
            number: 2,
            payload: vec![],
        };
        dispatch(&mut c, Packet::Sync(sync.clone()), 10);
        let actions = dispatch(&mut c, Packet::Sync(sync), 10);
        assert_eq!(actions, vec![DispatchAction::Drop]);
        assert_eq!(stats.snapshot().duplicate_sync, 1);
    }
}
