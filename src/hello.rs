//! Hello beacon construction (§4.E).
//!
//! Builds one or more `TableFrame`s advertising every entry currently in the
//! routing table, sliced so each frame's tuples fit in `max_payload_for`.

use crate::address::{Address, Role, ADDR_BROADCAST};
use crate::packet::{PacketCodec, PacketKind, RouteTuple, TableFrame, ROUTE_TUPLE_LEN};
use crate::routing::RoutingTable;

/// Splits the routing table snapshot into Hello frames, `id` numbered
/// sequentially starting at `first_id`.
pub fn build_hello_frames(
    local: Address,
    role: Role,
    table: &RoutingTable,
    codec: &PacketCodec,
    first_id: u8,
) -> Vec<TableFrame> {
    let max_tuples = (codec.max_payload_for(PacketKind::Hello) / ROUTE_TUPLE_LEN).max(1);
    build_frames(local, role, table, max_tuples, first_id)
}

/// Same slicing as [`build_hello_frames`] but with an explicit entry cap
/// instead of one derived from the wire frame budget — used for the
/// routing-table snapshot sent to the uplink (§4.H), which is capped at a
/// fixed 5 entries per packet regardless of `max_packet_size`.
pub fn build_hello_frames_sized(
    local: Address,
    role: Role,
    table: &RoutingTable,
    max_entries: usize,
    first_id: u8,
) -> Vec<TableFrame> {
    build_frames(local, role, table, max_entries.max(1), first_id)
}

fn build_frames(
    local: Address,
    role: Role,
    table: &RoutingTable,
    max_tuples: usize,
    first_id: u8,
) -> Vec<TableFrame> {
    let tuples: Vec<RouteTuple> = table
        .all_nodes()
        .map(|e| RouteTuple {
            address: e.address,
            metric: e.metric,
            role: e.role,
        })
        .collect();

    if tuples.is_empty() {
        return vec![TableFrame {
            dst: ADDR_BROADCAST,
            src: local,
            id: first_id,
            role,
            routes: vec![],
        }];
    }

    tuples
        .chunks(max_tuples)
        .enumerate()
        .map(|(i, chunk)| TableFrame {
            dst: ADDR_BROADCAST,
            src: local,
            id: first_id.wrapping_add(i as u8),
            role,
            routes: chunk.to_vec(),
        })
        .collect()
}
