//! Destination selection for application traffic addressed to `BROADCAST`,
//! meaning "pick an upstream path out of the mesh" (§4.H).

use crate::address::{Address, Role};
use crate::routing::RoutingTable;

/// Which sink the caller should hand the frame to, or a mesh hop to route
/// it through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Wifi,
    Cellular,
    Mesh(Address),
    None,
}

/// Five-step policy from §4.H, evaluated in order.
pub fn select_destination(local_role: Role, table: &RoutingTable) -> Destination {
    if local_role.contains(Role::CLIENT) {
        return Destination::Wifi;
    }
    if let Some(entry) = table.best_by_role(Role::CLIENT) {
        return Destination::Mesh(entry.address);
    }
    if local_role.contains(Role::GATEWAY) {
        return Destination::Cellular;
    }
    if let Some(entry) = table.best_by_role(Role::GATEWAY) {
        return Destination::Mesh(entry.address);
    }
    Destination::None
}
