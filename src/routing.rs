//! Distance-vector routing table (§3, §4.C).
//!
//! Kept as a plain, synchronous service object — like the teacher's
//! `ConnectionMatrixParser` — rather than baking a lock into the type itself.
//! The [`crate::engine::Engine`] is the one that wraps it in the "in_use"
//! mutex guard described in §9; this keeps the routing logic itself trivial
//! to unit test without an executor.

use std::collections::HashMap;

use embassy_time::{Duration, Instant};

use crate::address::{Address, Role};
use crate::packet::{RouteTuple, TableFrame};

/// One distance-vector routing entry (§3).
#[derive(Debug, Clone, PartialEq)]
pub struct RouteEntry {
    pub address: Address,
    pub via: Address,
    /// Hop count, 1..=255. Never zero: a zero-metric entry would be the
    /// local node, which is never stored.
    pub metric: u8,
    pub role: Role,
    pub last_snr: i8,
    pub last_rssi: i16,
    pub srtt: Option<Duration>,
    pub rttvar: Option<Duration>,
    pub timeout_deadline: Instant,
}

impl RouteEntry {
    /// `via == address` iff this is a direct (one-hop) neighbor.
    pub fn is_neighbor(&self) -> bool {
        self.via == self.address
    }
}

/// Outcome of folding one route tuple (or a direct neighbor sighting) into
/// the table, used by callers to drive stats/logging without duplicating
/// the decision logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteUpdate {
    Inserted,
    Replaced,
    RefreshedTimeout,
    KeptExisting,
    RejectedFull,
}

/// Distance-vector table keyed by node address (§4.C).
pub struct RoutingTable {
    local: Address,
    entries: HashMap<Address, RouteEntry>,
    max_size: usize,
    default_timeout: Duration,
}

impl RoutingTable {
    pub fn new(local: Address, max_size: usize, default_timeout: Duration) -> Self {
        RoutingTable {
            local,
            entries: HashMap::new(),
            max_size,
            default_timeout,
        }
    }

    pub fn local_address(&self) -> Address {
        self.local
    }

    pub fn find(&self, address: Address) -> Option<&RouteEntry> {
        self.entries.get(&address)
    }

    pub fn find_mut(&mut self, address: Address) -> Option<&mut RouteEntry> {
        self.entries.get_mut(&address)
    }

    /// Next hop toward `dst`, or `None` if there is no route.
    pub fn next_hop(&self, dst: Address) -> Option<Address> {
        self.entries.get(&dst).map(|e| e.via)
    }

    pub fn all_nodes(&self) -> impl Iterator<Item = &RouteEntry> {
        self.entries.values()
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    fn max_metric(&self) -> u8 {
        self.entries.values().map(|e| e.metric).max().unwrap_or(0)
    }

    /// Folds a Hello/RouteTable frame into the table (§4.C route ingestion).
    /// Returns one [`RouteUpdate`] per tuple plus the sender's own neighbor
    /// registration, in that order (sender first).
    pub fn process_route_frame(
        &mut self,
        sender: Address,
        sender_snr: i8,
        frame: &TableFrame,
        now: Instant,
    ) -> Vec<RouteUpdate> {
        let mut updates = Vec::with_capacity(frame.routes.len() + 1);
        updates.push(self.register_neighbor(sender, frame.role, sender_snr, now));
        for tuple in &frame.routes {
            updates.push(self.ingest_tuple(sender, sender_snr, tuple, now));
        }
        updates
    }

    /// The sender of any route-carrying frame is always a one-hop neighbor
    /// (§4.C: "The sender itself is always registered...").
    fn register_neighbor(
        &mut self,
        sender: Address,
        role: Role,
        snr: i8,
        now: Instant,
    ) -> RouteUpdate {
        if sender == self.local {
            return RouteUpdate::KeptExisting;
        }
        if let Some(existing) = self.entries.get_mut(&sender) {
            existing.via = sender;
            existing.metric = 1;
            existing.role = role;
            existing.last_snr = snr;
            existing.timeout_deadline = now + self.default_timeout;
            return RouteUpdate::RefreshedTimeout;
        }
        self.insert_checked(sender, sender, 1, role, snr, now)
    }

    fn ingest_tuple(
        &mut self,
        sender: Address,
        sender_snr: i8,
        tuple: &RouteTuple,
        now: Instant,
    ) -> RouteUpdate {
        if tuple.address == self.local {
            return RouteUpdate::KeptExisting;
        }
        let new_metric = tuple.metric.saturating_add(1);

        if let Some(existing) = self.entries.get_mut(&tuple.address) {
            if existing.via == sender {
                existing.metric = new_metric;
                existing.role = tuple.role;
                existing.last_snr = sender_snr;
                existing.timeout_deadline = now + self.default_timeout;
                return RouteUpdate::RefreshedTimeout;
            }
            let better = new_metric < existing.metric
                || (new_metric == existing.metric && sender_snr > existing.last_snr);
            if better {
                existing.via = sender;
                existing.metric = new_metric;
                existing.role = tuple.role;
                existing.last_snr = sender_snr;
                existing.timeout_deadline = now + self.default_timeout;
                return RouteUpdate::Replaced;
            }
            return RouteUpdate::KeptExisting;
        }

        self.insert_checked(tuple.address, sender, new_metric, tuple.role, sender_snr, now)
    }

    fn insert_checked(
        &mut self,
        address: Address,
        via: Address,
        metric: u8,
        role: Role,
        snr: i8,
        now: Instant,
    ) -> RouteUpdate {
        if self.entries.len() >= self.max_size {
            if metric >= self.max_metric() {
                return RouteUpdate::RejectedFull;
            }
            if let Some(worst) = self
                .entries
                .values()
                .max_by_key(|e| e.metric)
                .map(|e| e.address)
            {
                self.entries.remove(&worst);
            }
        }
        self.entries.insert(
            address,
            RouteEntry {
                address,
                via,
                metric,
                role,
                last_snr: snr,
                last_rssi: 0,
                srtt: None,
                rttvar: None,
                timeout_deadline: now + self.default_timeout,
            },
        );
        RouteUpdate::Inserted
    }

    /// Removes every entry whose deadline has passed, returning their
    /// addresses so the reliable-transport layer can tear down any sequence
    /// contexts that referenced them (§4.C expiry, §8 scenario 6).
    pub fn expire_stale(&mut self, now: Instant) -> Vec<Address> {
        let stale: Vec<Address> = self
            .entries
            .iter()
            .filter(|(_, e)| e.timeout_deadline < now)
            .map(|(addr, _)| *addr)
            .collect();
        for addr in &stale {
            self.entries.remove(addr);
        }
        stale
    }

    /// Lowest-metric entry whose role includes every bit in `role_mask`,
    /// tie-broken by higher (better) SNR (§4.H Destination Selector).
    pub fn best_by_role(&self, role_mask: Role) -> Option<&RouteEntry> {
        self.entries
            .values()
            .filter(|e| e.role.contains(role_mask))
            .max_by(|a, b| {
                // Smaller metric wins; ties broken by larger SNR.
                b.metric
                    .cmp(&a.metric)
                    .then(a.last_snr.cmp(&b.last_snr))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn table(local: Address) -> RoutingTable {
        RoutingTable::new(local, 256, TIMEOUT)
    }

    fn hello(role: Role, routes: Vec<RouteTuple>) -> TableFrame {
        TableFrame {
            dst: crate::address::ADDR_BROADCAST,
            src: 0, // overwritten by caller via `sender` argument to process_route_frame
            id: 0,
            role,
            routes,
        }
    }

    #[test]
    fn two_node_hello_registers_one_hop_neighbor() {
        let mut rt = table(1);
        let now = Instant::from_secs(0);
        let frame = hello(Role::DEFAULT, vec![]);
        rt.process_route_frame(2, 10, &frame, now);

        let entry = rt.find(2).unwrap();
        assert_eq!(entry.via, 2);
        assert_eq!(entry.metric, 1);
        assert_eq!(entry.last_snr, 10);
        assert!(entry.is_neighbor());
    }

    #[test]
    fn three_node_relay_increments_metric() {
        let mut rt = table(1);
        let now = Instant::from_secs(0);
        let frame = hello(
            Role::DEFAULT,
            vec![RouteTuple {
                address: 3,
                metric: 1,
                role: Role::DEFAULT,
            }],
        );
        rt.process_route_frame(2, 10, &frame, now);

        let entry = rt.find(3).unwrap();
        assert_eq!(entry.via, 2);
        assert_eq!(entry.metric, 2);
    }

    #[test]
    fn ignores_tuple_naming_the_local_node() {
        let mut rt = table(1);
        let now = Instant::from_secs(0);
        let frame = hello(
            Role::DEFAULT,
            vec![RouteTuple {
                address: 1,
                metric: 1,
                role: Role::DEFAULT,
            }],
        );
        rt.process_route_frame(2, 10, &frame, now);
        assert!(rt.find(1).is_none());
    }

    #[test]
    fn processing_hello_twice_is_idempotent() {
        let mut rt = table(1);
        let now = Instant::from_secs(0);
        let frame = hello(
            Role::DEFAULT,
            vec![RouteTuple {
                address: 3,
                metric: 1,
                role: Role::DEFAULT,
            }],
        );
        rt.process_route_frame(2, 10, &frame, now);
        let first = rt.find(3).unwrap().clone();

        let later = now + Duration::from_secs(1);
        rt.process_route_frame(2, 10, &frame, later);
        let second = rt.find(3).unwrap().clone();

        assert_eq!(first.via, second.via);
        assert_eq!(first.metric, second.metric);
        assert!(second.timeout_deadline > first.timeout_deadline);
    }

    #[test]
    fn better_snr_at_equal_metric_replaces_via() {
        let mut rt = table(1);
        let now = Instant::from_secs(0);
        let frame = hello(
            Role::DEFAULT,
            vec![RouteTuple {
                address: 9,
                metric: 1,
                role: Role::DEFAULT,
            }],
        );
        rt.process_route_frame(2, 5, &frame, now);
        assert_eq!(rt.find(9).unwrap().via, 2);

        rt.process_route_frame(3, 20, &frame, now);
        assert_eq!(rt.find(9).unwrap().via, 3);
        assert_eq!(rt.find(9).unwrap().last_snr, 20);
    }

    #[test]
    fn worse_metric_does_not_replace_existing() {
        let mut rt = table(1);
        let now = Instant::from_secs(0);
        // Learn addr=9 at metric 2 via node 2.
        rt.process_route_frame(
            2,
            5,
            &hello(
                Role::DEFAULT,
                vec![RouteTuple {
                    address: 9,
                    metric: 1,
                    role: Role::DEFAULT,
                }],
            ),
            now,
        );
        // A worse (higher metric) advertisement from a different via is ignored.
        rt.process_route_frame(
            3,
            50,
            &hello(
                Role::DEFAULT,
                vec![RouteTuple {
                    address: 9,
                    metric: 5,
                    role: Role::DEFAULT,
                }],
            ),
            now,
        );
        assert_eq!(rt.find(9).unwrap().via, 2);
        assert_eq!(rt.find(9).unwrap().metric, 2);
    }

    #[test]
    fn expire_stale_removes_past_deadline_entries() {
        let mut rt = table(1);
        let now = Instant::from_secs(0);
        rt.process_route_frame(2, 1, &hello(Role::DEFAULT, vec![]), now);
        assert_eq!(rt.size(), 1);

        let still_alive = rt.expire_stale(now + Duration::from_secs(1));
        assert!(still_alive.is_empty());
        assert_eq!(rt.size(), 1);

        let expired = rt.expire_stale(now + TIMEOUT + Duration::from_secs(1));
        assert_eq!(expired, vec![2]);
        assert_eq!(rt.size(), 0);
    }

    #[test]
    fn full_table_rejects_non_improving_insert() {
        let mut rt = RoutingTable::new(1, 1, TIMEOUT);
        let now = Instant::from_secs(0);
        rt.process_route_frame(2, 1, &hello(Role::DEFAULT, vec![]), now);
        assert_eq!(rt.size(), 1);

        let updates = rt.process_route_frame(
            3,
            1,
            &hello(
                Role::DEFAULT,
                vec![RouteTuple {
                    address: 30,
                    metric: 5,
                    role: Role::DEFAULT,
                }],
            ),
            now,
        );
        // The sender registration (addr=3, metric=1) replaces nothing because
        // table is full and metric(1) is not < max_metric(1); the addr=30
        // tuple (metric=6) is rejected too.
        assert!(updates.contains(&RouteUpdate::RejectedFull));
        assert_eq!(rt.size(), 1);
        assert!(rt.find(2).is_some());
    }

    #[test]
    fn full_table_evicts_worst_entry_for_a_better_new_route() {
        let mut rt = RoutingTable::new(1, 2, TIMEOUT);
        let now = Instant::from_secs(0);
        rt.process_route_frame(2, 1, &hello(Role::DEFAULT, vec![]), now);
        rt.process_route_frame(
            2,
            1,
            &hello(
                Role::DEFAULT,
                vec![RouteTuple {
                    address: 30,
                    metric: 5,
                    role: Role::DEFAULT,
                }],
            ),
            now,
        );
        assert_eq!(rt.size(), 2);
        assert_eq!(rt.find(30).unwrap().metric, 6);

        let updates = rt.process_route_frame(
            2,
            1,
            &hello(
                Role::DEFAULT,
                vec![RouteTuple {
                    address: 40,
                    metric: 0,
                    role: Role::DEFAULT,
                }],
            ),
            now,
        );
        // addr=40 arrives at metric 1, strictly better than the table's
        // current worst entry (addr=30, metric 6), so it evicts addr=30
        // to stay at capacity instead of growing past max_size.
        assert!(!updates.contains(&RouteUpdate::RejectedFull));
        assert_eq!(rt.size(), 2);
        assert!(rt.find(30).is_none());
        assert_eq!(rt.find(40).unwrap().metric, 1);
    }

    #[test]
    fn best_by_role_prefers_lowest_metric_then_best_snr() {
        let mut rt = table(1);
        let now = Instant::from_secs(0);
        rt.process_route_frame(
            2,
            5,
            &hello(
                Role::CLIENT,
                vec![RouteTuple {
                    address: 9,
                    metric: 1,
                    role: Role::CLIENT,
                }],
            ),
            now,
        );
        rt.process_route_frame(
            3,
            5,
            &hello(
                Role::CLIENT,
                vec![RouteTuple {
                    address: 10,
                    metric: 1,
                    role: Role::CLIENT,
                }],
            ),
            now,
        );
        // addr=9 (metric 2) and addr=10 (metric 2) tie; neighbor 2 (metric 1)
        // and neighbor 3 (metric 1) also tie; best_by_role should return one
        // of the metric-1 CLIENT neighbors since they strictly beat metric-2 ones.
        let best = rt.best_by_role(Role::CLIENT).unwrap();
        assert_eq!(best.metric, 1);
    }

    #[test]
    fn next_hop_and_all_nodes() {
        let mut rt = table(1);
        let now = Instant::from_secs(0);
        rt.process_route_frame(2, 1, &hello(Role::DEFAULT, vec![]), now);
        assert_eq!(rt.next_hop(2), Some(2));
        assert_eq!(rt.next_hop(99), None);
        assert_eq!(rt.all_nodes().count(), 1);
    }
}
