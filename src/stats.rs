//! Non-fatal failure counters (§7, ambient addition).
//!
//! Every data-plane error named in the design is a log line plus an atomic
//! increment here rather than a propagated `Result::Err`. Tests assert on
//! snapshots of these counters instead of on exceptions that never occur.

use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! stats_block {
    ($( $field:ident ),+ $(,)?) => {
        /// Atomic counters, one per non-fatal failure or notable event.
        #[derive(Debug, Default)]
        pub struct Stats {
            $( $field: AtomicU64, )+
        }

        /// Plain-data snapshot of [`Stats`], safe to compare in tests.
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct StatsSnapshot {
            $( pub $field: u64, )+
        }

        impl Stats {
            pub fn new() -> Self {
                Self::default()
            }

            $(
                pub fn $field(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )+

            /// Reads every counter into a plain struct.
            pub fn snapshot(&self) -> StatsSnapshot {
                StatsSnapshot {
                    $( $field: self.$field.load(Ordering::Relaxed), )+
                }
            }
        }
    };
}

stats_block!(
    oversize_frame,
    truncated_frame,
    destiny_unreachable,
    duplicate_sync,
    duplicate_ack,
    duplicate_lost,
    out_of_order_fragment,
    timeout_cap_reached,
    routing_table_full,
    delivery_failed,
    no_destination,
    radio_errors,
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn snapshot_reflects_increments() {
        let stats = Stats::new();
        stats.oversize_frame();
        stats.oversize_frame();
        stats.routing_table_full();
        let snap = stats.snapshot();
        assert_eq!(snap.oversize_frame, 2);
        assert_eq!(snap.routing_table_full, 1);
        assert_eq!(snap.delivery_failed, 0);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let stats = Arc::new(Stats::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let stats = Arc::clone(&stats);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    stats.delivery_failed();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(stats.snapshot().delivery_failed, 8000);
    }
}
