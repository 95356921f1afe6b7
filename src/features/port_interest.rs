//! Destination-port relative interest.
//!
//! Tracks how often a source has recently targeted the port of the current
//! packet. The trailing port window belongs to a single source; two sources
//! never share counters.

use std::collections::{HashMap, VecDeque};

use super::{Feature, FeatureHistory, WindowView};
use crate::record::PacketRecord;

#[derive(Debug, Clone)]
pub struct PortRelativeInterest {
    history: FeatureHistory,
    memory_n: usize,
    port_counts: HashMap<u32, usize>,
    last_ports: VecDeque<u32>,
}

impl PortRelativeInterest {
    pub const DESCRIPTOR: &'static str = "port_interest";

    pub fn new(memory_n: usize) -> Self {
        Self {
            history: FeatureHistory::new(Self::DESCRIPTOR),
            memory_n,
            port_counts: HashMap::new(),
            last_ports: VecDeque::with_capacity(memory_n + 1),
        }
    }

    /// Sum of all port counters; never exceeds the window size.
    pub fn tracked_ports(&self) -> usize {
        self.last_ports.len()
    }

    pub fn port_count(&self, port: u32) -> usize {
        self.port_counts.get(&port).copied().unwrap_or(0)
    }
}

impl Feature for PortRelativeInterest {
    fn update(&mut self, packet: &PacketRecord, _view: &dyn WindowView) {
        let port = packet.dst_port;

        // Interest is measured against the ports seen *before* this packet.
        let total = self.last_ports.len();
        let state = if total == 0 {
            0.0
        } else {
            self.port_count(port) as f64 / total as f64
        };
        self.history.record(state);

        *self.port_counts.entry(port).or_default() += 1;
        self.last_ports.push_back(port);

        if self.last_ports.len() > self.memory_n {
            if let Some(oldest) = self.last_ports.pop_front() {
                if let Some(count) = self.port_counts.get_mut(&oldest) {
                    *count -= 1;
                    if *count == 0 {
                        self.port_counts.remove(&oldest);
                    }
                }
            }
        }
    }

    fn history(&self) -> &FeatureHistory {
        &self.history
    }

    fn history_mut(&mut self) -> &mut FeatureHistory {
        &mut self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::test_support::{packet, StubView};

    #[test]
    fn test_first_packet_has_no_interest() {
        let mut feature = PortRelativeInterest::new(10);
        feature.update(&packet(23, 40, 0.0), &StubView::default());
        assert_eq!(feature.get_state().unwrap(), 0.0);
    }

    #[test]
    fn test_alternating_ports() {
        let mut feature = PortRelativeInterest::new(10);
        let view = StubView::default();
        feature.update(&packet(23, 40, 0.0), &view);
        feature.update(&packet(80, 40, 1.0), &view);
        feature.update(&packet(23, 40, 2.0), &view);

        // one of the two prior ports was 23
        assert!((feature.get_state().unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_counters_bounded_by_window() {
        let memory_n = 5;
        let mut feature = PortRelativeInterest::new(memory_n);
        let view = StubView::default();

        for i in 0..50u32 {
            feature.update(&packet(i % 7, 40, i as f64), &view);
            let sum: usize = (0..7).map(|p| feature.port_count(p)).sum();
            assert!(sum <= memory_n);
            assert_eq!(sum, feature.tracked_ports());
        }
    }

    #[test]
    fn test_saturates_on_single_port() {
        let memory_n = 8;
        let mut feature = PortRelativeInterest::new(memory_n);
        let view = StubView::default();

        for i in 0..=memory_n {
            feature.update(&packet(445, 40, i as f64), &view);
        }
        assert!((feature.get_state().unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_instances_are_isolated() {
        let view = StubView::default();
        let mut a = PortRelativeInterest::new(10);
        let mut b = PortRelativeInterest::new(10);

        for i in 0..5 {
            a.update(&packet(23, 40, i as f64), &view);
        }
        b.update(&packet(23, 40, 0.0), &view);

        assert_eq!(b.get_state().unwrap(), 0.0);
        assert_eq!(b.port_count(23), 1);
        assert_eq!(a.port_count(23), 5);
    }
}
