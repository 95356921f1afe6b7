//! Features derived from packet headers alone.

use super::{Feature, FeatureHistory, WindowView};
use crate::record::PacketRecord;

/// Smallest inter-arrival spacing considered, matching pcap's microsecond clock.
const MIN_SPACING_SECS: f64 = 1e-6;

/// Instantaneous packet rate, the inverse of the spacing to the previous packet.
#[derive(Debug, Clone)]
pub struct PacketFrequency {
    history: FeatureHistory,
}

impl PacketFrequency {
    pub const DESCRIPTOR: &'static str = "packet_freq";

    pub fn new() -> Self {
        Self {
            history: FeatureHistory::new(Self::DESCRIPTOR),
        }
    }
}

impl Default for PacketFrequency {
    fn default() -> Self {
        Self::new()
    }
}

impl Feature for PacketFrequency {
    fn update(&mut self, packet: &PacketRecord, view: &dyn WindowView) {
        let rate = match view.lookup_packet_time(-1) {
            Some(previous) => 1.0 / (packet.timestamp - previous).max(MIN_SPACING_SECS),
            None => 0.0,
        };
        self.history.record(rate);
    }

    fn history(&self) -> &FeatureHistory {
        &self.history
    }

    fn history_mut(&mut self) -> &mut FeatureHistory {
        &mut self.history
    }
}

/// Raw packet length (IP total length field).
#[derive(Debug, Clone)]
pub struct PayloadLength {
    history: FeatureHistory,
}

impl PayloadLength {
    pub const DESCRIPTOR: &'static str = "payload_len";

    pub fn new() -> Self {
        Self {
            history: FeatureHistory::new(Self::DESCRIPTOR),
        }
    }
}

impl Default for PayloadLength {
    fn default() -> Self {
        Self::new()
    }
}

impl Feature for PayloadLength {
    fn update(&mut self, packet: &PacketRecord, _view: &dyn WindowView) {
        self.history.record(packet.ip_len as f64);
    }

    fn history(&self) -> &FeatureHistory {
        &self.history
    }

    fn history_mut(&mut self) -> &mut FeatureHistory {
        &mut self.history
    }
}
