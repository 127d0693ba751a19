//! Ingestion of received anchor broadcasts.
//!
//! The radio driver decodes a range packet and hands it over together with
//! the tag's rx timestamp. [`TdoaEngine::handle_packet`] performs the whole
//! per-packet sequence around the engine: remote data first, then the TDoA
//! processing, then the anchor's own timestamps and position.

use nalgebra::Point3;

use crate::constants::SEQ_NR_MASK;
use crate::engine::TdoaEngine;
use crate::measurement::MeasurementSink;
use crate::storage::AnchorCtx;
use crate::types::AnchorId;

/// What the sending anchor reports about one of its neighbours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteReport {
    pub anchor: AnchorId,

    /// When the sender received the neighbour's latest packet (sender clock).
    /// Zero if it was not received.
    pub rx_time: i64,

    /// Sequence number of that packet
    pub seq_nr: u8,

    /// Time of flight from the neighbour to the sender (sender clock).
    /// Zero if unknown.
    pub tof: i64,
}

/// One decoded anchor broadcast.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangePacket<'a> {
    pub source: AnchorId,

    /// Tx timestamp in the source anchor's clock
    pub tx_time: i64,

    pub seq_nr: u8,

    pub remote: &'a [RemoteReport],

    /// Position payload, if the packet carried one
    pub position: Option<Point3<f64>>,
}

impl<S: MeasurementSink> TdoaEngine<S> {
    /// Feeds one received packet through the engine.
    ///
    /// `tag_rx_time` is the tag's rx timestamp of the packet. Returns the
    /// result of [`process_packet`](Self::process_packet).
    pub fn handle_packet(
        &mut self,
        packet: &RangePacket<'_>,
        tag_rx_time: i64,
        now_ms: u32,
    ) -> bool {
        self.stats.packets_received.event();

        let ctx = self.anchor_ctx_for_packet(packet.source, now_ms);
        self.update_remote_data(&ctx, packet);

        let reliable = self.process_packet(&ctx, packet.tx_time, tag_rx_time);

        let seq_nr = packet.seq_nr & SEQ_NR_MASK;
        self.storage
            .set_rx_tx_data(&ctx, tag_rx_time, packet.tx_time, seq_nr);

        if let Some(position) = packet.position {
            self.set_anchor_position(&ctx, position.x, position.y, position.z);
        }

        reliable
    }

    fn update_remote_data(&mut self, ctx: &AnchorCtx, packet: &RangePacket<'_>) {
        for report in packet.remote.iter().filter(|r| r.anchor != ctx.id()) {
            if report.rx_time != 0 {
                self.storage.set_remote_rx_time(
                    ctx,
                    report.anchor,
                    report.rx_time,
                    report.seq_nr & SEQ_NR_MASK,
                );
            }

            if report.tof != 0 {
                self.storage.set_remote_tof(ctx, report.anchor, report.tof);
                self.stats.record_tof(ctx.id(), report.anchor, report.tof);
            }
        }
    }
}
