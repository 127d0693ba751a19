//! Fixed-capacity anchor storage.
//!
//! The tag moves through an installation with an unbounded number of
//! anchors, of which only a handful are in range at any time. The storage
//! keeps a fixed table of slots, created lazily on the first packet from an
//! unseen anchor and recycled least-recently-updated first when the table is
//! full. There is no explicit removal.
//!
//! Every cached value (position, remote rx data, remote time of flight)
//! carries the time it was written and is checked against its validity
//! window when read; nothing is swept. Ages are taken with wrapping
//! arithmetic so the millisecond clock may roll over.
//!
//! All memory is allocated in [`AnchorStorage::new`]. Lookups are linear
//! scans over small arrays.

use tracing::debug;

use crate::clock_correction::ClockCorrectionState;
use crate::config::{EngineConfig, ValidityWindows};
use crate::error::ConfigError;
use crate::types::{age_ms, is_fresh, AnchorId, AnchorPosition};

/// Handle to an anchor slot for the duration of one packet.
///
/// Carries the time the packet is processed at, which is used for every
/// freshness check made through the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnchorCtx {
    slot: usize,
    id: AnchorId,
    now_ms: u32,
}

impl AnchorCtx {
    /// Anchor this context refers to.
    pub fn id(&self) -> AnchorId {
        self.id
    }

    /// Time used for freshness checks (ms).
    pub fn now_ms(&self) -> u32 {
        self.now_ms
    }

    /// Index of the slot in the table.
    pub fn slot(&self) -> usize {
        self.slot
    }
}

/// An anchor overheard by another anchor, and the latest rx data for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteSeqNr {
    /// The overheard anchor
    pub id: AnchorId,
    /// Its sequence number as seen by the reporting anchor
    pub seq_nr: u8,
}

#[derive(Debug, Clone, Copy)]
struct RemoteRx {
    id: AnchorId,
    rx_time: i64,
    seq_nr: u8,
    written_ms: u32,
}

#[derive(Debug, Clone, Copy)]
struct RemoteTof {
    id: AnchorId,
    tof: i64,
    written_ms: u32,
}

/// An entry in one of the bounded per-anchor lists.
trait Expiring {
    fn id(&self) -> AnchorId;
    fn written_ms(&self) -> u32;

    fn is_alive(&self, window_ms: u32, now_ms: u32) -> bool {
        is_fresh(self.written_ms(), window_ms, now_ms)
    }
}

impl Expiring for RemoteRx {
    fn id(&self) -> AnchorId {
        self.id
    }

    fn written_ms(&self) -> u32 {
        self.written_ms
    }
}

impl Expiring for RemoteTof {
    fn id(&self) -> AnchorId {
        self.id
    }

    fn written_ms(&self) -> u32 {
        self.written_ms
    }
}

/// Finds the live entry for `id`. An expired entry hides nothing behind it.
fn find_alive<T: Expiring>(
    entries: &[Option<T>],
    id: AnchorId,
    window_ms: u32,
    now_ms: u32,
) -> Option<&T> {
    entries
        .iter()
        .flatten()
        .find(|entry| entry.id() == id)
        .filter(|entry| entry.is_alive(window_ms, now_ms))
}

/// Picks the index to write `id` into: the existing entry for the id, or
/// else the oldest entry (empty entries count as oldest). All entries of a
/// list share one window, so the oldest is also the first to expire.
fn replacement_index<T: Expiring>(entries: &[Option<T>], id: AnchorId, now_ms: u32) -> usize {
    let mut index = 0;
    let mut oldest: Option<u64> = None;

    for (i, entry) in entries.iter().enumerate() {
        let age = match entry {
            Some(e) if e.id() == id => return i,
            Some(e) => u64::from(age_ms(e.written_ms(), now_ms)),
            None => u64::MAX,
        };
        if oldest.map_or(true, |o| age > o) {
            oldest = Some(age);
            index = i;
        }
    }

    index
}

/// State kept for one anchor.
#[derive(Debug, Clone)]
struct AnchorSlot {
    id: AnchorId,
    initialized: bool,
    last_update_ms: u32,

    rx_time: Option<i64>,
    tx_time: Option<i64>,
    seq_nr: u8,

    clock: ClockCorrectionState,
    position: Option<AnchorPosition>,

    remote_rx: Box<[Option<RemoteRx>]>,
    remote_tof: Box<[Option<RemoteTof>]>,

    // Own time of flight (hybrid mode) and the time it was measured
    tof: Option<(i64, u32)>,
}

impl AnchorSlot {
    fn new(remote_capacity: usize, tof_capacity: usize) -> Self {
        Self {
            id: AnchorId::default(),
            initialized: false,
            last_update_ms: 0,
            rx_time: None,
            tx_time: None,
            seq_nr: 0,
            clock: ClockCorrectionState::default(),
            position: None,
            remote_rx: vec![None; remote_capacity].into_boxed_slice(),
            remote_tof: vec![None; tof_capacity].into_boxed_slice(),
            tof: None,
        }
    }

    /// Wipes the slot for a new anchor, reusing its buffers.
    fn reset(&mut self, id: AnchorId) {
        self.id = id;
        self.initialized = true;
        self.last_update_ms = 0;
        self.rx_time = None;
        self.tx_time = None;
        self.seq_nr = 0;
        self.clock = ClockCorrectionState::default();
        self.position = None;
        self.remote_rx.iter_mut().for_each(|e| *e = None);
        self.remote_tof.iter_mut().for_each(|e| *e = None);
        self.tof = None;
    }
}

/// Fixed-capacity table of anchor slots.
#[derive(Debug, Clone)]
pub struct AnchorStorage {
    slots: Box<[AnchorSlot]>,
    validity: ValidityWindows,
}

impl AnchorStorage {
    /// Allocates a table with `anchor_capacity` slots, each holding
    /// `remote_capacity` remote rx entries and `tof_capacity` tof entries.
    /// Every capacity must be non-zero.
    pub fn new(
        anchor_capacity: usize,
        remote_capacity: usize,
        tof_capacity: usize,
        validity: ValidityWindows,
    ) -> Result<Self, ConfigError> {
        if anchor_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("anchor_capacity"));
        }
        if remote_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("remote_capacity"));
        }
        if tof_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("tof_capacity"));
        }

        let slots = (0..anchor_capacity)
            .map(|_| AnchorSlot::new(remote_capacity, tof_capacity))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self { slots, validity })
    }

    /// Allocates a table sized by an engine configuration.
    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        Self::new(
            config.anchor_capacity,
            config.remote_capacity,
            config.tof_capacity,
            config.validity,
        )
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.initialized).count()
    }

    /// True if no anchor has been stored yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Freshness windows in use.
    pub fn validity(&self) -> &ValidityWindows {
        &self.validity
    }

    /// Returns the context for `id`, creating a slot if needed.
    ///
    /// The boolean is true if the anchor was already stored. A new anchor
    /// takes the first unused slot, or else the slot updated longest ago
    /// (lowest index on ties).
    pub fn get_or_create(&mut self, id: AnchorId, now_ms: u32) -> (AnchorCtx, bool) {
        let mut first_free: Option<usize> = None;
        let mut oldest: Option<(usize, u32)> = None;

        for (i, slot) in self.slots.iter().enumerate() {
            if slot.initialized {
                if slot.id == id {
                    return (AnchorCtx { slot: i, id, now_ms }, true);
                }
                let age = age_ms(slot.last_update_ms, now_ms);
                if oldest.map_or(true, |(_, a)| age > a) {
                    oldest = Some((i, age));
                }
            } else if first_free.is_none() {
                first_free = Some(i);
            }
        }

        let index = match (first_free, oldest) {
            (Some(free), _) => free,
            (None, Some((i, age))) => {
                debug!(
                    evicted = %self.slots[i].id,
                    anchor = %id,
                    age_ms = age,
                    "Anchor storage full, recycling oldest slot"
                );
                i
            }
            // new() refuses a zero anchor capacity
            (None, None) => 0,
        };

        self.slots[index].reset(id);
        (AnchorCtx { slot: index, id, now_ms }, false)
    }

    /// Returns the context for `id` if it is stored. Never creates or evicts.
    pub fn get(&self, id: AnchorId, now_ms: u32) -> Option<AnchorCtx> {
        self.slots
            .iter()
            .position(|s| s.initialized && s.id == id)
            .map(|slot| AnchorCtx { slot, id, now_ms })
    }

    /// True if `id` occupies a slot.
    pub fn contains(&self, id: AnchorId) -> bool {
        self.slots.iter().any(|s| s.initialized && s.id == id)
    }

    /// Ids of all stored anchors, in slot order.
    pub fn anchor_ids(&self) -> impl Iterator<Item = AnchorId> + '_ {
        self.slots.iter().filter(|s| s.initialized).map(|s| s.id)
    }

    /// Ids of anchors updated within the active window.
    pub fn active_anchor_ids(&self, now_ms: u32) -> impl Iterator<Item = AnchorId> + '_ {
        let window = self.validity.active_ms;
        self.slots
            .iter()
            .filter(move |s| s.initialized && is_fresh(s.last_update_ms, window, now_ms))
            .map(|s| s.id)
    }

    /// Writes stored ids into `out` and returns how many were written.
    pub fn anchor_id_list(&self, out: &mut [AnchorId]) -> usize {
        fill(out, self.anchor_ids())
    }

    /// Writes active ids into `out` and returns how many were written.
    pub fn active_anchor_id_list(&self, out: &mut [AnchorId], now_ms: u32) -> usize {
        fill(out, self.active_anchor_ids(now_ms))
    }

    fn slot(&self, ctx: &AnchorCtx) -> &AnchorSlot {
        let slot = &self.slots[ctx.slot];
        assert!(
            slot.initialized && slot.id == ctx.id,
            "anchor context for {} refers to a recycled slot",
            ctx.id
        );
        slot
    }

    fn slot_mut(&mut self, ctx: &AnchorCtx) -> &mut AnchorSlot {
        let slot = &mut self.slots[ctx.slot];
        assert!(
            slot.initialized && slot.id == ctx.id,
            "anchor context for {} refers to a recycled slot",
            ctx.id
        );
        slot
    }

    /// Tag rx time of the latest packet from this anchor (tag clock).
    pub fn rx_time(&self, ctx: &AnchorCtx) -> Option<i64> {
        self.slot(ctx).rx_time
    }

    /// Tx time of the latest packet from this anchor (anchor clock).
    pub fn tx_time(&self, ctx: &AnchorCtx) -> Option<i64> {
        self.slot(ctx).tx_time
    }

    /// Sequence number of the latest packet from this anchor.
    pub fn seq_nr(&self, ctx: &AnchorCtx) -> u8 {
        self.slot(ctx).seq_nr
    }

    /// Time the latest packet from this anchor was stored (ms).
    pub fn last_update_ms(&self, ctx: &AnchorCtx) -> u32 {
        self.slot(ctx).last_update_ms
    }

    /// Records the latest packet from this anchor and stamps the slot with
    /// the context time.
    pub fn set_rx_tx_data(&mut self, ctx: &AnchorCtx, rx_time: i64, tx_time: i64, seq_nr: u8) {
        let slot = self.slot_mut(ctx);
        slot.rx_time = Some(rx_time);
        slot.tx_time = Some(tx_time);
        slot.seq_nr = seq_nr;
        slot.last_update_ms = ctx.now_ms;
    }

    /// Current clock correction ratio of this anchor.
    pub fn clock_correction(&self, ctx: &AnchorCtx) -> f64 {
        self.slot(ctx).clock.ratio()
    }

    /// Clock correction state of this anchor.
    pub fn clock_correction_state(&self, ctx: &AnchorCtx) -> &ClockCorrectionState {
        &self.slot(ctx).clock
    }

    /// Mutable clock correction state of this anchor.
    pub fn clock_correction_state_mut(&mut self, ctx: &AnchorCtx) -> &mut ClockCorrectionState {
        &mut self.slot_mut(ctx).clock
    }

    /// Cached position, if written within the position window.
    pub fn anchor_position(&self, ctx: &AnchorCtx) -> Option<AnchorPosition> {
        let window = self.validity.position_ms;
        self.slot(ctx)
            .position
            .filter(|p| is_fresh(p.timestamp_ms, window, ctx.now_ms))
    }

    /// Overwrites the cached position, stamped with the context time.
    pub fn set_anchor_position(&mut self, ctx: &AnchorCtx, x: f64, y: f64, z: f64) {
        self.slot_mut(ctx).position = Some(AnchorPosition::new(x, y, z, ctx.now_ms));
    }

    /// Rx time (in this anchor's clock) and sequence number of the latest
    /// packet this anchor heard from `remote`.
    pub fn remote_rx_time_seq_nr(&self, ctx: &AnchorCtx, remote: AnchorId) -> Option<(i64, u8)> {
        let window = self.validity.remote_rx_ms;
        find_alive(&self.slot(ctx).remote_rx, remote, window, ctx.now_ms)
            .map(|e| (e.rx_time, e.seq_nr))
    }

    /// Rx time of the latest packet this anchor heard from `remote`.
    pub fn remote_rx_time(&self, ctx: &AnchorCtx, remote: AnchorId) -> Option<i64> {
        self.remote_rx_time_seq_nr(ctx, remote).map(|(rx, _)| rx)
    }

    /// Stores remote rx data, valid for the remote rx window.
    pub fn set_remote_rx_time(
        &mut self,
        ctx: &AnchorCtx,
        remote: AnchorId,
        rx_time: i64,
        seq_nr: u8,
    ) {
        let slot = self.slot_mut(ctx);
        let index = replacement_index(&slot.remote_rx, remote, ctx.now_ms);
        slot.remote_rx[index] = Some(RemoteRx {
            id: remote,
            rx_time,
            seq_nr,
            written_ms: ctx.now_ms,
        });
    }

    /// Writes the live `(remote id, seq nr)` pairs of this anchor into `out`
    /// and returns how many were written.
    pub fn remote_seq_nr_list(&self, ctx: &AnchorCtx, out: &mut [RemoteSeqNr]) -> usize {
        let window = self.validity.remote_rx_ms;
        let live = self
            .slot(ctx)
            .remote_rx
            .iter()
            .flatten()
            .filter(|e| e.is_alive(window, ctx.now_ms))
            .map(|e| RemoteSeqNr {
                id: e.id,
                seq_nr: e.seq_nr,
            });
        fill(out, live)
    }

    /// Time of flight from `other` to this anchor, in this anchor's clock.
    pub fn remote_tof(&self, ctx: &AnchorCtx, other: AnchorId) -> Option<i64> {
        let window = self.validity.remote_tof_ms;
        find_alive(&self.slot(ctx).remote_tof, other, window, ctx.now_ms).map(|e| e.tof)
    }

    /// Stores a time of flight to `remote`, valid for the remote tof window.
    pub fn set_remote_tof(&mut self, ctx: &AnchorCtx, remote: AnchorId, tof: i64) {
        let slot = self.slot_mut(ctx);
        let index = replacement_index(&slot.remote_tof, remote, ctx.now_ms);
        slot.remote_tof[index] = Some(RemoteTof {
            id: remote,
            tof,
            written_ms: ctx.now_ms,
        });
    }

    /// Tag-to-anchor time of flight, if measured at or after
    /// `oldest_acceptable_ms`.
    pub fn time_of_flight(&self, ctx: &AnchorCtx, oldest_acceptable_ms: u32) -> Option<i64> {
        self.slot(ctx)
            .tof
            // Signed distance so the comparison survives a clock wrap
            .filter(|&(_, measured_ms)| measured_ms.wrapping_sub(oldest_acceptable_ms) as i32 >= 0)
            .map(|(tof, _)| tof)
    }

    /// Stores the tag-to-anchor time of flight, stamped with the context time.
    pub fn set_time_of_flight(&mut self, ctx: &AnchorCtx, tof: i64) {
        self.slot_mut(ctx).tof = Some((tof, ctx.now_ms));
    }
}

fn fill<T>(out: &mut [T], items: impl Iterator<Item = T>) -> usize {
    let mut count = 0;
    for (dst, item) in out.iter_mut().zip(items) {
        *dst = item;
        count += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn storage(capacity: usize) -> AnchorStorage {
        AnchorStorage::new(capacity, 4, 4, ValidityWindows::default()).unwrap()
    }

    fn touch(storage: &mut AnchorStorage, id: u8, now_ms: u32) -> (AnchorCtx, bool) {
        let (ctx, found) = storage.get_or_create(AnchorId(id), now_ms);
        storage.set_rx_tx_data(&ctx, 1, 1, 0);
        (ctx, found)
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let validity = ValidityWindows::default();
        assert!(matches!(
            AnchorStorage::new(0, 4, 4, validity),
            Err(ConfigError::ZeroCapacity("anchor_capacity"))
        ));
        assert!(matches!(
            AnchorStorage::new(4, 0, 4, validity),
            Err(ConfigError::ZeroCapacity("remote_capacity"))
        ));
        assert!(matches!(
            AnchorStorage::new(4, 4, 0, validity),
            Err(ConfigError::ZeroCapacity("tof_capacity"))
        ));
    }

    #[test]
    fn test_create_then_find() {
        let mut storage = storage(4);

        let (ctx, found) = storage.get_or_create(AnchorId(7), 100);
        assert!(!found);
        assert_eq!(ctx.id(), AnchorId(7));
        assert_eq!(ctx.now_ms(), 100);

        let (again, found) = storage.get_or_create(AnchorId(7), 200);
        assert!(found);
        assert_eq!(again.slot(), ctx.slot());
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_get_never_creates() {
        let mut storage = storage(2);
        assert!(storage.get(AnchorId(1), 0).is_none());
        assert!(storage.is_empty());

        touch(&mut storage, 1, 10);
        touch(&mut storage, 2, 20);
        assert!(storage.get(AnchorId(3), 30).is_none());
        assert!(storage.contains(AnchorId(1)));
        assert!(storage.contains(AnchorId(2)));
        assert_eq!(storage.len(), 2);
    }

    #[test]
    fn test_full_table_evicts_least_recently_updated() {
        let mut storage = storage(3);
        touch(&mut storage, 1, 300);
        touch(&mut storage, 2, 100);
        touch(&mut storage, 3, 200);

        let (ctx, found) = storage.get_or_create(AnchorId(4), 400);

        assert!(!found);
        assert_eq!(ctx.slot(), 1);
        assert!(!storage.contains(AnchorId(2)));
        assert_eq!(storage.len(), 3);
    }

    #[test]
    fn test_eviction_across_clock_wrap() {
        let mut storage = storage(3);
        touch(&mut storage, 1, u32::MAX - 20);
        touch(&mut storage, 2, 5);
        touch(&mut storage, 3, u32::MAX - 2);

        let (ctx, found) = storage.get_or_create(AnchorId(4), 10);

        assert!(!found);
        assert_eq!(ctx.slot(), 0);
        assert!(!storage.contains(AnchorId(1)));
    }

    #[test]
    fn test_eviction_tie_prefers_lowest_index() {
        let mut storage = storage(3);
        touch(&mut storage, 1, 100);
        touch(&mut storage, 2, 100);
        touch(&mut storage, 3, 100);

        let (ctx, _) = storage.get_or_create(AnchorId(9), 150);
        assert_eq!(ctx.slot(), 0);
        assert!(!storage.contains(AnchorId(1)));
    }

    #[test]
    fn test_recycled_slot_is_clean() {
        let mut storage = storage(1);
        let (ctx, _) = touch(&mut storage, 1, 10);
        storage.set_anchor_position(&ctx, 1.0, 2.0, 3.0);
        storage.set_remote_rx_time(&ctx, AnchorId(2), 55, 3);

        let (ctx, _) = storage.get_or_create(AnchorId(5), 20);
        assert_eq!(storage.rx_time(&ctx), None);
        assert_eq!(storage.anchor_position(&ctx), None);
        assert_eq!(storage.remote_rx_time(&ctx, AnchorId(2)), None);
        assert_eq!(storage.clock_correction(&ctx), 0.0);
    }

    #[test]
    #[should_panic(expected = "recycled slot")]
    fn test_stale_context_panics() {
        let mut storage = storage(1);
        let (stale, _) = touch(&mut storage, 1, 10);
        storage.get_or_create(AnchorId(2), 20);
        storage.rx_time(&stale);
    }

    #[test]
    fn test_position_validity() {
        let mut storage = storage(2);
        let (ctx, _) = storage.get_or_create(AnchorId(1), 1_000);
        assert!(storage.anchor_position(&ctx).is_none());

        storage.set_anchor_position(&ctx, 1.0, 2.0, 3.0);

        let later = storage.get(AnchorId(1), 2_999).unwrap();
        let position = storage.anchor_position(&later).unwrap();
        assert_eq!(position.point.x, 1.0);
        assert_eq!(position.timestamp_ms, 1_000);

        let expired = storage.get(AnchorId(1), 3_000).unwrap();
        assert!(storage.anchor_position(&expired).is_none());
    }

    #[test]
    fn test_remote_rx_expires_after_window() {
        let mut storage = storage(2);
        let (ctx, _) = storage.get_or_create(AnchorId(1), 1_000);
        storage.set_remote_rx_time(&ctx, AnchorId(2), 12_345, 9);

        let fresh = storage.get(AnchorId(1), 1_029).unwrap();
        assert_eq!(
            storage.remote_rx_time_seq_nr(&fresh, AnchorId(2)),
            Some((12_345, 9))
        );

        let stale = storage.get(AnchorId(1), 1_030).unwrap();
        assert_eq!(storage.remote_rx_time(&stale, AnchorId(2)), None);
    }

    #[test]
    fn test_freshness_across_clock_wrap() {
        let mut storage = storage(2);
        let written = u32::MAX - 10;
        let (ctx, _) = touch(&mut storage, 1, written);
        storage.set_anchor_position(&ctx, 1.0, 2.0, 3.0);
        storage.set_remote_rx_time(&ctx, AnchorId(2), 12_345, 9);
        storage.set_remote_tof(&ctx, AnchorId(2), 42);
        storage.set_time_of_flight(&ctx, 77);

        // 16 ms after the write, the clock has wrapped
        let fresh = storage.get(AnchorId(1), 5).unwrap();
        assert!(storage.anchor_position(&fresh).is_some());
        assert_eq!(storage.remote_rx_time(&fresh, AnchorId(2)), Some(12_345));
        assert_eq!(storage.remote_tof(&fresh, AnchorId(2)), Some(42));
        assert_eq!(storage.time_of_flight(&fresh, written), Some(77));
        assert_eq!(storage.time_of_flight(&fresh, 0), None);

        let mut out = [AnchorId::default(); 2];
        assert_eq!(storage.active_anchor_id_list(&mut out, 5), 1);

        let hour_later = storage.get(AnchorId(1), 3_600_000).unwrap();
        assert!(storage.anchor_position(&hour_later).is_none());
        assert_eq!(storage.remote_rx_time(&hour_later, AnchorId(2)), None);
        assert_eq!(storage.remote_tof(&hour_later, AnchorId(2)), None);
        assert_eq!(storage.active_anchor_id_list(&mut out, 3_600_000), 0);
    }

    #[test]
    fn test_remote_rx_updates_existing_entry() {
        let mut storage = storage(2);
        let (ctx, _) = storage.get_or_create(AnchorId(1), 0);
        storage.set_remote_rx_time(&ctx, AnchorId(2), 100, 1);
        storage.set_remote_rx_time(&ctx, AnchorId(3), 200, 1);
        storage.set_remote_rx_time(&ctx, AnchorId(2), 300, 2);

        let mut list = [RemoteSeqNr { id: AnchorId(0), seq_nr: 0 }; 4];
        let count = storage.remote_seq_nr_list(&ctx, &mut list);

        assert_eq!(count, 2);
        assert_eq!(storage.remote_rx_time_seq_nr(&ctx, AnchorId(2)), Some((300, 2)));
    }

    #[test]
    fn test_remote_rx_replaces_oldest_when_full() {
        let mut storage = storage(1);
        let (ctx, _) = storage.get_or_create(AnchorId(1), 0);
        for (i, remote) in [2u8, 3, 4, 5].iter().enumerate() {
            let ctx = storage.get(AnchorId(1), i as u32).unwrap();
            storage.set_remote_rx_time(&ctx, AnchorId(*remote), 10, 0);
        }

        // Remote 2 was written first and expires first
        let ctx = storage.get(AnchorId(1), ctx.now_ms() + 5).unwrap();
        storage.set_remote_rx_time(&ctx, AnchorId(6), 10, 0);

        assert_eq!(storage.remote_rx_time(&ctx, AnchorId(2)), None);
        assert!(storage.remote_rx_time(&ctx, AnchorId(3)).is_some());
        assert!(storage.remote_rx_time(&ctx, AnchorId(6)).is_some());
    }

    #[test]
    fn test_remote_seq_nr_list_skips_expired() {
        let mut storage = storage(1);
        let (ctx, _) = storage.get_or_create(AnchorId(1), 0);
        storage.set_remote_rx_time(&ctx, AnchorId(2), 10, 5);
        let later = storage.get(AnchorId(1), 20).unwrap();
        storage.set_remote_rx_time(&later, AnchorId(3), 10, 6);

        let now = storage.get(AnchorId(1), 35).unwrap();
        let mut list = [RemoteSeqNr { id: AnchorId(0), seq_nr: 0 }; 4];
        let count = storage.remote_seq_nr_list(&now, &mut list);

        assert_eq!(count, 1);
        assert_eq!(list[0], RemoteSeqNr { id: AnchorId(3), seq_nr: 6 });
    }

    #[test]
    fn test_remote_tof_validity() {
        let mut storage = storage(1);
        let (ctx, _) = storage.get_or_create(AnchorId(1), 0);
        storage.set_remote_tof(&ctx, AnchorId(2), 4_242);

        let fresh = storage.get(AnchorId(1), 1_999).unwrap();
        assert_eq!(storage.remote_tof(&fresh, AnchorId(2)), Some(4_242));
        assert_eq!(storage.remote_tof(&fresh, AnchorId(3)), None);

        let stale = storage.get(AnchorId(1), 2_000).unwrap();
        assert_eq!(storage.remote_tof(&stale, AnchorId(2)), None);
    }

    #[test]
    fn test_own_time_of_flight() {
        let mut storage = storage(1);
        let (ctx, _) = storage.get_or_create(AnchorId(1), 500);
        assert_eq!(storage.time_of_flight(&ctx, 0), None);

        storage.set_time_of_flight(&ctx, 77);
        assert_eq!(storage.time_of_flight(&ctx, 500), Some(77));
        assert_eq!(storage.time_of_flight(&ctx, 501), None);
    }

    #[test]
    fn test_active_ids() {
        let mut storage = storage(4);
        touch(&mut storage, 1, 1_000);
        touch(&mut storage, 2, 3_500);

        let active: Vec<_> = storage.active_anchor_ids(4_000).collect();
        assert_eq!(active, vec![AnchorId(2)]);

        let all: Vec<_> = storage.anchor_ids().collect();
        assert_eq!(all, vec![AnchorId(1), AnchorId(2)]);
    }

    #[test]
    fn test_id_list_respects_buffer_size() {
        let mut storage = storage(4);
        for id in 1..=4 {
            touch(&mut storage, id, 100);
        }

        let mut out = [AnchorId(0); 2];
        assert_eq!(storage.anchor_id_list(&mut out), 2);
        assert_eq!(out, [AnchorId(1), AnchorId(2)]);

        let mut out = [AnchorId(0); 8];
        assert_eq!(storage.active_anchor_id_list(&mut out, 200), 4);
    }

    proptest! {
        #[test]
        fn prop_no_duplicates_and_bounded(
            capacity in 1usize..8,
            start in any::<u32>(),
            ops in prop::collection::vec((0u8..24, 0u32..50), 1..200),
        ) {
            let mut storage = storage(capacity);
            let mut now = start;

            for (id, dt) in ops {
                now = now.wrapping_add(dt);
                touch(&mut storage, id, now);

                let ids: Vec<_> = storage.anchor_ids().collect();
                let unique: HashSet<_> = ids.iter().copied().collect();
                prop_assert_eq!(ids.len(), unique.len());
                prop_assert!(storage.len() <= capacity);
                prop_assert!(storage.contains(AnchorId(id)));
            }
        }

        #[test]
        fn prop_eviction_picks_oldest(
            capacity in 1usize..8,
            start in any::<u32>(),
            ops in prop::collection::vec((0u8..24, 0u32..50), 1..200),
        ) {
            let mut storage = storage(capacity);
            let mut now = start;

            for (id, dt) in ops {
                now = now.wrapping_add(dt);
                let full = storage.len() == capacity;
                let present = storage.contains(AnchorId(id));

                let expected = if full && !present {
                    let age = |s: &AnchorSlot| now.wrapping_sub(s.last_update_ms);
                    let oldest = storage.slots.iter().map(age).max().unwrap();
                    storage.slots.iter().position(|s| age(s) == oldest)
                } else {
                    None
                };

                let (ctx, _) = touch(&mut storage, id, now);
                if let Some(slot) = expected {
                    prop_assert_eq!(ctx.slot(), slot);
                }
            }
        }
    }
}
