//! Physical and hardware constants shared by the engine and the simulator.

/// Speed of light in vacuum (m/s)
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Timestamp counter frequency of the DW1000 radio: 499.2 MHz * 128 (Hz)
pub const LOCODECK_TS_FREQ: f64 = 499.2e6 * 128.0;

/// Anchor timestamps are 40 bits wide; deltas are truncated to this width.
pub const ANCHOR_TS_MASK: u64 = 0x00FF_FFFF_FFFF;

/// Sequence numbers carried in range packets are 7 bits wide.
pub const SEQ_NR_MASK: u8 = 0x7f;

/// Truncates a full timestamp (or timestamp difference) to the anchor
/// timestamp width.
///
/// The subtraction that produced `ticks` must already have happened in
/// wrapping arithmetic; masking afterwards yields the modular delta, which
/// stays correct across a 40-bit counter overflow.
#[inline]
pub fn truncate_to_anchor_ts(ticks: i64) -> i64 {
    ((ticks as u64) & ANCHOR_TS_MASK) as i64
}
