// src/drivers/tiler.rs
// 把频率区间切成设备单次能扫的窗口, 相邻窗口间隔一个 RBW
use crate::drivers::ScanError;
use crate::types::{round_mhz, FrequencyRange, MIN_SWEEP_POINTS};
/// Smallest RBW we accept, equal to the 1 kHz bin resolution.
pub const MIN_RBW_MHZ: f64 = 0.001;
const STOP_TOLERANCE_MHZ: f64 = 1e-9;
/// A device-sized window produced by [`tile`].
pub type SubRange = FrequencyRange;
/// Width of one sweep window in MHz.
pub fn freq_span(rbw: f64) -> f64 {
    rbw * MIN_SWEEP_POINTS as f64
}
pub fn validate_rbw(rbw: f64) -> Result<(), ScanError> {
    if !rbw.is_finite() || rbw < MIN_RBW_MHZ {
        return Err(ScanError::usage(format!(
            "RBW must be at least {MIN_RBW_MHZ} MHz, got {rbw}"
        )));
    }
    Ok(())
}
/// Tiles every range in input order; windows within one range ascend.
pub fn tile(ranges: &[FrequencyRange], rbw: f64) -> Result<Vec<SubRange>, ScanError> {
    validate_rbw(rbw)?;
    let mut out = Vec::new();
    for range in ranges {
        out.extend(tile_range(range, rbw));
    }
    Ok(out)
}
fn tile_range(range: &FrequencyRange, rbw: f64) -> impl Iterator<Item = SubRange> + '_ {
    let span = freq_span(rbw);
    let step = span + rbw;
    (0usize..)
        .map(move |i| range.start + i as f64 * step)
        .take_while(move |&start| start < range.stop && start + span <= range.stop + STOP_TOLERANCE_MHZ)
        .map(move |start| SubRange {
            start: round_mhz(start),
            stop: round_mhz(start + span),
        })
}
/// Number of windows a single range produces, used for progress reporting.
pub fn tile_count(range: &FrequencyRange, rbw: f64) -> Result<usize, ScanError> {
    validate_rbw(rbw)?;
    Ok(tile_range(range, rbw).count())
}
