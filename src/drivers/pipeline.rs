use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use log::{debug, info, warn};
use crate::drivers::aggregator::FrequencyBins;
use crate::drivers::error::ScanError;
use crate::drivers::source::SpectrumDevice;
use crate::drivers::tiler::SubRange;
/// A tile is tried this many times before its error is reported.
pub const MAX_TILE_ATTEMPTS: usize = 2;
const IDLE_BACKOFF: Duration = Duration::from_millis(5);
/// Shared flag checked at every tile boundary and inside every wait loop.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);
impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
    fn check(&self) -> Result<(), ScanError> {
        if self.is_cancelled() {
            Err(ScanError::Cancelled)
        } else {
            Ok(())
        }
    }
}
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanState {
    Init,
    Configured,
    Sweeping,
    Extracting,
    Clearing,
    Done,
    Error,
}
/// Timing knobs for one run.
#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub rbw_mhz: f64,
    pub dwell: Duration,
    pub settle: Duration,
    pub confirm_timeout: Duration,
    pub handshake_timeout: Duration,
}
impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            rbw_mhz: crate::types::DEFAULT_RBW_MHZ,
            dwell: crate::types::DEFAULT_DWELL,
            settle: Duration::from_secs(3),
            confirm_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}
/// Drives a device through a list of tiles and accumulates every sweep.
///
/// Bins stay readable through [`ScanPipeline::bins`] after a failed run so the
/// caller can still flush what was collected.
pub struct ScanPipeline<D: SpectrumDevice> {
    device: D,
    settings: PipelineSettings,
    cancel: CancelToken,
    bins: FrequencyBins,
    state: ScanState,
    sweeps_folded: usize,
}
impl<D: SpectrumDevice> ScanPipeline<D> {
    pub fn new(device: D, settings: PipelineSettings, cancel: CancelToken) -> Self {
        Self {
            device,
            settings,
            cancel,
            bins: FrequencyBins::new(),
            state: ScanState::Init,
            sweeps_folded: 0,
        }
    }
    #[cfg(test)]
    pub fn state(&self) -> ScanState {
        self.state
    }
    pub fn bins(&self) -> &FrequencyBins {
        &self.bins
    }
    pub fn sweeps_folded(&self) -> usize {
        self.sweeps_folded
    }
    pub fn device(&self) -> &D {
        &self.device
    }
    #[cfg(test)]
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }
    pub fn into_parts(self) -> (D, FrequencyBins) {
        (self.device, self.bins)
    }
    fn transition(&mut self, next: ScanState) {
        if self.state != next {
            debug!("scan state {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }
    /// Resets the device and waits until it has identified itself.
    pub fn initialize(&mut self) -> Result<(), ScanError> {
        let result = self.handshake();
        match &result {
            Ok(()) => self.transition(ScanState::Configured),
            Err(_) => self.transition(ScanState::Error),
        }
        result
    }
    fn handshake(&mut self) -> Result<(), ScanError> {
        info!("Resetting device");
        self.device.reset()?;
        self.sleep_cancellable(self.settings.settle)?;
        self.device.request_config()?;
        let timeout = self.settings.handshake_timeout;
        self.poll_until(timeout, "device model and configuration", |dev| {
            dev.model().is_some() && dev.is_configured()
        })
    }
    /// Scans every tile in order. A device outside analyzer mode yields no
    /// data and no error.
    pub fn run(&mut self, tiles: &[SubRange]) -> Result<(), ScanError> {
        if !self.device.is_analyzer_mode() {
            warn!("Device is not in spectrum analyzer mode, nothing scanned");
            self.transition(ScanState::Done);
            return Ok(());
        }
        let total = tiles.len();
        for (idx, tile) in tiles.iter().enumerate() {
            info!("Scanning {tile} (tile {}/{total})", idx + 1);
            if let Err(err) = self.scan_tile_with_retry(tile) {
                self.transition(ScanState::Error);
                return Err(err);
            }
        }
        self.transition(ScanState::Done);
        Ok(())
    }
    fn scan_tile_with_retry(&mut self, tile: &SubRange) -> Result<(), ScanError> {
        let mut attempt = 1;
        loop {
            match self.scan_tile(tile) {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() && attempt < MAX_TILE_ATTEMPTS => {
                    warn!("Tile {tile} failed ({err}), retrying");
                    self.device.clear_sweeps();
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
    fn scan_tile(&mut self, tile: &SubRange) -> Result<(), ScanError> {
        self.cancel.check()?;
        self.transition(ScanState::Configured);
        // sweeps buffered before the switch belong to the previous range
        self.device.clear_sweeps();
        self.device.set_sweep_range(*tile)?;
        let tolerance = self.settings.rbw_mhz;
        let wanted = tile.start;
        let timeout = self.settings.confirm_timeout;
        self.poll_until(timeout, "sweep range confirmation", move |dev| {
            dev.active_range()
                .is_some_and(|active| (active.start - wanted).abs() <= tolerance)
        })?;
        self.transition(ScanState::Sweeping);
        self.dwell()?;
        self.transition(ScanState::Extracting);
        let sweeps = self.device.sweeps();
        if sweeps.is_empty() {
            warn!("No sweeps received for {tile}");
        }
        for sweep in sweeps {
            self.bins.fold_sweep(sweep);
        }
        self.sweeps_folded += sweeps.len();
        debug!("{} sweeps folded for {tile}", sweeps.len());
        self.transition(ScanState::Clearing);
        self.device.clear_sweeps();
        Ok(())
    }
    /// Keeps draining the device until the dwell time has passed.
    fn dwell(&mut self) -> Result<(), ScanError> {
        let started = Instant::now();
        loop {
            self.cancel.check()?;
            let handled = self.device.poll_incoming()?;
            if started.elapsed() >= self.settings.dwell {
                return Ok(());
            }
            if !handled {
                thread::sleep(IDLE_BACKOFF);
            }
        }
    }
    fn poll_until(
        &mut self,
        timeout: Duration,
        what: &'static str,
        mut done: impl FnMut(&D) -> bool,
    ) -> Result<(), ScanError> {
        let started = Instant::now();
        loop {
            self.cancel.check()?;
            let handled = self.device.poll_incoming()?;
            if done(&self.device) {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(ScanError::Timeout {
                    what,
                    seconds: timeout.as_secs_f64(),
                });
            }
            if !handled {
                thread::sleep(IDLE_BACKOFF);
            }
        }
    }
    fn sleep_cancellable(&self, total: Duration) -> Result<(), ScanError> {
        let started = Instant::now();
        while started.elapsed() < total {
            self.cancel.check()?;
            thread::sleep(IDLE_BACKOFF.min(total - started.elapsed().min(total)));
        }
        self.cancel.check()
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::source::ManualDevice;
    use crate::drivers::tiler::tile;
    use crate::types::{FrequencyRange, ReductionMethod, Sweep, DEFAULT_RBW_MHZ};
    fn fast_settings() -> PipelineSettings {
        PipelineSettings {
            rbw_mhz: DEFAULT_RBW_MHZ,
            dwell: Duration::ZERO,
            settle: Duration::ZERO,
            confirm_timeout: Duration::from_millis(30),
            handshake_timeout: Duration::from_millis(30),
        }
    }
    /// Two sweeps that both hit 518.125 MHz with -40 and -20 dBm.
    fn two_sweep_device() -> ManualDevice {
        ManualDevice::new(|range| {
            vec![
                Sweep {
                    start_mhz: range.start,
                    step_mhz: 0.025,
                    amplitudes: vec![-90.0, -40.0],
                },
                Sweep {
                    start_mhz: range.start,
                    step_mhz: 0.025,
                    amplitudes: vec![-95.0, -20.0],
                },
            ]
        })
    }
    fn run_once(device: ManualDevice, tiles: &[SubRange]) -> (ScanPipeline<ManualDevice>, Result<(), ScanError>) {
        let mut pipeline = ScanPipeline::new(device, fast_settings(), CancelToken::new());
        pipeline.initialize().unwrap();
        let result = pipeline.run(tiles);
        (pipeline, result)
    }
    #[test]
    fn narrow_range_performs_no_sweeps() {
        let tiles = tile(&[FrequencyRange::new(500.0, 500.2).unwrap()], DEFAULT_RBW_MHZ).unwrap();
        let (pipeline, result) = run_once(two_sweep_device(), &tiles);
        result.unwrap();
        assert!(pipeline.device().configured_ranges().is_empty());
        assert!(pipeline.bins().is_empty());
        assert_eq!(pipeline.state(), ScanState::Done);
    }
    #[test]
    fn overlapping_samples_reduce_by_max_and_avg() {
        let tiles = vec![SubRange { start: 518.1, stop: 520.9 }];
        let (pipeline, result) = run_once(two_sweep_device(), &tiles);
        result.unwrap();
        assert_eq!(pipeline.sweeps_folded(), 2);
        let bins = pipeline.bins();
        assert_eq!(bins.sample_count(518.125), 2);
        assert_eq!(bins.reduce(ReductionMethod::Max).get(518.125), Some(-20.0));
        assert_eq!(bins.reduce(ReductionMethod::Avg).get(518.125), Some(-30.0));
        assert!(pipeline.device().sweeps().is_empty());
    }
    #[test]
    fn tiles_are_visited_low_to_high() {
        let tiles = tile(&[FrequencyRange::new(500.0, 510.0).unwrap()], DEFAULT_RBW_MHZ).unwrap();
        let (pipeline, result) = run_once(two_sweep_device(), &tiles);
        result.unwrap();
        assert_eq!(pipeline.device().configured_ranges(), tiles.as_slice());
        assert_eq!(pipeline.bins().len(), 6);
    }
    #[test]
    fn non_analyzer_device_returns_empty_result() {
        let device = two_sweep_device().with_analyzer_mode(false);
        let (pipeline, result) = run_once(device, &[SubRange { start: 500.0, stop: 502.8 }]);
        result.unwrap();
        assert!(pipeline.bins().is_empty());
        assert!(pipeline.device().configured_ranges().is_empty());
    }
    #[test]
    fn silent_device_times_out_after_retry() {
        let device = two_sweep_device().ignoring_ranges();
        let tiles = [SubRange { start: 500.0, stop: 502.8 }];
        let (pipeline, result) = run_once(device, &tiles);
        assert!(matches!(result, Err(ScanError::Timeout { .. })));
        assert_eq!(pipeline.device().configured_ranges().len(), MAX_TILE_ATTEMPTS);
        assert_eq!(pipeline.state(), ScanState::Error);
    }
    #[test]
    fn transient_failure_is_retried_without_double_counting() {
        let mut pipeline =
            ScanPipeline::new(two_sweep_device(), fast_settings(), CancelToken::new());
        pipeline.initialize().unwrap();
        *pipeline.device_mut() = two_sweep_device().fail_next_polls(1);
        let tiles = [SubRange { start: 518.1, stop: 520.9 }];
        pipeline.run(&tiles).unwrap();
        assert_eq!(pipeline.device().configured_ranges().len(), 2);
        assert_eq!(pipeline.bins().sample_count(518.125), 2);
        assert_eq!(pipeline.sweeps_folded(), 2);
    }
    #[test]
    fn failure_keeps_bins_from_completed_tiles() {
        let tiles = vec![
            SubRange { start: 500.0, stop: 502.8 },
            SubRange { start: 502.825, stop: 505.625 },
        ];
        let mut pipeline =
            ScanPipeline::new(two_sweep_device(), fast_settings(), CancelToken::new());
        pipeline.initialize().unwrap();
        pipeline.run(&tiles[..1]).unwrap();
        *pipeline.device_mut() = two_sweep_device().ignoring_ranges();
        let err = pipeline.run(&tiles[1..]).unwrap_err();
        assert!(matches!(err, ScanError::Timeout { .. }));
        assert_eq!(pipeline.bins().len(), 2);
    }
    #[test]
    fn cancelled_run_stops_before_touching_the_device() {
        let cancel = CancelToken::new();
        let mut pipeline = ScanPipeline::new(two_sweep_device(), fast_settings(), cancel.clone());
        pipeline.initialize().unwrap();
        cancel.cancel();
        let err = pipeline
            .run(&[SubRange { start: 500.0, stop: 502.8 }])
            .unwrap_err();
        assert!(matches!(err, ScanError::Cancelled));
        assert!(pipeline.device().configured_ranges().is_empty());
    }
    #[test]
    fn handshake_waits_for_model_and_configuration() {
        let mut pipeline =
            ScanPipeline::new(two_sweep_device(), fast_settings(), CancelToken::new());
        pipeline.initialize().unwrap();
        assert!(pipeline.device().model().is_some());
        assert!(pipeline.device().is_configured());
        assert_eq!(pipeline.state(), ScanState::Configured);
    }
    #[test]
    fn handshake_read_failure_is_reported() {
        let device = two_sweep_device().fail_next_polls(1000);
        let mut pipeline = ScanPipeline::new(device, fast_settings(), CancelToken::new());
        let err = pipeline.initialize().unwrap_err();
        assert!(matches!(err, ScanError::Device(_)));
        assert_eq!(pipeline.state(), ScanState::Error);
        assert_eq!(pipeline.device().reset_count(), 1);
    }
}
