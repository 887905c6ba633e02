use std::collections::VecDeque;
use log::debug;
use serde::Serialize;
use crate::drivers::ScanError;
use crate::types::{round_mhz, FrequencyRange, Sweep, MIN_SWEEP_POINTS};
/// Hardware families reported by the analyzer during the handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum DeviceModel {
    Rfe433M,
    Rfe868M,
    Rfe915M,
    RfeWSub1G,
    Rfe2400,
    RfeWSub3G,
    Rfe6G,
    RfeWSub1GPlus,
    RfeAudioPro,
    Rfe2400Plus,
    Rfe4GPlus,
    Rfe6GPlus,
    RfeW5G3G,
    RfeW5G4G,
    RfeW5G5G,
    Simulated,
}
impl DeviceModel {
    /// Maps the numeric model code of the `#C2-M:` message.
    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            0 => DeviceModel::Rfe433M,
            1 => DeviceModel::Rfe868M,
            2 => DeviceModel::Rfe915M,
            3 => DeviceModel::RfeWSub1G,
            4 => DeviceModel::Rfe2400,
            5 => DeviceModel::RfeWSub3G,
            6 => DeviceModel::Rfe6G,
            10 => DeviceModel::RfeWSub1GPlus,
            11 => DeviceModel::RfeAudioPro,
            12 => DeviceModel::Rfe2400Plus,
            13 => DeviceModel::Rfe4GPlus,
            14 => DeviceModel::Rfe6GPlus,
            16 => DeviceModel::RfeW5G3G,
            17 => DeviceModel::RfeW5G4G,
            18 => DeviceModel::RfeW5G5G,
            _ => return None,
        })
    }
    pub fn name(&self) -> &'static str {
        match self {
            DeviceModel::Rfe433M => "433M",
            DeviceModel::Rfe868M => "868M",
            DeviceModel::Rfe915M => "915M",
            DeviceModel::RfeWSub1G => "WSUB1G",
            DeviceModel::Rfe2400 => "2.4G",
            DeviceModel::RfeWSub3G => "WSUB3G",
            DeviceModel::Rfe6G => "6G",
            DeviceModel::RfeWSub1GPlus => "WSUB1G+",
            DeviceModel::RfeAudioPro => "AUDIOPRO",
            DeviceModel::Rfe2400Plus => "2.4G+",
            DeviceModel::Rfe4GPlus => "4G+",
            DeviceModel::Rfe6GPlus => "6G+",
            DeviceModel::RfeW5G3G => "WSUB3G-5G",
            DeviceModel::RfeW5G4G => "WSUB4G-5G",
            DeviceModel::RfeW5G5G => "WSUB5G-5G",
            DeviceModel::Simulated => "SIMULATED",
        }
    }
}
/// Narrow interface the scan pipeline needs from a spectrum analyzer.
///
/// `poll_incoming` is the only call that reads from the device. It waits at
/// most the implementation's read timeout, processes whatever arrived and
/// reports whether at least one message was handled.
pub trait SpectrumDevice {
    fn reset(&mut self) -> Result<(), ScanError>;
    fn request_config(&mut self) -> Result<(), ScanError>;
    fn model(&self) -> Option<DeviceModel>;
    /// True once the current sweep configuration has been reported.
    fn is_configured(&self) -> bool;
    fn is_analyzer_mode(&self) -> bool;
    fn set_sweep_range(&mut self, range: FrequencyRange) -> Result<(), ScanError>;
    /// Range the device last reported as active, if any.
    fn active_range(&self) -> Option<FrequencyRange>;
    fn poll_incoming(&mut self) -> Result<bool, ScanError>;
    fn sweeps(&self) -> &[Sweep];
    fn clear_sweeps(&mut self);
    fn disconnect(&mut self) -> Result<(), ScanError>;
}
type SweepScript = Box<dyn FnMut(&FrequencyRange) -> Vec<Sweep>>;
/// In-memory device useful for tests and `--simulate` runs.
///
/// A configuration request is answered over two polls, model first, like the
/// separate `#C2-M` and `#C2-F` lines of the real device. Every confirmed
/// range is answered once with the sweeps produced by the script closure.
pub struct ManualDevice {
    model: DeviceModel,
    analyzer_mode: bool,
    confirms_ranges: bool,
    config_requested: bool,
    model_known: bool,
    config_known: bool,
    pending_range: Option<FrequencyRange>,
    active: Option<FrequencyRange>,
    delivered: bool,
    sweeps: Vec<Sweep>,
    script: SweepScript,
    failures: VecDeque<String>,
    configured: Vec<FrequencyRange>,
    resets: usize,
    connected: bool,
}
impl ManualDevice {
    pub fn new(script: impl FnMut(&FrequencyRange) -> Vec<Sweep> + 'static) -> Self {
        Self {
            model: DeviceModel::Simulated,
            analyzer_mode: true,
            confirms_ranges: true,
            config_requested: false,
            model_known: false,
            config_known: false,
            pending_range: None,
            active: None,
            delivered: true,
            sweeps: Vec::new(),
            script: Box::new(script),
            failures: VecDeque::new(),
            configured: Vec::new(),
            resets: 0,
            connected: true,
        }
    }
    /// Synthetic analyzer: a -100 dBm noise floor with a carrier every 5 MHz.
    pub fn simulated() -> Self {
        Self::new(|range| {
            let step = range.span() / (MIN_SWEEP_POINTS - 1) as f64;
            (0..3u32)
                .map(|pass| Sweep {
                    start_mhz: range.start,
                    step_mhz: step,
                    amplitudes: (0..MIN_SWEEP_POINTS)
                        .map(|i| {
                            let f = range.start + step * i as f64;
                            let offset = (f / 5.0).fract().min(1.0 - (f / 5.0).fract()) * 5.0;
                            let carrier = 60.0 * (-(offset / 0.05).powi(2)).exp();
                            let ripple = ((i as u32 * 7 + pass * 13) % 9) as f64 * 0.5;
                            // RF Explorer reports in half-dB steps
                            ((-100.0 + carrier - ripple) * 2.0).round() / 2.0
                        })
                        .collect(),
                })
                .collect()
        })
    }
    #[cfg(test)]
    pub fn with_analyzer_mode(mut self, analyzer: bool) -> Self {
        self.analyzer_mode = analyzer;
        self
    }
    #[cfg(test)]
    /// A device that accepts new ranges but never reports them back.
    pub fn ignoring_ranges(mut self) -> Self {
        self.confirms_ranges = false;
        self
    }
    #[cfg(test)]
    /// The next `count` polls fail with a device error.
    pub fn fail_next_polls(mut self, count: usize) -> Self {
        self.failures
            .extend((0..count).map(|i| format!("injected read failure {}", i + 1)));
        self
    }
    #[cfg(test)]
    pub fn configured_ranges(&self) -> &[FrequencyRange] {
        &self.configured
    }
    #[cfg(test)]
    pub fn reset_count(&self) -> usize {
        self.resets
    }
    #[cfg(test)]
    pub fn is_connected(&self) -> bool {
        self.connected
    }
    fn ensure_connected(&self) -> Result<(), ScanError> {
        if self.connected {
            Ok(())
        } else {
            Err(ScanError::device("device is disconnected"))
        }
    }
}
impl SpectrumDevice for ManualDevice {
    fn reset(&mut self) -> Result<(), ScanError> {
        self.ensure_connected()?;
        self.resets += 1;
        self.model_known = false;
        self.config_known = false;
        self.active = None;
        self.sweeps.clear();
        Ok(())
    }
    fn request_config(&mut self) -> Result<(), ScanError> {
        self.ensure_connected()?;
        self.config_requested = true;
        Ok(())
    }
    fn model(&self) -> Option<DeviceModel> {
        self.model_known.then_some(self.model)
    }
    fn is_configured(&self) -> bool {
        self.config_known
    }
    fn is_analyzer_mode(&self) -> bool {
        self.analyzer_mode
    }
    fn set_sweep_range(&mut self, range: FrequencyRange) -> Result<(), ScanError> {
        self.ensure_connected()?;
        self.configured.push(range);
        self.pending_range = Some(range);
        Ok(())
    }
    fn active_range(&self) -> Option<FrequencyRange> {
        self.active
    }
    fn poll_incoming(&mut self) -> Result<bool, ScanError> {
        self.ensure_connected()?;
        if let Some(reason) = self.failures.pop_front() {
            return Err(ScanError::Device(reason));
        }
        if self.config_requested {
            if self.model_known {
                self.config_requested = false;
                self.config_known = true;
            } else {
                self.model_known = true;
            }
            return Ok(true);
        }
        if let Some(range) = self.pending_range {
            if self.confirms_ranges {
                self.pending_range = None;
                self.active = Some(FrequencyRange {
                    start: round_mhz(range.start),
                    stop: round_mhz(range.stop),
                });
                self.delivered = false;
                return Ok(true);
            }
            return Ok(false);
        }
        if !self.delivered {
            if let Some(range) = self.active {
                self.delivered = true;
                let produced = (self.script)(&range);
                let any = !produced.is_empty();
                self.sweeps.extend(produced);
                return Ok(any);
            }
        }
        Ok(false)
    }
    fn sweeps(&self) -> &[Sweep] {
        &self.sweeps
    }
    fn clear_sweeps(&mut self) {
        self.sweeps.clear();
    }
    fn disconnect(&mut self) -> Result<(), ScanError> {
        if self.connected {
            debug!(
                "manual device released after {} reset(s) and {} range(s)",
                self.resets,
                self.configured.len()
            );
        }
        self.connected = false;
        Ok(())
    }
}
