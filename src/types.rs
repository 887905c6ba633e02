// src/types.rs
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::drivers::ScanError;

// RF Explorer 单次扫描的最少点数 (CONST_RFE_MIN_SWEEP_POINTS)
pub const MIN_SWEEP_POINTS: usize = 112;
// 默认参数
pub const DEFAULT_RBW_MHZ: f64 = 0.025;
pub const DEFAULT_DWELL: Duration = Duration::from_secs(3);
pub const DEFAULT_BAUD_RATE: u32 = 500_000;

/// Rounds a frequency in MHz to 3 decimals (1 kHz).
pub fn round_mhz(mhz: f64) -> f64 {
    (mhz * 1000.0).round() / 1000.0
}

/// Integer bin key in kHz. Two frequencies that round to the same
/// 3-decimal MHz value always share a key.
pub fn bin_key(mhz: f64) -> i64 {
    (mhz * 1000.0).round() as i64
}

pub fn key_to_mhz(key: i64) -> f64 {
    key as f64 / 1000.0
}

// 频率区间 (MHz)
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct FrequencyRange {
    pub start: f64,
    pub stop: f64,
}

impl FrequencyRange {
    pub fn new(start: f64, stop: f64) -> Result<Self, ScanError> {
        if !start.is_finite() || !stop.is_finite() {
            return Err(ScanError::usage(format!(
                "frequencies must be finite numbers, got {start} and {stop}"
            )));
        }
        if start >= stop {
            return Err(ScanError::usage(format!(
                "start frequency {start} MHz must be below stop frequency {stop} MHz"
            )));
        }
        Ok(Self { start, stop })
    }

    pub fn span(&self) -> f64 {
        self.stop - self.start
    }
}

impl fmt::Display for FrequencyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3} MHz - {:.3} MHz", self.start, self.stop)
    }
}

/// Builds ranges from a flat `start stop start stop ...` list.
pub fn ranges_from_pairs(freqs: &[f64]) -> Result<Vec<FrequencyRange>, ScanError> {
    if freqs.is_empty() {
        return Err(ScanError::usage("at least one start/stop frequency pair is required"));
    }
    if freqs.len() % 2 != 0 {
        return Err(ScanError::usage(format!(
            "frequencies must be given in start/stop pairs, got {} values",
            freqs.len()
        )));
    }
    freqs
        .chunks_exact(2)
        .map(|pair| FrequencyRange::new(pair[0], pair[1]))
        .collect()
}

// 多次扫描合并的计算方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ReductionMethod {
    #[serde(rename = "MAX")]
    Max,
    #[serde(rename = "AVG")]
    Avg,
}

impl FromStr for ReductionMethod {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MAX" => Ok(ReductionMethod::Max),
            "AVG" => Ok(ReductionMethod::Avg),
            other => Err(ScanError::usage(format!(
                "invalid calculator '{other}', expected MAX or AVG"
            ))),
        }
    }
}

// 单个频点的测量值
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample {
    pub frequency_mhz: f64,
    pub amplitude_dbm: f64,
}

/// One pass of the device across its configured range.
#[derive(Clone, Debug, PartialEq)]
pub struct Sweep {
    pub start_mhz: f64,
    pub step_mhz: f64,
    pub amplitudes: Vec<f64>,
}

impl Sweep {
    #[cfg(test)]
    pub fn step_count(&self) -> usize {
        self.amplitudes.len()
    }

    pub fn frequency_at(&self, step: usize) -> f64 {
        self.start_mhz + self.step_mhz * step as f64
    }

    #[cfg(test)]
    pub fn amplitude_at(&self, step: usize) -> Option<f64> {
        self.amplitudes.get(step).copied()
    }

    pub fn samples(&self) -> impl Iterator<Item = Sample> + '_ {
        self.amplitudes
            .iter()
            .enumerate()
            .map(move |(step, &amplitude_dbm)| Sample {
                frequency_mhz: round_mhz(self.frequency_at(step)),
                amplitude_dbm,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn odd_frequency_count_is_a_usage_error() {
        let err = ranges_from_pairs(&[500.0, 510.0, 520.0]).unwrap_err();
        assert!(matches!(err, ScanError::Usage(_)));
    }

    #[test]
    fn pairs_become_ranges_in_input_order() {
        let ranges = ranges_from_pairs(&[600.0, 610.0, 500.0, 505.0]).unwrap();
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0], FrequencyRange { start: 600.0, stop: 610.0 });
        assert_eq!(ranges[1], FrequencyRange { start: 500.0, stop: 505.0 });
    }

    #[test]
    fn inverted_and_empty_ranges_are_rejected() {
        assert!(ranges_from_pairs(&[]).is_err());
        assert!(ranges_from_pairs(&[510.0, 500.0]).is_err());
        assert!(ranges_from_pairs(&[500.0, 500.0]).is_err());
        assert!(FrequencyRange::new(f64::NAN, 1.0).is_err());
    }

    #[test]
    fn calculator_parsing_fails_fast() {
        assert_eq!("max".parse::<ReductionMethod>().unwrap(), ReductionMethod::Max);
        assert_eq!("AVG".parse::<ReductionMethod>().unwrap(), ReductionMethod::Avg);
        assert!(matches!(
            "MEDIAN".parse::<ReductionMethod>(),
            Err(ScanError::Usage(_))
        ));
    }

    #[test]
    fn sweep_samples_are_rounded_to_khz() {
        let sweep = Sweep {
            start_mhz: 518.1,
            step_mhz: 0.0250001,
            amplitudes: vec![-40.0, -41.5],
        };
        let samples: Vec<Sample> = sweep.samples().collect();
        assert_eq!(samples[0].frequency_mhz, 518.1);
        assert_eq!(samples[1].frequency_mhz, 518.125);
        assert_eq!(sweep.amplitude_at(1), Some(-41.5));
        assert_eq!(sweep.amplitude_at(2), None);
        assert_eq!(bin_key(518.125), 518_125);
    }
}
