use std::collections::BTreeMap;
use crate::types::{bin_key, key_to_mhz, ReductionMethod, Sample, Sweep};
/// Reduced amplitude per frequency bin, iterated in ascending frequency.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScanResult {
    bins: BTreeMap<i64, ReducedBin>,
}
#[derive(Clone, Copy, Debug, PartialEq)]
struct ReducedBin {
    amplitude_dbm: f64,
    samples: usize,
}
impl ScanResult {
    pub fn len(&self) -> usize {
        self.bins.len()
    }
    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }
    /// `(frequency MHz, amplitude dBm)` pairs, lowest frequency first.
    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.bins
            .iter()
            .map(|(&key, bin)| (key_to_mhz(key), bin.amplitude_dbm))
    }
    /// Same as [`ScanResult::iter`] plus the number of observations behind each value.
    pub fn iter_with_counts(&self) -> impl Iterator<Item = (f64, f64, usize)> + '_ {
        self.bins
            .iter()
            .map(|(&key, bin)| (key_to_mhz(key), bin.amplitude_dbm, bin.samples))
    }
    #[cfg(test)]
    pub fn get(&self, frequency_mhz: f64) -> Option<f64> {
        self.bins
            .get(&bin_key(frequency_mhz))
            .map(|bin| bin.amplitude_dbm)
    }
    pub fn amplitude_bounds(&self) -> Option<(f64, f64)> {
        self.bins.values().fold(None, |acc, bin| {
            let v = bin.amplitude_dbm;
            Some(match acc {
                None => (v, v),
                Some((lo, hi)) => (lo.min(v), hi.max(v)),
            })
        })
    }
}
/// Every amplitude observed per frequency bin across all sweeps of a run.
#[derive(Clone, Debug, Default)]
pub struct FrequencyBins {
    bins: BTreeMap<i64, Vec<f64>>,
}
impl FrequencyBins {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn len(&self) -> usize {
        self.bins.len()
    }
    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }
    pub fn fold(&mut self, samples: impl IntoIterator<Item = Sample>) {
        for sample in samples {
            self.bins
                .entry(bin_key(sample.frequency_mhz))
                .or_default()
                .push(sample.amplitude_dbm);
        }
    }
    pub fn fold_sweep(&mut self, sweep: &Sweep) {
        self.fold(sweep.samples());
    }
    #[cfg(test)]
    pub fn sample_count(&self, frequency_mhz: f64) -> usize {
        self.bins
            .get(&bin_key(frequency_mhz))
            .map_or(0, Vec::len)
    }
    /// Collapses each bin to one value. Reads the bins only, so folding may
    /// continue afterwards.
    pub fn reduce(&self, method: ReductionMethod) -> ScanResult {
        let bins = self
            .bins
            .iter()
            .filter(|(_, amplitudes)| !amplitudes.is_empty())
            .map(|(&key, amplitudes)| {
                let amplitude_dbm = match method {
                    ReductionMethod::Max => amplitudes
                        .iter()
                        .copied()
                        .fold(f64::NEG_INFINITY, f64::max),
                    ReductionMethod::Avg => {
                        amplitudes.iter().sum::<f64>() / amplitudes.len() as f64
                    }
                };
                (
                    key,
                    ReducedBin {
                        amplitude_dbm,
                        samples: amplitudes.len(),
                    },
                )
            })
            .collect();
        ScanResult { bins }
    }
}
