use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::info;

use crate::drivers::{ScanError, ScanResult};

// 写出扫描结果: 每行 "频率, 幅度"，无表头，按频率升序
pub fn write_csv(path: &Path, result: &ScanResult) -> Result<(), ScanError> {
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);
    write_rows(&mut w, result)?;
    w.flush()?;
    info!("File written to {} ({} bins)", path.display(), result.len());
    Ok(())
}

pub fn write_rows(w: &mut impl Write, result: &ScanResult) -> std::io::Result<()> {
    for (freq, amplitude) in result.iter() {
        writeln!(w, "{:.3}, {:.1}", freq, amplitude)?;
    }
    Ok(())
}

#[cfg(test)]
/// Reads a file produced by [`write_csv`] back into `(MHz, dBm)` pairs.
pub fn read_csv(path: &Path) -> Result<Vec<(f64, f64)>, ScanError> {
    use std::io::BufRead;
    let reader = std::io::BufReader::new(File::open(path)?);
    let mut rows = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed = line.split_once(',').and_then(|(f, a)| {
            Some((f.trim().parse::<f64>().ok()?, a.trim().parse::<f64>().ok()?))
        });
        match parsed {
            Some(row) => rows.push(row),
            None => {
                return Err(ScanError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("line {}: expected '<MHz>, <dBm>', got '{line}'", idx + 1),
                )))
            }
        }
    }
    Ok(rows)
}

/// Fails early when the output file could not be created later on.
pub fn check_writable(path: &Path) -> Result<(), ScanError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if !parent.is_dir() {
        return Err(ScanError::usage(format!(
            "output directory {} does not exist",
            parent.display()
        )));
    }
    if path.is_dir() {
        return Err(ScanError::usage(format!(
            "output path {} is a directory",
            path.display()
        )));
    }
    Ok(())
}
