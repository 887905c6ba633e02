use std::io::Cursor;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use plotters::prelude::LineSeries;
use plotters::prelude::*;
use crate::drivers::aggregator::ScanResult;
use crate::drivers::error::ScanError;
#[derive(Clone, Debug)]
pub struct PlotStyle {
    pub width: u32,
    pub height: u32,
    pub background: RGBColor,
    pub trace: RGBColor,
}
impl Default for PlotStyle {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 500,
            background: RGBColor(10, 10, 10),
            trace: YELLOW,
        }
    }
}
/// Amplitude-versus-frequency line chart of a finished scan, PNG encoded.
pub fn render_scan_png(result: &ScanResult, style: PlotStyle) -> Result<Vec<u8>, ScanError> {
    let (first, last) = match (result.iter().next(), result.iter().last()) {
        (Some((first, _)), Some((last, _))) => (first, last),
        _ => return Err(ScanError::Plot("scan result has no bins".into())),
    };
    let (amp_min, amp_max) = result
        .amplitude_bounds()
        .ok_or_else(|| ScanError::Plot("scan result has no bins".into()))?;
    // single-bin scans still need a non-empty axis
    let x_bounds = if last - first < 1e-3 {
        (first - 0.5, last + 0.5)
    } else {
        (first, last)
    };
    let y_bounds = (amp_min.min(-120.0) - 5.0, amp_max.max(-20.0) + 5.0);
    let mut buffer = vec![0u8; (style.width * style.height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (style.width, style.height))
            .into_drawing_area();
        root.fill(&style.background)?;
        let mut chart = ChartBuilder::on(&root)
            .margin(10)
            .caption("Scan", ("sans-serif", 20).into_font().color(&WHITE))
            .set_label_area_size(LabelAreaPosition::Left, 50)
            .set_label_area_size(LabelAreaPosition::Bottom, 40)
            .build_cartesian_2d(x_bounds.0..x_bounds.1, y_bounds.0..y_bounds.1)?;
        chart
            .configure_mesh()
            .x_desc("MHz")
            .y_desc("dBm")
            .light_line_style(&WHITE.mix(0.1))
            .label_style(("sans-serif", 12).into_font().color(&WHITE))
            .draw()?;
        chart.draw_series(LineSeries::new(result.iter(), &style.trace))?;
        root.present()?;
    }
    encode_png(&buffer, style.width, style.height)
}
fn encode_png(buffer: &[u8], width: u32, height: u32) -> Result<Vec<u8>, ScanError> {
    let image = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, buffer.to_vec())
        .ok_or_else(|| ScanError::Plot("failed to allocate image buffer".into()))?;
    let mut output = Vec::new();
    let dynamic = DynamicImage::ImageRgb8(image);
    dynamic.write_to(&mut Cursor::new(&mut output), ImageFormat::Png)?;
    Ok(output)
}
