pub mod error;
pub mod filters;
pub mod history;
pub mod jobs;
pub mod processing;

#[cfg(test)]
mod tests {
    use super::filters::{BaselineOptions, FilterOptions};
    use super::history::FilterPipeline;
    use super::processing::WindowFunction;
    use crate::analysis::peaks::{auto_peak_picking, GsdOptions, PeakPickingOptions};
    use crate::data::spectrum::{SpectrumBuffer, SpectrumInfo};
    use crate::log::reproducibility::ReproLog;

    /// 500 Hz line at 400 MHz (1.25 ppm), 4 kHz spectral width
    fn proton_fid() -> SpectrumBuffer {
        let dwell = 1.0 / 4000.0;
        let n = 512;
        let x: Vec<f64> = (0..n).map(|i| i as f64 * dwell).collect();
        let phase = |t: f64| 2.0 * std::f64::consts::PI * 500.0 * t;
        let re = x.iter().map(|&t| (-t * 20.0).exp() * phase(t).cos()).collect();
        let im = x.iter().map(|&t| (-t * 20.0).exp() * phase(t).sin()).collect();
        SpectrumBuffer::new(x, re, im, SpectrumInfo::default()).unwrap()
    }

    #[test]
    fn test_full_chain_puts_peak_at_expected_shift() {
        let mut log = ReproLog::new();
        let mut pipeline = FilterPipeline::new("proton", proton_fid());
        for options in [
            FilterOptions::Apodization(WindowFunction::Exponential { lb_hz: 5.0 }),
            FilterOptions::ZeroFilling { nb_points: 1024 },
            FilterOptions::Fft,
            FilterOptions::BaselineCorrection(BaselineOptions {
                algorithm: "linear".to_string(),
                ..BaselineOptions::default()
            }),
        ] {
            pipeline.apply(options, &mut log).unwrap();
        }
        assert_eq!(pipeline.current().len(), 1024);
        assert_eq!(log.len(), 4);

        let options = PeakPickingOptions {
            gsd: GsdOptions {
                min_max_ratio: 0.05,
                ..GsdOptions::default()
            },
            ..PeakPickingOptions::default()
        };
        let peaks = auto_peak_picking(pipeline.current(), &options);
        let tallest = peaks
            .iter()
            .max_by(|a, b| a.y.total_cmp(&b.y))
            .unwrap();
        assert!((tallest.x - 1.25).abs() < 0.01, "peak at {}", tallest.x);
    }
}
