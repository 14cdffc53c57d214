/// Feature extraction on processed spectra: peaks, ranges with multiplets, 2D zones
pub mod fit;
pub mod multiplet;
pub mod peaks;
pub mod ranges;
pub mod zones;
