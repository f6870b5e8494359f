use crate::error::FrameError;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

/// Offset between Kelvin and Celsius
pub const KELVIN_OFFSET: f64 = 273.15;

/// Raw sensor samples are Kelvin scaled by this factor
pub const RAW_SCALE: f64 = 100.0;

/// Convert a raw sensor sample (Kelvin × 100) to Celsius
pub fn raw_to_celsius(raw: u16) -> f64 {
    raw as f64 / RAW_SCALE - KELVIN_OFFSET
}

/// Convert Celsius to the nearest raw sensor sample, saturating at the u16 range
pub fn celsius_to_raw(celsius: f64) -> u16 {
    let raw = ((celsius + KELVIN_OFFSET) * RAW_SCALE).round();
    raw.clamp(0.0, u16::MAX as f64) as u16
}

/// One thermal frame: a fixed grid of raw 16-bit samples (Kelvin × 100)
#[derive(Debug, Clone)]
pub struct ThermalFrame {
    /// Sequence number embedded in the source filename, if any
    pub sequence: Option<u64>,
    /// Modification time of the source file, if known
    pub captured_at: Option<SystemTime>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Row-major raw samples (shared ownership, frames are immutable)
    pub raw: Arc<Vec<u16>>,
}

impl ThermalFrame {
    /// Create a frame from raw samples
    pub fn new(width: u32, height: u32, raw: Vec<u16>) -> Result<Self, FrameError> {
        if width == 0 || height == 0 || raw.len() != width as usize * height as usize {
            return Err(FrameError::InvalidDimensions { width, height });
        }

        Ok(Self {
            sequence: None,
            captured_at: None,
            width,
            height,
            raw: Arc::new(raw),
        })
    }

    /// Create a uniform frame at the given temperature
    pub fn uniform(width: u32, height: u32, celsius: f64) -> Result<Self, FrameError> {
        Self::new(
            width,
            height,
            vec![celsius_to_raw(celsius); width as usize * height as usize],
        )
    }

    /// Decode a frame blob of big-endian 16-bit samples
    pub fn from_be_bytes(bytes: &[u8], width: u32, height: u32) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * 2;
        if bytes.len() != expected {
            return Err(FrameError::SizeMismatch {
                path: "<memory>".to_string(),
                expected,
                actual: bytes.len(),
            });
        }

        let raw = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();

        Self::new(width, height, raw)
    }

    /// Read a frame file from disk
    pub fn read(path: &Path, width: u32, height: u32) -> Result<Self, FrameError> {
        let bytes = std::fs::read(path).map_err(|source| FrameError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut frame = Self::from_be_bytes(&bytes, width, height).map_err(|e| match e {
            FrameError::SizeMismatch {
                expected, actual, ..
            } => FrameError::SizeMismatch {
                path: path.display().to_string(),
                expected,
                actual,
            },
            other => other,
        })?;

        frame.sequence = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(sequence_from_filename);
        frame.captured_at = std::fs::metadata(path).and_then(|m| m.modified()).ok();

        Ok(frame)
    }

    /// Encode the frame as big-endian 16-bit samples
    pub fn to_be_bytes(&self) -> Vec<u8> {
        self.raw.iter().flat_map(|sample| sample.to_be_bytes()).collect()
    }

    pub fn pixel_count(&self) -> usize {
        self.raw.len()
    }

    /// Temperatures in Celsius, row-major
    pub fn celsius(&self) -> Vec<f64> {
        self.raw.iter().map(|&raw| raw_to_celsius(raw)).collect()
    }

    /// Set a rectangular region to the given temperature
    pub fn fill_rect(&mut self, x: u32, y: u32, w: u32, h: u32, celsius: f64) {
        let raw = celsius_to_raw(celsius);
        let samples = Arc::make_mut(&mut self.raw);
        for row in y..(y + h).min(self.height) {
            for col in x..(x + w).min(self.width) {
                samples[(row * self.width + col) as usize] = raw;
            }
        }
    }
}

/// Extract the trailing decimal sequence number from a frame filename,
/// e.g. `sample_000123.gray` -> 123
pub fn sequence_from_filename(name: &str) -> Option<u64> {
    let stem = match name.rfind('.') {
        Some(dot) => &name[..dot],
        None => name,
    };

    let digits_start = stem
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i)?;

    stem[digits_start..].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_conversion_round_trip() {
        for raw in [0u16, 1, 27315, 29815, 37315, 50000, u16::MAX] {
            let back = celsius_to_raw(raw_to_celsius(raw));
            assert_eq!(back, raw, "raw {} did not survive conversion", raw);
        }

        for celsius in [-40.0, 0.0, 21.37, 150.0, 380.25] {
            let back = raw_to_celsius(celsius_to_raw(celsius));
            assert!((back - celsius).abs() <= 0.01 + 1e-9);
        }
    }

    #[test]
    fn test_conversion_saturates_outside_sensor_range() {
        assert_eq!(celsius_to_raw(400.0), u16::MAX);
        assert_eq!(celsius_to_raw(-300.0), 0);
    }

    #[test]
    fn test_known_conversion() {
        assert!((raw_to_celsius(29815) - 25.0).abs() < 1e-9);
        assert_eq!(celsius_to_raw(25.0), 29815);
    }

    #[test]
    fn test_big_endian_decoding() {
        let bytes = [0x74, 0x77, 0x00, 0x01, 0xFF, 0xFF, 0x00, 0x00];
        let frame = ThermalFrame::from_be_bytes(&bytes, 2, 2).unwrap();
        assert_eq!(frame.raw.as_slice(), &[0x7477, 0x0001, 0xFFFF, 0x0000]);
        assert_eq!(frame.to_be_bytes(), bytes.to_vec());
    }

    #[test]
    fn test_size_mismatch_is_an_error() {
        let bytes = vec![0u8; 7];
        match ThermalFrame::from_be_bytes(&bytes, 2, 2) {
            Err(FrameError::SizeMismatch {
                expected, actual, ..
            }) => {
                assert_eq!(expected, 8);
                assert_eq!(actual, 7);
            }
            other => panic!("Expected size mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_read_from_disk_with_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample_000042.gray");
        let frame = ThermalFrame::uniform(4, 3, 30.0).unwrap();
        std::fs::write(&path, frame.to_be_bytes()).unwrap();

        let loaded = ThermalFrame::read(&path, 4, 3).unwrap();
        assert_eq!(loaded.sequence, Some(42));
        assert!(loaded.captured_at.is_some());
        assert_eq!(loaded.raw, frame.raw);

        assert!(matches!(
            ThermalFrame::read(&path, 5, 3),
            Err(FrameError::SizeMismatch { .. })
        ));
        assert!(matches!(
            ThermalFrame::read(&dir.path().join("missing.gray"), 4, 3),
            Err(FrameError::Read { .. })
        ));
    }

    #[test]
    fn test_sequence_from_filename() {
        assert_eq!(sequence_from_filename("sample_000123.gray"), Some(123));
        assert_eq!(sequence_from_filename("sample_7"), Some(7));
        assert_eq!(sequence_from_filename("sample_.gray"), None);
        assert_eq!(sequence_from_filename("frame.gray"), None);
    }

    #[test]
    fn test_fill_rect_clips_to_frame() {
        let mut frame = ThermalFrame::uniform(4, 4, 20.0).unwrap();
        frame.fill_rect(2, 2, 10, 10, 300.0);
        let hot = frame
            .celsius()
            .iter()
            .filter(|&&c| c > 200.0)
            .count();
        assert_eq!(hot, 4);
    }
}
