//! # Video frames

use crate::luma::Luma;
use crate::prelude::v1::*;

/// Width, height and channel count of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameDims {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
}

impl std::fmt::Display for FrameDims {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.channels)
    }
}

/// Largest supported number of interleaved channels.
pub const MAX_CHANNELS: usize = 4;

/// Single video frame.
///
/// A frame is a row-major grid of interleaved 8-bit samples. Channel order is not interpreted,
/// except when computing luma, which treats the first three channels as red, green and blue.
///
/// The sequence index is assigned by the pipeline when the frame enters it, and is carried over
/// to the stabilized output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    index: u64,
    dims: FrameDims,
    data: Vec<u8>,
}

impl Frame {
    /// Create a new frame from raw interleaved samples.
    ///
    /// # Arguments
    ///
    /// * `width` - width of the frame in pixels.
    /// * `height` - height of the frame in pixels.
    /// * `channels` - number of interleaved channels (1 to 4).
    /// * `data` - row-major samples, `width * height * channels` bytes.
    pub fn new(width: usize, height: usize, channels: usize, data: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(ConfigurationError::InvalidFrame(format!(
                "frame must not be empty ({}x{})",
                width, height
            ))
            .into());
        }

        if !(1..=MAX_CHANNELS).contains(&channels) {
            return Err(ConfigurationError::InvalidFrame(format!(
                "{} channels are not supported",
                channels
            ))
            .into());
        }

        if data.len() != width * height * channels {
            return Err(ConfigurationError::InvalidFrame(format!(
                "expected {} bytes, got {}",
                width * height * channels,
                data.len()
            ))
            .into());
        }

        Ok(Self {
            index: 0,
            dims: FrameDims {
                width,
                height,
                channels,
            },
            data,
        })
    }

    /// Create a frame by evaluating `f(x, y, channel)` for every sample.
    pub fn from_fn(
        width: usize,
        height: usize,
        channels: usize,
        mut f: impl FnMut(usize, usize, usize) -> u8,
    ) -> Result<Self> {
        let mut data = Vec::with_capacity(width * height * channels);

        for y in 0..height {
            for x in 0..width {
                for c in 0..channels {
                    data.push(f(x, y, c));
                }
            }
        }

        Self::new(width, height, channels, data)
    }

    /// Sequence index of the frame within its stream.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Replace the sequence index.
    pub fn with_index(self, index: u64) -> Self {
        Self { index, ..self }
    }

    pub fn dims(&self) -> FrameDims {
        self.dims
    }

    pub fn width(&self) -> usize {
        self.dims.width
    }

    pub fn height(&self) -> usize {
        self.dims.height
    }

    pub fn channels(&self) -> usize {
        self.dims.channels
    }

    /// Get the raw samples in row-major order.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consume the frame and return its samples.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Get the samples of a single pixel.
    pub fn pixel(&self, x: usize, y: usize) -> &[u8] {
        let c = self.dims.channels;
        let start = (y * self.dims.width + x) * c;
        &self.data[start..start + c]
    }

    /// Compute the luma plane of the frame in `[0; 1]` range.
    pub fn luma(&self) -> Luma {
        let FrameDims {
            width,
            height,
            channels,
        } = self.dims;

        let data = self
            .data
            .chunks_exact(channels)
            .map(|px| {
                let v = if channels >= 3 {
                    0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32
                } else {
                    px[0] as f32
                };
                v / 255.0
            })
            .collect();

        Luma::from_vec(width, height, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_layout() {
        assert!(Frame::new(0, 10, 1, vec![]).is_err());
        assert!(Frame::new(2, 2, 5, vec![0; 20]).is_err());
        assert!(matches!(
            Frame::new(2, 2, 3, vec![0; 11]),
            Err(Error::Configuration(ConfigurationError::InvalidFrame(_)))
        ));
        assert!(Frame::new(2, 2, 3, vec![0; 12]).is_ok());
    }

    #[test]
    fn pixel_access() {
        let frame = Frame::new(2, 1, 4, vec![1, 2, 3, 255, 4, 5, 6, 7]).unwrap();

        assert_eq!(frame.pixel(0, 0), &[1, 2, 3, 255]);
        assert_eq!(frame.pixel(1, 0), &[4, 5, 6, 7]);
        assert_eq!(frame.clone().into_bytes(), frame.as_bytes());
    }

    #[test]
    fn luma_of_grey() {
        let frame = Frame::from_fn(4, 3, 3, |_, _, _| 255).unwrap();
        let luma = frame.luma();

        assert_eq!((luma.width(), luma.height()), (4, 3));
        for v in luma.as_slice() {
            assert!((v - 1.0).abs() < 1e-5);
        }
    }
}
