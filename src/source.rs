//! Decoded pixel buffers handed in by the media collaborator.
//!
//! Feature extraction works on single-channel images only. [`PixelBuffer::to_grayscale`]
//! produces that view: luma planes are taken as-is, RGB variants go through
//! OpenCV colour conversion.

use opencv::core::{Mat, CV_8UC1};
use opencv::imgproc;
use opencv::prelude::*;

use crate::error::{Result, TrackingError};

/// Pixel layout of a [`PixelBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Colorspace {
    Y800,
    I420,
    YV12,
    NV12,
    NV21,
    YUYV,
    UYVY,
    RGB888,
    RGBA,
    RGB565,
}

impl Colorspace {
    /// Minimal buffer size in bytes for a `width` x `height` image.
    pub fn buffer_size(&self, width: usize, height: usize) -> usize {
        let pixels = width * height;
        match self {
            Colorspace::Y800 => pixels,
            Colorspace::I420 | Colorspace::YV12 | Colorspace::NV12 | Colorspace::NV21 => {
                pixels + 2 * (width.div_ceil(2) * height.div_ceil(2))
            }
            Colorspace::YUYV | Colorspace::UYVY | Colorspace::RGB565 => pixels * 2,
            Colorspace::RGB888 => pixels * 3,
            Colorspace::RGBA => pixels * 4,
        }
    }
}

/// A decoded frame: raw bytes plus geometry and layout.
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub colorspace: Colorspace,
}

impl PixelBuffer {
    pub fn new(data: Vec<u8>, width: usize, height: usize, colorspace: Colorspace) -> Result<Self> {
        let buffer = Self {
            data,
            width,
            height,
            colorspace,
        };
        buffer.validate()?;
        Ok(buffer)
    }

    /// Wrap an 8-bit single-channel `Mat`.
    pub fn from_gray_mat(image: &Mat) -> Result<Self> {
        if image.typ() != CV_8UC1 {
            return Err(TrackingError::invalid_input(
                "expected an 8-bit single-channel image",
            ));
        }
        let continuous = image.try_clone()?;
        Self::new(
            continuous.data_bytes()?.to_vec(),
            image.cols() as usize,
            image.rows() as usize,
            Colorspace::Y800,
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(TrackingError::invalid_input(format!(
                "empty image {}x{}",
                self.width, self.height
            )));
        }
        let required = self.colorspace.buffer_size(self.width, self.height);
        if self.data.len() < required {
            return Err(TrackingError::invalid_input(format!(
                "buffer holds {} bytes, {:?} {}x{} needs {}",
                self.data.len(),
                self.colorspace,
                self.width,
                self.height,
                required
            )));
        }
        Ok(())
    }

    /// Single-channel view of the buffer, suitable for feature extraction.
    pub fn to_grayscale(&self) -> Result<Mat> {
        self.validate()?;
        let pixels = self.width * self.height;
        match self.colorspace {
            Colorspace::Y800
            | Colorspace::I420
            | Colorspace::YV12
            | Colorspace::NV12
            | Colorspace::NV21 => mat_from_bytes(&self.data[..pixels], self.height, 1),
            Colorspace::YUYV => {
                let luma: Vec<u8> = self.data[..pixels * 2].iter().step_by(2).copied().collect();
                mat_from_bytes(&luma, self.height, 1)
            }
            Colorspace::UYVY => {
                let luma: Vec<u8> = self.data[1..pixels * 2]
                    .iter()
                    .step_by(2)
                    .copied()
                    .collect();
                mat_from_bytes(&luma, self.height, 1)
            }
            Colorspace::RGB888 => {
                let rgb = mat_from_bytes(&self.data[..pixels * 3], self.height, 3)?;
                let mut gray = Mat::default();
                imgproc::cvt_color_def(&rgb, &mut gray, imgproc::COLOR_RGB2GRAY)?;
                Ok(gray)
            }
            Colorspace::RGBA => {
                let rgba = mat_from_bytes(&self.data[..pixels * 4], self.height, 4)?;
                let mut gray = Mat::default();
                imgproc::cvt_color_def(&rgba, &mut gray, imgproc::COLOR_RGBA2GRAY)?;
                Ok(gray)
            }
            Colorspace::RGB565 => Err(TrackingError::UnsupportedColorspace(self.colorspace)),
        }
    }
}

/// Build an owned 8-bit `Mat` with `rows` rows and `channels` channels from raw bytes.
pub(crate) fn mat_from_bytes(bytes: &[u8], rows: usize, channels: i32) -> Result<Mat> {
    let flat = Mat::from_slice(bytes)?.try_clone()?;
    Ok(flat.reshape(channels, rows as i32)?.try_clone()?)
}
