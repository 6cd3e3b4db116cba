//! # Image Rectification Module
//!
//! This module provides stereo rectification of frame pairs, and the horizontal reference lines
//! used to eyeball the result.
//!
//! Rectification is reached through the [`Rectify`] trait. The provided [`StereoRectifier`]
//! follows the usual pinhole camera model with Brown-Conrady distortion: for every pixel of the
//! rectified image it precomputes where to sample the raw image, and each frame is then remapped
//! with bilinear interpolation.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use image::{GrayImage, Luma, Rgb, RgbImage};
use nalgebra::{Matrix3, Vector3};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::frame::{Frame, Size};

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Vertical distance in pixels between the reference lines drawn by [`draw_horizontal_lines`].
pub const LINE_SPACING: u32 = 32;

/// Sample positions this close outside the image are clamped onto its border.
const EDGE_TOLERANCE: f32 = 1e-3;

// -----------------------------------------------------------------------------------------------
// TRAITS
// -----------------------------------------------------------------------------------------------

/// Undistorts and rectifies a pair of stereo frames.
pub trait Rectify {
    fn undistort_rectify(&self, left: &Frame, right: &Frame) -> Result<(Frame, Frame)>;
}

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Calibration parameters for a single camera.
#[derive(Clone, Debug, Deserialize)]
pub struct CameraParams {
    /// Intrinsic matrix `[[fx, skew, cx], [0, fy, cy], [0, 0, 1]]`
    pub camera_matrix: [[f64; 3]; 3],

    /// Distortion coefficients `[k1, k2, p1, p2, k3]`, missing trailing values are zero
    #[serde(default)]
    pub distortion: Vec<f64>,

    /// Rectification rotation, identity if not given
    #[serde(default = "identity3")]
    pub rectification: [[f64; 3]; 3],

    /// Projection matrix of the rectified camera, `[camera_matrix | 0]` if not given
    #[serde(default)]
    pub projection: Option<[[f64; 4]; 3]>,
}

/// Rectification parameters for a pair of stereo cameras
#[derive(Clone, Debug, Deserialize)]
pub struct StereoRectifParams {
    /// Size of the images the parameters were calibrated at, `[width, height]`
    pub image_size: [u32; 2],

    /// Left hand camera parameters
    pub left: CameraParams,

    /// Right hand camera parameters
    pub right: CameraParams
}

/// Rectifies stereo pairs of a fixed size using precomputed sampling maps.
pub struct StereoRectifier {
    size: Size,
    left: RemapTable,
    right: RemapTable,
}

/// For each output pixel, the position to sample in the source image.
struct RemapTable {
    size: Size,
    coords: Vec<(f32, f32)>,
}

/// Brown-Conrady distortion coefficients.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Distortion {
    k1: f64,
    k2: f64,
    p1: f64,
    p2: f64,
    k3: f64,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl StereoRectifParams {
    pub fn image_size(&self) -> Size {
        Size::new(self.image_size[0], self.image_size[1])
    }
}

impl CameraParams {

    fn intrinsics(&self) -> Matrix3<f64> {
        Matrix3::from_fn(|r, c| self.camera_matrix[r][c])
    }

    fn rotation(&self) -> Matrix3<f64> {
        Matrix3::from_fn(|r, c| self.rectification[r][c])
    }

    /// The intrinsic part of the projection matrix of the rectified camera.
    fn new_intrinsics(&self) -> Matrix3<f64> {
        match self.projection {
            Some(p) => Matrix3::from_fn(|r, c| p[r][c]),
            None => self.intrinsics()
        }
    }

    fn distortion(&self) -> Result<Distortion> {
        let d = &self.distortion;
        if d.len() > 5 {
            return Err(Error::InvalidCalibration(format!(
                "expected at most 5 distortion coefficients, got {}", d.len()
            )));
        }

        let at = |i: usize| d.get(i).copied().unwrap_or(0.0);

        Ok(Distortion {
            k1: at(0),
            k2: at(1),
            p1: at(2),
            p2: at(3),
            k3: at(4),
        })
    }
}

impl Distortion {

    /// Apply the distortion to a point in normalised image coordinates.
    fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));

        (
            x * radial + 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x),
            y * radial + self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y,
        )
    }
}

impl RemapTable {

    /// Build the table mapping rectified pixels of `size` back into the raw image.
    ///
    /// `scale` converts pixel coordinates at the calibrated size to `size`.
    fn new(params: &CameraParams, size: Size, scale: (f64, f64)) -> Result<Self> {
        let scaling = Matrix3::new(
            scale.0, 0.0, 0.0,
            0.0, scale.1, 0.0,
            0.0, 0.0, 1.0
        );

        let k = scaling * params.intrinsics();
        let k_new = scaling * params.new_intrinsics();
        let dist = params.distortion()?;

        if k[(0, 0)] == 0.0 || k[(1, 1)] == 0.0 {
            return Err(Error::InvalidCalibration(String::from("focal lengths must be non-zero")));
        }

        let k_new_inv = k_new.try_inverse().ok_or_else(|| {
            Error::InvalidCalibration(String::from("rectified camera matrix is singular"))
        })?;
        let r_inv = params.rotation().try_inverse().ok_or_else(|| {
            Error::InvalidCalibration(String::from("rectification matrix is singular"))
        })?;

        // Back project through the new camera, undo the rectification rotation
        let back = r_inv * k_new_inv;

        let mut coords = Vec::with_capacity(size.area());

        for v in 0..size.height {
            for u in 0..size.width {
                let ray = back * Vector3::new(u as f64, v as f64, 1.0);

                if ray.z <= 0.0 {
                    coords.push((-1.0, -1.0));
                    continue;
                }

                let (xd, yd) = dist.apply(ray.x / ray.z, ray.y / ray.z);
                let src = k * Vector3::new(xd, yd, 1.0);

                coords.push((src.x as f32, src.y as f32));
            }
        }

        Ok(Self { size, coords })
    }

    fn remap(&self, frame: &Frame) -> Result<Frame> {
        if frame.size() != self.size {
            return Err(Error::SizeMismatch { expected: self.size, actual: frame.size() });
        }

        match frame {
            Frame::Gray(src) => {
                let mut out = GrayImage::new(self.size.width, self.size.height);
                for (i, p) in out.pixels_mut().enumerate() {
                    let (x, y) = self.coords[i];
                    *p = Luma([sample(x, y, self.size, |sx, sy| src.get_pixel(sx, sy)[0])]);
                }
                Ok(Frame::Gray(out))
            },
            Frame::Color(src) => {
                let mut out = RgbImage::new(self.size.width, self.size.height);
                for (i, p) in out.pixels_mut().enumerate() {
                    let (x, y) = self.coords[i];
                    let mut px = [0u8; 3];
                    for (c, v) in px.iter_mut().enumerate() {
                        *v = sample(x, y, self.size, |sx, sy| src.get_pixel(sx, sy)[c]);
                    }
                    *p = Rgb(px);
                }
                Ok(Frame::Color(out))
            }
        }
    }
}

impl StereoRectifier {

    /// Build a rectifier for frames of `size`.
    ///
    /// If `size` differs from the size the parameters were calibrated at the intrinsics are
    /// scaled to match.
    pub fn new(params: &StereoRectifParams, size: Size) -> Result<Self> {
        let calibrated = params.image_size();
        if calibrated.width == 0 || calibrated.height == 0 {
            return Err(Error::InvalidCalibration(String::from("image_size must be non-zero")));
        }

        let scale = (
            size.width as f64 / calibrated.width as f64,
            size.height as f64 / calibrated.height as f64,
        );

        if calibrated != size {
            log::debug!("Scaling calibration from {} to {}", calibrated, size);
        }

        Ok(Self {
            size,
            left: RemapTable::new(&params.left, size, scale)?,
            right: RemapTable::new(&params.right, size, scale)?,
        })
    }

    /// The frame size this rectifier accepts and produces.
    pub fn size(&self) -> Size {
        self.size
    }
}

impl Rectify for StereoRectifier {
    fn undistort_rectify(&self, left: &Frame, right: &Frame) -> Result<(Frame, Frame)> {
        Ok((self.left.remap(left)?, self.right.remap(right)?))
    }
}

// -----------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Draw full width horizontal lines every [`LINE_SPACING`] rows.
///
/// Lines are white on grayscale frames and green on colour frames.
pub fn draw_horizontal_lines(frame: Frame) -> Frame {
    match frame {
        Frame::Gray(mut img) => {
            for y in (LINE_SPACING..img.height()).step_by(LINE_SPACING as usize) {
                for x in 0..img.width() {
                    img.put_pixel(x, y, Luma([255]));
                }
            }
            Frame::Gray(img)
        },
        Frame::Color(mut img) => {
            for y in (LINE_SPACING..img.height()).step_by(LINE_SPACING as usize) {
                for x in 0..img.width() {
                    img.put_pixel(x, y, Rgb([0, 255, 0]));
                }
            }
            Frame::Color(img)
        }
    }
}

// -----------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// -----------------------------------------------------------------------------------------------

fn identity3() -> [[f64; 3]; 3] {
    [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]
}

/// Bilinearly sample a channel at `(x, y)`, pixels outside the image are black.
fn sample<F: Fn(u32, u32) -> u8>(x: f32, y: f32, size: Size, get: F) -> u8 {
    let max_x = (size.width - 1) as f32;
    let max_y = (size.height - 1) as f32;

    if !(x > -EDGE_TOLERANCE
        && y > -EDGE_TOLERANCE
        && x < max_x + EDGE_TOLERANCE
        && y < max_y + EDGE_TOLERANCE)
    {
        return 0;
    }

    let x = x.max(0.0).min(max_x);
    let y = y.max(0.0).min(max_y);

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(size.width - 1);
    let y1 = (y0 + 1).min(size.height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let top = get(x0, y0) as f32 * (1.0 - fx) + get(x1, y0) as f32 * fx;
    let bottom = get(x0, y1) as f32 * (1.0 - fx) + get(x1, y1) as f32 * fx;

    (top * (1.0 - fy) + bottom * fy).round().max(0.0).min(255.0) as u8
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {

    use super::*;

    fn pinhole(fx: f64, cx: f64, cy: f64) -> CameraParams {
        CameraParams {
            camera_matrix: [[fx, 0.0, cx], [0.0, fx, cy], [0.0, 0.0, 1.0]],
            distortion: vec![],
            rectification: identity3(),
            projection: None,
        }
    }

    fn params(w: u32, h: u32) -> StereoRectifParams {
        StereoRectifParams {
            image_size: [w, h],
            left: pinhole(100.0, w as f64 / 2.0, h as f64 / 2.0),
            right: pinhole(100.0, w as f64 / 2.0, h as f64 / 2.0),
        }
    }

    fn gradient(w: u32, h: u32) -> Frame {
        Frame::Gray(GrayImage::from_fn(w, h, |x, y| Luma([(x * 3 + y * 5) as u8])))
    }

    #[test]
    fn identity_parameters_leave_frames_unchanged() {
        let rect = StereoRectifier::new(&params(40, 30), Size::new(40, 30)).unwrap();
        let (l, r) = rect.undistort_rectify(&gradient(40, 30), &gradient(40, 30)).unwrap();

        assert_eq!(l, gradient(40, 30));
        assert_eq!(r, gradient(40, 30));
    }

    #[test]
    fn output_keeps_size_and_channels() {
        let mut p = params(64, 48);
        p.left.distortion = vec![-0.2, 0.05, 0.001, -0.001];
        p.right.rectification = [
            [0.9998, -0.02, 0.0],
            [0.02, 0.9998, 0.0],
            [0.0, 0.0, 1.0]
        ];

        let rect = StereoRectifier::new(&p, Size::new(64, 48)).unwrap();
        let (l, r) = rect.undistort_rectify(&gradient(64, 48), &gradient(64, 48)).unwrap();

        assert!(l.is_gray() && r.is_gray());
        assert_eq!(l.size(), Size::new(64, 48));
        assert_eq!(r.size(), Size::new(64, 48));
    }

    #[test]
    fn parameters_are_scaled_to_the_frame_size() {
        // Calibrated at double the size, identity otherwise
        let rect = StereoRectifier::new(&params(80, 60), Size::new(40, 30)).unwrap();
        let (l, _) = rect.undistort_rectify(&gradient(40, 30), &gradient(40, 30)).unwrap();

        assert_eq!(l, gradient(40, 30));
    }

    #[test]
    fn rejects_wrong_frame_size() {
        let rect = StereoRectifier::new(&params(40, 30), Size::new(40, 30)).unwrap();
        assert!(rect.undistort_rectify(&gradient(20, 30), &gradient(40, 30)).is_err());
    }

    #[test]
    fn rejects_invalid_parameters() {
        let mut p = params(40, 30);
        p.left.distortion = vec![0.0; 6];
        assert!(StereoRectifier::new(&p, Size::new(40, 30)).is_err());

        let mut p = params(40, 30);
        p.right.rectification = [[0.0; 3]; 3];
        assert!(StereoRectifier::new(&p, Size::new(40, 30)).is_err());

        let mut p = params(40, 30);
        p.left.camera_matrix[0][0] = 0.0;
        p.left.projection = Some([[1.0, 0.0, 20.0, 0.0], [0.0, 1.0, 15.0, 0.0], [0.0, 0.0, 1.0, 0.0]]);
        assert!(StereoRectifier::new(&p, Size::new(40, 30)).is_err());
    }

    #[test]
    fn distortion_moves_off_axis_points_only() {
        let d = Distortion { k1: -0.1, ..Default::default() };
        assert_eq!(d.apply(0.0, 0.0), (0.0, 0.0));

        let (x, y) = d.apply(0.5, 0.0);
        assert!(x < 0.5);
        assert_eq!(y, 0.0);
    }

    #[test]
    fn lines_are_drawn_every_spacing_rows() {
        let f = draw_horizontal_lines(Frame::Gray(GrayImage::new(10, 100)));
        match f {
            Frame::Gray(img) => {
                for y in 0..100 {
                    let expected = if y > 0 && y % LINE_SPACING == 0 { 255 } else { 0 };
                    assert_eq!(img.get_pixel(3, y)[0], expected, "row {}", y);
                }
            },
            Frame::Color(_) => panic!("expected a grayscale frame")
        }

        let c = draw_horizontal_lines(Frame::Color(RgbImage::new(4, 40)));
        assert_eq!(c.to_rgb().get_pixel(0, LINE_SPACING), &Rgb([0, 255, 0]));
        assert_eq!(c.size(), Size::new(4, 40));
    }

    #[test]
    fn deserialise_params() {
        let toml = r#"
            image_size = [640, 480]

            [left]
            camera_matrix = [[500.0, 0.0, 320.0], [0.0, 500.0, 240.0], [0.0, 0.0, 1.0]]
            distortion = [-0.1, 0.01]

            [right]
            camera_matrix = [[510.0, 0.0, 318.0], [0.0, 510.0, 242.0], [0.0, 0.0, 1.0]]
            projection = [[505.0, 0.0, 320.0, -30.0], [0.0, 505.0, 240.0, 0.0], [0.0, 0.0, 1.0, 0.0]]
        "#;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calib_params.toml");
        std::fs::write(&path, toml).unwrap();

        let p: StereoRectifParams = serde_any::from_file(&path).unwrap();
        assert_eq!(p.image_size(), Size::new(640, 480));
        assert_eq!(p.left.rectification, identity3());
        assert!(p.left.projection.is_none());
        assert_eq!(p.right.projection.unwrap()[0][3], -30.0);
    }
}
