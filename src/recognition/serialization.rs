//! Whitespace-delimited text format for image objects and tracking models.
//!
//! Field order is fixed:
//! empty-flag, labeled-flag, label, contour point count, contour points,
//! keypoint count, per keypoint `x y size response angle octave class_id`,
//! descriptor `rows cols type`, then every descriptor byte as a decimal integer.

use std::fmt::Write as _;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::str::{FromStr, SplitWhitespace};

use opencv::core::{KeyPoint, Mat, Point2f, Scalar, Vector, CV_8UC1};
use opencv::prelude::*;

use crate::error::{Result, TrackingError};
use crate::features::FeaturePack;
use crate::recognition::image_object::ImageObject;

/// Widest binary descriptor row accepted on load (BRISK uses 64 bytes).
const MAX_DESCRIPTOR_BYTES: i32 = 64;

/// Sequential reader over whitespace-separated tokens that remembers its position
/// for error reporting.
pub struct TokenReader<'a> {
    tokens: SplitWhitespace<'a>,
    position: usize,
}

impl<'a> TokenReader<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            tokens: text.split_whitespace(),
            position: 0,
        }
    }

    /// Index of the next token to be read.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn next<T: FromStr>(&mut self, what: &str) -> Result<T> {
        let position = self.position;
        let token = self
            .tokens
            .next()
            .ok_or_else(|| TrackingError::parse(position, format!("missing {what}")))?;
        self.position += 1;
        token
            .parse::<T>()
            .map_err(|_| TrackingError::parse(position, format!("invalid {what} '{token}'")))
    }

    pub fn next_flag(&mut self, what: &str) -> Result<bool> {
        let position = self.position;
        match self.next::<i32>(what)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(TrackingError::parse(
                position,
                format!("{what} must be 0 or 1, got {other}"),
            )),
        }
    }

    pub fn next_points(&mut self, what: &str) -> Result<Vec<Point2f>> {
        let count: usize = self.next(what)?;
        let mut points = Vec::with_capacity(count.min(1 << 16));
        for _ in 0..count {
            let x: f32 = self.next("point x")?;
            let y: f32 = self.next("point y")?;
            points.push(Point2f::new(x, y));
        }
        Ok(points)
    }

    /// Fails when unread tokens remain.
    pub fn finish(mut self) -> Result<()> {
        match self.tokens.next() {
            None => Ok(()),
            Some(token) => Err(TrackingError::parse(
                self.position,
                format!("unexpected trailing token '{token}'"),
            )),
        }
    }
}

fn flag(value: bool) -> u8 {
    value as u8
}

pub fn write_points(out: &mut String, points: &[Point2f]) {
    let _ = write!(out, "{}", points.len());
    for p in points {
        let _ = write!(out, " {} {}", p.x, p.y);
    }
    out.push('\n');
}

/// Append the text form of `object` to `out`.
pub fn write_image_object(out: &mut String, object: &ImageObject) -> Result<()> {
    let _ = writeln!(
        out,
        "{} {} {}",
        flag(object.is_empty()),
        flag(object.label().is_some()),
        object.label().unwrap_or(0)
    );
    write_points(out, object.contour());

    let features = object.features();
    let _ = writeln!(out, "{}", features.keypoints.len());
    for kp in features.keypoints.iter() {
        let pt = kp.pt();
        let _ = writeln!(
            out,
            "{} {} {} {} {} {} {}",
            pt.x,
            pt.y,
            kp.size(),
            kp.response(),
            kp.angle(),
            kp.octave(),
            kp.class_id()
        );
    }

    let descriptors = &features.descriptors;
    let _ = writeln!(
        out,
        "{} {} {}",
        descriptors.rows(),
        descriptors.cols(),
        descriptors.typ()
    );
    if !descriptors.empty() {
        let continuous = descriptors.try_clone()?;
        let bytes = continuous.data_bytes()?;
        let row_len = bytes.len() / descriptors.rows().max(1) as usize;
        for row in bytes.chunks(row_len.max(1)) {
            let line: Vec<String> = row.iter().map(|b| b.to_string()).collect();
            out.push_str(&line.join(" "));
            out.push('\n');
        }
    }
    Ok(())
}

/// Read one image object from `reader`.
pub fn read_image_object(reader: &mut TokenReader<'_>) -> Result<ImageObject> {
    let is_empty = reader.next_flag("empty flag")?;
    let is_labeled = reader.next_flag("labeled flag")?;
    let label: i32 = reader.next("label")?;
    let contour = reader.next_points("contour point count")?;

    let keypoints_count: usize = reader.next("keypoint count")?;
    let mut keypoints = Vector::<KeyPoint>::with_capacity(keypoints_count.min(1 << 16));
    for _ in 0..keypoints_count {
        let x: f32 = reader.next("keypoint x")?;
        let y: f32 = reader.next("keypoint y")?;
        let size: f32 = reader.next("keypoint size")?;
        let response: f32 = reader.next("keypoint response")?;
        let angle: f32 = reader.next("keypoint angle")?;
        let octave: i32 = reader.next("keypoint octave")?;
        let class_id: i32 = reader.next("keypoint class id")?;
        keypoints.push(KeyPoint::new_coords(
            x, y, size, angle, response, octave, class_id,
        )?);
    }

    let rows_position = reader.position();
    let rows: i32 = reader.next("descriptor rows")?;
    let cols: i32 = reader.next("descriptor cols")?;
    let typ: i32 = reader.next("descriptor type")?;
    if rows < 0 || cols < 0 {
        return Err(TrackingError::parse(
            rows_position,
            format!("negative descriptor dimensions {rows}x{cols}"),
        ));
    }
    if rows as usize != keypoints.len() {
        return Err(TrackingError::parse(
            rows_position,
            format!("{rows} descriptor rows for {} keypoints", keypoints.len()),
        ));
    }
    if rows > 0 && (typ != CV_8UC1 || cols == 0 || cols > MAX_DESCRIPTOR_BYTES) {
        return Err(TrackingError::parse(
            rows_position,
            format!("unsupported descriptor layout {rows}x{cols} of type {typ}"),
        ));
    }

    let descriptors = if rows == 0 {
        Mat::default()
    } else {
        let mut mat = Mat::new_rows_cols_with_default(rows, cols, typ, Scalar::all(0.0))?;
        let bytes = mat.data_bytes_mut()?;
        for byte in bytes.iter_mut() {
            *byte = reader.next("descriptor byte")?;
        }
        mat
    };

    let features = FeaturePack {
        keypoints,
        descriptors,
        ..FeaturePack::new()
    };
    Ok(ImageObject::from_parts(
        contour,
        features,
        is_empty,
        is_labeled.then_some(label),
    ))
}

/// Write `text` to `path`.
///
/// A missing parent directory is reported as `InvalidPath`; failing to create
/// the file as `PermissionDenied`.
pub fn write_text_file(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.is_dir() {
            return Err(TrackingError::InvalidPath(parent.display().to_string()));
        }
    }
    fs::write(path, text).map_err(|e| match e.kind() {
        ErrorKind::PermissionDenied | ErrorKind::NotFound | ErrorKind::IsADirectory => {
            TrackingError::PermissionDenied(format!("can't write {}: {e}", path.display()))
        }
        _ => TrackingError::Io(e),
    })
}

/// Read the whole file at `path`; a file that can't be opened is `PermissionDenied`.
pub fn read_text_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| match e.kind() {
        ErrorKind::InvalidData => TrackingError::Io(e),
        _ => TrackingError::PermissionDenied(format!("can't read {}: {e}", path.display())),
    })
}
