//! Voxel grid geometry and affine transforms
//!
//! A [`Grid`] is the lattice shared by every volume of one subject in one
//! space. Data laid out on it uses Fortran order to match the NIfTI
//! convention: `index = x + y*nx + z*nx*ny`.

use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, SegError};

/// Tolerance for comparing voxel sizes and affine entries (mm)
const GEOMETRY_TOLERANCE: f64 = 1e-4;

/// Dimensions, voxel size and voxel-to-world affine of a 3D lattice
#[derive(Clone, Debug, PartialEq)]
pub struct Grid {
    /// Dimensions (nx, ny, nz)
    pub dims: (usize, usize, usize),
    /// Voxel sizes in mm
    pub voxel_size: (f64, f64, f64),
    /// Voxel-to-world affine (4x4, row-major)
    pub affine: [f64; 16],
}

impl Grid {
    pub fn new(dims: (usize, usize, usize), voxel_size: (f64, f64, f64), affine: [f64; 16]) -> Self {
        Grid { dims, voxel_size, affine }
    }

    /// Grid with a diagonal affine built from the voxel size
    pub fn with_voxel_size(dims: (usize, usize, usize), voxel_size: (f64, f64, f64)) -> Self {
        let (vsx, vsy, vsz) = voxel_size;
        Grid {
            dims,
            voxel_size,
            affine: [
                vsx, 0.0, 0.0, 0.0,
                0.0, vsy, 0.0, 0.0,
                0.0, 0.0, vsz, 0.0,
                0.0, 0.0, 0.0, 1.0,
            ],
        }
    }

    /// Total number of voxels
    pub fn n_total(&self) -> usize {
        self.dims.0 * self.dims.1 * self.dims.2
    }

    /// Flat index of voxel (i, j, k)
    #[inline]
    pub fn index(&self, i: usize, j: usize, k: usize) -> usize {
        i + j * self.dims.0 + k * self.dims.0 * self.dims.1
    }

    /// Voxel coordinates of a flat index
    #[inline]
    pub fn coords(&self, idx: usize) -> (usize, usize, usize) {
        let (nx, ny, _) = self.dims;
        (idx % nx, (idx / nx) % ny, idx / (nx * ny))
    }

    /// Voxel-to-world transform of this grid
    pub fn voxel_to_world(&self) -> AffineTransform {
        AffineTransform { matrix: self.affine }
    }

    /// Check that `other` describes the same lattice
    ///
    /// Dimensions must match exactly; voxel sizes and affine entries must
    /// agree within a small tolerance to absorb float32 header storage.
    pub fn same_as(&self, other: &Grid) -> bool {
        if self.dims != other.dims {
            return false;
        }
        let vs_a = [self.voxel_size.0, self.voxel_size.1, self.voxel_size.2];
        let vs_b = [other.voxel_size.0, other.voxel_size.1, other.voxel_size.2];
        if vs_a.iter().zip(vs_b.iter()).any(|(a, b)| (a - b).abs() > GEOMETRY_TOLERANCE) {
            return false;
        }
        self.affine
            .iter()
            .zip(other.affine.iter())
            .all(|(a, b)| (a - b).abs() <= GEOMETRY_TOLERANCE)
    }

    /// Fail with a configuration error naming `what` if the grids differ
    pub fn ensure_same(&self, other: &Grid, what: &str) -> Result<()> {
        if self.dims != other.dims {
            return Err(SegError::Configuration(format!(
                "{}: shape {:?} does not match mask shape {:?}",
                what, other.dims, self.dims
            )));
        }
        if !self.same_as(other) {
            return Err(SegError::Configuration(format!(
                "{}: voxel size {:?} / affine differs from mask grid (voxel size {:?})",
                what, other.voxel_size, self.voxel_size
            )));
        }
        Ok(())
    }
}

/// Axis of a 3D grid
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

impl std::str::FromStr for Axis {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "x" => Ok(Axis::X),
            "y" => Ok(Axis::Y),
            "z" => Ok(Axis::Z),
            other => Err(format!("unknown axis '{}', expected x, y or z", other)),
        }
    }
}

/// 4x4 affine transform between world coordinate systems (row-major)
#[derive(Clone, Debug, PartialEq)]
pub struct AffineTransform {
    pub matrix: [f64; 16],
}

impl AffineTransform {
    pub fn identity() -> Self {
        AffineTransform {
            matrix: [
                1.0, 0.0, 0.0, 0.0,
                0.0, 1.0, 0.0, 0.0,
                0.0, 0.0, 1.0, 0.0,
                0.0, 0.0, 0.0, 1.0,
            ],
        }
    }

    /// Build from a row-major 4x4 matrix; the last row must be `0 0 0 1`
    pub fn from_row_major(matrix: [f64; 16]) -> Result<Self> {
        let last = &matrix[12..16];
        if last.iter().zip([0.0, 0.0, 0.0, 1.0].iter()).any(|(a, b)| (a - b).abs() > 1e-9) {
            return Err(SegError::Transform(format!(
                "last row must be [0 0 0 1], got {:?}",
                last
            )));
        }
        Ok(AffineTransform { matrix })
    }

    /// Build from a 3x3 linear part and a translation
    pub fn from_parts(rotation: [[f64; 3]; 3], translation: [f64; 3]) -> Self {
        let r = rotation;
        let t = translation;
        AffineTransform {
            matrix: [
                r[0][0], r[0][1], r[0][2], t[0],
                r[1][0], r[1][1], r[1][2], t[1],
                r[2][0], r[2][1], r[2][2], t[2],
                0.0, 0.0, 0.0, 1.0,
            ],
        }
    }

    /// Parse a text-encoded transform
    ///
    /// Accepts either the AIMS `.trm` layout (4 rows of 3 numbers:
    /// translation first, then the three rows of the linear part) or a
    /// plain 4x4 row-major matrix. Blank lines and `#` comments are skipped.
    pub fn parse(text: &str) -> Result<Self> {
        let mut rows: Vec<Vec<f64>> = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let row = line
                .split_whitespace()
                .map(|tok| {
                    tok.parse::<f64>().map_err(|e| {
                        SegError::Transform(format!("line {}: '{}' is not a number ({})", lineno + 1, tok, e))
                    })
                })
                .collect::<Result<Vec<f64>>>()?;
            rows.push(row);
        }

        if rows.len() != 4 {
            return Err(SegError::Transform(format!("expected 4 rows, found {}", rows.len())));
        }

        if rows.iter().all(|r| r.len() == 3) {
            let t = [rows[0][0], rows[0][1], rows[0][2]];
            let mut r = [[0.0; 3]; 3];
            for (dst, src) in r.iter_mut().zip(rows[1..].iter()) {
                dst.copy_from_slice(src);
            }
            Ok(AffineTransform::from_parts(r, t))
        } else if rows.iter().all(|r| r.len() == 4) {
            let mut m = [0.0; 16];
            for (i, row) in rows.iter().enumerate() {
                m[i * 4..i * 4 + 4].copy_from_slice(row);
            }
            AffineTransform::from_row_major(m)
        } else {
            Err(SegError::Transform(
                "rows must all have 3 values (.trm) or all have 4 values (4x4 matrix)".to_string(),
            ))
        }
    }

    /// Read and parse a transform file
    pub fn read_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| SegError::io(path, e))?;
        AffineTransform::parse(&text)
            .map_err(|e| SegError::Transform(format!("{}: {}", path.display(), e)))
    }

    /// Apply to a point
    #[inline]
    pub fn apply(&self, p: [f64; 3]) -> [f64; 3] {
        let m = &self.matrix;
        [
            m[0] * p[0] + m[1] * p[1] + m[2] * p[2] + m[3],
            m[4] * p[0] + m[5] * p[1] + m[6] * p[2] + m[7],
            m[8] * p[0] + m[9] * p[1] + m[10] * p[2] + m[11],
        ]
    }

    /// `self ∘ other`: apply `other` first, then `self`
    pub fn compose(&self, other: &AffineTransform) -> AffineTransform {
        let a = &self.matrix;
        let b = &other.matrix;
        let mut m = [0.0; 16];
        for r in 0..4 {
            for c in 0..4 {
                m[r * 4 + c] = (0..4).map(|k| a[r * 4 + k] * b[k * 4 + c]).sum();
            }
        }
        AffineTransform { matrix: m }
    }

    /// Inverse transform
    pub fn invert(&self) -> Result<AffineTransform> {
        let m = &self.matrix;
        let (a, b, c) = (m[0], m[1], m[2]);
        let (d, e, f) = (m[4], m[5], m[6]);
        let (g, h, i) = (m[8], m[9], m[10]);

        let co00 = e * i - f * h;
        let co01 = -(d * i - f * g);
        let co02 = d * h - e * g;
        let det = a * co00 + b * co01 + c * co02;
        if det.abs() < 1e-12 {
            return Err(SegError::Transform(format!("matrix is singular (det = {:e})", det)));
        }
        let inv_det = 1.0 / det;

        // Inverse of the linear part (adjugate / det)
        let r = [
            [co00 * inv_det, -(b * i - c * h) * inv_det, (b * f - c * e) * inv_det],
            [co01 * inv_det, (a * i - c * g) * inv_det, -(a * f - c * d) * inv_det],
            [co02 * inv_det, -(a * h - b * g) * inv_det, (a * e - b * d) * inv_det],
        ];
        let t = [m[3], m[7], m[11]];
        let t_inv = [
            -(r[0][0] * t[0] + r[0][1] * t[1] + r[0][2] * t[2]),
            -(r[1][0] * t[0] + r[1][1] * t[1] + r[1][2] * t[2]),
            -(r[2][0] * t[0] + r[2][1] * t[1] + r[2][2] * t[2]),
        ];
        Ok(AffineTransform::from_parts(r, t_inv))
    }
}
