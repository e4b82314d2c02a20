//! NIfTI-1 file I/O
//!
//! Reads scalar volumes (`.nii` and `.nii.gz`, gzip is auto-detected) and
//! writes either float32 volumes or categorical label volumes stored in the
//! smallest unsigned integer type that holds every label.

use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::Array;
use nifti::volume::ndarray::IntoNdArray;
use nifti::{InMemNiftiObject, NiftiHeader, NiftiObject};

use crate::error::{Result, SegError};
use crate::grid::Grid;
use crate::volume::LabelVolume;

const NIFTI_HEADER_SIZE: usize = 348;
const VOX_OFFSET: usize = 352;
const NIFTI_INTENT_LABEL: i16 = 1002;

/// NIfTI data loaded from bytes
pub struct NiftiData {
    /// Volume data as f64 (first volume if 4D)
    pub data: Vec<f64>,
    /// Dimensions (nx, ny, nz)
    pub dims: (usize, usize, usize),
    /// Voxel sizes in mm
    pub voxel_size: (f64, f64, f64),
    /// Affine transformation matrix (4x4, row-major)
    pub affine: [f64; 16],
}

impl NiftiData {
    pub fn grid(&self) -> Grid {
        Grid::new(self.dims, self.voxel_size, self.affine)
    }
}

/// On-disk voxel type
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NiftiDatatype {
    Uint8,
    Uint16,
    Float32,
}

impl NiftiDatatype {
    fn code(self) -> i16 {
        match self {
            NiftiDatatype::Uint8 => 2,
            NiftiDatatype::Uint16 => 512,
            NiftiDatatype::Float32 => 16,
        }
    }

    fn bitpix(self) -> i16 {
        match self {
            NiftiDatatype::Uint8 => 8,
            NiftiDatatype::Uint16 => 16,
            NiftiDatatype::Float32 => 32,
        }
    }

    /// Smallest integer type able to hold every label
    pub fn for_labels(max_label: u16) -> Self {
        if max_label <= u8::MAX as u16 {
            NiftiDatatype::Uint8
        } else {
            NiftiDatatype::Uint16
        }
    }
}

/// Check if bytes are gzip compressed
fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

/// Get header info for diagnostics
fn get_header_info(bytes: &[u8]) -> String {
    if bytes.len() < NIFTI_HEADER_SIZE {
        return format!("File too small ({} bytes, need at least 348)", bytes.len());
    }

    let sizeof_hdr = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let magic = String::from_utf8_lossy(&bytes[344..348]).to_string();
    let datatype = i16::from_le_bytes([bytes[70], bytes[71]]);

    format!("sizeof_hdr={}, magic='{}', datatype={}", sizeof_hdr, magic, datatype)
}

/// Load a NIfTI volume from bytes
pub fn load_nifti(bytes: &[u8]) -> std::result::Result<NiftiData, String> {
    let obj: InMemNiftiObject = if is_gzip(bytes) {
        InMemNiftiObject::from_reader(GzDecoder::new(Cursor::new(bytes))).map_err(|e| {
            let mut decompressed = Vec::new();
            let mut decoder = GzDecoder::new(Cursor::new(bytes));
            let info = if std::io::Read::read_to_end(&mut decoder, &mut decompressed).is_ok() {
                get_header_info(&decompressed)
            } else {
                "Could not decompress".to_string()
            };
            format!("Failed to read gzipped NIfTI: {} ({})", e, info)
        })?
    } else {
        let info = get_header_info(bytes);
        InMemNiftiObject::from_reader(Cursor::new(bytes))
            .map_err(|e| format!("Failed to read NIfTI: {} ({})", e, info))?
    };

    let header = obj.header();
    let ndim = header.dim[0] as usize;
    if ndim < 3 {
        return Err(format!("Expected at least 3D volume, got {}D", ndim));
    }

    let pixdim = header.pixdim;
    let voxel_size = (pixdim[1] as f64, pixdim[2] as f64, pixdim[3] as f64);
    let affine = get_affine(header);

    let array: Array<f64, _> = obj
        .into_volume()
        .into_ndarray()
        .map_err(|e| format!("Failed to convert to ndarray: {}", e))?;

    let shape = array.shape().to_vec();
    if shape.len() < 3 {
        return Err(format!("Expected at least 3D array, got {}D", shape.len()));
    }
    let (dim0, dim1, dim2) = (shape[0], shape[1], shape[2]);

    // Fortran order (x fastest); 4D inputs keep their first volume
    let mut data = Vec::with_capacity(dim0 * dim1 * dim2);
    for k in 0..dim2 {
        for j in 0..dim1 {
            for i in 0..dim0 {
                let v = if shape.len() == 3 {
                    array[[i, j, k]]
                } else {
                    let mut index = vec![0usize; shape.len()];
                    index[0] = i;
                    index[1] = j;
                    index[2] = k;
                    array[index.as_slice()]
                };
                data.push(v);
            }
        }
    }

    Ok(NiftiData {
        data,
        dims: (dim0, dim1, dim2),
        voxel_size,
        affine,
    })
}

/// Get affine transformation matrix from header
///
/// sform when `sform_code > 0`, else qform when `qform_code > 0`, else a
/// diagonal matrix built from the voxel size.
fn get_affine(header: &NiftiHeader) -> [f64; 16] {
    if header.sform_code > 0 {
        let s = &header.srow_x;
        let t = &header.srow_y;
        let u = &header.srow_z;
        [
            s[0] as f64, s[1] as f64, s[2] as f64, s[3] as f64,
            t[0] as f64, t[1] as f64, t[2] as f64, t[3] as f64,
            u[0] as f64, u[1] as f64, u[2] as f64, u[3] as f64,
            0.0, 0.0, 0.0, 1.0,
        ]
    } else if header.qform_code > 0 {
        qform_affine(header)
    } else {
        let vsx = header.pixdim[1] as f64;
        let vsy = header.pixdim[2] as f64;
        let vsz = header.pixdim[3] as f64;
        [
            vsx, 0.0, 0.0, 0.0,
            0.0, vsy, 0.0, 0.0,
            0.0, 0.0, vsz, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ]
    }
}

/// Affine encoded by the quaternion, offsets and qfac of the header
fn qform_affine(header: &NiftiHeader) -> [f64; 16] {
    let b = header.quatern_b as f64;
    let c = header.quatern_c as f64;
    let d = header.quatern_d as f64;
    let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();

    let r = [
        [a * a + b * b - c * c - d * d, 2.0 * (b * c - a * d), 2.0 * (b * d + a * c)],
        [2.0 * (b * c + a * d), a * a + c * c - b * b - d * d, 2.0 * (c * d - a * b)],
        [2.0 * (b * d - a * c), 2.0 * (c * d + a * b), a * a + d * d - b * b - c * c],
    ];
    let qfac = if header.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
    let scale = [
        header.pixdim[1] as f64,
        header.pixdim[2] as f64,
        header.pixdim[3] as f64 * qfac,
    ];
    let offset = [header.quatern_x as f64, header.quatern_y as f64, header.quatern_z as f64];

    let mut m = [0.0; 16];
    for row in 0..3 {
        for col in 0..3 {
            m[row * 4 + col] = r[row][col] * scale[col];
        }
        m[row * 4 + 3] = offset[row];
    }
    m[15] = 1.0;
    m
}

/// qform parameters `(qfac, [b, c, d])` for the linear part of an affine
///
/// `None` when the columns are not orthogonal or their lengths differ
/// from `voxel_size`, in which case only the sform can describe it.
fn qform_quaternion(affine: &[f64; 16], voxel_size: (f64, f64, f64)) -> Option<(f64, [f64; 3])> {
    let spacing = [voxel_size.0, voxel_size.1, voxel_size.2];
    let mut r = [[0.0; 3]; 3];
    for col in 0..3 {
        let norm = (0..3).map(|row| affine[row * 4 + col].powi(2)).sum::<f64>().sqrt();
        if norm <= 0.0 || (norm - spacing[col]).abs() > 1e-4 {
            return None;
        }
        for row in 0..3 {
            r[row][col] = affine[row * 4 + col] / norm;
        }
    }
    for i in 0..3 {
        for j in (i + 1)..3 {
            let dot: f64 = (0..3).map(|row| r[row][i] * r[row][j]).sum();
            if dot.abs() > 1e-4 {
                return None;
            }
        }
    }

    let det = r[0][0] * (r[1][1] * r[2][2] - r[1][2] * r[2][1])
        - r[0][1] * (r[1][0] * r[2][2] - r[1][2] * r[2][0])
        + r[0][2] * (r[1][0] * r[2][1] - r[1][1] * r[2][0]);
    let qfac = if det < 0.0 {
        for row in r.iter_mut() {
            row[2] = -row[2];
        }
        -1.0
    } else {
        1.0
    };

    let trace = r[0][0] + r[1][1] + r[2][2] + 1.0;
    let (a, b, c, d) = if trace > 0.5 {
        let a = 0.5 * trace.sqrt();
        (a, 0.25 * (r[2][1] - r[1][2]) / a, 0.25 * (r[0][2] - r[2][0]) / a, 0.25 * (r[1][0] - r[0][1]) / a)
    } else {
        let xd = 1.0 + r[0][0] - (r[1][1] + r[2][2]);
        let yd = 1.0 + r[1][1] - (r[0][0] + r[2][2]);
        let zd = 1.0 + r[2][2] - (r[0][0] + r[1][1]);
        if xd > 1.0 {
            let b = 0.5 * xd.sqrt();
            (0.25 * (r[2][1] - r[1][2]) / b, b, 0.25 * (r[0][1] + r[1][0]) / b, 0.25 * (r[0][2] + r[2][0]) / b)
        } else if yd > 1.0 {
            let c = 0.5 * yd.sqrt();
            (0.25 * (r[0][2] - r[2][0]) / c, 0.25 * (r[0][1] + r[1][0]) / c, c, 0.25 * (r[1][2] + r[2][1]) / c)
        } else {
            let d = 0.5 * zd.sqrt();
            (0.25 * (r[1][0] - r[0][1]) / d, 0.25 * (r[0][2] + r[2][0]) / d, 0.25 * (r[1][2] + r[2][1]) / d, d)
        }
    };
    // Keep a >= 0 so it can be recovered from b, c, d
    let sign = if a < 0.0 { -1.0 } else { 1.0 };
    Some((qfac, [sign * b, sign * c, sign * d]))
}

/// Grid described by a header, without touching voxel data
fn grid_from_header(header: &NiftiHeader) -> std::result::Result<Grid, String> {
    let ndim = header.dim[0] as usize;
    if ndim < 3 {
        return Err(format!("Expected at least 3D volume, got {}D", ndim));
    }
    let dims = (header.dim[1] as usize, header.dim[2] as usize, header.dim[3] as usize);
    let pixdim = header.pixdim;
    let voxel_size = (pixdim[1] as f64, pixdim[2] as f64, pixdim[3] as f64);
    Ok(Grid::new(dims, voxel_size, get_affine(header)))
}

/// Build a NIfTI-1 single-file header
fn build_header(grid: &Grid, datatype: NiftiDatatype, intent_code: i16) -> std::result::Result<[u8; NIFTI_HEADER_SIZE], String> {
    let (nx, ny, nz) = grid.dims;
    let (vsx, vsy, vsz) = grid.voxel_size;
    let max_dim = i16::MAX as usize;
    if nx > max_dim || ny > max_dim || nz > max_dim {
        return Err(format!("Dimensions {:?} exceed NIfTI-1 limit of {}", grid.dims, max_dim));
    }

    let mut header = [0u8; NIFTI_HEADER_SIZE];
    header[0..4].copy_from_slice(&(NIFTI_HEADER_SIZE as i32).to_le_bytes());

    let dim: [i16; 8] = [3, nx as i16, ny as i16, nz as i16, 1, 1, 1, 1];
    for (i, &d) in dim.iter().enumerate() {
        let offset = 40 + i * 2;
        header[offset..offset + 2].copy_from_slice(&d.to_le_bytes());
    }

    header[68..70].copy_from_slice(&intent_code.to_le_bytes());
    header[70..72].copy_from_slice(&datatype.code().to_le_bytes());
    header[72..74].copy_from_slice(&datatype.bitpix().to_le_bytes());

    let qform = qform_quaternion(&grid.affine, grid.voxel_size);
    let qfac = qform.map(|(qfac, _)| qfac).unwrap_or(1.0);
    let pixdim: [f32; 8] = [qfac as f32, vsx as f32, vsy as f32, vsz as f32, 1.0, 1.0, 1.0, 1.0];
    for (i, &p) in pixdim.iter().enumerate() {
        let offset = 76 + i * 4;
        header[offset..offset + 4].copy_from_slice(&p.to_le_bytes());
    }

    header[108..112].copy_from_slice(&(VOX_OFFSET as f32).to_le_bytes());
    header[112..116].copy_from_slice(&1.0f32.to_le_bytes());
    header[116..120].copy_from_slice(&0.0f32.to_le_bytes());

    // qform and sform both scanner anat (code 1); qform only if it can be exact
    if let Some((_, quatern)) = qform {
        header[252..254].copy_from_slice(&1i16.to_le_bytes());
        for (i, &q) in quatern.iter().enumerate() {
            let offset = 256 + i * 4;
            header[offset..offset + 4].copy_from_slice(&(q as f32).to_le_bytes());
        }
        for (i, &t) in [grid.affine[3], grid.affine[7], grid.affine[11]].iter().enumerate() {
            let offset = 268 + i * 4;
            header[offset..offset + 4].copy_from_slice(&(t as f32).to_le_bytes());
        }
    }
    header[254..256].copy_from_slice(&1i16.to_le_bytes());
    for row in 0..3 {
        for col in 0..4 {
            let offset = 280 + row * 16 + col * 4;
            header[offset..offset + 4].copy_from_slice(&(grid.affine[row * 4 + col] as f32).to_le_bytes());
        }
    }

    header[344..348].copy_from_slice(b"n+1\0");
    Ok(header)
}

/// Save a scalar volume as uncompressed float32 NIfTI bytes
pub fn save_nifti(data: &[f64], grid: &Grid) -> std::result::Result<Vec<u8>, String> {
    if data.len() != grid.n_total() {
        return Err(format!("{} values for a {:?} grid", data.len(), grid.dims));
    }
    let header = build_header(grid, NiftiDatatype::Float32, 0)?;

    let mut buffer = Vec::with_capacity(VOX_OFFSET + data.len() * 4);
    buffer.extend_from_slice(&header);
    buffer.extend_from_slice(&[0u8; 4]);
    for &val in data {
        buffer.extend_from_slice(&(val as f32).to_le_bytes());
    }
    Ok(buffer)
}

/// Save a label volume as uncompressed NIfTI bytes
///
/// Stored as uint8 when every label fits, uint16 otherwise, with the
/// header's intent set to NIFTI_INTENT_LABEL.
pub fn save_labels(volume: &LabelVolume) -> std::result::Result<Vec<u8>, String> {
    let max_label = volume.data.iter().copied().max().unwrap_or(0);
    let datatype = NiftiDatatype::for_labels(max_label);
    let header = build_header(&volume.grid, datatype, NIFTI_INTENT_LABEL)?;

    let bytes_per_voxel = (datatype.bitpix() / 8) as usize;
    let mut buffer = Vec::with_capacity(VOX_OFFSET + volume.data.len() * bytes_per_voxel);
    buffer.extend_from_slice(&header);
    buffer.extend_from_slice(&[0u8; 4]);
    match datatype {
        NiftiDatatype::Uint8 => buffer.extend(volume.data.iter().map(|&v| v as u8)),
        _ => {
            for &v in &volume.data {
                buffer.extend_from_slice(&v.to_le_bytes());
            }
        }
    }
    Ok(buffer)
}

fn gzip(bytes: &[u8]) -> std::result::Result<Vec<u8>, String> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .map_err(|e| format!("Gzip compression failed: {}", e))?;
    encoder.finish().map_err(|e| format!("Gzip finish failed: {}", e))
}

fn wants_gzip(path: &Path) -> bool {
    path.to_string_lossy().ends_with(".gz")
}

/// Read a NIfTI file from a filesystem path
pub fn read_nifti_file(path: &Path) -> Result<NiftiData> {
    let bytes = std::fs::read(path).map_err(|e| SegError::io(path, e))?;
    load_nifti(&bytes).map_err(|msg| SegError::nifti(path, msg))
}

/// Read only the header of a NIfTI file and return its grid
///
/// Used for reference volumes, where the voxel data is never needed.
pub fn read_nifti_grid(path: &Path) -> Result<Grid> {
    let file = File::open(path).map_err(|e| SegError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let gzipped = is_gzip(reader.fill_buf().map_err(|e| SegError::io(path, e))?);
    let header = if gzipped {
        NiftiHeader::from_reader(GzDecoder::new(reader))
    } else {
        NiftiHeader::from_reader(reader)
    }
    .map_err(|e| SegError::nifti(path, format!("Failed to read NIfTI header: {}", e)))?;
    grid_from_header(&header).map_err(|msg| SegError::nifti(path, msg))
}

/// Read a label volume, rejecting values that are not small non-negative integers
pub fn read_label_file(path: &Path) -> Result<LabelVolume> {
    let nifti = read_nifti_file(path)?;
    let grid = nifti.grid();
    let mut data = Vec::with_capacity(nifti.data.len());
    for (idx, &v) in nifti.data.iter().enumerate() {
        if v < 0.0 || v > u16::MAX as f64 || v.fract() != 0.0 {
            return Err(SegError::nifti(
                path,
                format!("voxel {} holds {}, not a label value", idx, v),
            ));
        }
        data.push(v as u16);
    }
    LabelVolume::new(grid, data)
}

fn write_bytes(path: &Path, bytes: Vec<u8>) -> Result<()> {
    let bytes = if wants_gzip(path) {
        gzip(&bytes).map_err(|msg| SegError::nifti(path, msg))?
    } else {
        bytes
    };
    std::fs::write(path, &bytes).map_err(|e| SegError::io(path, e))
}

/// Save a scalar volume; `.gz` paths are gzip compressed
pub fn save_nifti_to_file(path: &Path, data: &[f64], grid: &Grid) -> Result<()> {
    let bytes = save_nifti(data, grid).map_err(|msg| SegError::nifti(path, msg))?;
    write_bytes(path, bytes)
}

/// Encode a label volume in the format implied by `path` (`.gz` compresses)
pub fn encode_labels_for(path: &Path, volume: &LabelVolume) -> Result<Vec<u8>> {
    let bytes = save_labels(volume).map_err(|msg| SegError::nifti(path, msg))?;
    if wants_gzip(path) {
        gzip(&bytes).map_err(|msg| SegError::nifti(path, msg))
    } else {
        Ok(bytes)
    }
}

/// Save a label volume; `.gz` paths are gzip compressed
pub fn save_labels_to_file(path: &Path, volume: &LabelVolume) -> Result<()> {
    let bytes = encode_labels_for(path, volume)?;
    std::fs::write(path, &bytes).map_err(|e| SegError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_grid(dims: (usize, usize, usize)) -> Grid {
        Grid::with_voxel_size(dims, (1.0, 1.0, 1.0))
    }

    #[test]
    fn test_affine_identity() {
        let mut header = NiftiHeader::default();
        header.pixdim[1] = 1.0;
        header.pixdim[2] = 2.0;
        header.pixdim[3] = 3.0;
        header.sform_code = 0;

        let affine = get_affine(&header);
        assert_eq!(affine[0], 1.0);
        assert_eq!(affine[5], 2.0);
        assert_eq!(affine[10], 3.0);
    }

    fn assert_affine_close(a: &[f64; 16], b: &[f64; 16]) {
        for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
            assert!((x - y).abs() < 1e-4, "affine entry {} differs: {:?} vs {:?}", i, a, b);
        }
    }

    /// Drop the sform from encoded bytes so readers fall back to the qform
    fn clear_sform(bytes: &mut [u8]) {
        bytes[254..256].copy_from_slice(&0i16.to_le_bytes());
    }

    #[test]
    fn test_affine_from_qform_translation() {
        let mut header = NiftiHeader::default();
        header.pixdim = [1.0, 2.0, 2.0, 2.0, 1.0, 1.0, 1.0, 1.0];
        header.sform_code = 0;
        header.qform_code = 1;
        header.quatern_x = 10.0;
        header.quatern_y = 20.0;
        header.quatern_z = 30.0;

        let affine = get_affine(&header);
        assert_affine_close(
            &affine,
            &[
                2.0, 0.0, 0.0, 10.0,
                0.0, 2.0, 0.0, 20.0,
                0.0, 0.0, 2.0, 30.0,
                0.0, 0.0, 0.0, 1.0,
            ],
        );
    }

    #[test]
    fn test_affine_from_qform_rotation_and_qfac() {
        // 90 degrees about z, with the z axis flipped by qfac
        let mut header = NiftiHeader::default();
        header.pixdim = [-1.0, 1.0, 1.0, 3.0, 1.0, 1.0, 1.0, 1.0];
        header.qform_code = 2;
        header.quatern_d = std::f32::consts::FRAC_1_SQRT_2;

        let affine = get_affine(&header);
        assert_affine_close(
            &affine,
            &[
                0.0, -1.0, 0.0, 0.0,
                1.0, 0.0, 0.0, 0.0,
                0.0, 0.0, -3.0, 0.0,
                0.0, 0.0, 0.0, 1.0,
            ],
        );
    }

    #[test]
    fn test_qform_only_file_keeps_origin() {
        let grid = identity_grid((2, 2, 2));
        let mut bytes = save_nifti(&[0.0; 8], &grid).unwrap();
        clear_sform(&mut bytes);
        for (i, t) in [10.0f32, 20.0, 30.0].iter().enumerate() {
            let offset = 268 + i * 4;
            bytes[offset..offset + 4].copy_from_slice(&t.to_le_bytes());
        }

        let loaded = load_nifti(&bytes).unwrap();
        assert_eq!([loaded.affine[3], loaded.affine[7], loaded.affine[11]], [10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_written_qform_matches_sform() {
        let c = 30f64.to_radians().cos();
        let s = 30f64.to_radians().sin();
        let grids = [
            // Oblique acquisition
            Grid::new(
                (3, 3, 2),
                (1.5, 1.5, 2.0),
                [
                    1.5 * c, -1.5 * s, 0.0, -40.0,
                    1.5 * s, 1.5 * c, 0.0, 12.5,
                    0.0, 0.0, 2.0, -60.0,
                    0.0, 0.0, 0.0, 1.0,
                ],
            ),
            // Radiological (left-right flipped) orientation
            Grid::new(
                (3, 3, 2),
                (2.0, 2.0, 2.5),
                [
                    -2.0, 0.0, 0.0, 90.0,
                    0.0, 2.0, 0.0, -126.0,
                    0.0, 0.0, 2.5, -72.0,
                    0.0, 0.0, 0.0, 1.0,
                ],
            ),
        ];
        for grid in grids {
            let mut bytes = save_nifti(&vec![0.0; grid.n_total()], &grid).unwrap();
            assert_eq!(i16::from_le_bytes([bytes[252], bytes[253]]), 1);
            clear_sform(&mut bytes);
            let loaded = load_nifti(&bytes).unwrap();
            assert_affine_close(&loaded.affine, &grid.affine);
        }
    }

    #[test]
    fn test_sheared_affine_writes_sform_only() {
        let grid = Grid::new(
            (2, 2, 2),
            (1.0, 1.0, 1.0),
            [
                1.0, 0.5, 0.0, 0.0,
                0.0, 1.0, 0.0, 0.0,
                0.0, 0.0, 1.0, 0.0,
                0.0, 0.0, 0.0, 1.0,
            ],
        );
        let bytes = save_nifti(&[0.0; 8], &grid).unwrap();
        assert_eq!(i16::from_le_bytes([bytes[252], bytes[253]]), 0);
        assert_affine_close(&load_nifti(&bytes).unwrap().affine, &grid.affine);
    }

    #[test]
    fn test_read_grid_from_header_only() {
        let grid = Grid::new(
            (4, 3, 2),
            (0.5, 0.5, 1.0),
            [
                0.5, 0.0, 0.0, -3.0,
                0.0, 0.5, 0.0, 7.0,
                0.0, 0.0, 1.0, 11.0,
                0.0, 0.0, 0.0, 1.0,
            ],
        );
        let dir = tempfile::tempdir().unwrap();
        for name in ["t1mri.nii", "t1mri.nii.gz"] {
            let path = dir.path().join(name);
            save_nifti_to_file(&path, &vec![1.0; grid.n_total()], &grid).unwrap();
            let read = read_nifti_grid(&path).unwrap();
            assert!(read.same_as(&grid), "{}: {:?}", name, read);
        }
        assert!(matches!(
            read_nifti_grid(&dir.path().join("missing.nii")),
            Err(SegError::Io { .. })
        ));
    }

    #[test]
    fn test_gzip_detection() {
        assert!(is_gzip(&[0x1f, 0x8b, 0x00]));
        assert!(!is_gzip(&[0x00, 0x00, 0x00]));
        assert!(!is_gzip(&[0x1f]));
    }

    #[test]
    fn test_datatype_for_labels() {
        assert_eq!(NiftiDatatype::for_labels(80), NiftiDatatype::Uint8);
        assert_eq!(NiftiDatatype::for_labels(255), NiftiDatatype::Uint8);
        assert_eq!(NiftiDatatype::for_labels(256), NiftiDatatype::Uint16);
    }

    #[test]
    fn test_save_labels_header() {
        let vol = LabelVolume::new(identity_grid((2, 2, 2)), vec![0, 2, 80, 70, 0, 0, 20, 30]).unwrap();
        let bytes = save_labels(&vol).unwrap();

        assert_eq!(bytes.len(), VOX_OFFSET + 8);
        assert_eq!(&bytes[344..348], b"n+1\0");
        assert_eq!(i16::from_le_bytes([bytes[68], bytes[69]]), NIFTI_INTENT_LABEL);
        assert_eq!(i16::from_le_bytes([bytes[70], bytes[71]]), 2);
        assert_eq!(i16::from_le_bytes([bytes[72], bytes[73]]), 8);
        assert_eq!(&bytes[VOX_OFFSET..], &[0, 2, 80, 70, 0, 0, 20, 30]);
    }

    #[test]
    fn test_save_labels_wide() {
        let vol = LabelVolume::new(identity_grid((2, 1, 1)), vec![300, 2]).unwrap();
        let bytes = save_labels(&vol).unwrap();
        assert_eq!(i16::from_le_bytes([bytes[70], bytes[71]]), 512);
        assert_eq!(bytes.len(), VOX_OFFSET + 4);
        assert_eq!(u16::from_le_bytes([bytes[VOX_OFFSET], bytes[VOX_OFFSET + 1]]), 300);
    }

    #[test]
    fn test_labels_file_roundtrip_gz() {
        let grid = Grid::new(
            (3, 2, 2),
            (2.0, 2.0, 2.5),
            [
                -2.0, 0.0, 0.0, 90.0,
                0.0, 2.0, 0.0, -126.0,
                0.0, 0.0, 2.5, -72.0,
                0.0, 0.0, 0.0, 1.0,
            ],
        );
        let data: Vec<u16> = vec![0, 80, 70, 60, 50, 40, 30, 20, 2, 0, 0, 80];
        let vol = LabelVolume::new(grid.clone(), data.clone()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.nii.gz");
        save_labels_to_file(&path, &vol).unwrap();
        assert!(is_gzip(&std::fs::read(&path).unwrap()));

        let loaded = read_label_file(&path).unwrap();
        assert_eq!(loaded.data, data);
        assert!(loaded.grid.same_as(&grid), "geometry should survive: {:?}", loaded.grid);
    }

    #[test]
    fn test_float_roundtrip() {
        let grid = identity_grid((4, 4, 4));
        let data: Vec<f64> = (0..64).map(|i| i as f64 * 0.25).collect();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tdi.nii");
        save_nifti_to_file(&path, &data, &grid).unwrap();

        let loaded = read_nifti_file(&path).unwrap();
        assert_eq!(loaded.dims, (4, 4, 4));
        for (a, b) in loaded.data.iter().zip(data.iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_read_label_file_rejects_fractions() {
        let grid = identity_grid((2, 1, 1));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not_labels.nii");
        save_nifti_to_file(&path, &[1.0, 2.5], &grid).unwrap();

        assert!(matches!(read_label_file(&path), Err(SegError::Nifti { .. })));
    }

    #[test]
    fn test_load_nifti_invalid_bytes() {
        assert!(load_nifti(&[0u8; 10]).is_err());
        assert!(load_nifti(&[0x1f, 0x8b, 0x00, 0x00, 0x00]).is_err());
    }

    #[test]
    fn test_get_header_info_small_file() {
        assert!(get_header_info(&[0u8; 10]).contains("too small"));
    }

    #[test]
    fn test_read_nonexistent_file() {
        let result = read_nifti_file(Path::new("/tmp/nonexistent_file_12345.nii"));
        assert!(matches!(result, Err(SegError::Io { .. })));
    }
}
