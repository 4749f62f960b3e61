//! Point cloud container and file loaders.
//!
//! This module provides:
//! - The `PointCloud` container (structure-of-arrays, `f64` coordinates)
//! - PLY (ASCII and binary, via `ply-rs`) and PCD (ASCII and binary)
//!   readers with optional RGB colors
//! - Cartesian CSV parsing (x, y, z columns)
//! - `load_point_cloud`, which dispatches on the file extension

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use csv::ReaderBuilder;
use ply_rs::parser::Parser;
use ply_rs::ply::{DefaultElement, Property};
use thiserror::Error;

/// Color used to fill in missing colors when a colored point is appended to
/// an uncolored, non-empty cloud.
pub const DEFAULT_COLOR: [u8; 3] = [180, 180, 180];

/// Errors that can occur during file loading.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Empty file: {0}")]
    EmptyFile(PathBuf),

    #[error("Invalid PLY file: {0}")]
    InvalidPly(String),

    #[error("Invalid PCD file: {0}")]
    InvalidPcd(String),

    #[error("Missing required columns: {0}")]
    MissingColumns(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Unsupported point cloud format: {0}")]
    UnsupportedFormat(PathBuf),
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Container for 3D point cloud data.
///
/// Invariant: when `colors` is `Some`, it holds exactly one entry per point.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    /// X coordinates of all points.
    pub x: Vec<f64>,
    /// Y coordinates of all points.
    pub y: Vec<f64>,
    /// Z coordinates of all points.
    pub z: Vec<f64>,
    /// Optional RGB colors for each point.
    pub colors: Option<Vec<[u8; 3]>>,
}

impl PointCloud {
    /// Creates a new empty point cloud.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new point cloud from coordinate vectors.
    pub fn from_xyz(x: Vec<f64>, y: Vec<f64>, z: Vec<f64>) -> Self {
        debug_assert!(x.len() == y.len() && y.len() == z.len());
        Self {
            x,
            y,
            z,
            colors: None,
        }
    }

    /// Creates a new point cloud from `[x, y, z]` triples.
    pub fn from_points(points: &[[f64; 3]]) -> Self {
        let mut cloud = Self::with_capacity(points.len());
        for p in points {
            cloud.push(p[0], p[1], p[2]);
        }
        cloud
    }

    /// Creates a new point cloud with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            x: Vec::with_capacity(capacity),
            y: Vec::with_capacity(capacity),
            z: Vec::with_capacity(capacity),
            colors: None,
        }
    }

    /// Returns the number of points in the cloud.
    #[inline]
    pub fn len(&self) -> usize {
        self.x.len()
    }

    /// Returns true if the point cloud is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    #[inline]
    pub fn has_colors(&self) -> bool {
        self.colors.is_some()
    }

    /// Returns point `i` as `[x, y, z]`.
    #[inline]
    pub fn point(&self, i: usize) -> [f64; 3] {
        [self.x[i], self.y[i], self.z[i]]
    }

    /// Converts point cloud to a vector of [x, y, z] coordinate arrays.
    pub fn to_coords(&self) -> Vec<[f64; 3]> {
        (0..self.len()).map(|i| self.point(i)).collect()
    }

    /// Adds an uncolored point to the cloud.
    ///
    /// On a colored cloud the point receives `DEFAULT_COLOR`.
    #[inline]
    pub fn push(&mut self, x: f64, y: f64, z: f64) {
        self.x.push(x);
        self.y.push(y);
        self.z.push(z);
        if let Some(ref mut colors) = self.colors {
            colors.push(DEFAULT_COLOR);
        }
    }

    /// Adds a point with color to the cloud.
    pub fn push_with_color(&mut self, x: f64, y: f64, z: f64, color: [u8; 3]) {
        if self.colors.is_none() {
            self.colors = Some(vec![DEFAULT_COLOR; self.len()]);
        }
        self.x.push(x);
        self.y.push(y);
        self.z.push(z);
        if let Some(ref mut colors) = self.colors {
            colors.push(color);
        }
    }
}

/// Load a point cloud, choosing the parser from the file extension.
///
/// Supported: `.ply`, `.pcd` (ASCII or binary), `.csv` (x, y, z columns).
///
/// # Errors
///
/// Returns `UnsupportedFormat` for any other extension, and the parser's
/// error if the file cannot be read or is malformed.
pub fn load_point_cloud<P: AsRef<Path>>(path: P) -> Result<PointCloud> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("ply") => load_ply(path),
        Some("pcd") => load_pcd(path),
        Some("csv") => load_cartesian_csv(path),
        _ => Err(LoaderError::UnsupportedFormat(path.to_path_buf())),
    }
}

/// Load a Cartesian point cloud from a CSV file with x, y, z columns.
///
/// The CSV should have a header row with column names. The function will
/// look for columns named 'x', 'y', 'z' (case-insensitive), or fall back
/// to using the first three columns.
///
/// # Errors
///
/// Returns an error if the file cannot be read, a value does not parse, or
/// the file holds no rows.
pub fn load_cartesian_csv<P: AsRef<Path>>(path: P) -> Result<PointCloud> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(BufReader::new(file));

    let headers = reader.headers()?.clone();
    let col_map: HashMap<String, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, name)| (name.trim().to_lowercase(), i))
        .collect();

    let x_idx = col_map.get("x").copied().unwrap_or(0);
    let y_idx = col_map.get("y").copied().unwrap_or(1);
    let z_idx = col_map.get("z").copied().unwrap_or(2);

    let mut cloud = PointCloud::with_capacity(10_000);

    for result in reader.records() {
        let record = result?;
        let field = |idx: usize, name: &str| -> Result<f64> {
            let raw = record
                .get(idx)
                .ok_or_else(|| LoaderError::MissingColumns(name.to_string()))?;
            raw.trim()
                .parse()
                .map_err(|_| LoaderError::ParseError(format!("Invalid {} value: {}", name, raw)))
        };

        cloud.push(field(x_idx, "x")?, field(y_idx, "y")?, field(z_idx, "z")?);
    }

    if cloud.is_empty() {
        return Err(LoaderError::EmptyFile(path.to_path_buf()));
    }

    Ok(cloud)
}

/// Load a point cloud from a PLY file.
///
/// ASCII, binary little-endian and binary big-endian files are read with
/// `ply-rs`. The vertex element must carry `x`, `y` and `z`; `red`, `green`
/// and `blue` are read as colors when all three are present. Other elements
/// (faces, for instance) are parsed and ignored.
///
/// # Errors
///
/// Returns `Io` if the file cannot be opened, `InvalidPly` if it does not
/// parse or has no vertex element, and `MissingColumns` if a coordinate
/// property is absent.
pub fn load_ply<P: AsRef<Path>>(path: P) -> Result<PointCloud> {
    let path = path.as_ref();
    let mut reader = BufReader::new(File::open(path)?);

    let parser = Parser::<DefaultElement>::new();
    let header = parser
        .read_header(&mut reader)
        .map_err(|e| LoaderError::InvalidPly(format!("{}: bad header: {}", path.display(), e)))?;

    let vertex_def = header
        .elements
        .get("vertex")
        .ok_or_else(|| LoaderError::InvalidPly("No vertex element in header".to_string()))?;
    for name in ["x", "y", "z"] {
        if !vertex_def.properties.contains_key(name) {
            return Err(LoaderError::MissingColumns(name.to_string()));
        }
    }
    let has_colors = ["red", "green", "blue"]
        .iter()
        .all(|name| vertex_def.properties.contains_key(*name));

    let payload = parser
        .read_payload(&mut reader, &header)
        .map_err(|e| LoaderError::InvalidPly(format!("{}: bad payload: {}", path.display(), e)))?;

    let vertices = payload.get("vertex").map(Vec::as_slice).unwrap_or(&[]);
    let mut cloud = PointCloud::with_capacity(vertices.len());
    if has_colors {
        cloud.colors = Some(Vec::with_capacity(vertices.len()));
    }

    for vertex in vertices {
        let x = scalar_property(vertex, "x")?;
        let y = scalar_property(vertex, "y")?;
        let z = scalar_property(vertex, "z")?;
        if has_colors {
            let color = [
                color_property(vertex, "red")?,
                color_property(vertex, "green")?,
                color_property(vertex, "blue")?,
            ];
            cloud.push_with_color(x, y, z, color);
        } else {
            cloud.push(x, y, z);
        }
    }

    Ok(cloud)
}

fn scalar_property(element: &DefaultElement, key: &str) -> Result<f64> {
    match element.get(key) {
        Some(Property::Char(v)) => Ok(f64::from(*v)),
        Some(Property::UChar(v)) => Ok(f64::from(*v)),
        Some(Property::Short(v)) => Ok(f64::from(*v)),
        Some(Property::UShort(v)) => Ok(f64::from(*v)),
        Some(Property::Int(v)) => Ok(f64::from(*v)),
        Some(Property::UInt(v)) => Ok(f64::from(*v)),
        Some(Property::Float(v)) => Ok(f64::from(*v)),
        Some(Property::Double(v)) => Ok(*v),
        Some(_) => Err(LoaderError::InvalidPly(format!("{} is a list property", key))),
        None => Err(LoaderError::MissingColumns(key.to_string())),
    }
}

fn color_property(element: &DefaultElement, key: &str) -> Result<u8> {
    let is_float = matches!(
        element.get(key),
        Some(Property::Float(_)) | Some(Property::Double(_))
    );
    Ok(color_channel(scalar_property(element, key)?, is_float))
}

/// PCD data encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PcdData {
    Ascii,
    Binary,
}

/// Parsed PCD header.
#[derive(Debug, Default)]
struct PcdHeader {
    fields: Vec<String>,
    sizes: Vec<usize>,
    types: Vec<char>,
    counts: Vec<usize>,
    points: usize,
}

impl PcdHeader {
    fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == name)
    }

    /// Byte offset of each field within a binary record, and the record size.
    fn layout(&self) -> Result<(Vec<usize>, usize)> {
        if self.sizes.len() != self.fields.len() || self.types.len() != self.fields.len() {
            return Err(LoaderError::InvalidPcd(
                "SIZE and TYPE must list one entry per field".to_string(),
            ));
        }
        let mut offsets = Vec::with_capacity(self.fields.len());
        let mut stride = 0;
        for (i, size) in self.sizes.iter().enumerate() {
            offsets.push(stride);
            stride += size * self.counts.get(i).copied().unwrap_or(1);
        }
        Ok((offsets, stride))
    }
}

/// Load a point cloud from a PCD (Point Cloud Library) file.
///
/// Reads the `FIELDS`, `SIZE`, `TYPE`, `COUNT`, `POINTS`/`WIDTH`/`HEIGHT`
/// and `DATA` header entries. `DATA ascii` and `DATA binary` (little-endian
/// records) are supported. Colors are taken from a packed `rgb`/`rgba`
/// field (float or unsigned) or from separate `r g b` fields.
///
/// # Errors
///
/// Returns an error for `binary_compressed` data, a missing x/y/z field, or
/// a truncated point list.
pub fn load_pcd<P: AsRef<Path>>(path: P) -> Result<PointCloud> {
    let path = path.as_ref();
    let mut reader = BufReader::new(File::open(path)?);

    let mut header = PcdHeader::default();
    let mut width = 0usize;
    let mut height = 1usize;
    let mut data = None;
    let mut line = String::new();

    while data.is_none() {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(LoaderError::InvalidPcd("Missing DATA line".to_string()));
        }
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let parts: Vec<&str> = trimmed.split_whitespace().collect();
        let numbers = || parts[1..].iter().filter_map(|s| s.parse().ok()).collect::<Vec<usize>>();
        match parts[0] {
            "FIELDS" => header.fields = parts[1..].iter().map(|s| s.to_lowercase()).collect(),
            "SIZE" => header.sizes = numbers(),
            "TYPE" => header.types = parts[1..].iter().filter_map(|s| s.chars().next()).collect(),
            "COUNT" => header.counts = numbers(),
            "WIDTH" => width = parts.get(1).and_then(|s| s.parse().ok()).unwrap_or(0),
            "HEIGHT" => height = parts.get(1).and_then(|s| s.parse().ok()).unwrap_or(1),
            "POINTS" => header.points = parts.get(1).and_then(|s| s.parse().ok()).unwrap_or(0),
            "DATA" => {
                data = match parts.get(1).copied() {
                    Some("ascii") => Some(PcdData::Ascii),
                    Some("binary") => Some(PcdData::Binary),
                    other => {
                        return Err(LoaderError::InvalidPcd(format!(
                            "unsupported DATA encoding '{}'",
                            other.unwrap_or("")
                        )))
                    }
                }
            }
            _ => {}
        }
    }

    if header.points == 0 {
        header.points = width * height;
    }

    let cloud = match data {
        Some(PcdData::Binary) => read_pcd_binary(reader, &header)?,
        _ => read_pcd_ascii(reader, &header)?,
    };

    if cloud.len() < header.points {
        return Err(LoaderError::InvalidPcd(format!(
            "Expected {} points, found {}",
            header.points,
            cloud.len()
        )));
    }

    Ok(cloud)
}

/// Indices of the coordinate and color fields.
struct PcdColumns {
    xyz: [usize; 3],
    packed: Option<usize>,
    split: Option<[usize; 3]>,
}

impl PcdColumns {
    fn new(header: &PcdHeader) -> Result<Self> {
        let required = |name: &str| {
            header
                .position(name)
                .ok_or_else(|| LoaderError::MissingColumns(name.to_string()))
        };
        let split = match (header.position("r"), header.position("g"), header.position("b")) {
            (Some(r), Some(g), Some(b)) => Some([r, g, b]),
            _ => None,
        };
        Ok(Self {
            xyz: [required("x")?, required("y")?, required("z")?],
            packed: header.position("rgb").or_else(|| header.position("rgba")),
            split,
        })
    }

    fn empty_cloud(&self, capacity: usize) -> PointCloud {
        let mut cloud = PointCloud::with_capacity(capacity);
        if self.packed.is_some() || self.split.is_some() {
            cloud.colors = Some(Vec::with_capacity(capacity));
        }
        cloud
    }
}

fn read_pcd_ascii<R: BufRead>(reader: R, header: &PcdHeader) -> Result<PointCloud> {
    let columns = PcdColumns::new(header)?;
    let [x_idx, y_idx, z_idx] = columns.xyz;
    let mut cloud = columns.empty_cloud(header.points);

    for line in reader.lines() {
        if cloud.len() >= header.points {
            break;
        }
        let line = line?;
        let values: Vec<&str> = line.split_whitespace().collect();
        if values.len() < header.fields.len() {
            continue;
        }

        let x = parse_value(values[x_idx], "x")?;
        let y = parse_value(values[y_idx], "y")?;
        let z = parse_value(values[z_idx], "z")?;

        if let Some(idx) = columns.packed {
            let is_float = header.types.get(idx).map_or(true, |t| *t == 'F');
            let color = unpack_rgb(values[idx], is_float)?;
            cloud.push_with_color(x, y, z, color);
        } else if let Some([r, g, b]) = columns.split {
            let color = [
                parse_channel(values[r]),
                parse_channel(values[g]),
                parse_channel(values[b]),
            ];
            cloud.push_with_color(x, y, z, color);
        } else {
            cloud.push(x, y, z);
        }
    }

    Ok(cloud)
}

fn read_pcd_binary<R: BufRead>(mut reader: R, header: &PcdHeader) -> Result<PointCloud> {
    let columns = PcdColumns::new(header)?;
    let (offsets, stride) = header.layout()?;
    if stride == 0 {
        return Err(LoaderError::InvalidPcd("zero-sized point record".to_string()));
    }

    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;

    let field = |record: &[u8], idx: usize| -> Result<f64> {
        let size = header.sizes[idx];
        let raw = &record[offsets[idx]..offsets[idx] + size];
        decode_scalar(raw, header.types[idx]).ok_or_else(|| {
            LoaderError::InvalidPcd(format!(
                "unsupported field {} of type {}{}",
                header.fields[idx], header.types[idx], size
            ))
        })
    };

    let mut cloud = columns.empty_cloud(header.points);
    for record in bytes.chunks_exact(stride).take(header.points) {
        let [x_idx, y_idx, z_idx] = columns.xyz;
        let (x, y, z) = (field(record, x_idx)?, field(record, y_idx)?, field(record, z_idx)?);

        if let Some(idx) = columns.packed {
            let raw = &record[offsets[idx]..offsets[idx] + header.sizes[idx]];
            let bits = <[u8; 4]>::try_from(&raw[..raw.len().min(4)])
                .map(u32::from_le_bytes)
                .map_err(|_| LoaderError::InvalidPcd("rgb field must be 4 bytes".to_string()))?;
            cloud.push_with_color(x, y, z, split_packed(bits));
        } else if let Some([r, g, b]) = columns.split {
            let is_float = header.types[r] == 'F';
            let color = [
                color_channel(field(record, r)?, is_float),
                color_channel(field(record, g)?, is_float),
                color_channel(field(record, b)?, is_float),
            ];
            cloud.push_with_color(x, y, z, color);
        } else {
            cloud.push(x, y, z);
        }
    }

    Ok(cloud)
}

/// Decodes one little-endian PCD scalar of the given type letter.
fn decode_scalar(raw: &[u8], ty: char) -> Option<f64> {
    let value = match (ty, raw.len()) {
        ('F', 4) => f64::from(f32::from_le_bytes(raw.try_into().ok()?)),
        ('F', 8) => f64::from_le_bytes(raw.try_into().ok()?),
        ('U', 1) => f64::from(raw[0]),
        ('U', 2) => f64::from(u16::from_le_bytes(raw.try_into().ok()?)),
        ('U', 4) => f64::from(u32::from_le_bytes(raw.try_into().ok()?)),
        ('I', 1) => f64::from(raw[0] as i8),
        ('I', 2) => f64::from(i16::from_le_bytes(raw.try_into().ok()?)),
        ('I', 4) => f64::from(i32::from_le_bytes(raw.try_into().ok()?)),
        _ => return None,
    };
    Some(value)
}

fn parse_value(raw: &str, name: &str) -> Result<f64> {
    raw.parse()
        .map_err(|_| LoaderError::ParseError(format!("Invalid {} value: {}", name, raw)))
}

/// Maps a color channel to a byte. Float channels in [0, 1] are scaled,
/// anything else is taken as a byte value.
fn color_channel(v: f64, is_float: bool) -> u8 {
    if is_float && v <= 1.0 {
        (v.clamp(0.0, 1.0) * 255.0).round() as u8
    } else {
        v.clamp(0.0, 255.0) as u8
    }
}

/// Parses a color channel written either as a byte or as a float in [0, 1].
fn parse_channel(raw: &str) -> u8 {
    if let Ok(v) = raw.parse::<u8>() {
        return v;
    }
    raw.parse::<f64>()
        .map(|v| color_channel(v, true))
        .unwrap_or(DEFAULT_COLOR[0])
}

fn split_packed(bits: u32) -> [u8; 3] {
    [
        ((bits >> 16) & 0xff) as u8,
        ((bits >> 8) & 0xff) as u8,
        (bits & 0xff) as u8,
    ]
}

/// Decodes a PCL packed color (0x00RRGGBB), stored as float bits or as an
/// unsigned integer.
fn unpack_rgb(raw: &str, is_float: bool) -> Result<[u8; 3]> {
    let bits = if is_float {
        raw.parse::<f32>()
            .map_err(|_| LoaderError::ParseError(format!("Invalid rgb value: {}", raw)))?
            .to_bits()
    } else {
        raw.parse::<u32>()
            .map_err(|_| LoaderError::ParseError(format!("Invalid rgb value: {}", raw)))?
    };
    Ok(split_packed(bits))
}
