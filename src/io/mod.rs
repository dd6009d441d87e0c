//! Readers and writers of the coarse mesh (`.sma`, `.smb`) and point stream (`.spa`, `.spb`)
//! formats.
//!
//! The finalizer only talks to the [`MeshWriter`] and [`PointWriter`] capability sets, the
//! concrete codecs live in the submodules. Readers turn the first malformed record into an
//! error and report [`MeshElement::Eof`] / [`PointEvent::Eof`] ever after.

use core::{fmt, str::FromStr};
use std::{
    fs::File,
    io::{self, BufRead, BufReader, BufWriter, Read},
    path::Path,
};

use anyhow::{anyhow, Context, Ok as HowOk, Result as HowResult};

use crate::utils::types::Vertex3;

pub mod sma;
pub mod smb;
pub mod spa;
pub mod spb;

pub use sma::{SmaReader, SmaWriter};
pub use smb::{SmbReader, SmbWriter};
pub use spa::{SpaReader, SpaWriter};
pub use spb::{SpbReader, SpbWriter};

/// Axis aligned bounding box, empty when `min > max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Vertex3,
    pub max: Vertex3,
}

impl BoundingBox {
    pub const fn new(min: Vertex3, max: Vertex3) -> Self {
        Self { min, max }
    }

    pub const fn empty() -> Self {
        Self {
            min: [f64::INFINITY; 3],
            max: [f64::NEG_INFINITY; 3],
        }
    }

    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Vertex3>) -> Self {
        let mut bb = Self::empty();
        for p in points {
            bb.include(p);
        }
        bb
    }

    /// Grow the box so that it contains `p`.
    pub fn include(&mut self, p: &Vertex3) {
        for axis in 0..3 {
            self.min[axis] = self.min[axis].min(p[axis]);
            self.max[axis] = self.max[axis].max(p[axis]);
        }
    }

    pub fn is_empty(&self) -> bool {
        (0..3).any(|axis| self.min[axis] > self.max[axis])
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::empty()
    }
}

/// Coordinate type of the point records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Datatype {
    #[default]
    Float,
    Int,
    Double,
}

impl Datatype {
    pub const fn code(self) -> u8 {
        match self {
            Datatype::Float => 0,
            Datatype::Int => 1,
            Datatype::Double => 2,
        }
    }

    pub fn from_code(code: u8) -> HowResult<Self> {
        match code {
            0 => HowOk(Datatype::Float),
            1 => HowOk(Datatype::Int),
            2 => HowOk(Datatype::Double),
            _ => Err(anyhow!("Unknown datatype code {code}")),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Datatype::Float => "float",
            Datatype::Int => "int",
            Datatype::Double => "double",
        }
    }

    /// Size of one coordinate in the binary format.
    pub const fn coord_size(self) -> usize {
        match self {
            Datatype::Float | Datatype::Int => 4,
            Datatype::Double => 8,
        }
    }

    /// Round a coordinate to the precision of the datatype.
    ///
    /// Fails for an `Int` coordinate that is not finite or does not fit into an `i32`.
    pub fn quantize(self, value: f64) -> HowResult<f64> {
        match self {
            Datatype::Float => HowOk(f64::from(value as f32)),
            Datatype::Int => {
                let rounded = value.round();
                if rounded.is_finite()
                    && rounded >= f64::from(i32::MIN)
                    && rounded <= f64::from(i32::MAX)
                {
                    HowOk(rounded)
                } else {
                    Err(anyhow!("Coordinate {value} can't be stored as int"))
                }
            }
            Datatype::Double => HowOk(value),
        }
    }

    /// Quantize the first `dimension` coordinates of a point record.
    pub(crate) fn quantize_point(self, p: &Vertex3, dimension: usize) -> HowResult<Vertex3> {
        let mut quantized = [0.0; 3];
        for (q, coord) in quantized.iter_mut().zip(&p[..dimension]) {
            *q = self.quantize(*coord)?;
        }
        HowOk(quantized)
    }
}

impl FromStr for Datatype {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "float" => HowOk(Datatype::Float),
            "int" => HowOk(Datatype::Int),
            "double" => HowOk(Datatype::Double),
            _ => Err(anyhow!("Unknown datatype '{s}'")),
        }
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Finalization scheme a point stream declares for its cell markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FinalizeMethod {
    #[default]
    None,
    QuadTree,
    OctTree,
    Clarkson2d,
    Clarkson3d,
}

impl FinalizeMethod {
    pub const fn code(self) -> u8 {
        match self {
            FinalizeMethod::None => 0,
            FinalizeMethod::QuadTree => 1,
            FinalizeMethod::OctTree => 2,
            FinalizeMethod::Clarkson2d => 3,
            FinalizeMethod::Clarkson3d => 4,
        }
    }

    pub fn from_code(code: u8) -> HowResult<Self> {
        match code {
            0 => HowOk(FinalizeMethod::None),
            1 => HowOk(FinalizeMethod::QuadTree),
            2 => HowOk(FinalizeMethod::OctTree),
            3 => HowOk(FinalizeMethod::Clarkson2d),
            4 => HowOk(FinalizeMethod::Clarkson3d),
            _ => Err(anyhow!("Unknown finalization method code {code}")),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            FinalizeMethod::None => "none",
            FinalizeMethod::QuadTree => "quadtree",
            FinalizeMethod::OctTree => "octtree",
            FinalizeMethod::Clarkson2d => "clarkson2d",
            FinalizeMethod::Clarkson3d => "clarkson3d",
        }
    }
}

impl FromStr for FinalizeMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => HowOk(FinalizeMethod::None),
            "quadtree" => HowOk(FinalizeMethod::QuadTree),
            "octtree" => HowOk(FinalizeMethod::OctTree),
            "clarkson2d" => HowOk(FinalizeMethod::Clarkson2d),
            "clarkson3d" => HowOk(FinalizeMethod::Clarkson3d),
            _ => Err(anyhow!("Unknown finalization method '{s}'")),
        }
    }
}

impl fmt::Display for FinalizeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Declared properties of a coarse mesh, `None` counts are unknown.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshHeader {
    pub nverts: Option<usize>,
    pub nfaces: Option<usize>,
    pub bounding_box: BoundingBox,
}

/// Declared properties of a point stream, `None` counts are unknown.
#[derive(Debug, Clone, PartialEq)]
pub struct PointHeader {
    pub npoints: Option<usize>,
    pub datatype: Datatype,
    /// Number of coordinates per point record, 2 or 3.
    pub dimension: usize,
    pub method: FinalizeMethod,
    pub bounding_box: BoundingBox,
}

impl Default for PointHeader {
    fn default() -> Self {
        Self {
            npoints: None,
            datatype: Datatype::default(),
            dimension: 3,
            method: FinalizeMethod::default(),
            bounding_box: BoundingBox::empty(),
        }
    }
}

pub(crate) fn check_dimension(dimension: usize) -> HowResult<usize> {
    match dimension {
        2 | 3 => HowOk(dimension),
        _ => Err(anyhow!("Unsupported dimension {dimension}, expected 2 or 3")),
    }
}

/// One record of a coarse mesh file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MeshElement {
    Vertex(Vertex3),
    Triangle([u32; 3]),
    Eof,
}

/// One record of a point stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointEvent {
    Point(Vertex3),
    FinalizedCell(u32),
    Eof,
}

/// Sink for a coarse mesh: all vertices, then all triangles.
pub trait MeshWriter {
    fn set_vertex_count(&mut self, nverts: usize);
    fn set_face_count(&mut self, nfaces: usize);
    fn set_bounding_box(&mut self, bb: &BoundingBox);
    fn write_vertex(&mut self, v: &Vertex3) -> HowResult<()>;
    fn write_triangle(&mut self, tri: &[u32; 3]) -> HowResult<()>;
    fn close(&mut self) -> HowResult<()>;
    /// Vertices written so far.
    fn nverts(&self) -> usize;
    /// Triangles written so far.
    fn nfaces(&self) -> usize;
}

/// Sink for a point stream: a header, then interleaved points and finalized cell markers.
pub trait PointWriter {
    fn set_point_count(&mut self, npoints: usize);
    fn set_bounding_box(&mut self, bb: &BoundingBox);
    fn set_datatype(&mut self, datatype: Datatype);
    fn set_dimension(&mut self, dimension: usize) -> HowResult<()>;
    fn set_finalization_method(&mut self, method: FinalizeMethod);
    fn write_header(&mut self) -> HowResult<()>;
    /// Write a point, only the first `dimension` coordinates are stored.
    fn write_point(&mut self, p: &Vertex3) -> HowResult<()>;
    fn write_finalize_cell(&mut self, id: u32) -> HowResult<()>;
    fn close(&mut self) -> HowResult<()>;
    /// Points written so far.
    fn npoints(&self) -> usize;
    /// Finalized cell markers written so far.
    fn nfinalized(&self) -> usize;
}

pub trait MeshReader {
    fn header(&self) -> &MeshHeader;
    fn read_element(&mut self) -> HowResult<MeshElement>;
    /// The last vertex read.
    fn vertex(&self) -> Option<&Vertex3>;
    /// The last triangle read.
    fn triangle(&self) -> Option<&[u32; 3]>;
    /// Vertices read so far.
    fn nverts(&self) -> usize;
    /// Triangles read so far.
    fn nfaces(&self) -> usize;

    /// Header counts that differ from the elements read. Complete once `Eof` is returned.
    fn count_mismatches(&self) -> Vec<CountMismatch> {
        let header = self.header();
        [
            CountMismatch::check("vertices", header.nverts, self.nverts()),
            CountMismatch::check("faces", header.nfaces, self.nfaces()),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

pub trait PointReader {
    fn header(&self) -> &PointHeader;
    fn read_event(&mut self) -> HowResult<PointEvent>;
    /// The last point read.
    fn point(&self) -> Option<&Vertex3>;
    /// The id of the last finalized cell read.
    fn final_idx(&self) -> Option<u32>;
    /// Points read so far.
    fn npoints(&self) -> usize;
    /// Finalized cell markers read so far.
    fn nfinalized(&self) -> usize;

    /// Header counts that differ from the points read. Complete once `Eof` is returned.
    fn count_mismatches(&self) -> Vec<CountMismatch> {
        CountMismatch::check("points", self.header().npoints, self.npoints())
            .into_iter()
            .collect()
    }

    /// Fail unless the stream declares one of the `supported` finalization methods.
    ///
    /// Must be called before the first event is read.
    fn require_method(&self, supported: &[FinalizeMethod]) -> HowResult<()> {
        if self.npoints() + self.nfinalized() > 0 {
            return Err(anyhow!(
                "The finalization method must be checked before reading events"
            ));
        }

        let method = self.header().method;
        if supported.contains(&method) {
            HowOk(())
        } else {
            Err(anyhow!("Unsupported finalization method '{method}'"))
        }
    }
}

impl<T: MeshWriter + ?Sized> MeshWriter for Box<T> {
    fn set_vertex_count(&mut self, nverts: usize) {
        (**self).set_vertex_count(nverts);
    }

    fn set_face_count(&mut self, nfaces: usize) {
        (**self).set_face_count(nfaces);
    }

    fn set_bounding_box(&mut self, bb: &BoundingBox) {
        (**self).set_bounding_box(bb);
    }

    fn write_vertex(&mut self, v: &Vertex3) -> HowResult<()> {
        (**self).write_vertex(v)
    }

    fn write_triangle(&mut self, tri: &[u32; 3]) -> HowResult<()> {
        (**self).write_triangle(tri)
    }

    fn close(&mut self) -> HowResult<()> {
        (**self).close()
    }

    fn nverts(&self) -> usize {
        (**self).nverts()
    }

    fn nfaces(&self) -> usize {
        (**self).nfaces()
    }
}

impl<T: PointWriter + ?Sized> PointWriter for Box<T> {
    fn set_point_count(&mut self, npoints: usize) {
        (**self).set_point_count(npoints);
    }

    fn set_bounding_box(&mut self, bb: &BoundingBox) {
        (**self).set_bounding_box(bb);
    }

    fn set_datatype(&mut self, datatype: Datatype) {
        (**self).set_datatype(datatype);
    }

    fn set_dimension(&mut self, dimension: usize) -> HowResult<()> {
        (**self).set_dimension(dimension)
    }

    fn set_finalization_method(&mut self, method: FinalizeMethod) {
        (**self).set_finalization_method(method);
    }

    fn write_header(&mut self) -> HowResult<()> {
        (**self).write_header()
    }

    fn write_point(&mut self, p: &Vertex3) -> HowResult<()> {
        (**self).write_point(p)
    }

    fn write_finalize_cell(&mut self, id: u32) -> HowResult<()> {
        (**self).write_finalize_cell(id)
    }

    fn close(&mut self) -> HowResult<()> {
        (**self).close()
    }

    fn npoints(&self) -> usize {
        (**self).npoints()
    }

    fn nfinalized(&self) -> usize {
        (**self).nfinalized()
    }
}

/// The two encodings of a coarse mesh file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshFormat {
    Sma,
    Smb,
}

/// The two encodings of a point stream file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointFormat {
    Spa,
    Spb,
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

impl MeshFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match extension(path)?.as_str() {
            "sma" => Some(MeshFormat::Sma),
            "smb" => Some(MeshFormat::Smb),
            _ => None,
        }
    }
}

impl PointFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match extension(path)?.as_str() {
            "spa" => Some(PointFormat::Spa),
            "spb" => Some(PointFormat::Spb),
            _ => None,
        }
    }
}

pub fn create_mesh_writer(path: &Path, format: MeshFormat) -> HowResult<Box<dyn MeshWriter>> {
    let file = File::create(path).with_context(|| format!("Can't create {}", path.display()))?;
    let out = BufWriter::new(file);

    let writer: Box<dyn MeshWriter> = match format {
        MeshFormat::Sma => Box::new(SmaWriter::new(out)),
        MeshFormat::Smb => Box::new(SmbWriter::new(out)),
    };
    HowOk(writer)
}

pub fn create_point_writer(path: &Path, format: PointFormat) -> HowResult<Box<dyn PointWriter>> {
    let file = File::create(path).with_context(|| format!("Can't create {}", path.display()))?;
    let out = BufWriter::new(file);

    let writer: Box<dyn PointWriter> = match format {
        PointFormat::Spa => Box::new(SpaWriter::new(out)),
        PointFormat::Spb => Box::new(SpbWriter::new(out)),
    };
    HowOk(writer)
}

pub fn open_mesh_reader(path: &Path, format: MeshFormat) -> HowResult<Box<dyn MeshReader>> {
    let file = File::open(path).with_context(|| format!("Can't open {}", path.display()))?;
    let input = BufReader::new(file);

    let reader: Box<dyn MeshReader> = match format {
        MeshFormat::Sma => Box::new(SmaReader::new(input)?),
        MeshFormat::Smb => Box::new(SmbReader::new(input)?),
    };
    HowOk(reader)
}

pub fn open_point_reader(path: &Path, format: PointFormat) -> HowResult<Box<dyn PointReader>> {
    let file = File::open(path).with_context(|| format!("Can't open {}", path.display()))?;
    let input = BufReader::new(file);

    let reader: Box<dyn PointReader> = match format {
        PointFormat::Spa => Box::new(SpaReader::new(input)?),
        PointFormat::Spb => Box::new(SpbReader::new(input)?),
    };
    HowOk(reader)
}

// Little endian helpers shared by the binary codecs.

fn read_array<const N: usize>(input: &mut impl Read) -> io::Result<[u8; N]> {
    let mut buf = [0u8; N];
    input.read_exact(&mut buf)?;
    Ok(buf)
}

pub(crate) fn read_u8(input: &mut impl Read) -> io::Result<u8> {
    read_array::<1>(input).map(|[b]| b)
}

pub(crate) fn read_u32(input: &mut impl Read) -> io::Result<u32> {
    read_array(input).map(u32::from_le_bytes)
}

pub(crate) fn read_i32(input: &mut impl Read) -> io::Result<i32> {
    read_array(input).map(i32::from_le_bytes)
}

pub(crate) fn read_f32(input: &mut impl Read) -> io::Result<f32> {
    read_array(input).map(f32::from_le_bytes)
}

pub(crate) fn read_f64(input: &mut impl Read) -> io::Result<f64> {
    read_array(input).map(f64::from_le_bytes)
}

/// Read a record tag, `None` at a clean end of the input.
pub(crate) fn read_tag(input: &mut impl Read) -> io::Result<Option<u8>> {
    let mut tag = [0u8; 1];
    loop {
        match input.read(&mut tag) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(tag[0])),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
}

/// Encode an optional count, `u32::MAX` marks an unknown one.
pub(crate) fn encode_count(count: Option<usize>) -> HowResult<u32> {
    match count {
        Some(n) => u32::try_from(n)
            .ok()
            .filter(|&n| n != u32::MAX)
            .ok_or_else(|| anyhow!("Count {n} does not fit the binary header")),
        None => HowOk(u32::MAX),
    }
}

pub(crate) fn decode_count(count: u32) -> Option<usize> {
    (count != u32::MAX).then_some(count as usize)
}

/// Parse the whitespace separated numbers following a record keyword.
pub(crate) fn parse_values<T: FromStr, S: AsRef<str>>(
    fields: &[S],
    expected: usize,
) -> HowResult<Vec<T>> {
    if fields.len() != expected {
        return Err(anyhow!(
            "Expected {expected} values but found {}",
            fields.len()
        ));
    }

    fields
        .iter()
        .map(|field| {
            let field = field.as_ref();
            field
                .parse::<T>()
                .map_err(|_| anyhow!("Can't parse value '{field}'"))
        })
        .collect()
}

/// A count declared in a header that differs from the observed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountMismatch {
    pub what: &'static str,
    pub declared: usize,
    pub found: usize,
}

impl CountMismatch {
    fn check(what: &'static str, declared: Option<usize>, found: usize) -> Option<Self> {
        declared
            .filter(|&declared| declared != found)
            .map(|declared| Self {
                what,
                declared,
                found,
            })
    }
}

impl fmt::Display for CountMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Declared {} {} but found {}",
            self.declared, self.what, self.found
        )
    }
}

/// Warn when a declared count differs from the observed one.
pub(crate) fn warn_count_mismatch(what: &'static str, declared: Option<usize>, actual: usize) {
    if let Some(mismatch) = CountMismatch::check(what, declared, actual) {
        log::warn!("{mismatch}");
    }
}

/// Line oriented input of the ASCII codecs.
pub(crate) struct AsciiInput<R> {
    input: R,
    line_no: usize,
    pending: Option<String>,
}

impl<R: BufRead> AsciiInput<R> {
    pub(crate) const fn new(input: R) -> Self {
        Self {
            input,
            line_no: 0,
            pending: None,
        }
    }

    pub(crate) const fn line_no(&self) -> usize {
        self.line_no
    }

    /// The next non-blank line, trimmed.
    fn next_line(&mut self) -> HowResult<Option<String>> {
        if let Some(line) = self.pending.take() {
            return HowOk(Some(line));
        }

        let mut line = String::new();
        loop {
            line.clear();
            if self.input.read_line(&mut line)? == 0 {
                return HowOk(None);
            }
            self.line_no += 1;

            let trimmed = line.trim();
            if !trimmed.is_empty() {
                return HowOk(Some(trimmed.to_owned()));
            }
        }
    }

    /// Consume the leading `#` lines, handing keyword and values of each to `on_field`.
    pub(crate) fn read_header(
        &mut self,
        mut on_field: impl FnMut(&str, &[&str]) -> HowResult<()>,
    ) -> HowResult<()> {
        while let Some(line) = self.next_line()? {
            if !line.starts_with('#') {
                self.pending = Some(line);
                break;
            }

            let fields: Vec<&str> = line[1..].split_whitespace().collect();
            if let Some((key, values)) = fields.split_first() {
                let line_no = self.line_no;
                on_field(key, values).with_context(|| format!("Invalid header line {line_no}"))?;
            }
        }

        HowOk(())
    }

    /// The next record line split into its fields, `None` at the end of the input.
    pub(crate) fn next_record(&mut self) -> HowResult<Option<Vec<String>>> {
        while let Some(line) = self.next_line()? {
            if line.starts_with('#') {
                continue;
            }

            return HowOk(Some(line.split_whitespace().map(str::to_owned).collect()));
        }

        HowOk(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounding_box() {
        let bb = BoundingBox::from_points(&[[0.0, 1.0, 2.0], [-1.0, 3.0, 0.5]]);
        assert_eq!(bb.min, [-1.0, 1.0, 0.5]);
        assert_eq!(bb.max, [0.0, 3.0, 2.0]);

        assert!(BoundingBox::empty().is_empty());
        assert!(!bb.is_empty());
    }

    #[test]
    fn test_names_and_codes() {
        for method in [
            FinalizeMethod::None,
            FinalizeMethod::QuadTree,
            FinalizeMethod::OctTree,
            FinalizeMethod::Clarkson2d,
            FinalizeMethod::Clarkson3d,
        ] {
            assert_eq!(method.name().parse::<FinalizeMethod>().unwrap(), method);
            assert_eq!(FinalizeMethod::from_code(method.code()).unwrap(), method);
        }
        assert!(FinalizeMethod::from_code(5).is_err());
        assert!("clarkson".parse::<FinalizeMethod>().is_err());

        assert_eq!("int".parse::<Datatype>().unwrap(), Datatype::Int);
        assert!(Datatype::from_code(3).is_err());
        assert_eq!(Datatype::Int.quantize(2.6).unwrap(), 3.0);
        assert_eq!(Datatype::Int.quantize(-2_147_483_648.2).unwrap(), -2_147_483_648.0);
        assert!(Datatype::Int.quantize(3.0e9).is_err());
        assert!(Datatype::Int.quantize(f64::NAN).is_err());
        assert!(Datatype::Int.quantize(f64::NEG_INFINITY).is_err());
        assert!(Datatype::Double.quantize(f64::NAN).unwrap().is_nan());
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            MeshFormat::from_path(Path::new("coarse.SMB")),
            Some(MeshFormat::Smb)
        );
        assert_eq!(
            PointFormat::from_path(Path::new("dir/points.spa")),
            Some(PointFormat::Spa)
        );
        assert_eq!(PointFormat::from_path(Path::new("points")), None);
    }

    #[test]
    fn test_counts() {
        assert_eq!(encode_count(None).unwrap(), u32::MAX);
        assert_eq!(decode_count(encode_count(Some(12)).unwrap()), Some(12));
        assert!(encode_count(Some(u32::MAX as usize)).is_err());
    }
}
