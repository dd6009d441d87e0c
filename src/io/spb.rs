//! Binary point stream format, little endian.
//!
//! Header: magic `SPB1`, `u32` point count (`u32::MAX` if unknown), `u8` datatype, `u8`
//! dimension, `u8` finalization method, one reserved byte and the bounding box as six `f64`.
//! Records start with a tag byte, `0` for a point (`dimension` coordinates of the datatype),
//! `1` for a finalized cell (`u32` id).

use std::io::{Read, Write};

use anyhow::{anyhow, Context, Ok as HowOk, Result as HowResult};

use super::{
    check_dimension, decode_count, encode_count, read_f32, read_f64, read_i32, read_tag,
    read_u32, read_u8, warn_count_mismatch, BoundingBox, Datatype, FinalizeMethod, PointEvent,
    PointHeader, PointReader, PointWriter,
};
use crate::utils::types::Vertex3;

pub const SPB_MAGIC: [u8; 4] = *b"SPB1";

const TAG_POINT: u8 = 0;
const TAG_FINALIZE: u8 = 1;

pub struct SpbWriter<W: Write> {
    out: W,
    header: PointHeader,
    header_written: bool,
    closed: bool,
    npoints: usize,
    nfinalized: usize,
}

impl<W: Write> SpbWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            header: PointHeader::default(),
            header_written: false,
            closed: false,
            npoints: 0,
            nfinalized: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn check_writable(&self) -> HowResult<()> {
        if self.closed {
            Err(anyhow!("Point writer is already closed"))
        } else if !self.header_written {
            Err(anyhow!("The header must be written before any record"))
        } else {
            HowOk(())
        }
    }

    fn warn_late_header(&self, field: &str) -> bool {
        if self.header_written {
            log::warn!("Header already written, ignoring the {field}");
        }
        self.header_written
    }
}

impl<W: Write> PointWriter for SpbWriter<W> {
    fn set_point_count(&mut self, npoints: usize) {
        if !self.warn_late_header("point count") {
            self.header.npoints = Some(npoints);
        }
    }

    fn set_bounding_box(&mut self, bb: &BoundingBox) {
        if !self.warn_late_header("bounding box") {
            self.header.bounding_box = *bb;
        }
    }

    fn set_datatype(&mut self, datatype: Datatype) {
        if !self.warn_late_header("datatype") {
            self.header.datatype = datatype;
        }
    }

    fn set_dimension(&mut self, dimension: usize) -> HowResult<()> {
        let dimension = check_dimension(dimension)?;
        if !self.warn_late_header("dimension") {
            self.header.dimension = dimension;
        }
        HowOk(())
    }

    fn set_finalization_method(&mut self, method: FinalizeMethod) {
        if !self.warn_late_header("finalization method") {
            self.header.method = method;
        }
    }

    fn write_header(&mut self) -> HowResult<()> {
        if self.header_written || self.closed {
            return Err(anyhow!("The header can only be written once"));
        }

        let header = &self.header;
        self.out.write_all(&SPB_MAGIC)?;
        self.out
            .write_all(&encode_count(header.npoints)?.to_le_bytes())?;
        self.out.write_all(&[
            header.datatype.code(),
            header.dimension as u8,
            header.method.code(),
            0,
        ])?;

        let bb = header.bounding_box;
        for value in bb.min.iter().chain(bb.max.iter()) {
            self.out.write_all(&value.to_le_bytes())?;
        }

        self.header_written = true;
        HowOk(())
    }

    fn write_point(&mut self, p: &Vertex3) -> HowResult<()> {
        self.check_writable()?;

        let dimension = self.header.dimension;
        let quantized = self.header.datatype.quantize_point(p, dimension)?;

        self.out.write_all(&[TAG_POINT])?;
        for coord in &quantized[..dimension] {
            match self.header.datatype {
                Datatype::Float => self.out.write_all(&(*coord as f32).to_le_bytes())?,
                Datatype::Int => self.out.write_all(&(*coord as i32).to_le_bytes())?,
                Datatype::Double => self.out.write_all(&coord.to_le_bytes())?,
            }
        }

        self.npoints += 1;
        HowOk(())
    }

    fn write_finalize_cell(&mut self, id: u32) -> HowResult<()> {
        self.check_writable()?;

        self.out.write_all(&[TAG_FINALIZE])?;
        self.out.write_all(&id.to_le_bytes())?;
        self.nfinalized += 1;
        HowOk(())
    }

    fn close(&mut self) -> HowResult<()> {
        if self.closed {
            return HowOk(());
        }
        if !self.header_written {
            self.write_header()?;
        }
        self.out.flush()?;
        self.closed = true;

        warn_count_mismatch("points", self.header.npoints, self.npoints);
        HowOk(())
    }

    fn npoints(&self) -> usize {
        self.npoints
    }

    fn nfinalized(&self) -> usize {
        self.nfinalized
    }
}

pub struct SpbReader<R: Read> {
    input: R,
    header: PointHeader,
    done: bool,
    point: Option<Vertex3>,
    final_idx: Option<u32>,
    npoints: usize,
    nfinalized: usize,
}

impl<R: Read> SpbReader<R> {
    /// Open a point stream, reading its header.
    pub fn new(mut input: R) -> HowResult<Self> {
        let mut magic = [0u8; 4];
        input
            .read_exact(&mut magic)
            .context("Can't read the point stream header")?;
        if magic != SPB_MAGIC {
            return Err(anyhow!("Not a binary point stream, unknown magic {magic:?}"));
        }

        let npoints = decode_count(read_u32(&mut input)?);
        let datatype = Datatype::from_code(read_u8(&mut input)?)?;
        let dimension = check_dimension(read_u8(&mut input)? as usize)?;
        let method = FinalizeMethod::from_code(read_u8(&mut input)?)?;
        let _reserved = read_u8(&mut input)?;

        let mut bb = [0.0; 6];
        for value in bb.iter_mut() {
            *value = read_f64(&mut input)?;
        }

        HowOk(Self {
            input,
            header: PointHeader {
                npoints,
                datatype,
                dimension,
                method,
                bounding_box: BoundingBox::new([bb[0], bb[1], bb[2]], [bb[3], bb[4], bb[5]]),
            },
            done: false,
            point: None,
            final_idx: None,
            npoints: 0,
            nfinalized: 0,
        })
    }

    fn parse_event(&mut self) -> HowResult<PointEvent> {
        match read_tag(&mut self.input)? {
            None => HowOk(PointEvent::Eof),
            Some(TAG_POINT) => {
                let mut p = [0.0; 3];
                for coord in p.iter_mut().take(self.header.dimension) {
                    *coord = match self.header.datatype {
                        Datatype::Float => f64::from(read_f32(&mut self.input)?),
                        Datatype::Int => f64::from(read_i32(&mut self.input)?),
                        Datatype::Double => read_f64(&mut self.input)?,
                    };
                }

                self.point = Some(p);
                self.npoints += 1;
                HowOk(PointEvent::Point(p))
            }
            Some(TAG_FINALIZE) => {
                let id = read_u32(&mut self.input)?;

                self.final_idx = Some(id);
                self.nfinalized += 1;
                HowOk(PointEvent::FinalizedCell(id))
            }
            Some(tag) => Err(anyhow!("Unknown record tag {tag}")),
        }
    }
}

impl<R: Read> PointReader for SpbReader<R> {
    fn header(&self) -> &PointHeader {
        &self.header
    }

    fn read_event(&mut self) -> HowResult<PointEvent> {
        if self.done {
            return HowOk(PointEvent::Eof);
        }

        let event = self.parse_event();
        if !matches!(event, Ok(PointEvent::Point(_) | PointEvent::FinalizedCell(_))) {
            self.done = true;
        }

        let record = self.npoints + self.nfinalized;
        event.with_context(|| format!("Malformed point record after {record} records"))
    }

    fn point(&self) -> Option<&Vertex3> {
        self.point.as_ref()
    }

    fn final_idx(&self) -> Option<u32> {
        self.final_idx
    }

    fn npoints(&self) -> usize {
        self.npoints
    }

    fn nfinalized(&self) -> usize {
        self.nfinalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamtri_test_utils::sample_vertices_3d;

    fn write_stream(points: &[Vertex3], datatype: Datatype, dimension: usize) -> Vec<u8> {
        let mut writer = SpbWriter::new(Vec::new());
        writer.set_point_count(points.len());
        writer.set_datatype(datatype);
        writer.set_dimension(dimension).unwrap();
        writer.set_finalization_method(FinalizeMethod::Clarkson2d);
        writer.set_bounding_box(&BoundingBox::from_points(points));
        writer.write_header().unwrap();

        for (i, p) in points.iter().enumerate() {
            writer.write_point(p).unwrap();
            if i % 10 == 9 {
                writer.write_finalize_cell((i / 10) as u32).unwrap();
            }
        }
        writer.close().unwrap();

        writer.into_inner()
    }

    #[test]
    fn test_binary_round_trip() {
        let points = sample_vertices_3d(500, Some(-1000.0..=1000.0));
        let bytes = write_stream(&points, Datatype::Double, 3);

        let mut reader = SpbReader::new(bytes.as_slice()).unwrap();
        assert_eq!(reader.header().npoints, Some(500));
        assert_eq!(reader.header().method, FinalizeMethod::Clarkson2d);
        assert_eq!(
            reader.header().bounding_box,
            BoundingBox::from_points(&points)
        );

        let mut read_points = Vec::new();
        let mut cells = Vec::new();
        loop {
            match reader.read_event().unwrap() {
                PointEvent::Point(p) => read_points.push(p),
                PointEvent::FinalizedCell(id) => {
                    // every marker follows the ten points it closes
                    assert_eq!(read_points.len(), (id as usize + 1) * 10);
                    cells.push(id);
                }
                PointEvent::Eof => break,
            }
        }

        assert_eq!(read_points, points);
        assert_eq!(cells, (0..50).collect::<Vec<u32>>());
        assert_eq!((reader.npoints(), reader.nfinalized()), (500, 50));
    }

    #[test]
    fn test_float_points_in_2d() {
        let points = vec![[0.5, -0.25, 7.0], [1.0e6, 3.0, 7.0]];
        let bytes = write_stream(&points, Datatype::Float, 2);

        let mut reader = SpbReader::new(bytes.as_slice()).unwrap();
        assert_eq!(reader.read_event().unwrap(), PointEvent::Point([0.5, -0.25, 0.0]));
        assert_eq!(reader.read_event().unwrap(), PointEvent::Point([1.0e6, 3.0, 0.0]));
        assert_eq!(reader.read_event().unwrap(), PointEvent::Eof);
    }

    #[test]
    fn test_int_coordinates_must_fit() {
        let mut writer = SpbWriter::new(Vec::new());
        writer.set_datatype(Datatype::Int);
        writer.set_dimension(2).unwrap();
        writer.write_header().unwrap();

        assert!(writer.write_point(&[3.0e9, 1.0, 0.0]).is_err());
        assert!(writer.write_point(&[1.0, f64::NAN, 0.0]).is_err());
        assert!(writer.write_point(&[f64::INFINITY, 1.0, 0.0]).is_err());
        // z is not written in 2d
        writer.write_point(&[5.2, -7.7, f64::NAN]).unwrap();
        writer.close().unwrap();
        assert_eq!(writer.npoints(), 1);

        // rejected points leave no partial record behind
        let bytes = writer.into_inner();
        let mut reader = SpbReader::new(bytes.as_slice()).unwrap();
        assert_eq!(reader.read_event().unwrap(), PointEvent::Point([5.0, -8.0, 0.0]));
        assert_eq!(reader.read_event().unwrap(), PointEvent::Eof);
    }

    #[test]
    fn test_corrupt_input() {
        let points = sample_vertices_3d(20, None);
        let mut bytes = write_stream(&points, Datatype::Double, 3);

        // overwrite the tag of the third record
        let header_len = 4 + 4 + 4 + 6 * 8;
        let record_len = 1 + 3 * 8;
        bytes[header_len + 2 * record_len] = 7;

        let mut reader = SpbReader::new(bytes.as_slice()).unwrap();
        assert!(matches!(reader.read_event(), Ok(PointEvent::Point(_))));
        assert!(matches!(reader.read_event(), Ok(PointEvent::Point(_))));
        assert!(reader.read_event().is_err());
        assert_eq!(reader.read_event().unwrap(), PointEvent::Eof);
        assert_eq!(reader.read_event().unwrap(), PointEvent::Eof);
        assert_eq!(reader.npoints(), 2);
    }

    #[test]
    fn test_unsupported_method() {
        let mut writer = SpbWriter::new(Vec::new());
        writer.set_finalization_method(FinalizeMethod::OctTree);
        writer.write_header().unwrap();
        writer.write_point(&[1.0, 2.0, 3.0]).unwrap();
        writer.close().unwrap();

        let bytes = writer.into_inner();
        let reader = SpbReader::new(bytes.as_slice()).unwrap();
        assert!(reader.require_method(&[FinalizeMethod::Clarkson2d]).is_err());
        assert!(reader.require_method(&[FinalizeMethod::OctTree]).is_ok());
    }

    #[test]
    fn test_invalid_header() {
        let mut bytes = write_stream(&[[0.0; 3]], Datatype::Double, 3);
        bytes[9] = 4; // dimension

        assert!(SpbReader::new(bytes.as_slice()).is_err());
        assert!(SpbReader::new(&b"SMB1"[..]).is_err());
    }
}
