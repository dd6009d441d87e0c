//! ASCII point stream format.
//!
//! ```text
//! # npoints 2
//! # datatype double
//! # dimension 2
//! # finalize clarkson2d
//! # bb_min 0 0 0
//! # bb_max 1 1 0
//! v 0 0
//! v 1 1
//! x 0
//! ```

use std::io::{BufRead, Write};

use anyhow::{anyhow, Context, Ok as HowOk, Result as HowResult};

use super::{
    check_dimension, parse_values, warn_count_mismatch, AsciiInput, BoundingBox, Datatype,
    FinalizeMethod, PointEvent, PointHeader, PointReader, PointWriter,
};
use crate::utils::types::Vertex3;

pub struct SpaWriter<W: Write> {
    out: W,
    header: PointHeader,
    header_written: bool,
    closed: bool,
    npoints: usize,
    nfinalized: usize,
}

impl<W: Write> SpaWriter<W> {
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

impl<W: Write> PointWriter for SpaWriter<W> {
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
        if let Some(npoints) = header.npoints {
            writeln!(self.out, "# npoints {npoints}")?;
        }
        writeln!(self.out, "# datatype {}", header.datatype)?;
        writeln!(self.out, "# dimension {}", header.dimension)?;
        writeln!(self.out, "# finalize {}", header.method)?;

        let bb = header.bounding_box;
        if !bb.is_empty() {
            writeln!(self.out, "# bb_min {} {} {}", bb.min[0], bb.min[1], bb.min[2])?;
            writeln!(self.out, "# bb_max {} {} {}", bb.max[0], bb.max[1], bb.max[2])?;
        }

        self.header_written = true;
        HowOk(())
    }

    fn write_point(&mut self, p: &Vertex3) -> HowResult<()> {
        self.check_writable()?;

        let dimension = self.header.dimension;
        let quantized = self.header.datatype.quantize_point(p, dimension)?;

        write!(self.out, "v")?;
        for coord in &quantized[..dimension] {
            match self.header.datatype {
                Datatype::Float => write!(self.out, " {}", *coord as f32)?,
                Datatype::Int => write!(self.out, " {}", *coord as i32)?,
                Datatype::Double => write!(self.out, " {coord}")?,
            }
        }
        writeln!(self.out)?;

        self.npoints += 1;
        HowOk(())
    }

    fn write_finalize_cell(&mut self, id: u32) -> HowResult<()> {
        self.check_writable()?;

        writeln!(self.out, "x {id}")?;
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

pub struct SpaReader<R: BufRead> {
    input: AsciiInput<R>,
    header: PointHeader,
    done: bool,
    point: Option<Vertex3>,
    final_idx: Option<u32>,
    npoints: usize,
    nfinalized: usize,
}

impl<R: BufRead> SpaReader<R> {
    /// Open a point stream, reading its header.
    pub fn new(input: R) -> HowResult<Self> {
        let mut input = AsciiInput::new(input);
        let mut header = PointHeader::default();

        input.read_header(|key, values| {
            match key {
                "npoints" => header.npoints = Some(parse_values::<usize, _>(values, 1)?[0]),
                "datatype" => header.datatype = parse_values::<Datatype, _>(values, 1)?[0],
                "dimension" => {
                    header.dimension = check_dimension(parse_values::<usize, _>(values, 1)?[0])?;
                }
                "finalize" => header.method = parse_values::<FinalizeMethod, _>(values, 1)?[0],
                "bb_min" => {
                    let min = parse_values::<f64, _>(values, 3)?;
                    header.bounding_box.min = [min[0], min[1], min[2]];
                }
                "bb_max" => {
                    let max = parse_values::<f64, _>(values, 3)?;
                    header.bounding_box.max = [max[0], max[1], max[2]];
                }
                _ => {} // comment
            }
            HowOk(())
        })?;

        HowOk(Self {
            input,
            header,
            done: false,
            point: None,
            final_idx: None,
            npoints: 0,
            nfinalized: 0,
        })
    }

    fn parse_event(&mut self) -> HowResult<PointEvent> {
        let Some(fields) = self.input.next_record()? else {
            return HowOk(PointEvent::Eof);
        };

        let dimension = self.header.dimension;
        match fields[0].as_str() {
            "v" => {
                let coords: Vec<f64> = match self.header.datatype {
                    Datatype::Int => parse_values::<i32, _>(&fields[1..], dimension)?
                        .into_iter()
                        .map(f64::from)
                        .collect(),
                    Datatype::Float | Datatype::Double => {
                        parse_values::<f64, _>(&fields[1..], dimension)?
                    }
                };

                let mut p = [0.0; 3];
                p[..dimension].copy_from_slice(&coords);

                self.point = Some(p);
                self.npoints += 1;
                HowOk(PointEvent::Point(p))
            }
            "x" => {
                let id = parse_values::<u32, _>(&fields[1..], 1)?[0];

                self.final_idx = Some(id);
                self.nfinalized += 1;
                HowOk(PointEvent::FinalizedCell(id))
            }
            other => Err(anyhow!("Unknown record '{other}'")),
        }
    }
}

impl<R: BufRead> PointReader for SpaReader<R> {
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

        let line_no = self.input.line_no();
        event.with_context(|| format!("Malformed point record in line {line_no}"))
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

    #[test]
    fn test_ascii_round_trip() {
        let mut writer = SpaWriter::new(Vec::new());
        writer.set_point_count(3);
        writer.set_datatype(Datatype::Double);
        writer.set_dimension(2).unwrap();
        writer.set_finalization_method(FinalizeMethod::Clarkson2d);
        writer.set_bounding_box(&BoundingBox::new([-1.0, 0.0, 0.0], [2.5, 1.0, 0.0]));
        writer.write_header().unwrap();

        writer.write_point(&[0.1, 0.2, 9.0]).unwrap();
        writer.write_point(&[-1.0, 1.0, 9.0]).unwrap();
        writer.write_finalize_cell(4).unwrap();
        writer.write_point(&[2.5, 0.0, 9.0]).unwrap();
        writer.write_finalize_cell(0).unwrap();
        writer.close().unwrap();
        assert_eq!((writer.npoints(), writer.nfinalized()), (3, 2));

        let bytes = writer.into_inner();
        let mut reader = SpaReader::new(bytes.as_slice()).unwrap();
        let header = reader.header().clone();
        assert_eq!(header.npoints, Some(3));
        assert_eq!(header.dimension, 2);
        assert_eq!(header.method, FinalizeMethod::Clarkson2d);
        assert_eq!(header.bounding_box.min, [-1.0, 0.0, 0.0]);
        reader.require_method(&[FinalizeMethod::Clarkson2d]).unwrap();

        // the dropped z reads back as zero
        assert_eq!(reader.read_event().unwrap(), PointEvent::Point([0.1, 0.2, 0.0]));
        assert_eq!(reader.read_event().unwrap(), PointEvent::Point([-1.0, 1.0, 0.0]));
        assert_eq!(reader.read_event().unwrap(), PointEvent::FinalizedCell(4));
        assert_eq!(reader.final_idx(), Some(4));
        assert_eq!(reader.read_event().unwrap(), PointEvent::Point([2.5, 0.0, 0.0]));
        assert_eq!(reader.read_event().unwrap(), PointEvent::FinalizedCell(0));
        assert_eq!(reader.read_event().unwrap(), PointEvent::Eof);
        assert_eq!((reader.npoints(), reader.nfinalized()), (3, 2));
    }

    #[test]
    fn test_int_points() {
        let mut writer = SpaWriter::new(Vec::new());
        writer.set_datatype(Datatype::Int);
        writer.write_header().unwrap();
        writer.write_point(&[1.4, -2.6, 3.0]).unwrap();
        writer.close().unwrap();

        let bytes = writer.into_inner();
        let mut reader = SpaReader::new(bytes.as_slice()).unwrap();
        assert_eq!(reader.header().datatype, Datatype::Int);
        assert_eq!(reader.read_event().unwrap(), PointEvent::Point([1.0, -3.0, 3.0]));
        assert_eq!(reader.point(), Some(&[1.0, -3.0, 3.0]));
    }

    #[test]
    fn test_int_points_out_of_range() {
        let mut writer = SpaWriter::new(Vec::new());
        writer.set_datatype(Datatype::Int);
        writer.write_header().unwrap();
        assert!(writer.write_point(&[1.0, -2.2e10, 0.0]).is_err());
        assert!(writer.write_point(&[1.0, 2.0, f64::NAN]).is_err());
        writer.write_point(&[2_147_483_647.0, -2_147_483_648.0, 0.4]).unwrap();
        writer.close().unwrap();

        let bytes = writer.into_inner();
        let mut reader = SpaReader::new(bytes.as_slice()).unwrap();
        assert_eq!(
            reader.read_event().unwrap(),
            PointEvent::Point([2_147_483_647.0, -2_147_483_648.0, 0.0])
        );
        assert_eq!(reader.read_event().unwrap(), PointEvent::Eof);
        assert_eq!(reader.npoints(), 1);
    }

    #[test]
    fn test_records_need_a_header() {
        let mut writer = SpaWriter::new(Vec::new());
        assert!(writer.write_point(&[0.0; 3]).is_err());
        assert!(writer.write_finalize_cell(0).is_err());
        assert!(writer.set_dimension(4).is_err());

        writer.write_header().unwrap();
        assert!(writer.write_header().is_err());
    }

    #[test]
    fn test_unsupported_method() {
        let text = "# finalize quadtree\nv 0 0 0\n";
        let mut reader = SpaReader::new(text.as_bytes()).unwrap();

        assert!(reader
            .require_method(&[FinalizeMethod::Clarkson2d, FinalizeMethod::None])
            .is_err());
        assert_eq!(reader.npoints(), 0);

        // once events are consumed the check is refused
        reader.read_event().unwrap();
        assert!(reader.require_method(&[FinalizeMethod::QuadTree]).is_err());
    }

    #[test]
    fn test_declared_point_count_is_checked() {
        let text = "# npoints 4\nv 0 0 0\nx 3\nv 1 1 1\n";
        let mut reader = SpaReader::new(text.as_bytes()).unwrap();
        while reader.read_event().unwrap() != PointEvent::Eof {}

        let mismatches = reader.count_mismatches();
        assert_eq!(mismatches.len(), 1);
        assert_eq!((mismatches[0].declared, mismatches[0].found), (4, 2));
        assert_eq!(mismatches[0].to_string(), "Declared 4 points but found 2");
    }

    #[test]
    fn test_malformed_record() {
        let text = "# dimension 2\nv 0 0\nx abc\nv 1 1\n";
        let mut reader = SpaReader::new(text.as_bytes()).unwrap();

        assert!(matches!(reader.read_event(), Ok(PointEvent::Point(_))));
        assert!(reader.read_event().is_err());
        assert_eq!(reader.read_event().unwrap(), PointEvent::Eof);

        assert!(SpaReader::new("# dimension 5\n".as_bytes()).is_err());
    }
}
