//! ASCII coarse mesh format.
//!
//! ```text
//! # nverts 3
//! # nfaces 1
//! # bb_min 0 0 0
//! # bb_max 1 1 0
//! v 0 0 0
//! v 1 0 0
//! v 0 1 0
//! f 0 1 2
//! ```

use std::io::{BufRead, Write};

use anyhow::{anyhow, Context, Ok as HowOk, Result as HowResult};

use super::{
    parse_values, warn_count_mismatch, AsciiInput, BoundingBox, MeshElement, MeshHeader,
    MeshReader, MeshWriter,
};
use crate::utils::types::Vertex3;

pub struct SmaWriter<W: Write> {
    out: W,
    header: MeshHeader,
    header_written: bool,
    closed: bool,
    nverts: usize,
    nfaces: usize,
}

impl<W: Write> SmaWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            header: MeshHeader::default(),
            header_written: false,
            closed: false,
            nverts: 0,
            nfaces: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn ensure_header(&mut self) -> HowResult<()> {
        if self.closed {
            return Err(anyhow!("Mesh writer is already closed"));
        }
        if self.header_written {
            return HowOk(());
        }

        if let Some(nverts) = self.header.nverts {
            writeln!(self.out, "# nverts {nverts}")?;
        }
        if let Some(nfaces) = self.header.nfaces {
            writeln!(self.out, "# nfaces {nfaces}")?;
        }

        let bb = self.header.bounding_box;
        if !bb.is_empty() {
            writeln!(self.out, "# bb_min {} {} {}", bb.min[0], bb.min[1], bb.min[2])?;
            writeln!(self.out, "# bb_max {} {} {}", bb.max[0], bb.max[1], bb.max[2])?;
        }

        self.header_written = true;
        HowOk(())
    }

    fn warn_late_header(&self, field: &str) -> bool {
        if self.header_written {
            log::warn!("Header already written, ignoring the {field}");
        }
        self.header_written
    }
}

impl<W: Write> MeshWriter for SmaWriter<W> {
    fn set_vertex_count(&mut self, nverts: usize) {
        if !self.warn_late_header("vertex count") {
            self.header.nverts = Some(nverts);
        }
    }

    fn set_face_count(&mut self, nfaces: usize) {
        if !self.warn_late_header("face count") {
            self.header.nfaces = Some(nfaces);
        }
    }

    fn set_bounding_box(&mut self, bb: &BoundingBox) {
        if !self.warn_late_header("bounding box") {
            self.header.bounding_box = *bb;
        }
    }

    fn write_vertex(&mut self, v: &Vertex3) -> HowResult<()> {
        if self.nfaces > 0 {
            return Err(anyhow!("All vertices must be written before the first triangle"));
        }
        self.ensure_header()?;

        writeln!(self.out, "v {} {} {}", v[0], v[1], v[2])?;
        self.nverts += 1;
        HowOk(())
    }

    fn write_triangle(&mut self, tri: &[u32; 3]) -> HowResult<()> {
        self.ensure_header()?;

        writeln!(self.out, "f {} {} {}", tri[0], tri[1], tri[2])?;
        self.nfaces += 1;
        HowOk(())
    }

    fn close(&mut self) -> HowResult<()> {
        if self.closed {
            return HowOk(());
        }
        self.ensure_header()?;
        self.out.flush()?;
        self.closed = true;

        warn_count_mismatch("vertices", self.header.nverts, self.nverts);
        warn_count_mismatch("faces", self.header.nfaces, self.nfaces);
        HowOk(())
    }

    fn nverts(&self) -> usize {
        self.nverts
    }

    fn nfaces(&self) -> usize {
        self.nfaces
    }
}

pub struct SmaReader<R: BufRead> {
    input: AsciiInput<R>,
    header: MeshHeader,
    done: bool,
    vertex: Option<Vertex3>,
    triangle: Option<[u32; 3]>,
    nverts: usize,
    nfaces: usize,
}

impl<R: BufRead> SmaReader<R> {
    /// Open a mesh, reading its header.
    pub fn new(input: R) -> HowResult<Self> {
        let mut input = AsciiInput::new(input);
        let mut header = MeshHeader::default();

        input.read_header(|key, values| {
            match key {
                "nverts" => header.nverts = Some(parse_values::<usize, _>(values, 1)?[0]),
                "nfaces" => header.nfaces = Some(parse_values::<usize, _>(values, 1)?[0]),
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
            vertex: None,
            triangle: None,
            nverts: 0,
            nfaces: 0,
        })
    }

    fn parse_element(&mut self) -> HowResult<MeshElement> {
        let Some(fields) = self.input.next_record()? else {
            return HowOk(MeshElement::Eof);
        };

        match fields[0].as_str() {
            "v" => {
                if self.nfaces > 0 {
                    return Err(anyhow!("Vertex after the first triangle"));
                }
                let v = parse_values::<f64, _>(&fields[1..], 3)?;
                let v = [v[0], v[1], v[2]];

                self.vertex = Some(v);
                self.nverts += 1;
                HowOk(MeshElement::Vertex(v))
            }
            "f" => {
                let t = parse_values::<u32, _>(&fields[1..], 3)?;
                let t = [t[0], t[1], t[2]];
                if let Some(idx) = t.iter().find(|&&idx| idx as usize >= self.nverts) {
                    return Err(anyhow!("Triangle references unknown vertex {idx}"));
                }

                self.triangle = Some(t);
                self.nfaces += 1;
                HowOk(MeshElement::Triangle(t))
            }
            other => Err(anyhow!("Unknown record '{other}'")),
        }
    }
}

impl<R: BufRead> MeshReader for SmaReader<R> {
    fn header(&self) -> &MeshHeader {
        &self.header
    }

    fn read_element(&mut self) -> HowResult<MeshElement> {
        if self.done {
            return HowOk(MeshElement::Eof);
        }

        let element = self.parse_element();
        if !matches!(element, Ok(MeshElement::Vertex(_) | MeshElement::Triangle(_))) {
            self.done = true;
        }

        let line_no = self.input.line_no();
        element.with_context(|| format!("Malformed mesh record in line {line_no}"))
    }

    fn vertex(&self) -> Option<&Vertex3> {
        self.vertex.as_ref()
    }

    fn triangle(&self) -> Option<&[u32; 3]> {
        self.triangle.as_ref()
    }

    fn nverts(&self) -> usize {
        self.nverts
    }

    fn nfaces(&self) -> usize {
        self.nfaces
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::CountMismatch;

    fn write_mesh(writer: &mut impl MeshWriter) {
        writer.set_vertex_count(4);
        writer.set_face_count(2);
        writer.set_bounding_box(&BoundingBox::new([0.0, 0.0, 0.0], [1.0, 1.0, 0.25]));

        for v in [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.25], [0.0, 1.0, 0.0]] {
            writer.write_vertex(&v).unwrap();
        }
        writer.write_triangle(&[0, 1, 2]).unwrap();
        writer.write_triangle(&[0, 2, 3]).unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn test_ascii_round_trip() {
        let mut writer = SmaWriter::new(Vec::new());
        write_mesh(&mut writer);
        assert_eq!(writer.nverts(), 4);
        assert_eq!(writer.nfaces(), 2);

        let bytes = writer.into_inner();
        let mut reader = SmaReader::new(bytes.as_slice()).unwrap();
        assert_eq!(reader.header().nverts, Some(4));
        assert_eq!(reader.header().nfaces, Some(2));
        assert_eq!(reader.header().bounding_box.max, [1.0, 1.0, 0.25]);

        let mut vertices = Vec::new();
        let mut triangles = Vec::new();
        loop {
            match reader.read_element().unwrap() {
                MeshElement::Vertex(v) => vertices.push(v),
                MeshElement::Triangle(t) => triangles.push(t),
                MeshElement::Eof => break,
            }
        }

        assert_eq!(vertices[2], [1.0, 1.0, 0.25]);
        assert_eq!(triangles, vec![[0, 1, 2], [0, 2, 3]]);
        assert_eq!(reader.triangle(), Some(&[0, 2, 3]));
        assert_eq!((reader.nverts(), reader.nfaces()), (4, 2));
    }

    #[test]
    fn test_comments_and_unknown_counts() {
        let text = "# a coarse mesh\n\nv 0 0 0\n# between\nv 1 0 0\nv 0 1 0\n\nf 0 1 2\n";
        let mut reader = SmaReader::new(text.as_bytes()).unwrap();

        assert_eq!(reader.header().nverts, None);
        assert!(reader.header().bounding_box.is_empty());

        let mut n = 0;
        while reader.read_element().unwrap() != MeshElement::Eof {
            n += 1;
        }
        assert_eq!(n, 4);
    }

    #[test]
    fn test_declared_counts_are_checked() {
        let text = "# nverts 3\n# nfaces 5\nv 0 0 0\nv 1 0 0\nv 0 1 0\nf 0 1 2\n";
        let mut reader = SmaReader::new(text.as_bytes()).unwrap();
        while reader.read_element().unwrap() != MeshElement::Eof {}

        assert_eq!(
            reader.count_mismatches(),
            vec![CountMismatch {
                what: "faces",
                declared: 5,
                found: 1
            }]
        );

        let mut writer = SmaWriter::new(Vec::new());
        write_mesh(&mut writer);
        let bytes = writer.into_inner();
        let mut reader = SmaReader::new(bytes.as_slice()).unwrap();
        while reader.read_element().unwrap() != MeshElement::Eof {}
        assert!(reader.count_mismatches().is_empty());
    }

    #[test]
    fn test_malformed_record() {
        let text = "v 0 0 0\nv 1 0\nv 0 1 0\n";
        let mut reader = SmaReader::new(text.as_bytes()).unwrap();

        assert!(matches!(reader.read_element(), Ok(MeshElement::Vertex(_))));
        assert!(reader.read_element().is_err());
        assert_eq!(reader.read_element().unwrap(), MeshElement::Eof);
        assert_eq!(reader.nverts(), 1);
    }

    #[test]
    fn test_dangling_index() {
        let text = "v 0 0 0\nf 0 1 2\n";
        let mut reader = SmaReader::new(text.as_bytes()).unwrap();

        reader.read_element().unwrap();
        assert!(reader.read_element().is_err());
        assert_eq!(reader.read_element().unwrap(), MeshElement::Eof);
    }

    #[test]
    fn test_vertex_after_triangle_is_rejected() {
        let mut writer = SmaWriter::new(Vec::new());
        writer.write_vertex(&[0.0, 0.0, 0.0]).unwrap();
        writer.write_triangle(&[0, 0, 0]).unwrap();

        assert!(writer.write_vertex(&[1.0, 0.0, 0.0]).is_err());
    }
}
