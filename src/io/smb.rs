//! Binary coarse mesh format, little endian.
//!
//! Header: magic `SMB1`, `u32` vertex count, `u32` face count (`u32::MAX` if unknown) and the
//! bounding box as six `f32`. Records start with a tag byte, `0` for a vertex (three `f32`),
//! `1` for a triangle (three `u32`).

use std::io::{Read, Write};

use anyhow::{anyhow, Context, Ok as HowOk, Result as HowResult};

use super::{
    decode_count, encode_count, read_f32, read_tag, read_u32, warn_count_mismatch, BoundingBox,
    MeshElement, MeshHeader, MeshReader, MeshWriter,
};
use crate::utils::types::Vertex3;

pub const SMB_MAGIC: [u8; 4] = *b"SMB1";

const TAG_VERTEX: u8 = 0;
const TAG_TRIANGLE: u8 = 1;

pub struct SmbWriter<W: Write> {
    out: W,
    header: MeshHeader,
    header_written: bool,
    closed: bool,
    nverts: usize,
    nfaces: usize,
}

impl<W: Write> SmbWriter<W> {
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

        self.out.write_all(&SMB_MAGIC)?;
        self.out
            .write_all(&encode_count(self.header.nverts)?.to_le_bytes())?;
        self.out
            .write_all(&encode_count(self.header.nfaces)?.to_le_bytes())?;

        let bb = self.header.bounding_box;
        for value in bb.min.iter().chain(bb.max.iter()) {
            self.out.write_all(&(*value as f32).to_le_bytes())?;
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

impl<W: Write> MeshWriter for SmbWriter<W> {
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

        self.out.write_all(&[TAG_VERTEX])?;
        for coord in v {
            self.out.write_all(&(*coord as f32).to_le_bytes())?;
        }
        self.nverts += 1;
        HowOk(())
    }

    fn write_triangle(&mut self, tri: &[u32; 3]) -> HowResult<()> {
        self.ensure_header()?;

        self.out.write_all(&[TAG_TRIANGLE])?;
        for idx in tri {
            self.out.write_all(&idx.to_le_bytes())?;
        }
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

pub struct SmbReader<R: Read> {
    input: R,
    header: MeshHeader,
    done: bool,
    vertex: Option<Vertex3>,
    triangle: Option<[u32; 3]>,
    nverts: usize,
    nfaces: usize,
}

impl<R: Read> SmbReader<R> {
    /// Open a mesh, reading its header.
    pub fn new(mut input: R) -> HowResult<Self> {
        let mut magic = [0u8; 4];
        input
            .read_exact(&mut magic)
            .context("Can't read the mesh header")?;
        if magic != SMB_MAGIC {
            return Err(anyhow!("Not a binary mesh, unknown magic {magic:?}"));
        }

        let nverts = decode_count(read_u32(&mut input)?);
        let nfaces = decode_count(read_u32(&mut input)?);

        let mut bb = [0.0; 6];
        for value in bb.iter_mut() {
            *value = f64::from(read_f32(&mut input)?);
        }

        HowOk(Self {
            input,
            header: MeshHeader {
                nverts,
                nfaces,
                bounding_box: BoundingBox::new([bb[0], bb[1], bb[2]], [bb[3], bb[4], bb[5]]),
            },
            done: false,
            vertex: None,
            triangle: None,
            nverts: 0,
            nfaces: 0,
        })
    }

    fn parse_element(&mut self) -> HowResult<MeshElement> {
        match read_tag(&mut self.input)? {
            None => HowOk(MeshElement::Eof),
            Some(TAG_VERTEX) => {
                if self.nfaces > 0 {
                    return Err(anyhow!("Vertex after the first triangle"));
                }
                let mut v = [0.0; 3];
                for coord in v.iter_mut() {
                    *coord = f64::from(read_f32(&mut self.input)?);
                }

                self.vertex = Some(v);
                self.nverts += 1;
                HowOk(MeshElement::Vertex(v))
            }
            Some(TAG_TRIANGLE) => {
                let mut t = [0u32; 3];
                for idx in t.iter_mut() {
                    *idx = read_u32(&mut self.input)?;
                }
                if let Some(idx) = t.iter().find(|&&idx| idx as usize >= self.nverts) {
                    return Err(anyhow!("Triangle references unknown vertex {idx}"));
                }

                self.triangle = Some(t);
                self.nfaces += 1;
                HowOk(MeshElement::Triangle(t))
            }
            Some(tag) => Err(anyhow!("Unknown record tag {tag}")),
        }
    }
}

impl<R: Read> MeshReader for SmbReader<R> {
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

        let record = self.nverts + self.nfaces;
        element.with_context(|| format!("Malformed mesh record after {record} records"))
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
