//! Print a summary of a point stream and check its finalized cell markers.

use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{anyhow, Result};
use rustc_hash::FxHashSet;
use streamtri::io::{
    open_mesh_reader, open_point_reader, BoundingBox, FinalizeMethod, MeshElement, MeshFormat,
    PointEvent, PointFormat,
};

const USAGE: &str = "\
usage:
spinfo -i points.spb
spinfo -i points.dat -ispa
spinfo -i final.spb -hi coarse.smb

  -i <file>        input point stream
  -ispa | -ispb    input format, by default from the extension
  -hi <file>       coarse mesh the cell ids of the stream refer to";

struct Options {
    input: PathBuf,
    input_format: PointFormat,
    mesh: Option<PathBuf>,
}

fn parse_args(args: &[String]) -> Result<Options> {
    let (mut input, mut input_format, mut mesh) = (None, None, None);

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-i" => {
                let path = iter.next().ok_or_else(|| anyhow!("Flag -i needs a value"))?;
                input = Some(PathBuf::from(path));
            }
            "-hi" => {
                let path = iter.next().ok_or_else(|| anyhow!("Flag -hi needs a value"))?;
                mesh = Some(PathBuf::from(path));
            }
            "-ispa" => input_format = Some(PointFormat::Spa),
            "-ispb" => input_format = Some(PointFormat::Spb),
            "-h" | "-help" | "--help" => return Err(anyhow!("Help requested")),
            other => return Err(anyhow!("Unknown argument '{other}'")),
        }
    }

    let input: PathBuf = input.ok_or_else(|| anyhow!("No input given"))?;
    let input_format = input_format
        .or_else(|| PointFormat::from_path(&input))
        .ok_or_else(|| anyhow!("Can't tell the point format of {}", input.display()))?;

    Ok(Options {
        input,
        input_format,
        mesh,
    })
}

/// Number of cells of the coarse mesh, counted by reading it to the end.
fn coarse_cells(path: &Path) -> Result<usize> {
    let format = MeshFormat::from_path(path)
        .ok_or_else(|| anyhow!("Can't tell the mesh format of {}", path.display()))?;
    let mut reader = open_mesh_reader(path, format)?;

    while reader.read_element()? != MeshElement::Eof {}
    for mismatch in reader.count_mismatches() {
        log::warn!("{}: {mismatch}", path.display());
    }
    Ok(reader.nfaces())
}

fn print_bounding_box(label: &str, bb: &BoundingBox) {
    if bb.is_empty() {
        println!("{label}: none");
    } else {
        println!(
            "{label}: min ({} {} {}) max ({} {} {})",
            bb.min[0], bb.min[1], bb.min[2], bb.max[0], bb.max[1], bb.max[2]
        );
    }
}

fn run(options: &Options) -> Result<()> {
    let mut reader = open_point_reader(&options.input, options.input_format)?;

    let ncells = match &options.mesh {
        Some(path) => {
            reader.require_method(&[FinalizeMethod::Clarkson2d])?;
            Some(coarse_cells(path)?)
        }
        None => None,
    };

    let header = reader.header().clone();
    println!("file: {}", options.input.display());
    match header.npoints {
        Some(n) => println!("npoints: {n}"),
        None => println!("npoints: unknown"),
    }
    println!("datatype: {}", header.datatype);
    println!("dimension: {}", header.dimension);
    println!("finalize: {}", header.method);
    print_bounding_box("declared bb", &header.bounding_box);

    let mut bb = BoundingBox::empty();
    let mut finalized = FxHashSet::default();
    let (mut duplicates, mut out_of_range) = (0usize, 0usize);

    loop {
        match reader.read_event()? {
            PointEvent::Point(p) => bb.include(&p),
            PointEvent::FinalizedCell(id) => {
                if ncells.is_some_and(|n| id as usize >= n) {
                    log::warn!("Finalized cell {id} is out of range");
                    out_of_range += 1;
                }
                if !finalized.insert(id) {
                    log::warn!("Cell {id} is finalized twice");
                    duplicates += 1;
                }
            }
            PointEvent::Eof => break,
        }
    }

    println!("points read: {}", reader.npoints());
    println!("cells finalized: {}", reader.nfinalized());
    print_bounding_box("observed bb", &bb);

    for mismatch in reader.count_mismatches() {
        log::warn!("{}: {mismatch}", options.input.display());
    }
    if let Some(n) = ncells {
        println!("coarse cells: {n}");
        if finalized.len() != n {
            log::warn!("{} of {n} coarse cells are finalized", finalized.len());
        }
    }
    if duplicates > 0 || out_of_range > 0 {
        log::warn!("{duplicates} duplicate and {out_of_range} out of range cell markers");
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let options = match parse_args(&args) {
        Ok(options) => options,
        Err(err) => {
            eprintln!("{err}");
            eprintln!("{USAGE}");
            return ExitCode::SUCCESS;
        }
    };

    match run(&options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err:#}");
            eprintln!("spinfo: {err:#}");
            ExitCode::FAILURE
        }
    }
}
