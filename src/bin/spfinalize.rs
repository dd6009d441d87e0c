//! Finalize a point stream against a coarse mesh built from a sample of it.
//!
//! Reads the input three times: to sample it, to count it and to stream it.

use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    time::Instant,
};

use anyhow::{anyhow, Result};
use streamtri::{
    io::{
        create_mesh_writer, create_point_writer, open_point_reader, BoundingBox, Datatype,
        MeshFormat, PointEvent, PointFormat, PointReader, PointWriter,
    },
    CoarseMesh, Finalizer, FinalizerSettings, ReservoirSampler,
};

const USAGE: &str = "\
usage:
spfinalize -i in.spb -o out.spb -om coarse.smb
spfinalize -i in.spa -ispa -o out.spa -om coarse.sma -sample 4096 -seed 7
spfinalize -i points.dat -ispb -o final.dat -ospb -om mesh.dat -osmb -datatype double

  -i <file>        input point stream
  -ispa | -ispb    input format, by default from the extension
  -o <file>        output point stream
  -ospa | -ospb    output format, by default from the extension
  -om <file>       output coarse mesh
  -osma | -osmb    coarse mesh format, by default from the extension
  -sample <n>      number of points in the coarse mesh sample
  -seed <s>        seed of the sampling
  -datatype <t>    float, int or double coordinates in the output";

struct Options {
    input: PathBuf,
    input_format: PointFormat,
    output: PathBuf,
    output_format: PointFormat,
    mesh: PathBuf,
    mesh_format: MeshFormat,
    settings: FinalizerSettings,
}

fn value<'a>(args: &mut impl Iterator<Item = &'a String>, flag: &str) -> Result<&'a String> {
    args.next()
        .ok_or_else(|| anyhow!("Flag {flag} needs a value"))
}

fn point_format(path: &Path, forced: Option<PointFormat>) -> Result<PointFormat> {
    forced
        .or_else(|| PointFormat::from_path(path))
        .ok_or_else(|| anyhow!("Can't tell the point format of {}", path.display()))
}

fn parse_args(args: &[String]) -> Result<Options> {
    let (mut input, mut output, mut mesh) = (None, None, None);
    let (mut input_format, mut output_format, mut mesh_format) = (None, None, None);
    let mut settings = FinalizerSettings::default();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-i" => input = Some(PathBuf::from(value(&mut iter, arg)?)),
            "-o" => output = Some(PathBuf::from(value(&mut iter, arg)?)),
            "-om" => mesh = Some(PathBuf::from(value(&mut iter, arg)?)),
            "-ispa" => input_format = Some(PointFormat::Spa),
            "-ispb" => input_format = Some(PointFormat::Spb),
            "-ospa" => output_format = Some(PointFormat::Spa),
            "-ospb" => output_format = Some(PointFormat::Spb),
            "-osma" => mesh_format = Some(MeshFormat::Sma),
            "-osmb" => mesh_format = Some(MeshFormat::Smb),
            "-sample" => {
                let n: usize = value(&mut iter, arg)?.parse()?;
                settings = settings.with_sample_size(n);
            }
            "-seed" => {
                let seed: u64 = value(&mut iter, arg)?.parse()?;
                settings = settings.with_seed(seed);
            }
            "-datatype" => {
                let datatype: Datatype = value(&mut iter, arg)?.parse()?;
                settings = settings.with_datatype(datatype);
            }
            "-h" | "-help" | "--help" => return Err(anyhow!("Help requested")),
            other => return Err(anyhow!("Unknown argument '{other}'")),
        }
    }

    let input = input.ok_or_else(|| anyhow!("No input given"))?;
    let output = output.ok_or_else(|| anyhow!("No output given"))?;
    let mesh = mesh.ok_or_else(|| anyhow!("No coarse mesh output given"))?;
    let mesh_format = mesh_format
        .or_else(|| MeshFormat::from_path(&mesh))
        .ok_or_else(|| anyhow!("Can't tell the mesh format of {}", mesh.display()))?;

    Ok(Options {
        input_format: point_format(&input, input_format)?,
        output_format: point_format(&output, output_format)?,
        input,
        output,
        mesh,
        mesh_format,
        settings,
    })
}

/// Call `f` on every point of the input stream, skipping the finalized markers.
fn for_each_point(
    options: &Options,
    mut f: impl FnMut(&[f64; 3]) -> Result<()>,
) -> Result<Box<dyn PointReader>> {
    let mut reader = open_point_reader(&options.input, options.input_format)?;
    loop {
        match reader.read_event()? {
            PointEvent::Point(p) => f(&p)?,
            PointEvent::FinalizedCell(_) => {}
            PointEvent::Eof => break,
        }
    }
    Ok(reader)
}

fn run(options: &Options) -> Result<()> {
    let now = Instant::now();

    // sampling pass
    let mut bb = BoundingBox::empty();
    let mut sampler = ReservoirSampler::new(options.settings.sample_size, options.settings.seed);
    let reader = for_each_point(options, |p| {
        bb.include(p);
        sampler.offer([p[0], p[1]]);
        Ok(())
    })?;
    let npoints = sampler.seen();
    let settings = options
        .settings
        .with_dimension(reader.header().dimension);

    for mismatch in reader.count_mismatches() {
        log::warn!("{}: {mismatch}", options.input.display());
    }
    log::info!("Sampled {} of {npoints} points", options.settings.sample_size.min(npoints));

    let mesh = CoarseMesh::from_sample(&bb, &sampler.into_sample())?;
    log::info!("Coarse mesh with {} regions", mesh.num_regions());

    let writer = create_point_writer(&options.output, options.output_format)?;
    let mut finalizer = Finalizer::new(mesh, writer, settings)?;
    let mut mesh_writer = create_mesh_writer(&options.mesh, options.mesh_format)?;
    finalizer.write_coarse_mesh(&mut mesh_writer)?;

    // counting pass
    finalizer.reset_counts()?;
    for_each_point(options, |p| finalizer.count_point(p))?;

    // chunking pass
    finalizer.begin(npoints, &bb)?;
    for_each_point(options, |p| finalizer.insert_point(p))?;
    finalizer.close()?;

    let writer = finalizer.into_writer();
    log::info!(
        "Wrote {} points and {} finalized cells in {} ms",
        writer.npoints(),
        writer.nfinalized(),
        now.elapsed().as_millis()
    );
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
            eprintln!("spfinalize: {err:#}");
            ExitCode::FAILURE
        }
    }
}
