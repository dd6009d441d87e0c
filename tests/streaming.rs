use std::collections::HashMap;

use streamtri::{
    io::{
        BoundingBox, Datatype, FinalizeMethod, MeshElement, MeshReader, PointEvent, PointReader,
        PointWriter, SmaReader, SmaWriter, SmbReader, SmbWriter, SpaReader, SpaWriter, SpbReader,
        SpbWriter,
    },
    CoarseMesh, Finalizer, FinalizerSettings, RegionId, ReservoirSampler, Topology, Vertex3,
};
use streamtri_test_utils::{lift, sample_clustered_2d, sample_vertices_2d, sample_vertices_3d};

/// Encode points the way an upstream tool would hand them to the finalizer.
fn encode_input(points: &[Vertex3]) -> Vec<u8> {
    let mut writer = SpbWriter::new(Vec::new());
    writer.set_point_count(points.len());
    writer.set_bounding_box(&BoundingBox::from_points(points));
    writer.set_datatype(Datatype::Double);
    writer.set_dimension(3).unwrap();
    writer.write_header().unwrap();
    for p in points {
        writer.write_point(p).unwrap();
    }
    writer.close().unwrap();
    writer.into_inner()
}

fn decode_points(bytes: &[u8]) -> Vec<Vertex3> {
    let mut reader = SpbReader::new(bytes).unwrap();
    let mut points = Vec::new();
    loop {
        match reader.read_event().unwrap() {
            PointEvent::Point(p) => points.push(p),
            PointEvent::FinalizedCell(_) => {}
            PointEvent::Eof => break,
        }
    }
    points
}

/// Events of a finalized stream with the owner of every point.
struct Checked {
    events: Vec<PointEvent>,
    owners: Vec<RegionId>,
    num_regions: usize,
}

fn check_stream(checked: &Checked, points: &[Vertex3]) {
    let mut markers: HashMap<u32, usize> = HashMap::new();
    let mut written = Vec::new();

    for (pos, event) in checked.events.iter().enumerate() {
        match event {
            PointEvent::Point(p) => written.push((pos, *p)),
            PointEvent::FinalizedCell(id) => {
                assert!((*id as usize) < checked.num_regions);
                assert!(markers.insert(*id, pos).is_none(), "cell {id} twice");
            }
            PointEvent::Eof => unreachable!(),
        }
    }
    assert_eq!(markers.len(), checked.num_regions);

    // a point is written once, before the marker of its owner, and members keep stream order
    let mut stream_order: Vec<Vertex3> = written.iter().map(|(_, p)| *p).collect();
    stream_order.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mut input_order = points.to_vec();
    input_order.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_eq!(stream_order, input_order);

    let mut last_member: HashMap<RegionId, usize> = HashMap::new();
    for (i, p) in points.iter().enumerate() {
        let owner = checked.owners[i];
        let (pos, _) = written
            .iter()
            .find(|(pos, q)| q == p && last_member.get(&owner).map_or(true, |last| pos > last))
            .unwrap();
        assert!(*pos < markers[&owner]);
        last_member.insert(owner, *pos);
    }
}

#[test]
fn test_binary_session() {
    let points = lift(&sample_clustered_2d(3000, 4, Some(0.08)));
    let input = encode_input(&points);

    // sampling pass
    let mut bb = BoundingBox::empty();
    let mut sampler = ReservoirSampler::new(256, 11);
    for p in decode_points(&input) {
        bb.include(&p);
        sampler.offer([p[0], p[1]]);
    }
    assert_eq!(sampler.seen(), points.len());

    let mesh = CoarseMesh::from_sample(&bb, &sampler.into_sample()).unwrap();
    let num_regions = mesh.num_regions();
    let owners: Vec<RegionId> = points
        .iter()
        .map(|p| mesh.region_of(mesh.locate(&[p[0], p[1]], None).unwrap()).unwrap())
        .collect();

    let settings = FinalizerSettings::default()
        .with_dimension(3)
        .with_datatype(Datatype::Double);
    let mut finalizer = Finalizer::new(mesh, SpbWriter::new(Vec::new()), settings).unwrap();

    let mut mesh_writer = SmbWriter::new(Vec::new());
    finalizer.write_coarse_mesh(&mut mesh_writer).unwrap();

    // counting and chunking passes
    finalizer.count_points(&decode_points(&input)).unwrap();
    finalizer.begin(points.len(), &bb).unwrap();
    for p in decode_points(&input) {
        finalizer.insert_point(&p).unwrap();
    }
    finalizer.close().unwrap();

    let output = finalizer.into_writer().into_inner();

    // the coarse mesh
    let mesh_bytes = mesh_writer.into_inner();
    let mut mesh_reader = SmbReader::new(mesh_bytes.as_slice()).unwrap();
    assert_eq!(mesh_reader.header().nfaces, Some(num_regions));
    while mesh_reader.read_element().unwrap() != MeshElement::Eof {}
    assert_eq!(mesh_reader.nfaces(), num_regions);

    // the finalized stream
    let mut reader = SpbReader::new(output.as_slice()).unwrap();
    reader.require_method(&[FinalizeMethod::Clarkson2d]).unwrap();
    assert_eq!(reader.header().npoints, Some(points.len()));
    assert_eq!(reader.header().dimension, 3);
    assert_eq!(reader.header().bounding_box, bb);

    let mut events = Vec::new();
    loop {
        match reader.read_event().unwrap() {
            PointEvent::Eof => break,
            event => events.push(event),
        }
    }
    assert_eq!(reader.npoints(), points.len());
    assert_eq!(reader.nfinalized(), num_regions);

    let checked = Checked {
        events,
        owners,
        num_regions,
    };
    check_stream(&checked, &points);
}

#[test]
fn test_ascii_session_in_the_plane() {
    let points = sample_vertices_3d(800, Some(-20.0..=20.0));
    let bb = BoundingBox::from_points(&points);
    let mut sampler = ReservoirSampler::new(64, 5);
    for p in &points {
        sampler.offer([p[0], p[1]]);
    }

    let mesh = CoarseMesh::from_sample(&bb, &sampler.into_sample()).unwrap();
    let num_regions = mesh.num_regions();
    let settings = FinalizerSettings::default().with_datatype(Datatype::Double);
    let mut finalizer = Finalizer::new(mesh, SpaWriter::new(Vec::new()), settings).unwrap();

    let mut mesh_writer = SmaWriter::new(Vec::new());
    finalizer.write_coarse_mesh(&mut mesh_writer).unwrap();
    finalizer.count_points(&points).unwrap();
    finalizer.begin(points.len(), &bb).unwrap();
    for p in &points {
        finalizer.insert_point(p).unwrap();
    }
    finalizer.close().unwrap();

    let mesh_bytes = mesh_writer.into_inner();
    let mut mesh_reader = SmaReader::new(mesh_bytes.as_slice()).unwrap();
    let mut nverts = 0;
    loop {
        match mesh_reader.read_element().unwrap() {
            MeshElement::Vertex(v) => {
                assert_eq!(v[2], 0.0);
                nverts += 1;
            }
            MeshElement::Triangle(tri) => assert!(tri.iter().all(|&i| (i as usize) < nverts)),
            MeshElement::Eof => break,
        }
    }
    assert_eq!(mesh_reader.nfaces(), num_regions);

    // a two dimensional stream drops z
    let output = finalizer.into_writer().into_inner();
    let text = String::from_utf8(output.clone()).unwrap();
    assert!(text.contains("# dimension 2"));
    assert!(text.contains("# finalize clarkson2d"));

    let mut reader = SpaReader::new(output.as_slice()).unwrap();
    let mut planar = Vec::new();
    let mut cells = Vec::new();
    loop {
        match reader.read_event().unwrap() {
            PointEvent::Point(p) => planar.push(p),
            PointEvent::FinalizedCell(id) => cells.push(id),
            PointEvent::Eof => break,
        }
    }

    assert_eq!(planar.len(), points.len());
    assert!(planar.iter().all(|p| p[2] == 0.0));
    cells.sort_unstable();
    assert_eq!(cells, (0..num_regions as u32).collect::<Vec<_>>());
}

#[test]
fn test_sessions_are_deterministic() {
    let points = lift(&sample_vertices_2d(1000, Some(0.0..=100.0)));
    let bb = BoundingBox::from_points(&points);

    let run = || {
        let mut sampler = ReservoirSampler::new(100, 42);
        for p in &points {
            sampler.offer([p[0], p[1]]);
        }
        let mesh = CoarseMesh::from_sample(&bb, &sampler.into_sample()).unwrap();
        let settings = FinalizerSettings::default().with_dimension(3);
        let mut finalizer = Finalizer::new(mesh, SpbWriter::new(Vec::new()), settings).unwrap();

        finalizer
            .write_coarse_mesh(&mut SmbWriter::new(Vec::new()))
            .unwrap();
        finalizer.count_points(&points).unwrap();
        finalizer.begin(points.len(), &bb).unwrap();
        for p in &points {
            finalizer.insert_point(p).unwrap();
        }
        finalizer.close().unwrap();
        finalizer.into_writer().into_inner()
    };

    assert_eq!(run(), run());
}
