#![no_main]

use libfuzzer_sys::fuzz_target;
use streamtri::io::{MeshElement, MeshReader, SmbReader};

fuzz_target!(|data: &[u8]| {
    let Ok(mut reader) = SmbReader::new(data) else {
        return;
    };

    loop {
        match reader.read_element() {
            Ok(MeshElement::Eof) | Err(_) => break,
            Ok(MeshElement::Triangle(tri)) => {
                assert!(tri.iter().all(|&i| (i as usize) < reader.nverts()));
            }
            Ok(MeshElement::Vertex(_)) => {}
        }
    }
    assert_eq!(reader.read_element().ok(), Some(MeshElement::Eof));
});
