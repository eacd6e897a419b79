use std::collections::BTreeMap;
use std::env;
use std::fmt::Write as _;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::{Compression, GzBuilder};
use walkdir::WalkDir;

struct Entry {
    group: String,
    path: String,
    hash: [u8; 32],
}

fn main() {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR"));
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR"));
    let assets_root = manifest_dir.join("assets");
    println!("cargo:rerun-if-changed={}", assets_root.display());

    let blob_dir = out_dir.join("blobs");
    fs::create_dir_all(&blob_dir).expect("create blob dir");

    let mut entries = Vec::new();
    let mut blobs: BTreeMap<[u8; 32], (PathBuf, usize)> = BTreeMap::new();

    let mut files: Vec<PathBuf> = WalkDir::new(&assets_root)
        .min_depth(2)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect();
    files.sort();

    for path in files {
        println!("cargo:rerun-if-changed={}", path.display());
        let rel = path
            .strip_prefix(&assets_root)
            .expect("asset under assets root");
        let (group, inner) = split_group(rel);
        let raw = fs::read(&path).expect("read asset");
        let hash = *blake3::hash(&raw).as_bytes();
        if !blobs.contains_key(&hash) {
            let blob_path = blob_dir.join(format!("{}.gz", hex(&hash)));
            let mut encoder = GzBuilder::new()
                .mtime(0)
                .write(Vec::new(), Compression::best());
            encoder.write_all(&raw).expect("gzip asset");
            let gzip = encoder.finish().expect("finish gzip");
            fs::write(&blob_path, gzip).expect("write blob");
            blobs.insert(hash, (blob_path, raw.len()));
        }
        entries.push(Entry {
            group,
            path: inner,
            hash,
        });
    }

    let mut generated = String::new();
    generated.push_str("pub(crate) static BLOBS: &[Blob] = &[\n");
    for (hash, (blob_path, raw_len)) in &blobs {
        let _ = writeln!(
            generated,
            "    Blob {{ hash: {:?}, gzip: include_bytes!({:?}), raw_len: {} }},",
            hash,
            blob_path.to_string_lossy(),
            raw_len
        );
    }
    generated.push_str("];\n\n");

    let mut groups: BTreeMap<&str, Vec<&Entry>> = BTreeMap::new();
    for entry in &entries {
        groups.entry(entry.group.as_str()).or_default().push(entry);
    }
    generated.push_str("pub(crate) static TEMPLATES: &[Template] = &[\n");
    for (group, items) in &groups {
        let _ = writeln!(generated, "    Template {{ name: {:?}, assets: &[", group);
        for item in items {
            let _ = writeln!(
                generated,
                "        AssetEntry {{ path: {:?}, hash: {:?} }},",
                item.path, item.hash
            );
        }
        generated.push_str("    ] },\n");
    }
    generated.push_str("];\n\n");
    generated.push_str("pub(crate) static TEMPLATE_NAMES: &[&str] = &[");
    for group in groups.keys() {
        let _ = write!(generated, "{:?}, ", group);
    }
    generated.push_str("];\n");

    fs::write(out_dir.join("generated.rs"), generated).expect("write generated.rs");
}

fn split_group(rel: &Path) -> (String, String) {
    let mut components = rel.components();
    let group = components
        .next()
        .map(|part| part.as_os_str().to_string_lossy().to_string())
        .unwrap_or_default();
    let inner = components
        .as_path()
        .to_string_lossy()
        .replace('\\', "/");
    (group, inner)
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
