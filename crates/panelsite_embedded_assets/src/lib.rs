use flate2::read::GzDecoder;
use std::io::Read;

mod generated {
    use super::{AssetEntry, Blob, Template};

    include!(concat!(env!("OUT_DIR"), "/generated.rs"));
}

/// Group holding the built-in edition rule tables.
pub const EDITIONS_GROUP: &str = "editions";

pub struct Blob {
    pub hash: [u8; 32],
    pub gzip: &'static [u8],
    pub raw_len: u32,
}

pub struct AssetEntry {
    pub path: &'static str,
    pub hash: [u8; 32],
}

pub struct Template {
    pub name: &'static str,
    pub assets: &'static [AssetEntry],
}

pub fn template_names() -> &'static [&'static str] {
    generated::TEMPLATE_NAMES
}

pub fn template(name: &str) -> Option<&'static Template> {
    generated::TEMPLATES.iter().find(|template| template.name == name)
}

pub fn asset_bytes_gzip(hash: &[u8; 32]) -> Option<&'static [u8]> {
    find_blob(hash).map(|blob| blob.gzip)
}

pub fn asset_raw_len(hash: &[u8; 32]) -> Option<u32> {
    find_blob(hash).map(|blob| blob.raw_len)
}

pub fn decompress_to_vec(hash: &[u8; 32]) -> Option<Vec<u8>> {
    let blob = find_blob(hash)?;
    let mut decoder = GzDecoder::new(blob.gzip);
    let mut out = Vec::with_capacity(blob.raw_len as usize);
    if decoder.read_to_end(&mut out).is_err() {
        return None;
    }
    if out.len() != blob.raw_len as usize {
        return None;
    }
    Some(out)
}

/// Names of the built-in editions (file stems under `editions/`).
pub fn edition_names() -> Vec<&'static str> {
    let Some(group) = template(EDITIONS_GROUP) else {
        return Vec::new();
    };
    group
        .assets
        .iter()
        .filter_map(|entry| entry.path.strip_suffix(".yaml"))
        .collect()
}

/// Source text of a built-in edition rule table.
pub fn edition_yaml(name: &str) -> Option<String> {
    let group = template(EDITIONS_GROUP)?;
    let wanted = format!("{name}.yaml");
    let entry = group.assets.iter().find(|entry| entry.path == wanted)?;
    let bytes = decompress_to_vec(&entry.hash)?;
    String::from_utf8(bytes).ok()
}

fn find_blob(hash: &[u8; 32]) -> Option<&'static Blob> {
    let index = generated::BLOBS
        .binary_search_by(|blob| blob.hash.cmp(hash))
        .ok()?;
    Some(&generated::BLOBS[index])
}
