use std::fs;
use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use panelsite_cli::precompress::{PrecompressOpts, precompress_outputs};
use tempfile::TempDir;

fn write(path: &Path, contents: &[u8]) {
    fs::create_dir_all(path.parent().expect("parent")).expect("create dirs");
    fs::write(path, contents).expect("write file");
}

fn out_tree(root: &Path) {
    write(&root.join("index.html"), b"<html><body>Home</body></html>");
    write(&root.join("chapter/1.html"), b"<html><body>Chapter 1</body></html>");
    write(&root.join("artifacts/css/reader.css"), b"body { margin: 0; }");
    write(&root.join("images/chapter 1/01.jpg"), &[0xff, 0xd8, 0xff, 0xe0]);
}

#[test]
fn precompress_writes_gzip_and_brotli_for_text_outputs() {
    let temp = TempDir::new().expect("tempdir");
    let out_dir = temp.path().join("out");
    out_tree(&out_dir);

    let summary = precompress_outputs(&out_dir, PrecompressOpts::default()).expect("precompress");
    assert_eq!(summary.gzip, 3);
    assert_eq!(summary.brotli, 3);

    assert!(out_dir.join("index.html.gz").exists());
    assert!(out_dir.join("index.html.br").exists());
    assert!(out_dir.join("chapter/1.html.br").exists());
    assert!(out_dir.join("artifacts/css/reader.css.gz").exists());
    assert!(!out_dir.join("images/chapter 1/01.jpg.gz").exists());

    let mut decoded = String::new();
    GzDecoder::new(fs::File::open(out_dir.join("chapter/1.html.gz")).expect("open gz"))
        .read_to_string(&mut decoded)
        .expect("decode gz");
    assert_eq!(decoded, "<html><body>Chapter 1</body></html>");
}

#[test]
fn rerunning_does_not_compress_compressed_files() {
    let temp = TempDir::new().expect("tempdir");
    let out_dir = temp.path().join("out");
    out_tree(&out_dir);

    precompress_outputs(&out_dir, PrecompressOpts::default()).expect("first run");
    let summary = precompress_outputs(&out_dir, PrecompressOpts::default()).expect("second run");
    assert_eq!(summary.gzip, 3);
    assert!(!out_dir.join("index.html.gz.gz").exists());
}
