//! End-to-end flows across pack, read, hash, trailer, extract, and edit.

use std::fs;
use std::io::Cursor;

use tempfile::tempdir;

use rvbank::{
    compute_hash_set, compute_hash_set_from_reader, pack, pack_and_hash, pack_and_hash_file,
    pack_file, verify_sha1_trailer, CompressRule, EditOptions, Editor, ExtractOptions, GameType,
    HeaderPair, Input, OffsetMode, PackOptions, Reader, ReaderOptions, SignVersion,
};

fn byte_inputs(entries: &[(&str, &[u8])]) -> Vec<Input> {
    entries
        .iter()
        .map(|(path, data)| Input::from_bytes(*path, data.to_vec()))
        .collect()
}

#[test]
fn minimal_pack_round_trip() {
    let mut dst = Cursor::new(Vec::new());
    pack(
        &mut dst,
        byte_inputs(&[("b.txt", b"world"), ("a.txt", b"hello")]),
        &PackOptions::default(),
    )
    .unwrap();

    let bytes = dst.into_inner();
    let size = bytes.len() as u64;
    let reader = Reader::from_read_at(bytes, size).unwrap();

    let paths: Vec<_> = reader
        .entries()
        .iter()
        .map(|e| e.path.to_string_lossy().into_owned())
        .collect();
    assert_eq!(paths, ["a.txt", "b.txt"]);
    assert_eq!(reader.read_entry("a.txt").unwrap(), b"hello");
    assert_eq!(reader.read_entry("b.txt").unwrap(), b"world");
}

#[test]
fn pack_file_appends_verifiable_trailer() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("out.pbo");

    pack_file(
        &path,
        byte_inputs(&[("a.txt", b"hello")]),
        &PackOptions::default(),
    )
    .unwrap();

    verify_sha1_trailer(&path).unwrap();

    let reader = Reader::open(&path).unwrap();
    assert!(reader.sha1_trailer().is_some());
    assert_eq!(reader.read_entry("a.txt").unwrap(), b"hello");
}

#[test]
fn compressed_entries_round_trip_through_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("out.pbo");
    let payload = vec![b'x'; 64 * 1024];

    let opts = PackOptions {
        compress: vec![CompressRule::include("*")],
        ..PackOptions::default()
    };
    let result = pack_file(&path, byte_inputs(&[("data/a.txt", &payload)]), &opts).unwrap();
    assert_eq!(result.compressed_entries, 1);

    let reader = Reader::open(&path).unwrap();
    let entry = &reader.entries()[0];
    assert!(entry.is_compressed());
    assert_eq!(entry.original_size, payload.len() as u32);
    assert!(u64::from(entry.data_size) < payload.len() as u64);
    assert_eq!(reader.read_entry("data/a.txt").unwrap(), payload);
}

#[test]
fn mixed_raw_and_compressed_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("out.pbo");

    let text = b"class CfgPatches { class mine {}; };\n".repeat(200);
    let opts = PackOptions {
        compress: vec![CompressRule::include("*.cpp")],
        min_compress_size: 1,
        ..PackOptions::default()
    };
    pack_file(
        &path,
        byte_inputs(&[
            ("config.cpp", &text),
            ("data/raw.bin", b"just bytes"),
            ("deep/tree/file.txt", b"leaf"),
        ]),
        &opts,
    )
    .unwrap();

    let reader = Reader::open(&path).unwrap();
    assert_eq!(reader.read_entry("config.cpp").unwrap(), text);
    assert_eq!(reader.read_entry("data\\raw.bin").unwrap(), b"just bytes");
    assert_eq!(reader.read_entry("deep/tree/file.txt").unwrap(), b"leaf");
}

#[test]
fn prefix_header_round_trips_normalized() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("out.pbo");

    let opts = PackOptions {
        headers: vec![
            HeaderPair::new("prefix", "my/addon/dir"),
            HeaderPair::new("version", "1.0"),
        ],
        ..PackOptions::default()
    };
    pack_file(&path, byte_inputs(&[("a.txt", b"x")]), &opts).unwrap();

    let reader = Reader::open(&path).unwrap();
    assert_eq!(
        reader.headers(),
        [
            HeaderPair::new("prefix", "my\\addon\\dir"),
            HeaderPair::new("version", "1.0"),
        ]
    );
}

#[test]
fn pack_and_hash_matches_compute_hash_set() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("out.pbo");
    let payload = b"class X {\n};\n".repeat(1024);

    let opts = PackOptions {
        compress: vec![CompressRule::include("*.c")],
        min_compress_size: 1,
        ..PackOptions::default()
    };

    let mut file = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)
        .unwrap();
    let (_, packed_hashes) = pack_and_hash(
        &mut file,
        byte_inputs(&[("scripts/main.c", &payload)]),
        &opts,
        SignVersion::V3,
        GameType::DayZ,
    )
    .unwrap();
    file.sync_all().unwrap();
    drop(file);

    let file_hashes = compute_hash_set(&path, SignVersion::V3, GameType::DayZ).unwrap();
    assert_eq!(packed_hashes, file_hashes);
}

#[test]
fn pack_and_hash_file_matches_compute_hash_set() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("out.pbo");
    let payload = vec![b'x'; 64 * 1024];

    let opts = PackOptions {
        compress: vec![CompressRule::include("*.txt")],
        ..PackOptions::default()
    };
    let (_, packed_hashes) = pack_and_hash_file(
        &path,
        byte_inputs(&[("data/a.txt", &payload)]),
        &opts,
        SignVersion::V2,
        GameType::Any,
    )
    .unwrap();

    // The trailer appended afterwards must not change the hash set.
    verify_sha1_trailer(&path).unwrap();
    let file_hashes = compute_hash_set(&path, SignVersion::V2, GameType::Any).unwrap();
    assert_eq!(packed_hashes, file_hashes);
}

#[test]
fn hash_set_is_reproducible_and_order_sensitive() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("out.pbo");

    let opts = PackOptions {
        headers: vec![HeaderPair::new("prefix", "mod")],
        compress: vec![CompressRule::include("*.c")],
        min_compress_size: 1,
        ..PackOptions::default()
    };
    pack_file(
        &path,
        byte_inputs(&[("a.c", b"lower-a"), ("B.c", b"upper-b")]),
        &opts,
    )
    .unwrap();

    let first = compute_hash_set(&path, SignVersion::V3, GameType::DayZ).unwrap();
    let second = compute_hash_set(&path, SignVersion::V3, GameType::DayZ).unwrap();
    assert_eq!(first, second);

    // Entries land in canonical sort order ("B.c" before "a.c"); the file
    // hash must follow that stored order, not a case-normalized sort.
    let reader = Reader::open(&path).unwrap();
    let stored: Vec<_> = reader
        .entries()
        .iter()
        .map(|e| e.path.to_string_lossy().into_owned())
        .collect();
    assert_eq!(stored, ["B.c", "a.c"]);
}

#[test]
fn hash_set_preserves_non_ascii_names() {
    // Minimal single-entry archive with a caller-controlled raw name.
    fn manual_archive_raw(name: &[u8], payload: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.push(0u8);
        bytes.extend_from_slice(&0x5665_7273u32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 16]);
        bytes.push(0); // header terminator

        bytes.extend_from_slice(name);
        bytes.push(0);
        bytes.extend_from_slice(&[0u8; 16]);
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.push(0);
        bytes.extend_from_slice(&[0u8; 20]);
        bytes.extend_from_slice(payload);

        bytes
    }

    fn hashes_of(name: &[u8]) -> rvbank::SignatureSet {
        let bytes = manual_archive_raw(name, b"hello");
        let size = bytes.len() as u64;
        let reader = Reader::from_read_at(bytes, size).unwrap();
        compute_hash_set_from_reader(&reader, SignVersion::V3, GameType::DayZ).unwrap()
    }

    // 0xe9 is not valid UTF-8; the parsed name must keep it verbatim.
    let raw_name = [b'D', 0xe9, b'/', b'C', b'.', b'c'];
    let archive = manual_archive_raw(&raw_name, b"hello");
    let size = archive.len() as u64;
    let reader = Reader::from_read_at(archive, size).unwrap();
    assert_eq!(reader.entries()[0].path.as_bytes(), raw_name);

    // Name-hash normalization folds ASCII and swaps separators only, so a
    // name that differs in exactly those bytes yields the same hash3 (the
    // payload, and with it the file hash, is identical).
    let folded_name = [b'd', 0xe9, b'\\', b'c', b'.', b'c'];
    let raw = hashes_of(&raw_name);
    let folded = hashes_of(&folded_name);
    assert_ne!(raw.hash1, folded.hash1);
    assert_eq!(raw.hash3, folded.hash3);

    // A name carrying the lossy rendering of the raw bytes (U+FFFD in
    // place of 0xe9) identifies a different archive.
    let lossy_name = String::from_utf8_lossy(&raw_name).into_owned();
    let lossy = hashes_of(lossy_name.as_bytes());
    assert_ne!(raw.hash3, lossy.hash3);
}

#[test]
fn stored_offset_compat_mode_on_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("manual.pbo");

    // Manual archive with absolute stored offsets and a 3-byte payload gap.
    let mut bytes = Vec::new();
    bytes.push(0u8);
    bytes.extend_from_slice(&0x5665_7273u32.to_le_bytes());
    bytes.extend_from_slice(&[0u8; 16]);
    bytes.push(0); // header terminator

    let index_len = |name: &str| name.len() + 1 + 20;
    let data_start = bytes.len() + index_len("a.txt") + index_len("b.txt") + 1 + 20;
    let first = (data_start + 3) as u32;
    let second = first + 5;

    for (name, offset, len) in [("a.txt", first, 5u32), ("b.txt", second, 5u32)] {
        bytes.extend_from_slice(name.as_bytes());
        bytes.push(0);
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&offset.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&len.to_le_bytes());
    }
    bytes.push(0);
    bytes.extend_from_slice(&[0u8; 20]);
    bytes.extend_from_slice(b"___helloworld");
    fs::write(&path, &bytes).unwrap();

    let sequential = Reader::open(&path).unwrap();
    assert_ne!(sequential.read_entry("a.txt").unwrap(), b"hello");

    let compat = Reader::open_with_options(
        &path,
        &ReaderOptions {
            offset_mode: OffsetMode::StoredCompat,
            ..ReaderOptions::default()
        },
    )
    .unwrap();
    assert_eq!(compat.read_entry("a.txt").unwrap(), b"hello");
    assert_eq!(compat.read_entry("b.txt").unwrap(), b"world");
}

#[test]
fn extract_and_edit_full_cycle() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("mod.pbo");

    let opts = PackOptions {
        compress: vec![CompressRule::include("*.c")],
        min_compress_size: 1,
        ..PackOptions::default()
    };
    pack_file(
        &archive,
        byte_inputs(&[
            ("scripts/init.c", b"void main() {}"),
            ("data/table.bin", b"\x00\x01\x02\x03"),
        ]),
        &opts,
    )
    .unwrap();

    // Edit: replace one entry, add another, keep a backup.
    let mut editor = Editor::open(
        &archive,
        EditOptions {
            pack: opts.clone(),
            backup_keep: 1,
        },
    )
    .unwrap();
    editor
        .replace([Input::from_bytes("scripts/init.c", b"void main() { run(); }".to_vec())])
        .unwrap();
    editor
        .add([Input::from_bytes("readme.txt", b"hello".to_vec())])
        .unwrap();
    editor.commit().unwrap();

    verify_sha1_trailer(&archive).unwrap();

    // Extract the edited archive and check the files on disk.
    let out = dir.path().join("out");
    let reader = Reader::open(&archive).unwrap();
    reader.extract(&out, &ExtractOptions::default()).unwrap();

    assert_eq!(
        fs::read(out.join("scripts/init.c")).unwrap(),
        b"void main() { run(); }"
    );
    assert_eq!(fs::read(out.join("data/table.bin")).unwrap(), b"\x00\x01\x02\x03");
    assert_eq!(fs::read(out.join("readme.txt")).unwrap(), b"hello");

    // The backup still holds the pre-edit content.
    let backup = {
        let mut os = archive.clone().into_os_string();
        os.push(".bak");
        std::path::PathBuf::from(os)
    };
    let backup_reader = Reader::open(&backup).unwrap();
    assert_eq!(
        backup_reader.read_entry("scripts/init.c").unwrap(),
        b"void main() {}"
    );
    assert!(backup_reader.find_entry("readme.txt").is_none());
}

#[test]
fn editor_passthrough_preserves_compressed_payloads() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("mod.pbo");
    let compressible = b"repetitive content ".repeat(4096);

    let opts = PackOptions {
        compress: vec![CompressRule::include("*.txt")],
        min_compress_size: 1,
        ..PackOptions::default()
    };
    pack_file(
        &archive,
        byte_inputs(&[("big.txt", &compressible), ("other.bin", b"raw")]),
        &opts,
    )
    .unwrap();

    let before = Reader::open(&archive).unwrap();
    let packed_before = before.find_entry("big.txt").unwrap().clone();
    assert!(packed_before.is_compressed());
    drop(before);

    // Delete the raw entry; the compressed one must pass through unchanged.
    let mut editor = Editor::open(&archive, EditOptions::default()).unwrap();
    editor.delete(&["other.bin"]).unwrap();
    editor.commit().unwrap();

    let after = Reader::open(&archive).unwrap();
    assert!(after.find_entry("other.bin").is_none());

    let packed_after = after.find_entry("big.txt").unwrap();
    assert_eq!(packed_after.data_size, packed_before.data_size);
    assert_eq!(packed_after.original_size, packed_before.original_size);
    assert_eq!(packed_after.timestamp, packed_before.timestamp);
    assert_eq!(after.read_entry("big.txt").unwrap(), compressible);
}

#[test]
fn list_entries_with_filters_on_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("out.pbo");

    pack_file(
        &path,
        byte_inputs(&[
            ("scripts/4_world/main.c", b"content"),
            ("scripts/3_game/other.c", b"content"),
            ("textures/big.paa", b"pixels"),
        ]),
        &PackOptions::default(),
    )
    .unwrap();

    let listed = rvbank::list_entries(
        &path,
        &ReaderOptions {
            entry_path_prefix: "scripts/4_world".to_string(),
            ..ReaderOptions::default()
        },
    )
    .unwrap();

    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].path, "scripts\\4_world\\main.c");
}

#[test]
fn inputs_from_dir_packs_a_tree() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("tree");
    fs::create_dir_all(src.join("sub")).unwrap();
    fs::write(src.join("top.txt"), b"top").unwrap();
    fs::write(src.join("sub/leaf.txt"), b"leaf").unwrap();

    let inputs = rvbank::inputs_from_dir(&src).unwrap();
    let paths: Vec<_> = inputs.iter().map(|i| i.path.as_str()).collect();
    assert_eq!(paths, ["sub/leaf.txt", "top.txt"]);

    let archive = dir.path().join("tree.pbo");
    pack_file(&archive, inputs, &PackOptions::default()).unwrap();

    let reader = Reader::open(&archive).unwrap();
    assert_eq!(reader.read_entry("sub/leaf.txt").unwrap(), b"leaf");
    assert_eq!(reader.read_entry("top.txt").unwrap(), b"top");
}
