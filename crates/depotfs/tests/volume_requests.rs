#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
//! End-to-end request tests: archives on disk, a `TreeIndex` fed by a test
//! reader, and a session serving requests through its handler

use depotfs::depotfs_index::{
    ArchiveEntry, Codec, IndexError, MappedArchive, Result as IndexResult, Segment, TreeIndex,
    ZlibCodec,
};
use depotfs::depotfs_name::NameResolver;
use depotfs::{
    FileAttributes, FsStatus, HostFramework, HostStatus, Mutation, RequestHandler, Session,
    SessionConfig, VolumeHandle, VolumeParams,
};
use flate2::Compression;
use flate2::write::ZlibEncoder;
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

type Toc = Vec<(String, u64, u64, u64)>;
type Reader = Box<dyn Fn(&Path) -> IndexResult<Vec<ArchiveEntry>> + Send + Sync>;

struct NullHost;
struct NullHandle;

impl HostFramework for NullHost {
    fn name(&self) -> &str {
        "null"
    }

    fn load(&self) -> Result<(), HostStatus> {
        Ok(())
    }

    fn create_volume(
        &self,
        _params: &VolumeParams,
        _handler: Arc<dyn RequestHandler>,
    ) -> Result<Box<dyn VolumeHandle>, HostStatus> {
        Ok(Box::new(NullHandle))
    }
}

impl VolumeHandle for NullHandle {
    fn set_mount_point(&mut self, _mount_point: Option<&str>) -> Result<(), HostStatus> {
        Ok(())
    }

    fn mount_point(&self) -> Option<String> {
        Some("/mnt/depot".to_string())
    }

    fn set_debug_log(&mut self, _level: u32) {}

    fn start_dispatcher(&mut self) -> Result<(), HostStatus> {
        Ok(())
    }

    fn stop_dispatcher(&mut self) {}
}

fn write_archive(path: &Path, files: &[(&str, &[u8])]) -> Toc {
    let mut out = Vec::new();
    let mut toc = Vec::new();
    for (name, data) in files {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        let compressed = encoder.finish().unwrap();
        toc.push((
            (*name).to_string(),
            out.len() as u64,
            compressed.len() as u64,
            data.len() as u64,
        ));
        out.extend_from_slice(&compressed);
    }
    std::fs::write(path, out).unwrap();
    toc
}

fn toc_reader(tocs: HashMap<PathBuf, Toc>) -> Reader {
    let codec: Arc<dyn Codec> = Arc::new(ZlibCodec);
    Box::new(move |path: &Path| {
        let toc = tocs
            .get(path)
            .ok_or_else(|| IndexError::Archive(format!("no table for {}", path.display())))?;
        let archive = MappedArchive::open(path)?;
        Ok(toc
            .iter()
            .map(|(name, offset, stored, size)| {
                ArchiveEntry::new(
                    name.clone(),
                    Arc::new(Segment::new(
                        Arc::clone(&archive),
                        *offset,
                        *stored,
                        *size,
                        Arc::clone(&codec),
                    )),
                )
            })
            .collect())
    })
}

struct Mounted {
    session: Session<TreeIndex<Reader>>,
    _dir: TempDir,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn mounted() -> Mounted {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let bin = dir.path().join("bin").join("x64");
    let content = dir.path().join("archive").join("pc").join("content");
    std::fs::create_dir_all(&bin).unwrap();
    std::fs::create_dir_all(&content).unwrap();
    std::fs::write(bin.join("game.exe"), b"").unwrap();

    let mut tocs = HashMap::new();
    let base = content.join("basegame_1.archive");
    tocs.insert(
        base.clone(),
        write_archive(
            &base,
            &[
                ("base\\worlds\\city.streamingsector", [7u8; 4096].as_slice()),
                ("base\\localization\\en-us\\subtitles.json", b"{\"lines\":[]}".as_slice()),
                ("base\\readme.txt", b"original".as_slice()),
            ],
        ),
    );
    let patch = content.join("patch_1.archive");
    tocs.insert(
        patch.clone(),
        write_archive(&patch, &[("Base\\ReadMe.txt", b"patched readme".as_slice())]),
    );
    let french = content.join("lang_fr_voice.archive");
    tocs.insert(
        french.clone(),
        write_archive(&french, &[("base\\localization\\fr-fr\\voice.wem", b"bonjour".as_slice())]),
    );

    let index = TreeIndex::with_resolver(toc_reader(tocs), Arc::new(NameResolver::new()));
    let config = SessionConfig::new().with_executable_path(bin.join("game.exe"));
    let mut session = Session::new(config, index, Arc::new(NullHost), Arc::new(ZlibCodec));

    session.init(0).unwrap();
    let report = session.load_archives().unwrap();
    assert_eq!(report.loaded.len(), 2);
    assert_eq!(report.skipped_language.len(), 1);
    session.start().unwrap();

    Mounted { session, _dir: dir }
}

#[test]
fn volume_size_reflects_patched_content() {
    let m = mounted();
    let expected = 4096 + 12 + "patched readme".len() as u64;
    assert_eq!(m.session.total_size(), expected);

    let info = m.session.requests().volume_info().unwrap();
    assert_eq!(info.total_size, expected);
    assert_eq!(info.free_size, 0);
    assert_eq!(info.volume_label, "Game Depot");
}

#[test]
fn reads_decode_lazily_and_respect_ranges() {
    let m = mounted();
    let requests = m.session.requests();

    let ctx = requests.open("\\BASE\\README.TXT").unwrap();
    assert!(!ctx.is_decoded());

    let mut buf = [0u8; 7];
    assert_eq!(requests.read(&ctx, 0, &mut buf).unwrap(), 7);
    assert_eq!(&buf, b"patched");
    assert!(ctx.is_decoded());

    let mut rest = [0u8; 32];
    let count = requests.read(&ctx, 8, &mut rest).unwrap();
    assert_eq!(&rest[..count], b"readme");
    assert_eq!(
        requests.read(&ctx, 14, &mut rest).unwrap_err(),
        FsStatus::EndOfFile
    );
    requests.close(ctx);

    let sector = requests.open("base/worlds/city.streamingsector").unwrap();
    let mut big = vec![0u8; 10_000];
    assert_eq!(requests.read(&sector, 4000, &mut big).unwrap(), 96);
    assert!(big[..96].iter().all(|b| *b == 7));
}

#[test]
fn directory_listing_is_ordered_and_filtered() {
    let m = mounted();
    let requests = m.session.requests();

    let base = requests.open("base").unwrap();
    let listing = requests.read_directory(&base, None, None).unwrap();
    let names: Vec<&str> = listing.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec![".", "..", "localization", "readme.txt", "worlds"]);

    let dirs: Vec<&str> = listing
        .iter()
        .filter(|e| e.info.attributes.contains(FileAttributes::DIRECTORY))
        .map(|e| e.name.as_str())
        .collect();
    assert_eq!(dirs, vec![".", "..", "localization", "worlds"]);

    let after: Vec<String> = requests
        .read_directory(&base, Some("*"), Some("Localization"))
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(after, vec!["readme.txt", "worlds"]);

    let localization = requests.open("base\\localization").unwrap();
    let langs: Vec<String> = requests
        .read_directory(&localization, Some("??-??"), None)
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(langs, vec!["en-us"]);
}

#[test]
fn foreign_language_content_is_absent() {
    let m = mounted();
    let requests = m.session.requests();
    assert_eq!(
        requests
            .open("base\\localization\\fr-fr\\voice.wem")
            .unwrap_err(),
        FsStatus::ObjectPathNotFound
    );
}

#[test]
fn every_mutation_is_denied() {
    let m = mounted();
    let requests = m.session.requests();
    for op in Mutation::ALL {
        assert_eq!(
            requests.reject(op, "\\base\\readme.txt"),
            FsStatus::MediaWriteProtected
        );
    }
}

#[test]
fn concurrent_readers_share_the_index() {
    let m = mounted();
    let requests = m.session.requests();

    std::thread::scope(|scope| {
        for _ in 0..8 {
            let requests = Arc::clone(&requests);
            scope.spawn(move || {
                let ctx = requests.open("base\\readme.txt").unwrap();
                let mut buf = [0u8; 64];
                let count = requests.read(&ctx, 0, &mut buf).unwrap();
                assert_eq!(&buf[..count], b"patched readme");
                requests.close(ctx);
            });
        }
    });
}
