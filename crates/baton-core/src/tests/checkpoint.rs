use std::fs;

use crate::checkpoint::{
    self, manifest_name, reader, volume_name, writer, CheckpointOptions, Manifest, MANIFEST_FILE,
};
use crate::error::BatonError;
use crate::testutil::{fast_retry, read_tree, write_tree, FailingStore, MemoryStore, RecordingStore};

fn opts(chunk_size_limit: u64) -> CheckpointOptions {
    CheckpointOptions {
        chunk_size_limit,
        retry: fast_retry(),
        ..Default::default()
    }
}

/// One 8 KiB file: tar stream of 9728 bytes, three volumes at 4096.
fn fixture(work: &std::path::Path) -> Vec<String> {
    write_tree(
        work,
        &[("blob.bin", &[0x5Au8; 8192]), ("notes/readme.txt", b"hello")],
    );
    vec!["blob.bin".to_string(), "notes".to_string()]
}

#[test]
fn write_then_restore_roundtrip() {
    let tmp = tempfile::tempdir().unwrap();
    let work = tmp.path().join("work");
    let rel = fixture(&work);
    let before = read_tree(&work);
    let store = MemoryStore::new();

    let count = writer::write(&store, &work, &rel, "nightly", None, &opts(4096)).unwrap();
    assert!(count >= 2);
    // Source consumed by the archive walk.
    assert!(!work.join("blob.bin").exists());

    let mut expected: Vec<String> = (1..=count).map(|i| volume_name("nightly", i)).collect();
    expected.push(manifest_name("nightly"));
    expected.sort();
    assert_eq!(store.names(), expected);

    // Member file names carry the transform chain, no encryption here.
    let (file_name, _) = store.raw(&volume_name("nightly", 1)).unwrap();
    assert_eq!(file_name, "vol001.tar.zst");
    let (file_name, _) = store.raw(&manifest_name("nightly")).unwrap();
    assert_eq!(file_name, MANIFEST_FILE);

    let out = tmp.path().join("restored");
    reader::restore(&store, &out, "nightly", None).unwrap();
    assert_eq!(read_tree(&out), before);
}

#[test]
fn encrypted_write_then_restore() {
    let tmp = tempfile::tempdir().unwrap();
    let work = tmp.path().join("work");
    let rel = fixture(&work);
    let before = read_tree(&work);
    let store = MemoryStore::new();

    writer::write(&store, &work, &rel, "nightly", Some("hunter2"), &opts(4096)).unwrap();

    let (file_name, _) = store.raw(&volume_name("nightly", 1)).unwrap();
    assert_eq!(file_name, "vol001.tar.zst.enc");

    let out = tmp.path().join("restored");
    reader::restore(&store, &out, "nightly", Some("hunter2")).unwrap();
    assert_eq!(read_tree(&out), before);
}

#[test]
fn encrypted_restore_without_secret_is_refused() {
    let tmp = tempfile::tempdir().unwrap();
    let work = tmp.path().join("work");
    let rel = fixture(&work);
    let store = MemoryStore::new();
    writer::write(&store, &work, &rel, "nightly", Some("hunter2"), &opts(4096)).unwrap();

    let out = tmp.path().join("restored");
    let err = reader::restore(&store, &out, "nightly", None).unwrap_err();
    assert!(matches!(err, BatonError::EncryptedWithoutSecret(_)), "{err}");
}

#[test]
fn encrypted_restore_with_wrong_secret_fails_closed() {
    let tmp = tempfile::tempdir().unwrap();
    let work = tmp.path().join("work");
    let rel = fixture(&work);
    let store = MemoryStore::new();
    writer::write(&store, &work, &rel, "nightly", Some("hunter2"), &opts(4096)).unwrap();

    let out = tmp.path().join("restored");
    let err = reader::restore(&store, &out, "nightly", Some("*******")).unwrap_err();
    assert!(matches!(err, BatonError::WrongSecretOrCorrupt), "{err}");
}

#[test]
fn tiny_files_still_split_into_contiguous_volumes() {
    let tmp = tempfile::tempdir().unwrap();
    let work = tmp.path().join("work");
    // 26 payload bytes over three files; the tar framing around them is
    // 4096 bytes, so a 1536-byte limit yields exactly three volumes.
    write_tree(
        &work,
        &[
            ("a.txt", b"abcdefghij"),
            ("b.txt", b"klmnopqrst"),
            ("c.txt", b"uvwxyz"),
        ],
    );
    let before = read_tree(&work);
    let rel = vec!["a.txt".to_string(), "b.txt".to_string(), "c.txt".to_string()];
    let store = MemoryStore::new();

    let count = writer::write(&store, &work, &rel, "tiny", None, &opts(1536)).unwrap();
    assert_eq!(count, 3);

    let (_, manifest_bytes) = store.raw(&manifest_name("tiny")).unwrap();
    let manifest: Manifest = serde_json::from_slice(&manifest_bytes).unwrap();
    assert_eq!(
        manifest.volumes,
        vec![
            volume_name("tiny", 1),
            volume_name("tiny", 2),
            volume_name("tiny", 3)
        ]
    );

    let out = tmp.path().join("restored");
    reader::restore(&store, &out, "tiny", None).unwrap();
    assert_eq!(read_tree(&out), before);
}

#[test]
fn manifest_uploads_last() {
    let tmp = tempfile::tempdir().unwrap();
    let work = tmp.path().join("work");
    let rel = fixture(&work);
    let (store, log) = RecordingStore::new();

    let count = writer::write(&store, &work, &rel, "nightly", None, &opts(4096)).unwrap();

    let entries = log.entries();
    assert_eq!(entries.len() as u32, count + 1);
    assert_eq!(entries.last().unwrap(), &manifest_name("nightly"));
    for (i, entry) in entries[..entries.len() - 1].iter().enumerate() {
        assert_eq!(*entry, volume_name("nightly", i as u32 + 1));
    }
}

#[test]
fn failed_volume_upload_publishes_no_manifest() {
    let tmp = tempfile::tempdir().unwrap();
    let work = tmp.path().join("work");
    let rel = fixture(&work);
    let store = FailingStore::failing_on(&volume_name("nightly", 2));

    let err = writer::write(&store, &work, &rel, "nightly", None, &opts(4096)).unwrap_err();
    match err {
        BatonError::UploadExhausted { name, attempts, .. } => {
            assert_eq!(name, volume_name("nightly", 2));
            assert_eq!(attempts, fast_retry().attempts);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!store.inner.names().contains(&manifest_name("nightly")));

    // Without a manifest the checkpoint does not exist.
    let out = tmp.path().join("restored");
    let err = reader::restore(&store, &out, "nightly", None).unwrap_err();
    assert!(matches!(err, BatonError::ManifestNotFound(_)), "{err}");
}

#[test]
fn undercounting_manifest_aborts_restore() {
    let tmp = tempfile::tempdir().unwrap();
    let work = tmp.path().join("work");
    let rel = fixture(&work);
    let store = MemoryStore::new();
    let count = writer::write(&store, &work, &rel, "nightly", None, &opts(4096)).unwrap();
    assert!(count >= 3);

    // Forge a manifest that records one volume too few; the joiner must
    // notice when the stream asks past the recorded count.
    let truncated = Manifest {
        chunk_count: count - 1,
        volumes: (1..count).map(|i| volume_name("nightly", i)).collect(),
        ..Manifest::new("nightly", Vec::new(), false)
    };
    store.insert_raw(
        &manifest_name("nightly"),
        MANIFEST_FILE,
        serde_json::to_vec(&truncated).unwrap(),
    );

    let out = tmp.path().join("restored");
    let err = reader::restore(&store, &out, "nightly", None).unwrap_err();
    match err {
        BatonError::VolumeCountMismatch { requested, recorded } => {
            assert_eq!(requested, count);
            assert_eq!(recorded, count - 1);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn empty_manifest_is_rejected_not_indexed() {
    let tmp = tempfile::tempdir().unwrap();
    let store = MemoryStore::new();
    // A manifest with no volumes never comes from the writer; treat it as
    // corrupt store data rather than trying to fetch volume 1.
    let forged = Manifest::new("nightly", Vec::new(), false);
    store.insert_raw(
        &manifest_name("nightly"),
        MANIFEST_FILE,
        serde_json::to_vec(&forged).unwrap(),
    );

    let out = tmp.path().join("restored");
    let err = reader::restore(&store, &out, "nightly", None).unwrap_err();
    assert!(matches!(err, BatonError::InvalidManifest(_)), "{err}");
}

#[test]
fn manifest_validate_enforces_volume_naming() {
    let good = Manifest::new(
        "nightly",
        vec![volume_name("nightly", 1), volume_name("nightly", 2)],
        false,
    );
    good.validate().unwrap();

    let mut bad = good.clone();
    bad.volumes[1] = "nightly-volume2".to_string();
    assert!(matches!(
        bad.validate(),
        Err(BatonError::InvalidManifest(_))
    ));

    let mut bad = good;
    bad.chunk_count = 3;
    assert!(matches!(
        bad.validate(),
        Err(BatonError::InvalidManifest(_))
    ));
}

#[test]
fn rewrite_supersedes_previous_checkpoint() {
    let tmp = tempfile::tempdir().unwrap();
    let work = tmp.path().join("work");
    let rel = fixture(&work);
    let store = MemoryStore::new();
    let first = writer::write(&store, &work, &rel, "nightly", None, &opts(4096)).unwrap();
    assert!(first >= 3);

    // A smaller second cycle must not leave the first cycle's tail volumes
    // behind.
    write_tree(&work, &[("tiny.txt", b"v2")]);
    let second =
        writer::write(&store, &work, &["tiny.txt".to_string()], "nightly", None, &opts(1 << 20))
            .unwrap();
    assert_eq!(second, 1);

    let mut expected = vec![volume_name("nightly", 1), manifest_name("nightly")];
    expected.sort();
    assert_eq!(store.names(), expected);

    let out = tmp.path().join("restored");
    reader::restore(&store, &out, "nightly", None).unwrap();
    assert_eq!(fs::read(out.join("tiny.txt")).unwrap(), b"v2");
}

#[test]
fn discard_removes_all_blobs() {
    let tmp = tempfile::tempdir().unwrap();
    let work = tmp.path().join("work");
    let rel = fixture(&work);
    let store = MemoryStore::new();
    writer::write(&store, &work, &rel, "nightly", None, &opts(4096)).unwrap();
    assert!(!store.names().is_empty());

    checkpoint::discard(&store, "nightly", 500);
    assert!(store.names().is_empty());
}

#[test]
fn restore_from_empty_store_reports_nothing_to_resume() {
    let tmp = tempfile::tempdir().unwrap();
    let store = MemoryStore::new();
    let err = reader::restore(&store, tmp.path(), "nightly", None).unwrap_err();
    assert!(matches!(err, BatonError::ManifestNotFound(_)), "{err}");
}

/// Store wrapper that samples how many files sit in the volume spool
/// directory at every upload, when chunk processing is at its peak.
struct SpoolWatchingStore {
    inner: MemoryStore,
    spool_root: std::path::PathBuf,
    max_spooled: std::sync::atomic::AtomicUsize,
    samples: std::sync::atomic::AtomicUsize,
}

impl SpoolWatchingStore {
    fn new(spool_root: &std::path::Path) -> Self {
        Self {
            inner: MemoryStore::new(),
            spool_root: spool_root.to_path_buf(),
            max_spooled: std::sync::atomic::AtomicUsize::new(0),
            samples: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    fn spooled_files(&self) -> usize {
        let mut count = 0;
        for entry in fs::read_dir(&self.spool_root).unwrap().flatten() {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with("baton-spool-") {
                count += fs::read_dir(entry.path()).unwrap().count();
            }
        }
        count
    }
}

impl baton_storage::BlobStore for SpoolWatchingStore {
    fn upload(
        &self,
        name: &str,
        file: &std::path::Path,
        retention_days: Option<u32>,
    ) -> baton_storage::Result<()> {
        use std::sync::atomic::Ordering;
        self.max_spooled
            .fetch_max(self.spooled_files(), Ordering::SeqCst);
        self.samples.fetch_add(1, Ordering::SeqCst);
        self.inner.upload(name, file, retention_days)
    }
    fn download(
        &self,
        name: &str,
        dest_dir: &std::path::Path,
    ) -> baton_storage::Result<std::path::PathBuf> {
        self.inner.download(name, dest_dir)
    }
    fn delete(&self, name: &str) -> baton_storage::Result<()> {
        self.inner.delete(name)
    }
    fn exists(&self, name: &str) -> baton_storage::Result<bool> {
        self.inner.exists(name)
    }
}

#[test]
fn write_keeps_at_most_two_chunk_files_spooled() {
    use std::sync::atomic::Ordering;

    let tmp = tempfile::tempdir().unwrap();
    let work = tmp.path().join("work");
    let rel = fixture(&work);
    // The spool lives beside the working dir.
    let store = SpoolWatchingStore::new(tmp.path());

    let count = writer::write(&store, &work, &rel, "nightly", None, &opts(4096)).unwrap();
    assert!(count >= 3);
    assert!(store.samples.load(Ordering::SeqCst) as u32 >= count);

    // Each volume is uploaded and deleted before the next one opens.
    let max = store.max_spooled.load(Ordering::SeqCst);
    assert!(max >= 1, "uploads never saw the spool");
    assert!(max <= 2, "{max} chunk files spooled at once");
}

#[test]
fn volume_limit_fails_the_write() {
    let tmp = tempfile::tempdir().unwrap();
    let work = tmp.path().join("work");
    let rel = fixture(&work);
    let store = MemoryStore::new();

    let limited = CheckpointOptions {
        max_volumes: 2,
        ..opts(4096)
    };
    let err = writer::write(&store, &work, &rel, "nightly", None, &limited).unwrap_err();
    assert!(matches!(err, BatonError::VolumeLimitExceeded(2)), "{err}");
    assert!(!store.names().contains(&manifest_name("nightly")));
}
