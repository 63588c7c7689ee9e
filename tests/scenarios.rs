//! End-to-end scenarios and property checks against the public surface.
//!
//! Each test opens its own named instance (backed by a private in-memory
//! database, or a `tempfile` path for the persistence case) so tests can run
//! concurrently without tripping over the shared per-process instance
//! registry.

use std::sync::Once;

use agentfs::{Error, InstanceConfig, InodeKind, OpenFlags};

static INIT_LOGGING: Once = Once::new();

/// Installs a `tracing` subscriber once per test binary so `tracing::warn!`
/// and friends (e.g. a `close`-time deletion failure) show up with
/// `cargo test -- --nocapture` instead of going nowhere.
fn init_logging() {
    INIT_LOGGING.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

async fn memory_instance(id: &str) -> std::sync::Arc<agentfs::Filesystem> {
    init_logging();
    agentfs::instance::open(id, InstanceConfig::memory()).await.expect("open instance")
}

#[tokio::test]
async fn hard_link_shares_inode_and_survives_source_unlink() {
    let fs = memory_instance("hard-link").await;

    fs.write_file("/a", b"test content\n").await.unwrap();
    fs.link("/a", "/b").await.unwrap();

    let a = fs.stat("/a").await.unwrap();
    let b = fs.stat("/b").await.unwrap();
    assert_eq!(a.ino, b.ino);
    assert!(b.nlink >= 2);

    fs.write_file("/b", b"modified").await.unwrap();
    assert_eq!(fs.read_file("/a").await.unwrap(), b"modified");

    fs.unlink("/a").await.unwrap();
    assert_eq!(fs.read_file("/b").await.unwrap(), b"modified");
    assert_eq!(fs.stat("/b").await.unwrap().nlink, 1);
}

#[tokio::test]
async fn sparse_pwrite_leaves_holes_and_reports_correct_size() {
    let fs = memory_instance("sparse-pwrite").await;

    let fd = fs.open("/s", OpenFlags::RDWR | OpenFlags::CREAT).await.unwrap();
    fs.pwrite(fd, 0, &[b'A'; 4096]).await.unwrap();
    fs.pwrite(fd, 12288, &[b'B'; 4096]).await.unwrap();
    fs.pwrite(fd, 20480, &[b'C'; 4096]).await.unwrap();
    fs.close(fd).await.unwrap();

    let meta = fs.stat("/s").await.unwrap();
    assert_eq!(meta.size, 24576);

    let mut expected = Vec::new();
    expected.extend(std::iter::repeat(b'A').take(4096));
    expected.extend(std::iter::repeat(0u8).take(8192));
    expected.extend(std::iter::repeat(b'B').take(4096));
    expected.extend(std::iter::repeat(0u8).take(4096));
    expected.extend(std::iter::repeat(b'C').take(4096));

    assert_eq!(fs.read_file("/s").await.unwrap(), expected);
}

#[tokio::test]
async fn rename_atomically_replaces_existing_destination() {
    let fs = memory_instance("rename-replace").await;

    fs.write_file("/x", b"1").await.unwrap();
    fs.write_file("/y", b"2").await.unwrap();
    fs.rename("/x", "/y").await.unwrap();

    assert!(!fs.exists("/x").await.unwrap());
    assert_eq!(fs.read_file("/y").await.unwrap(), b"1");
}

#[tokio::test]
async fn rmdir_fails_until_directory_is_emptied() {
    let fs = memory_instance("rmdir-empty").await;

    fs.mkdir("/d", false).await.unwrap();
    fs.write_file("/d/f", b"z").await.unwrap();

    let err = fs.rmdir("/d").await.unwrap_err();
    assert!(matches!(err, Error::NotEmpty));

    fs.unlink("/d/f").await.unwrap();
    fs.rmdir("/d").await.unwrap();
    assert!(!fs.exists("/d").await.unwrap());
}

#[tokio::test]
async fn link_reports_missing_source_existing_destination_and_directory_target() {
    let fs = memory_instance("link-errors").await;

    let err = fs.link("/nope", "/dst").await.unwrap_err();
    assert!(matches!(err, Error::NotFound));

    fs.write_file("/a", b"").await.unwrap();
    fs.write_file("/b", b"").await.unwrap();
    let err = fs.link("/a", "/b").await.unwrap_err();
    assert!(matches!(err, Error::Exists));

    fs.mkdir("/dd", false).await.unwrap();
    let err = fs.link("/dd", "/e").await.unwrap_err();
    assert!(matches!(err, Error::Permission | Error::IsDirectory));
}

#[tokio::test]
async fn data_persists_across_instance_reopen_on_same_file() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agentfs.sqlite");

    {
        let fs = agentfs::instance::open("persist-first-open", InstanceConfig::file(&path)).await.unwrap();
        fs.write_file("/persist", b"hello").await.unwrap();
    }
    agentfs::instance::close("persist-first-open").await;

    let fs = agentfs::instance::open("persist-reopen", InstanceConfig::file(&path)).await.unwrap();
    assert_eq!(fs.read_file("/persist").await.unwrap(), b"hello");
}

#[tokio::test]
async fn property_sparse_hole_reads_zero() {
    let fs = memory_instance("prop-sparse").await;

    let fd = fs.open("/h", OpenFlags::RDWR | OpenFlags::CREAT).await.unwrap();
    fs.pwrite(fd, 8192, b"tail").await.unwrap();
    let hole = fs.pread(fd, 0, 8192).await.unwrap();
    fs.close(fd).await.unwrap();

    assert_eq!(hole, vec![0u8; 8192]);
}

#[tokio::test]
async fn property_round_trip_arbitrary_bytes() {
    let fs = memory_instance("prop-roundtrip").await;

    let bytes: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
    fs.write_file("/blob", &bytes).await.unwrap();
    assert_eq!(fs.read_file("/blob").await.unwrap(), bytes);
}

#[tokio::test]
async fn property_failed_link_leaves_directory_unchanged() {
    let fs = memory_instance("prop-atomic").await;

    fs.write_file("/a", b"1").await.unwrap();
    fs.write_file("/b", b"2").await.unwrap();

    let before = fs.readdir("/").await.unwrap();
    let before_names: Vec<_> = before.iter().map(|e| e.name.clone()).collect();

    let err = fs.link("/a", "/b").await.unwrap_err();
    assert!(matches!(err, Error::Exists));

    let after = fs.readdir("/").await.unwrap();
    let after_names: Vec<_> = after.iter().map(|e| e.name.clone()).collect();

    assert_eq!(before_names.len(), after_names.len());
    for name in &before_names {
        assert!(after_names.contains(name));
    }
}

#[tokio::test]
async fn property_open_unlinked_survives_until_close() {
    let fs = memory_instance("prop-open-unlinked").await;

    fs.write_file("/ghost", b"alive").await.unwrap();
    let fd = fs.open("/ghost", OpenFlags::RDWR).await.unwrap();

    fs.unlink("/ghost").await.unwrap();
    assert!(matches!(fs.stat("/ghost").await.unwrap_err(), Error::NotFound));

    fs.pwrite(fd, 5, b" still here").await.unwrap();
    let content = fs.pread(fd, 0, 16).await.unwrap();
    assert_eq!(content, b"alive still here");

    fs.close(fd).await.unwrap();
    // The inode is gone once the last descriptor closes; reopening by the
    // old name is impossible since no dirent ever pointed at it again.
    assert!(matches!(fs.stat("/ghost").await.unwrap_err(), Error::NotFound));
}

#[tokio::test]
async fn property_idempotent_recursive_mkdir() {
    let fs = memory_instance("prop-mkdir").await;

    fs.mkdir("/a/b/c", true).await.unwrap();
    fs.mkdir("/a/b/c", true).await.unwrap();
    assert_eq!(fs.stat("/a/b/c").await.unwrap().kind, InodeKind::Directory);

    let err = fs.mkdir("/a/b/c", false).await.unwrap_err();
    assert!(matches!(err, Error::Exists));
}

#[tokio::test]
async fn property_link_count_matches_dirent_fanout() {
    let fs = memory_instance("prop-nlink").await;

    fs.mkdir("/parent", false).await.unwrap();
    fs.mkdir("/parent/child1", false).await.unwrap();
    fs.mkdir("/parent/child2", false).await.unwrap();

    // A directory's nlink is 2 (self + its own ".") plus one per child dir.
    assert_eq!(fs.stat("/parent").await.unwrap().nlink, 4);
    assert_eq!(fs.stat("/parent/child1").await.unwrap().nlink, 2);
}

#[tokio::test]
async fn opening_a_directory_for_writing_is_rejected() {
    let fs = memory_instance("dir-write-guard").await;

    fs.mkdir("/somedir", false).await.unwrap();

    let err = fs.open("/somedir", OpenFlags::WRONLY).await.unwrap_err();
    assert!(matches!(err, Error::IsDirectory));

    let err = fs.open("/somedir", OpenFlags::RDWR).await.unwrap_err();
    assert!(matches!(err, Error::IsDirectory));

    // Reading a directory through the low-level surface is rejected too.
    let fd = fs.open("/somedir", OpenFlags::RDONLY).await.unwrap();
    let err = fs.read(fd, 16).await.unwrap_err();
    assert!(matches!(err, Error::IsDirectory));
    fs.close(fd).await.unwrap();
}
