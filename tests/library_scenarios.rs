//! End-to-end behavior of libraries over real container files.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use gitarchive::library::{ErrorKind, Library, LibraryId, LibraryOptions, LocationId, Mode, RepositoryId};
use gitarchive::storage::{CommitOutcome, EncodedObject, ObjectStorer, Reference, ReferenceStorer};
use gitarchive::transaction::sidecar_path;
use tempfile::TempDir;

fn setup(options: LibraryOptions) -> (TempDir, Library) {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();
    let dir = TempDir::new().unwrap();
    let library = Library::open(LibraryId::new("scenarios").unwrap(), dir.path(), options).unwrap();
    (dir, library)
}

fn transactional() -> LibraryOptions {
    LibraryOptions::new().transactional(true)
}

fn repo_id(id: &str) -> RepositoryId {
    RepositoryId::new(id).unwrap()
}

#[test]
fn test_init_commit_then_commit_again() {
    let (_dir, library) = setup(transactional());
    let id = repo_id("github.com/foo/bar");

    assert!(!library.has(&id).unwrap());
    let mut repo = library.init(&id).unwrap();
    assert!(library.has(&id).unwrap());
    assert_eq!(library.init(&id).unwrap_err().kind(), ErrorKind::RepositoryExists);

    repo.commit().unwrap();
    assert!(library.has(&id).unwrap());

    let err = repo.commit().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RepoAlreadyClosed);
    assert_eq!(repo.close().unwrap_err().kind(), ErrorKind::RepoAlreadyClosed);
}

#[test]
fn test_reader_isolation() {
    let (_dir, library) = setup(transactional());
    let id = repo_id("github.com/foo/bar");
    library.init(&id).unwrap().commit().unwrap();

    let before = library.get(&id, Mode::ReadOnly).unwrap();

    let mut writer = library.get(&id, Mode::ReadWrite).unwrap();
    let blob = writer.storer().set_encoded_object(&EncodedObject::blob("v1")).unwrap();
    writer.storer().set_reference(&Reference::hash("refs/tags/v1", blob)).unwrap();

    let during = library.get(&id, Mode::ReadOnly).unwrap();
    assert!(during.storer().reference("refs/tags/v1").is_err());

    writer.commit().unwrap();

    assert!(before.storer().reference("refs/tags/v1").is_err());
    assert!(!before.storer().has_encoded_object(blob).unwrap());

    let after = library.get(&id, Mode::ReadOnly).unwrap();
    assert_eq!(after.storer().reference("refs/tags/v1").unwrap().target_id(), Some(blob));
}

#[test]
fn test_rollback_discards_writes() {
    let (_dir, library) = setup(transactional());
    let id = repo_id("github.com/foo/bar");
    library.init(&id).unwrap().commit().unwrap();

    let container = library.container_path(&LocationId::from_repository(&id));
    let len = fs::metadata(&container).unwrap().len();

    let mut writer = library.get(&id, Mode::ReadWrite).unwrap();
    let blob = writer.storer().set_encoded_object(&EncodedObject::blob("lost")).unwrap();
    writer.storer().set_reference(&Reference::hash("refs/heads/lost", blob)).unwrap();
    writer.close().unwrap();

    assert_eq!(fs::metadata(&container).unwrap().len(), len);
    assert!(!sidecar_path(&container).exists());

    let reader = library.get(&id, Mode::ReadOnly).unwrap();
    assert!(reader.storer().reference("refs/heads/lost").is_err());
    assert!(!reader.storer().has_encoded_object(blob).unwrap());
}

#[test]
fn test_empty_commit() {
    let (_dir, library) = setup(transactional());
    let id = repo_id("github.com/foo/bar");
    library.init(&id).unwrap().commit().unwrap();

    let mut repo = library.get(&id, Mode::ReadWrite).unwrap();
    assert_eq!(repo.commit().unwrap(), CommitOutcome::Empty);

    let mut repo = library.get(&id, Mode::ReadWrite).unwrap();
    assert_eq!(repo.commit_checked().unwrap_err().kind(), ErrorKind::EmptyCommit);
    assert_eq!(library.active_transactions(), 0);
}

#[test]
fn test_write_permit_timeout() {
    let (_dir, library) = setup(transactional().timeout(Duration::from_millis(100)));
    let first = library.init(&repo_id("github.com/foo/first")).unwrap();
    let location = Arc::clone(first.location());

    let start = Instant::now();
    let err = location.init(&repo_id("github.com/foo/second")).unwrap_err();
    let waited = start.elapsed();

    assert_eq!(err.kind(), ErrorKind::TransactionTimeout);
    assert!(err.is_timeout());
    assert!(waited >= Duration::from_millis(100));
    assert!(waited < Duration::from_secs(10));

    let info = location.transaction_info().unwrap();
    assert_eq!(info.repository, "github.com/foo/first");
    drop(first);
    assert!(location.transaction_info().is_none());
}

#[test]
fn test_single_writer_per_location() {
    let (_dir, library) = setup(transactional());
    let library = Arc::new(library);
    let id = repo_id("github.com/foo/bar");
    library.init(&id).unwrap().commit().unwrap();

    let mut first = library.get(&id, Mode::ReadWrite).unwrap();
    let committed = Arc::new(AtomicBool::new(false));

    let waiter = {
        let library = Arc::clone(&library);
        let committed = Arc::clone(&committed);
        let id = id.clone();
        thread::spawn(move || {
            let mut second = library.get(&id, Mode::ReadWrite).unwrap();
            assert!(committed.load(Ordering::SeqCst));
            // the first writer's tag is visible to the next writer
            assert!(second.storer().reference("refs/tags/first").is_ok());
            second.close().unwrap();
        })
    };

    thread::sleep(Duration::from_millis(150));
    let blob = first.storer().set_encoded_object(&EncodedObject::blob("first")).unwrap();
    first.storer().set_reference(&Reference::hash("refs/tags/first", blob)).unwrap();
    committed.store(true, Ordering::SeqCst);
    first.commit().unwrap();

    waiter.join().unwrap();
    assert_eq!(library.active_transactions(), 0);
}

#[test]
fn test_rooted_reference_isolation() {
    let (_dir, library) = setup(transactional().rooted(true));
    let location = library.add_location(&LocationId::new("shared").unwrap()).unwrap();
    let alpha = repo_id("github.com/org/alpha");
    let beta = repo_id("github.com/org/beta");

    let mut repo = location.init(&alpha).unwrap();
    let a = repo.storer().set_encoded_object(&EncodedObject::blob("alpha")).unwrap();
    repo.storer().set_reference(&Reference::hash("refs/heads/master", a)).unwrap();
    repo.storer().set_reference(&Reference::symbolic("HEAD", "refs/heads/master")).unwrap();
    repo.commit().unwrap();

    let mut repo = location.init(&beta).unwrap();
    let b = repo.storer().set_encoded_object(&EncodedObject::blob("beta")).unwrap();
    repo.storer().set_reference(&Reference::hash("refs/heads/master", b)).unwrap();
    repo.commit().unwrap();

    let reader = location.get(&alpha, Mode::ReadOnly).unwrap();
    assert_eq!(reader.storer().reference("refs/heads/master").unwrap().target_id(), Some(a));
    assert_eq!(
        reader.storer().reference("HEAD").unwrap().symbolic_target(),
        Some("refs/heads/master")
    );
    let names: Vec<String> = reader
        .storer()
        .references()
        .unwrap()
        .iter()
        .map(|r| r.name().to_string())
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names.iter().all(|name| name == "HEAD" || name == "refs/heads/master"));

    let reader = location.get(&beta, Mode::ReadOnly).unwrap();
    assert_eq!(reader.storer().reference("refs/heads/master").unwrap().target_id(), Some(b));
    assert!(reader.storer().reference("HEAD").is_err());

    // objects are shared by the whole container
    assert!(reader.storer().has_encoded_object(a).unwrap());

    let mut ids = location.repository_ids().unwrap();
    ids.sort();
    assert_eq!(ids, vec![alpha.clone(), beta.clone()]);
    assert_eq!(library.find(&beta).unwrap().unwrap().id(), location.id());
}

#[test]
fn test_checkpoint_recovery_on_open() {
    let (dir, library) = setup(transactional());
    let id = repo_id("github.com/foo/bar");
    library.init(&id).unwrap().commit().unwrap();

    let container = library.container_path(&LocationId::from_repository(&id));
    let len = fs::metadata(&container).unwrap().len();
    drop(library);

    // a writer died after saving its checkpoint and appending half a block
    fs::write(sidecar_path(&container), len.to_string()).unwrap();
    let mut file = OpenOptions::new().append(true).open(&container).unwrap();
    file.write_all(b"partial block that never got a footer").unwrap();
    drop(file);

    let library = Library::open(LibraryId::new("reopened").unwrap(), dir.path(), transactional()).unwrap();
    assert!(library.has(&id).unwrap());
    assert_eq!(fs::metadata(&container).unwrap().len(), len);
    assert!(!sidecar_path(&container).exists());

    let mut repo = library.get(&id, Mode::ReadWrite).unwrap();
    let blob = repo.storer().set_encoded_object(&EncodedObject::blob("after")).unwrap();
    repo.storer().set_reference(&Reference::hash("refs/heads/after", blob)).unwrap();
    assert!(repo.commit().unwrap().bytes() > 0);
}

#[test]
fn test_malformed_checkpoint() {
    let (dir, library) = setup(transactional());
    let id = repo_id("github.com/foo/bar");
    library.init(&id).unwrap().commit().unwrap();
    let container = library.container_path(&LocationId::from_repository(&id));
    drop(library);

    fs::write(sidecar_path(&container), "not a number").unwrap();

    let library = Library::open(LibraryId::new("reopened").unwrap(), dir.path(), transactional()).unwrap();
    let err = library.has(&id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedCheckpointData);
}

#[test]
fn test_uncommitted_init_is_forgotten() {
    let (_dir, library) = setup(transactional());
    let id = repo_id("github.com/foo/bar");

    let repo = library.init(&id).unwrap();
    assert!(library.has(&id).unwrap());
    drop(repo);

    assert!(!library.has(&id).unwrap());
    library.init(&id).unwrap().commit().unwrap();
    assert!(library.has(&id).unwrap());
}

#[test]
fn test_reader_during_direct_write() {
    let (_dir, library) = setup(LibraryOptions::default());
    let id = repo_id("github.com/foo/bar");
    library.init(&id).unwrap().close().unwrap();

    let mut writer = library.get(&id, Mode::ReadWrite).unwrap();
    let blob = writer.storer().set_encoded_object(&EncodedObject::blob("direct")).unwrap();
    writer.storer().set_reference(&Reference::hash("refs/heads/direct", blob)).unwrap();

    assert!(library.has(&id).unwrap());
    let during = library.get(&id, Mode::ReadOnly).unwrap();
    assert!(during.storer().reference("refs/heads/direct").is_err());
    assert!(!during.storer().has_encoded_object(blob).unwrap());

    writer.close().unwrap();

    let after = library.get(&id, Mode::ReadOnly).unwrap();
    assert_eq!(after.storer().reference("refs/heads/direct").unwrap().target_id(), Some(blob));
}

#[test]
fn test_uncached_location_with_live_writer() {
    let (_dir, library) = setup(LibraryOptions::new().registry_cache(0));
    let id = repo_id("github.com/foo/bar");
    library.init(&id).unwrap().close().unwrap();

    let mut writer = library.get(&id, Mode::ReadWrite).unwrap();
    let blob = writer.storer().set_encoded_object(&EncodedObject::blob("kept")).unwrap();
    writer.storer().set_reference(&Reference::hash("refs/heads/kept", blob)).unwrap();

    // lookups reopen locations while the write is still in flight
    assert!(!library.has(&repo_id("github.com/foo/other")).unwrap());
    assert!(library.get(&id, Mode::ReadOnly).is_ok());

    writer.close().unwrap();

    let reader = library.get(&id, Mode::ReadOnly).unwrap();
    assert_eq!(reader.storer().reference("refs/heads/kept").unwrap().target_id(), Some(blob));
    assert!(reader.storer().has_encoded_object(blob).unwrap());
}
