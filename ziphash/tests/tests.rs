use predicates::prelude::*;
use std::path::Path;

/// Source tree with two subdirectories:
///
/// ```text
/// src
/// |- A
/// |  |- a.txt
/// |  |- nested
/// |     |- b.csv
/// |     |- skip.bin
/// |- B
///    |- only.bin
/// ```
fn setup_test_env() -> tempfile::TempDir {
    let tmp_dir = tempfile::tempdir().unwrap();
    let nested = tmp_dir.path().join("src").join("A").join("nested");
    std::fs::create_dir_all(&nested).unwrap();
    std::fs::write(tmp_dir.path().join("src").join("A").join("a.txt"), "alpha").unwrap();
    std::fs::write(nested.join("b.csv"), "1,2,3").unwrap();
    std::fs::write(nested.join("skip.bin"), [0u8, 1, 2]).unwrap();
    let b = tmp_dir.path().join("src").join("B");
    std::fs::create_dir_all(&b).unwrap();
    std::fs::write(b.join("only.bin"), [3u8, 4, 5]).unwrap();
    tmp_dir
}

/// Command preconfigured with SRC, DST and a lock file private to `root`.
fn ziphash(root: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::cargo_bin("ziphash").unwrap();
    cmd.arg(root.join("src"))
        .arg(root.join("dst"))
        .arg("--lock-file")
        .arg(root.join("ziphash.lock"));
    cmd
}

fn entry_names(zip_path: &Path) -> Vec<String> {
    let archive = zip::ZipArchive::new(std::fs::File::open(zip_path).unwrap()).unwrap();
    let mut names: Vec<String> = archive.file_names().map(str::to_owned).collect();
    names.sort();
    names
}

fn digest(path: &Path, algorithm: &str) -> String {
    tokio::runtime::Runtime::new()
        .unwrap()
        .block_on(common::hash::hash_file(path, algorithm))
        .unwrap()
}

fn is_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path).unwrap().next().is_none()
}

#[test]
fn check_ziphash_help() {
    let mut cmd = assert_cmd::Command::cargo_bin("ziphash").unwrap();
    cmd.arg("--help").assert().success();
}

#[test]
fn test_filtered_archive_with_pruning() {
    let tmp_dir = setup_test_env();
    let root = tmp_dir.path();
    let output = ziphash(root)
        .args(["--fzip", "--fmpt", "--hash", "sha256"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let dst = root.join("dst");
    assert_eq!(
        entry_names(&dst.join("A.zip")),
        vec!["a.txt", "nested/b.csv"]
    );
    assert!(!dst.join("B.zip").exists());
    let manifest = std::fs::read_to_string(dst.join("hashes.txt")).unwrap();
    assert_eq!(
        manifest,
        format!("A.zip (sha256): {}\n", digest(&dst.join("A.zip"), "sha256"))
    );
    // the fingerprint printed on stdout is the digest of the manifest
    let fingerprint = digest(&dst.join("hashes.txt"), "sha256");
    assert_eq!(String::from_utf8(output).unwrap().trim(), fingerprint);
    // the lock is released when the run ends
    assert!(!root.join("ziphash.lock").exists());
}

#[test]
fn test_unfiltered_archive_includes_everything() {
    let tmp_dir = setup_test_env();
    let root = tmp_dir.path();
    ziphash(root).assert().success();
    let dst = root.join("dst");
    assert_eq!(
        entry_names(&dst.join("A.zip")),
        vec!["a.txt", "nested/b.csv", "nested/skip.bin"]
    );
    assert_eq!(entry_names(&dst.join("B.zip")), vec!["only.bin"]);
    let manifest = std::fs::read_to_string(dst.join("hashes.txt")).unwrap();
    let lines: Vec<&str> = manifest.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("A.zip (sha3_256): "));
    assert!(lines[1].starts_with("B.zip (sha3_256): "));
}

#[test]
fn test_missing_source_exits_with_error() {
    let tmp_dir = tempfile::tempdir().unwrap();
    ziphash(tmp_dir.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("does not exist"));
    assert!(!tmp_dir.path().join("dst").exists());
}

#[test]
fn test_held_lock_exits_with_timeout_status() {
    let tmp_dir = setup_test_env();
    let root = tmp_dir.path();
    let lock = root.join("ziphash.lock");
    std::fs::write(&lock, "1").unwrap();
    ziphash(root)
        .args(["--lock-timeout", "300ms"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("could not acquire lock"));
    // nothing ran and the foreign marker is left alone
    assert!(!root.join("dst").exists());
    assert_eq!(std::fs::read_to_string(&lock).unwrap(), "1");
}

#[test]
fn test_declined_move_keeps_sources() {
    let tmp_dir = setup_test_env();
    let root = tmp_dir.path();
    ziphash(root)
        .arg("--mv")
        .write_stdin("n\n")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("write Y to confirm"))
        .stderr(predicate::str::contains("was not confirmed"));
    let src = root.join("src");
    assert_eq!(
        std::fs::read_to_string(src.join("A").join("a.txt")).unwrap(),
        "alpha"
    );
    assert!(src.join("B").join("only.bin").exists());
    // archives and manifest were produced before the question
    assert!(root.join("dst").join("hashes.txt").exists());
}

#[test]
fn test_closed_stdin_declines_move() {
    let tmp_dir = setup_test_env();
    let root = tmp_dir.path();
    ziphash(root).arg("--mv").write_stdin("").assert().code(1);
    assert!(root.join("src").join("A").join("a.txt").exists());
}

#[test]
fn test_confirmed_move_clears_sources() {
    let tmp_dir = setup_test_env();
    let root = tmp_dir.path();
    ziphash(root)
        .args(["--mv", "--fmv"])
        .write_stdin("y\n")
        .assert()
        .success();
    let src = root.join("src");
    assert!(is_empty_dir(&src.join("A")));
    assert!(is_empty_dir(&src.join("B")));
    let dst = root.join("dst");
    assert!(dst.join("A").join("a.txt").exists());
    assert!(dst.join("A").join("nested").join("b.csv").exists());
    assert!(!dst.join("A").join("nested").join("skip.bin").exists());
    assert!(!dst.join("B").exists());
}

#[test]
fn test_unsafe_move_does_not_ask() {
    let tmp_dir = setup_test_env();
    let root = tmp_dir.path();
    ziphash(root)
        .args(["--mv", "--unsafe"])
        .assert()
        .success()
        .stdout(predicate::str::contains("confirm").not());
    assert!(is_empty_dir(&root.join("src").join("A")));
    assert!(root.join("dst").join("B").join("only.bin").exists());
}

#[test]
fn test_source_as_destination_is_rejected() {
    let tmp_dir = setup_test_env();
    let root = tmp_dir.path();
    let src = root.join("src");
    assert_cmd::Command::cargo_bin("ziphash")
        .unwrap()
        .arg(&src)
        .arg(&src)
        .arg("--mv")
        .arg("--lock-file")
        .arg(root.join("ziphash.lock"))
        .write_stdin("n\n")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("confirm").not())
        .stderr(predicate::str::contains("must not be the source directory"));
    assert_eq!(
        std::fs::read_to_string(src.join("A").join("a.txt")).unwrap(),
        "alpha"
    );
    assert_eq!(
        std::fs::read_to_string(src.join("A").join("nested").join("b.csv")).unwrap(),
        "1,2,3"
    );
    assert!(!src.join("A.zip").exists());
}

#[test]
fn test_copy_root_equal_to_destination_is_rejected() {
    let tmp_dir = setup_test_env();
    let root = tmp_dir.path();
    ziphash(root)
        .arg("--cpy")
        .arg(root.join("dst"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("must not be the destination directory"));
    assert!(!root.join("dst").join("A.zip").exists());
}

#[test]
fn test_named_subdirectory_and_copy_root() {
    let tmp_dir = setup_test_env();
    let root = tmp_dir.path();
    let cpy = root.join("cpy");
    ziphash(root)
        .args(["--sub", "--fcpy", "--cpy"])
        .arg(&cpy)
        .write_stdin("batch-1\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Insert subdirectory name: "));
    let dst_dir = root.join("dst").join("batch-1");
    let cpy_dir = cpy.join("batch-1");
    assert!(dst_dir.join("A.zip").exists());
    assert_eq!(
        std::fs::read(dst_dir.join("hashes.txt")).unwrap(),
        std::fs::read(cpy_dir.join("hashes.txt")).unwrap()
    );
    assert!(cpy_dir.join("A").join("a.txt").exists());
    assert!(!cpy_dir.join("A").join("nested").join("skip.bin").exists());
    assert!(!cpy_dir.join("B").exists());
}

#[test]
fn test_summary_is_printed() {
    let tmp_dir = setup_test_env();
    ziphash(tmp_dir.path())
        .args(["--fzip", "--fmpt", "--summary"])
        .assert()
        .success()
        .stdout(predicate::str::contains("archives written: 1"))
        .stdout(predicate::str::contains("archives skipped: 1"));
}

#[test]
fn test_log_file_records_run() {
    let tmp_dir = setup_test_env();
    let root = tmp_dir.path();
    let log_file = root.join("run.log");
    ziphash(root)
        .arg("--log-file")
        .arg(&log_file)
        .assert()
        .success();
    let log = std::fs::read_to_string(&log_file).unwrap();
    assert!(log.contains("process completed successfully"));
    assert!(log.contains("user="));
    assert!(log.contains("src="));
    assert!(!log.contains("skip_confirmation"), "arguments must not be dumped into spans");
    assert!(!log.contains('\u{1b}'), "log file must not contain ANSI escapes");
}

#[test]
fn test_quiet_hides_progress() {
    let tmp_dir = setup_test_env();
    ziphash(tmp_dir.path())
        .arg("-q")
        .assert()
        .success()
        .stderr(predicate::str::contains("process completed successfully").not());
}
