//! Build-then-verify round trips through the manifest chain.

use std::fs;
use std::path::Path;

use pamx_core::{IntegrityFailure, IntegrityVerifier, ManifestBuilder, ManifestGate};

fn populate(root: &Path, count: usize) {
    fs::create_dir_all(root.join("app/content")).unwrap();
    for i in 0..count {
        fs::write(root.join(format!("app/module_{i}.py")), format!("VALUE = {i}\n")).unwrap();
    }
    fs::write(root.join("app/content/hello.html"), b"<h1>Hello</h1>").unwrap();
    fs::write(root.join("app/content/favicon.ico"), [0u8, 0, 1, 0]).unwrap();
}

#[test]
fn test_build_then_verify_passes() {
    let dir = tempfile::tempdir().unwrap();
    populate(dir.path(), 5);

    let output = dir.path().join("filelist.sha256");
    let patterns = [format!("{}/app", dir.path().display())];
    let report = ManifestBuilder::default().build(&patterns, &output).unwrap();
    assert_eq!(report.entry_count, 7);

    let decision = ManifestGate::default().verify(&output, &report.manifest_digest);
    assert!(decision.passed, "{:?}", decision.failure);
    assert_eq!(decision.entries_verified, 7);
}

#[test]
fn test_single_corrupted_file_fails_whole_gate() {
    let dir = tempfile::tempdir().unwrap();
    populate(dir.path(), 4);

    let output = dir.path().join("filelist.sha256");
    let patterns = [format!("{}/app/**/*", dir.path().display())];
    let report = ManifestBuilder::default().build(&patterns, &output).unwrap();

    // Last file in manifest order.
    fs::write(dir.path().join("app/module_3.py"), b"VALUE = 'tampered'\n").unwrap();

    let decision = ManifestGate::default().verify(&output, &report.manifest_digest);
    assert!(!decision.passed);
    assert_eq!(decision.entries_verified, 0);
    assert!(matches!(
        decision.failure,
        Some(IntegrityFailure::EntryMismatch { .. })
    ));
}

#[test]
fn test_edited_manifest_fails_before_entries() {
    let dir = tempfile::tempdir().unwrap();
    populate(dir.path(), 2);

    let output = dir.path().join("filelist.sha256");
    let patterns = [format!("{}/app", dir.path().display())];
    let report = ManifestBuilder::default().build(&patterns, &output).unwrap();

    // Drop the last entry; the manifest no longer matches its pinned digest.
    let text = fs::read_to_string(&output).unwrap();
    let trimmed: Vec<&str> = text.lines().take(report.entry_count - 1).collect();
    fs::write(&output, trimmed.join("\n") + "\n").unwrap();

    let decision = ManifestGate::default().verify(&output, &report.manifest_digest);
    assert!(matches!(
        decision.failure,
        Some(IntegrityFailure::ManifestDigest { .. })
    ));
}

#[test]
fn test_line_without_path_stops_check() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("good.txt");
    fs::write(&good, b"good").unwrap();
    let verifier = IntegrityVerifier::new();
    let digest = verifier.digest(&good).unwrap();

    // Second line has no path; the third names a missing file which must
    // never be reached.
    let manifest = dir.path().join("filelist.sha256");
    fs::write(
        &manifest,
        format!(
            "{digest} *{}\n{digest} *\n{digest} *{}\n",
            good.display(),
            dir.path().join("absent.txt").display()
        ),
    )
    .unwrap();
    let pinned = verifier.digest(&manifest).unwrap();

    let decision = ManifestGate::default().verify(&manifest, &pinned);
    match decision.failure {
        Some(IntegrityFailure::MalformedLine { line, .. }) => assert_eq!(line, 2),
        other => panic!("expected malformed line, got {:?}", other),
    }
}

#[test]
fn test_build_tolerates_unmatched_pattern() {
    let dir = tempfile::tempdir().unwrap();
    populate(dir.path(), 1);
    let output = dir.path().join("filelist.sha256");

    let patterns = [
        format!("{}/app", dir.path().display()),
        format!("{}/does-not-exist/*", dir.path().display()),
    ];
    let report = ManifestBuilder::default().build(&patterns, &output).unwrap();
    assert_eq!(report.entry_count, 3);
}
