/// Smoke tests to verify the binary runs without panicking
use std::process::Command;

fn kbdscr(args: &[&str]) -> std::process::Output {
    Command::new("cargo")
        .args(["run", "--quiet", "--"])
        .args(args)
        .output()
        .expect("Failed to execute cargo run")
}

#[test]
fn binary_shows_help() {
    let output = kbdscr(&["--help"]);

    assert!(
        output.status.success(),
        "Binary failed to run --help: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("kbdscr"), "Help output should mention kbdscr");
}

#[test]
fn binary_shows_version() {
    let output = kbdscr(&["--version"]);

    assert!(
        output.status.success(),
        "Binary failed to run --version: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn lists_builtin_layouts() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    let output = kbdscr(&["--config", config.to_str().unwrap(), "layouts"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("km-us-en"));
    assert!(stdout.contains("m-logi-m570"));
}

#[test]
fn snapshot_writes_png_of_layout_size() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    let out = dir.path().join("m570.png");
    let output = kbdscr(&[
        "--config",
        config.to_str().unwrap(),
        "snapshot",
        "--layout",
        "m-logi-m570",
        "--output",
        out.to_str().unwrap(),
        "--press",
        "272",
    ]);

    assert!(
        output.status.success(),
        "snapshot failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let image = image::open(&out).expect("snapshot should be a readable image");
    // 48 units of 6px plus a 6px gap on each side; one 24px row plus gaps.
    assert_eq!((image.width(), image.height()), (300, 36));
}

#[test]
fn unknown_layout_fails_gracefully() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    let output = kbdscr(&["--config", config.to_str().unwrap(), "snapshot", "--layout", "nope"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("could not find layout nope"), "{stderr}");
    assert!(!stderr.contains("panicked at"));
}

#[test]
fn invalid_subcommand_fails_gracefully() {
    let output = kbdscr(&["nonexistent-command"]);

    // Should fail with error, not panic
    assert!(
        !output.status.success(),
        "Invalid subcommand should return error status"
    );

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        !stderr.contains("panicked at"),
        "Invalid subcommand should not cause panic"
    );
}
