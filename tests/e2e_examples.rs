mod common;

use common::{CommandOutput, TestContext};

#[test]
#[cfg(feature = "e2e")]
fn e2e_scrape_node_versions() {
    let ctx = TestContext::new();

    let output: CommandOutput = ctx
        .cmd()
        .args(["scrape", "https://nodejs.org/dist/", r"v\d+\.\d+\.\d+"])
        .output()
        .expect("Failed to run toolcache")
        .into();

    output.assert_success().assert_stdout_contains("8.9.1");
}

#[test]
#[cfg(all(feature = "e2e", target_os = "linux", target_arch = "x86_64"))]
fn e2e_install_node_range() {
    let ctx = TestContext::new();

    let output: CommandOutput = ctx
        .cmd()
        .args([
            "install",
            "node",
            "8.9.x",
            "https://nodejs.org/dist/v{version}/node-v{version}-linux-{arch}.tar.gz",
            "--scrape-url",
            "https://nodejs.org/dist/",
            "--scrape-pattern",
            r"v\d+\.\d+\.\d+",
        ])
        .output()
        .expect("Failed to run toolcache")
        .into();

    output
        .assert_success()
        .assert_stdout_contains("##vso[task.prependpath]");

    let node = ctx
        .cache_root
        .join("node")
        .join("8.9.4")
        .join("x64")
        .join("bin")
        .join("node");
    assert!(node.is_file(), "{} was not cached", node.display());

    // Served from the cache the second time.
    let output: CommandOutput = ctx
        .cmd()
        .args(["find", "node", "8.9.x", "--arch", "x64"])
        .output()
        .expect("Failed to run toolcache")
        .into();
    output.assert_success().assert_stdout_contains("8.9.4");
}

#[test]
#[cfg(feature = "e2e")]
fn e2e_download_not_found() {
    let ctx = TestContext::new();

    let output: CommandOutput = ctx
        .cmd()
        .args(["download", "https://nodejs.org/dist/v0.0.0/missing.tar.gz"])
        .output()
        .expect("Failed to run toolcache")
        .into();

    assert!(!output.status.success());
    assert!(output.stderr.contains("404"), "stderr: {}", output.stderr);
}
