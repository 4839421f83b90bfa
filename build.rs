//! Stamps the binary's `--version` output with a commit hash, the way the
//! teacher crate uses `build.rs` for codegen rather than for this, but the
//! same "compute something at build time, hand it to the crate via an env
//! var" shape.

use std::process::Command;

fn main() {
    let commit = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=VMNET_HELPER_COMMIT={commit}");
    println!("cargo:rerun-if-changed=.git/HEAD");
}
