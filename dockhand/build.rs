//! Build metadata for `dockhand --version`

use chrono::Utc;
use std::process::Command;

fn main() {
    // Packagers building outside a checkout pass the hash explicitly
    let git_hash = std::env::var("DOCKHAND_GIT_HASH").ok().or_else(|| {
        Command::new("git")
            .args(["rev-parse", "--short", "HEAD"])
            .output()
            .ok()
            .filter(|output| output.status.success())
            .and_then(|output| String::from_utf8(output.stdout).ok())
            .map(|s| s.trim().to_string())
    });

    println!(
        "cargo:rustc-env=GIT_HASH={}",
        git_hash.unwrap_or_else(|| "unknown".to_string())
    );
    println!(
        "cargo:rustc-env=BUILD_TIME={}",
        Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    );

    println!("cargo:rerun-if-env-changed=DOCKHAND_GIT_HASH");
    println!("cargo:rerun-if-changed=../.git/HEAD");
}
