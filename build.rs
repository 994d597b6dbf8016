// Copyright (c) 2022 Unfolded Circle ApS, Markus Zehnder <markus.z@unfoldedcircle.com>
// SPDX-License-Identifier: MPL-2.0

use std::env;
use std::fs;
use std::path::Path;
use std::process::Command;

fn main() {
    built::write_built_file().expect("Failed to acquire build-time information");

    // Supplement the built crate information with git describe data
    let version = git(&["describe", "--match", "v[0-9]*", "--tags", "HEAD"])
        .map(|v| v.trim_start_matches('v').to_string())
        .or_else(|| git(&["rev-parse", "--short", "HEAD"]));
    let dirty = git(&["diff-index", "--name-only", "HEAD", "--"]).is_some();

    let out_dir = env::var("OUT_DIR").expect("OUT_DIR not set");
    let content = format!(
        "// Git information generated at build time\n\
         pub const GIT_VERSION: Option<&'static str> = {};\n\
         pub const GIT_DIRTY: Option<bool> = {};\n",
        version.map_or("None".to_string(), |v| format!("Some({v:?})")),
        if dirty { "Some(true)" } else { "None" }
    );
    fs::write(Path::new(&out_dir).join("git_built.rs"), content)
        .expect("Failed to write git information");

    println!("cargo:rerun-if-changed=.git/HEAD");
}

/// Run a git command and return its trimmed output, `None` on failure or empty output.
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}
