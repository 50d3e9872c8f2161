//! Stamps the `dsh` binary with the commit and date it was built from,
//! for `dsh --version`.

use std::path::PathBuf;
use std::process::Command;

fn main() {
    let workspace =
        PathBuf::from(std::env::var_os("CARGO_MANIFEST_DIR").unwrap_or_default()).join("../..");
    let git_dir = workspace.join(".git");
    // Source tarballs have no .git
    if git_dir.exists() {
        println!("cargo::rerun-if-changed={}", git_dir.join("HEAD").display());
        println!("cargo::rerun-if-changed={}", git_dir.join("refs/heads").display());
    }

    let hash =
        git(&workspace, &["rev-parse", "--short", "HEAD"]).unwrap_or_else(|| "unknown".into());
    let dirty = git(&workspace, &["status", "--porcelain", "--untracked-files=no"])
        .is_some_and(|changes| !changes.is_empty());
    let hash = if dirty { format!("{hash}-dirty") } else { hash };

    println!("cargo:rustc-env=DSH_GIT_HASH={hash}");
    println!("cargo:rustc-env=DSH_BUILD_DATE={}", chrono::Utc::now().format("%Y-%m-%d"));
}

fn git(dir: &PathBuf, args: &[&str]) -> Option<String> {
    let output = Command::new("git").current_dir(dir).args(args).output().ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}
