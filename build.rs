use std::process::Command;

/// Trimmed stdout of a git command, if git is available and succeeds
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn main() {
    let commit = git(&["rev-parse", "--short=10", "HEAD"]).unwrap_or_else(|| "unknown".to_string());
    let dirty = git(&["status", "--porcelain", "--untracked-files=no"]).is_some();

    // Release tags look like `v1.2.3`; anything else falls back to the crate version
    let version = git(&["describe", "--tags", "--exact-match", "--match", "v*"])
        .map(|tag| tag.trim_start_matches('v').to_string())
        .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());

    let commit = if dirty {
        format!("{}-dirty", commit)
    } else {
        commit
    };

    println!("cargo:rustc-env=PUBLICTUNNEL_VERSION={}", version);
    println!("cargo:rustc-env=PUBLICTUNNEL_COMMIT={}", commit);
    println!(
        "cargo:rustc-env=PUBLICTUNNEL_BUILD_DATE={}",
        chrono::Utc::now().format("%Y-%m-%d %H:%M UTC")
    );

    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/tags");
}
