use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn main() {
    let commit = git(&["rev-parse", "HEAD"]).unwrap_or_else(|| "unknown".to_string());
    let short: String = commit.chars().take(7).collect();
    let branch = git(&["rev-parse", "--abbrev-ref", "HEAD"]).unwrap_or_else(|| "unknown".to_string());
    let built_at = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();

    // Surfaced by GET /api/version
    println!("cargo:rustc-env=GALLERY_GIT_COMMIT={}", commit);
    println!("cargo:rustc-env=GALLERY_GIT_SHORT={}", short);
    println!("cargo:rustc-env=GALLERY_GIT_BRANCH={}", branch);
    println!("cargo:rustc-env=GALLERY_BUILD_TIME={}", built_at);

    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads");
}
