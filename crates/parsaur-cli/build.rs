use std::process::Command;

fn main() {
    // "0.1.0 (abc1234)" inside a git checkout, plain "0.1.0" otherwise
    let commit = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let version = match commit {
        Some(commit) => format!("{} ({})", env!("CARGO_PKG_VERSION"), commit),
        None => env!("CARGO_PKG_VERSION").to_string(),
    };

    println!("cargo:rustc-env=PRS_VERSION={}", version);
    println!("cargo:rerun-if-changed=.git/HEAD");
}
