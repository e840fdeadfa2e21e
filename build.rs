use std::process::Command;

fn main() {
    let built_at = chrono::Utc::now().format("%Y-%m-%d %H:%M UTC");
    println!("cargo:rustc-env=GRIND_MONITOR_BUILD_TIME={}", built_at);

    println!("cargo:rerun-if-changed=.git/HEAD");
    if let Some(hash) = git_short_hash() {
        println!("cargo:rustc-env=GRIND_MONITOR_GIT_HASH={}", hash);
    }
}

fn git_short_hash() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
