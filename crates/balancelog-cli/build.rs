use chrono::Utc;
use std::process::Command;

/// Short commit hash of the checkout, if built from git
fn git_short_sha() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())?;

    let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!sha.is_empty()).then_some(sha)
}

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads");

    // YYYY.MM.DD+g<sha>
    let build_id = format!(
        "{}+g{}",
        Utc::now().format("%Y.%m.%d"),
        git_short_sha().as_deref().unwrap_or("unknown")
    );
    println!("cargo:rustc-env=BALANCELOG_BUILD_ID={build_id}");
}
