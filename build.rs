fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/");

    // Exact tag → "", otherwise the describe output (e.g. v0.3.0-4-g1a2b3c4).
    let describe = git(&["describe", "--tags", "--always", "--dirty"]).unwrap_or_default();
    let tagged = git(&["describe", "--exact-match", "--tags", "HEAD"]).is_some();
    let build = if tagged { String::new() } else { describe };

    println!("cargo:rustc-env=FOLIO_GIT_DESCRIBE={build}");
}

fn git(args: &[&str]) -> Option<String> {
    std::process::Command::new("git")
        .args(args)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
}
