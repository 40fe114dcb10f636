//! Version string reported by the controller binaries.

use std::sync::LazyLock;

use crate::build_info::BUILD_INFO;

/// Defines the application version, e.g. `v0.3.1-4f2c9a1b7e0d-dirty`.
pub static VERSION: LazyLock<String> = LazyLock::new(|| {
    render(
        env!("IMAGE_VERSION"),
        BUILD_INFO.commit_sha1,
        BUILD_INFO.is_dirty(),
    )
});

fn render(image_version: &str, commit_sha1: Option<&str>, dirty: bool) -> String {
    let commit = commit_sha1
        .map(|sha| &sha[..sha.len().min(12)])
        .unwrap_or("unknown");
    format!(
        "{image_version}-{commit}{}",
        if dirty { "-dirty" } else { "" }
    )
}
