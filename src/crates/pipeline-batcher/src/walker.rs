//! Streaming file discovery: never materializes the full path list.

use ignore::overrides::OverrideBuilder;
use ignore::{WalkBuilder, WalkState};
use std::path::{Path, PathBuf};
use std::sync::mpsc;

/// Stream every matched file path under `root` to `on_path`, honoring
/// `.gitignore`-style `ignore_patterns` and `glob_patterns` includes.
/// Walking happens on a background thread pool so the caller can drain
/// a channel instead of collecting a `Vec` up front.
pub fn stream_paths(
    root: &Path,
    glob_patterns: &[String],
    ignore_patterns: &[String],
) -> std::io::Result<mpsc::Receiver<PathBuf>> {
    let mut overrides = OverrideBuilder::new(root);
    for pattern in glob_patterns {
        overrides.add(pattern).map_err(std::io::Error::other)?;
    }
    for pattern in ignore_patterns {
        overrides.add(&format!("!{pattern}")).map_err(std::io::Error::other)?;
    }
    let overrides = overrides.build().map_err(std::io::Error::other)?;

    let (tx, rx) = mpsc::channel();
    let walker = WalkBuilder::new(root).overrides(overrides).build_parallel();

    walker.run(|| {
        let tx = tx.clone();
        Box::new(move |entry| {
            if let Ok(entry) = entry {
                if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                    let _ = tx.send(entry.into_path());
                }
            }
            WalkState::Continue
        })
    });
    drop(tx);

    Ok(rx)
}
