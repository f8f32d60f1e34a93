use std::io::Write;
use std::path::{Path, PathBuf};

/// Save a feed body that yielded nothing usable, for offline diagnosis.
///
/// Writes `rss_<feed_id>_<random>.xml` under `dir`. Failures are logged and
/// reported as `None`; they never affect the run.
pub(crate) fn dump_body(dir: &Path, feed_id: &str, body: &[u8]) -> Option<PathBuf> {
    if body.is_empty() {
        return None;
    }

    let prefix = format!("rss_{}_", sanitize(feed_id));
    let result = std::fs::create_dir_all(dir).and_then(|()| {
        let mut file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".xml")
            .tempfile_in(dir)?;
        file.write_all(body)?;
        file.keep().map(|(_, path)| path).map_err(|e| e.error)
    });

    match result {
        Ok(path) => {
            tracing::info!(feed_id = %feed_id, path = %path.display(), bytes = body.len(), "Saved raw feed body");
            Some(path)
        }
        Err(e) => {
            tracing::warn!(feed_id = %feed_id, error = %e, "Failed to save raw feed body");
            None
        }
    }
}

fn sanitize(feed_id: &str) -> String {
    feed_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
