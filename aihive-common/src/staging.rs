//! Staging path construction, shared between the Ingress API
//! (writer) and the Janitor (reader/deleter) so the two never drift apart
//! on layout: `<staging_root>/<YYYY-MM>/<DD>/<id>_<original_name>`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Builds the staging path for a newly submitted job. `original_name` is
/// treated as wholly opaque: it contributes only a filename suffix, never a
/// path component of its own.
pub fn staging_path(staging_root: &Path, now: DateTime<Utc>, id: Uuid, original_name: &str) -> PathBuf {
    let safe_name = sanitize_filename(original_name);

    staging_root
        .join(now.format("%Y-%m").to_string())
        .join(now.format("%d").to_string())
        .join(format!("{id}_{safe_name}"))
}

/// Strips any path separators an uploader's filename might carry, so it can
/// never escape the per-day staging folder.
fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    if base.is_empty() {
        "upload".to_owned()
    } else {
        base.to_owned()
    }
}

/// The day-folder portion of a staging path (`<YYYY-MM>/<DD>`), used by the
/// Janitor when walking the staging tree.
pub fn day_folder(now: DateTime<Utc>) -> PathBuf {
    PathBuf::from(now.format("%Y-%m").to_string()).join(now.format("%d").to_string())
}

/// Extracts the job id prefix from a staged filename of the form
/// `<id>_<original_name>`. Returns `None` for names that don't start with a
/// valid UUID.
pub fn job_id_from_filename(filename: &str) -> Option<Uuid> {
    let (prefix, _rest) = filename.split_once('_')?;
    Uuid::parse_str(prefix).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn builds_expected_layout() {
        let root = Path::new("/data/staging");
        let now = Utc.with_ymd_and_hms(2026, 3, 7, 12, 0, 0).unwrap();
        let id = Uuid::nil();

        let path = staging_path(root, now, id, "input.wav");

        assert_eq!(
            path,
            PathBuf::from("/data/staging/2026-03/07/00000000-0000-0000-0000-000000000000_input.wav")
        );
    }

    #[test]
    fn strips_directory_components_from_original_name() {
        let root = Path::new("/data/staging");
        let now = Utc.with_ymd_and_hms(2026, 3, 7, 12, 0, 0).unwrap();
        let id = Uuid::nil();

        let path = staging_path(root, now, id, "../../etc/passwd");

        assert!(path.ends_with("00000000-0000-0000-0000-000000000000_passwd"));
    }

    #[test]
    fn recovers_job_id_from_staged_filename() {
        let id = Uuid::new_v4();
        let filename = format!("{id}_clip.wav");

        assert_eq!(job_id_from_filename(&filename), Some(id));
        assert_eq!(job_id_from_filename("not-a-uuid_file.wav"), None);
    }
}
