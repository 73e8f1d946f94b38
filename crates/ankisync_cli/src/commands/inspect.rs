//! Inspect command implementation.

use ankisync_collection::{CollectionStore, FileCollection, FileProvider};
use ankisync_protocol::{SanitySummary, Usn};
use serde::Serialize;
use std::path::Path;

/// Collection inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Snapshot path.
    pub path: String,
    /// Snapshot size in bytes.
    pub size: u64,
    /// Next usn the server will stamp.
    pub usn: Usn,
    /// Modification time in milliseconds.
    pub modified: i64,
    /// Schema modification time.
    pub schema_modified: i64,
    /// Last completed sync in milliseconds.
    pub last_sync: i64,
    /// Scheduler generation.
    pub scheduler_version: u8,
    /// Number of known tags.
    pub tags: usize,
    /// Structural summary, as compared by `sanityCheck2`.
    pub summary: SanitySummary,
}

/// Runs the inspect command.
pub fn run(data_dir: &Path, user: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(data_dir, user)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        "text" => print_text_output(&result),
        other => return Err(format!("unknown format {:?} (expected text or json)", other).into()),
    }

    Ok(())
}

fn inspect(data_dir: &Path, user: &str) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let path = FileProvider::new(data_dir).collection_path(user)?;
    if !path.exists() {
        return Err(format!("No collection found at {:?}", path).into());
    }

    let col = FileCollection::open(&path)?;
    Ok(InspectResult {
        path: path.display().to_string(),
        size: std::fs::metadata(&path)?.len(),
        usn: col.usn(),
        modified: col.modified(),
        schema_modified: col.schema_modified(),
        last_sync: col.last_sync(),
        scheduler_version: col.scheduler_version(),
        tags: col.tags()?.len(),
        summary: col.sanity_summary()?,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("ankisync Collection Inspection");
    println!("==============================");
    println!();
    println!("Path: {}", result.path);
    println!("Size: {} bytes", format_size(result.size));
    println!();
    println!("Sync state:");
    println!("  usn:        {}", result.usn);
    println!("  mod:        {}", result.modified);
    println!("  scm:        {}", result.schema_modified);
    println!("  last sync:  {}", result.last_sync);
    println!("  scheduler:  v{}", result.scheduler_version);
    println!();
    println!("Contents:");
    println!("  Cards:        {}", result.summary.cards);
    println!("  Notes:        {}", result.summary.notes);
    println!("  Review log:   {}", result.summary.revlog);
    println!("  Graves:       {}", result.summary.graves);
    println!("  Note types:   {}", result.summary.models);
    println!("  Decks:        {}", result.summary.decks);
    println!("  Deck configs: {}", result.summary.deck_configs);
    println!("  Tags:         {}", result.tags);
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ankisync_collection::RecordKind;
    use ankisync_protocol::Record;
    use tempfile::tempdir;

    #[test]
    fn inspect_reports_counts() {
        let dir = tempdir().unwrap();
        let path = FileProvider::new(dir.path()).collection_path("alice").unwrap();
        let mut col = FileCollection::open(&path).unwrap();
        col.inner_mut().put(RecordKind::Note, Record::new(1, 1, 0));
        col.inner_mut().add_tag("leech");
        col.commit_sync(1_000, 4).unwrap();

        let result = inspect(dir.path(), "alice").unwrap();
        assert_eq!(result.usn, 4);
        assert_eq!(result.modified, 1_000);
        assert_eq!(result.summary.notes, 1);
        assert_eq!(result.tags, 1);
        assert!(result.size > 0);
    }

    #[test]
    fn missing_collection_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(inspect(dir.path(), "nobody").is_err());
        assert!(!dir.path().join("nobody").exists());
    }

    #[test]
    fn sizes() {
        assert_eq!(format_size(512), "512");
        assert_eq!(format_size(2048), "2.0 KB");
    }
}
