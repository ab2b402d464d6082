//! Inspect command implementation.

use segstore_core::{SegmentInfo, StatsSnapshot, Store};
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Backend name.
    pub backend: &'static str,
    /// Total bytes held by the chain.
    pub total_size: u64,
    /// Segments in chain order.
    pub segments: Vec<SegmentRow>,
    /// Session counters.
    pub stats: StatsRow,
}

/// One segment of the chain.
#[derive(Debug, Serialize)]
pub struct SegmentRow {
    /// Order key.
    pub key: i64,
    /// Backend identity.
    pub id: i64,
    /// Backend name, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// Access mode.
    pub mode: &'static str,
}

/// Counters of the current session.
#[derive(Debug, Serialize)]
pub struct StatsRow {
    /// Segments created.
    pub segments_created: u64,
    /// Segments deleted.
    pub segments_deleted: u64,
    /// Bookmarks minted.
    pub saves: u64,
    /// Bookmarks redeemed.
    pub resumes: u64,
    /// Global renumberings.
    pub rearranges: u64,
}

impl From<SegmentInfo> for SegmentRow {
    fn from(info: SegmentInfo) -> Self {
        Self {
            key: info.key,
            id: info.id,
            name: info.name,
            size: info.size,
            mode: info.mode.as_str(),
        }
    }
}

impl From<StatsSnapshot> for StatsRow {
    fn from(snap: StatsSnapshot) -> Self {
        Self {
            segments_created: snap.segments_created,
            segments_deleted: snap.segments_deleted,
            saves: snap.saves,
            resumes: snap.resumes,
            rearranges: snap.rearranges,
        }
    }
}

/// Builds the inspection result for an open store.
pub fn collect(store: &Store, path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let segments: Vec<SegmentRow> = store.segments()?.into_iter().map(Into::into).collect();
    Ok(InspectResult {
        path: path.display().to_string(),
        backend: store.backend_name(),
        total_size: segments.iter().map(|s| s.size).sum(),
        segments,
        stats: store.stats().snapshot().into(),
    })
}

/// Runs the inspect command.
pub fn run(store: &Store, path: &Path, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let result = collect(store, path)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_text_output(&result);
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("segstore Inspection");
    println!("===================");
    println!();
    println!("Path:    {}", result.path);
    println!("Backend: {}", result.backend);
    println!("Size:    {}", format_size(result.total_size));
    println!();
    println!("Segments ({}):", result.segments.len());
    for seg in &result.segments {
        println!(
            "  [{:>20}] id={} {:<5} {}{}",
            seg.key,
            seg.id,
            seg.mode,
            format_size(seg.size),
            seg.name
                .as_deref()
                .map(|n| format!(" ({n})"))
                .unwrap_or_default()
        );
    }
    println!();
    println!("Session:");
    println!("  Segments created: {}", result.stats.segments_created);
    println!("  Segments deleted: {}", result.stats.segments_deleted);
    println!("  Rearranges:       {}", result.stats.rearranges);
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_are_humanized() {
        assert_eq!(format_size(12), "12 bytes");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn collect_reports_chain() {
        let mut store = Store::open_in_memory().unwrap();
        store.append(b"abc").unwrap();
        let _ = store.save().unwrap();
        store.append(b"de").unwrap();

        let result = collect(&store, Path::new("mem")).unwrap();
        assert_eq!(result.backend, store.backend_name());
        assert_eq!(result.segments.len(), store.len());
        assert_eq!(result.total_size, 5);
        assert_eq!(result.stats.saves, 1);
        assert!(result.segments.iter().any(|s| s.mode == "write"));

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["total_size"], 5);
    }
}
