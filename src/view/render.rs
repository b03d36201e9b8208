use crate::clipboard::{ClipboardEntry, ClipboardStats};

use super::controller::ViewSnapshot;
use super::store::DisplayMode;

pub const PREVIEW_CHARS: usize = 60;

/// First line of `s`, cut to at most `max_chars` characters.
pub fn preview(s: &str, max_chars: usize) -> String {
    let line = s.lines().next().unwrap_or("").trim_end();
    let mut chars = line.char_indices();
    match chars.nth(max_chars) {
        Some((cut, _)) => format!("{}…", &line[..cut]),
        None => {
            if s.lines().nth(1).is_some() {
                format!("{}…", line)
            } else {
                line.to_string()
            }
        }
    }
}

fn short_time(entry: &ClipboardEntry) -> String {
    match entry.captured_time() {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => entry.captured_at.clone(),
    }
}

pub fn entry_line(entry: &ClipboardEntry) -> String {
    format!(
        "{} {:>6}  {}  {}",
        if entry.is_pinned { "*" } else { " " },
        entry.id,
        short_time(entry),
        preview(&entry.content, PREVIEW_CHARS)
    )
}

pub fn entry_lines<'a>(entries: impl IntoIterator<Item = &'a ClipboardEntry>) -> Vec<String> {
    entries.into_iter().map(entry_line).collect()
}

pub fn header(snapshot: &ViewSnapshot) -> String {
    let mode = match snapshot.query.mode {
        DisplayMode::All => "all",
        DisplayMode::PinnedOnly => "pinned",
    };
    let mut line = format!(
        "[{}] {} entries, {} pinned | showing {} | page {}/{}",
        snapshot.connection.label(),
        snapshot.total_entries,
        snapshot.pinned_count,
        mode,
        snapshot.page.page + 1,
        snapshot.page.total_pages.max(1),
    );
    if !snapshot.query.search.is_empty() {
        line.push_str(&format!(
            " | search \"{}\" ({} matches)",
            snapshot.query.search, snapshot.page.total_matches
        ));
    }
    if snapshot.loading {
        line.push_str(" | loading…");
    }
    line
}

pub fn stats_lines(stats: &ClipboardStats) -> Vec<String> {
    let mut lines = vec![
        format!("Total:    {}", stats.total_entries),
        format!("Pinned:   {}", stats.pinned_entries),
        format!("Unpinned: {}", stats.unpinned_entries),
    ];
    if !stats.oldest_entry.is_empty() {
        lines.push(format!("Oldest:   {}", stats.oldest_entry));
    }
    if !stats.newest_entry.is_empty() {
        lines.push(format!("Newest:   {}", stats.newest_entry));
    }
    lines
}

/// Full screen for one snapshot.
pub fn render(snapshot: &ViewSnapshot) -> String {
    let mut out = vec![header(snapshot)];
    if let Some(banner) = &snapshot.error_banner {
        out.push(format!("! {}", banner));
    }
    if snapshot.page.entries.is_empty() {
        out.push(if snapshot.query.search.is_empty() {
            "  (no entries)".to_string()
        } else {
            "  (no matches)".to_string()
        });
    } else {
        out.extend(entry_lines(&snapshot.page.entries));
    }
    if let Some(stats) = &snapshot.stats {
        out.extend(stats_lines(stats));
    }
    out.join("\n")
}
