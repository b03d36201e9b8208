pub mod entry;

pub use entry::{ClipboardEntry, ClipboardStats, EntryDto, ExportFormat, Page};
