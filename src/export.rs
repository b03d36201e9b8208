use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::clipboard::ExportFormat;
use crate::error::ExportError;
use crate::sync::ClipboardGateway;

/// `clipboard_<YYYY-MM-DD>.<ext>`
pub fn export_filename(format: ExportFormat, date: NaiveDate) -> String {
    format!("clipboard_{}.{}", date.format("%Y-%m-%d"), format.extension())
}

/// Write an export payload into `dir` under today's file name.
pub async fn save_export(
    dir: &Path,
    format: ExportFormat,
    payload: &str,
) -> Result<PathBuf, std::io::Error> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(export_filename(format, chrono::Local::now().date_naive()));
    tokio::fs::write(&path, payload).await?;
    log::info!(
        "Exported {} bytes as {} to {}",
        payload.len(),
        format.mime_type(),
        path.display()
    );
    Ok(path)
}

/// Fetch an export from the backend and save it.
pub async fn download_export<G: ClipboardGateway + ?Sized>(
    gateway: &G,
    dir: &Path,
    format: ExportFormat,
    include_pinned: bool,
) -> Result<PathBuf, ExportError> {
    let payload = gateway.export(format, include_pinned).await?;
    Ok(save_export(dir, format, &payload).await?)
}
