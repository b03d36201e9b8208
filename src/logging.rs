use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use env_logger::{Builder, Env, Target};

const ROTATE_BYTES: u64 = 2 * 1024 * 1024;

/// Install the global logger. `RUST_LOG` overrides the default `clipdock=info` filter.
/// With a log file, output is appended there instead of stderr. A second call is a no-op.
pub fn init(log_file: Option<&Path>) {
    let mut builder = Builder::from_env(Env::default().default_filter_or("clipdock=info"));
    builder.format(|buf, record| {
        writeln!(
            buf,
            "[{}] {:<5} {}: {}",
            chrono::Local::now().format("%H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        )
    });

    if let Some(path) = log_file {
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        rotate_if_large(path);
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("Cannot open log file {}: {}", path.display(), e),
        }
    }

    if builder.try_init().is_ok() {
        log::info!("=== clipdock v{} started ===", env!("CARGO_PKG_VERSION"));
        if let Some(path) = log_file {
            log::info!("Log file: {}", path.display());
        }
    }
}

/// Rename `name.log` to `name.old.log` once it grows past 2 MiB.
fn rotate_if_large(path: &Path) {
    if let Ok(meta) = std::fs::metadata(path) {
        if meta.len() > ROTATE_BYTES {
            let _ = std::fs::rename(path, rotated_path(path));
        }
    }
}

fn rotated_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "clipdock".to_string());
    path.with_file_name(format!("{}.old.log", stem))
}
