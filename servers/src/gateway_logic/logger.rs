use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub fn parse_level(log_level: &str) -> log::LevelFilter {
    match log_level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        "off" => log::LevelFilter::Off,
        _ => log::LevelFilter::Info,
    }
}

/// Installs the global logger: stdout plus one file per worker process.
///
/// Several workers may share `log_dir`, so file names carry the pid and only files
/// beyond the newest `keep` are removed.
pub fn setup_logging(log_dir: &Path, log_level: &str, keep: usize) -> Result<PathBuf> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)?;
    }

    let pid = std::process::id();
    let log_file_name = format!(
        "server_gateway_{}_{}.log",
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S"),
        pid
    );
    let log_path = log_dir.join(log_file_name);

    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                pid,
                record.target(),
                record.level(),
                message
            ))
        })
        .level(parse_level(log_level))
        .chain(std::io::stdout())
        .chain(fern::log_file(&log_path)?)
        .apply()?;

    let removed = cleanup_old_logs(log_dir, keep)?;
    if removed > 0 {
        log::debug!("Removed {} old log file(s) from {}", removed, log_dir.display());
    }

    Ok(log_path)
}

/// Deletes `.log` files in `log_dir` except the `keep` most recently modified ones.
/// Returns how many were deleted.
pub fn cleanup_old_logs(log_dir: &Path, keep: usize) -> Result<usize> {
    let mut entries: Vec<(SystemTime, PathBuf)> = fs::read_dir(log_dir)?
        .filter_map(|res| res.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "log"))
        .filter_map(|p| {
            let modified = fs::metadata(&p).and_then(|m| m.modified()).ok()?;
            Some((modified, p))
        })
        .collect();

    // Sort by modification time, newest first
    entries.sort_by(|a, b| b.0.cmp(&a.0));

    let mut removed = 0;
    for (_, path) in entries.iter().skip(keep) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Failed to delete old log file {:?}: {}", path, e),
        }
    }

    Ok(removed)
}
