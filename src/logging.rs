use std::fs;
use std::path::Path;

use anyhow::Result;
use log::LevelFilter;

/// Sends `log` records to `path`, so they do not interleave with the
/// interactive prompts on the terminal.
pub fn init(path: &Path, verbose: bool) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(LevelFilter::Warn)
        .level_for(env!("CARGO_PKG_NAME"), level)
        .chain(fern::log_file(path)?)
        .apply()?;
    Ok(())
}
