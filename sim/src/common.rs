//! Logger setup and output path helpers shared by the simulation CLI.

use std::error::Error;
use std::fmt::Display;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Install the global logger.
///
/// `log_level` applies to the `gridslam` library and this binary; other crates log at `warn` and above. A `RUST_LOG`
/// value in the environment replaces the whole filter. Lines go to stderr, or are appended to `log_file` when given.
///
/// # Errors
/// Returns an error if the log file cannot be opened or a logger is already installed.
pub fn init_logger(log_level: &str, log_file: Option<&PathBuf>) -> Result<(), Box<dyn Error>> {
    let filters = filter_spec(parse_level(log_level));
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filters));
    builder.format(|buf, record| {
        format_line(
            buf,
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args(),
        )
    });
    if let Some(path) = log_file {
        builder.target(env_logger::Target::Pipe(Box::new(open_log_file(path)?)));
    }
    builder.try_init()?;
    Ok(())
}

/// `env_logger` filter directives for a CLI log level.
pub fn filter_spec(level: log::LevelFilter) -> String {
    if level == log::LevelFilter::Off {
        return "off".to_string();
    }
    let level = level.as_str().to_ascii_lowercase();
    format!("warn,gridslam={},gridslam_sim={}", level, level)
}

/// Write one log line as `<timestamp> <LEVEL> <module>: <message>`, where `<module>` is the last path segment of
/// the record target.
pub fn format_line<W: Write>(
    out: &mut W,
    timestamp: impl Display,
    level: log::Level,
    target: &str,
    message: impl Display,
) -> io::Result<()> {
    let module = target.rsplit("::").next().unwrap_or(target);
    writeln!(out, "{} {:<5} {}: {}", timestamp, level, module, message)
}

/// Open `path` for appending, creating it and its parent directory as needed.
fn open_log_file(path: &Path) -> Result<File, Box<dyn Error>> {
    ensure_parent_dir(path)?;
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

/// Parse a log level name, falling back to `info` for anything unrecognized.
pub fn parse_level(log_level: &str) -> log::LevelFilter {
    log_level.parse::<log::LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Invalid log level '{}', defaulting to 'info'", log_level);
        log::LevelFilter::Info
    })
}

/// Create the parent directory of `path` if it has one and it does not exist yet.
pub fn ensure_parent_dir(path: &Path) -> Result<(), Box<dyn Error>> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Validate a CSV output file path and create its parent directories.
///
/// # Errors
/// Returns an error if the path has an extension other than `.csv`, points at an existing directory, or the
/// parent directory cannot be created.
pub fn validate_output_file(output: &Path) -> Result<(), Box<dyn Error>> {
    if output.is_dir() {
        return Err(format!("Output path '{}' is a directory.", output.display()).into());
    }
    match output.extension().and_then(|s| s.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("csv") => {}
        _ => {
            return Err(format!("Output file '{}' is not a CSV file.", output.display()).into());
        }
    }
    ensure_parent_dir(output)
}

/// Output path for one trial of a multi-trial run: `steps.csv` becomes `steps_trial3.csv`.
///
/// Single-trial runs keep the path unchanged.
pub fn trial_output_path(output: &Path, trial: usize, trials: usize) -> PathBuf {
    if trials <= 1 {
        return output.to_path_buf();
    }
    let stem = output
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("trial");
    let name = match output.extension().and_then(|s| s.to_str()) {
        Some(ext) => format!("{}_trial{}.{}", stem, trial, ext),
        None => format!("{}_trial{}", stem, trial),
    };
    output.with_file_name(name)
}
