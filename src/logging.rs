use std::error::Error;
use std::fs::File;
use std::path::Path;

use log::LevelFilter;
use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode, WriteLogger};

pub fn level_for(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Terminal logging through `env_logger` (`RUST_LOG` wins over `-v`), or a
/// terminal plus file logger when `log_file` is set.
pub fn init(verbose: u8, log_file: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let level = level_for(verbose);
    match log_file {
        Some(path) => {
            let file = File::create(path)?;
            CombinedLogger::init(vec![
                TermLogger::new(level, Config::default(), TerminalMode::Mixed, ColorChoice::Auto),
                WriteLogger::new(LevelFilter::Debug.max(level), Config::default(), file),
            ])?;
        }
        None => {
            env_logger::Builder::from_env(
                env_logger::Env::default().default_filter_or(level.as_str().to_ascii_lowercase()),
            )
            .format_timestamp_millis()
            .try_init()?;
        }
    }
    Ok(())
}
