#[macro_use]
extern crate log;

use std::env::consts::{ARCH, EXE_SUFFIX, FAMILY, OS};
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use clap::Parser;
use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, Config, ConfigBuilder, TermLogger, TerminalMode, WriteLogger,
};

use crate::cli::Cli;
use crate::config::AppConfig;
use crate::program::Program;

mod cli;
mod config;
mod program;
mod triage;

/// A buffered, append-only log file writer that flushes every 50 lines and on drop.
struct BufferedFileWriter {
    inner: Arc<Mutex<BufWriter<std::fs::File>>>,
    line_count: Arc<Mutex<usize>>,
}

impl BufferedFileWriter {
    fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            inner: Arc::new(Mutex::new(BufWriter::with_capacity(64 * 1024, file))),
            line_count: Arc::new(Mutex::new(0)),
        })
    }
}

impl Write for BufferedFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut writer = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "Failed to acquire lock"))?;

        let size = writer.write(buf)?;

        if let Ok(mut count) = self.line_count.lock() {
            let lines = buf.iter().filter(|&&b| b == b'\n').count();
            if lines > 0 {
                let before = *count / 50;
                *count += lines;
                if *count / 50 != before {
                    writer.flush()?;
                }
            }
        }

        Ok(size)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut writer = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "Failed to acquire lock"))?;
        writer.flush()
    }
}

impl Drop for BufferedFileWriter {
    fn drop(&mut self) {
        if let Ok(mut writer) = self.inner.lock() {
            let _ = writer.flush();
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match AppConfig::load(&cli.settings) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let level = cli.log_level.as_deref().unwrap_or(&config.logging.log_level);
    initialize_logger(level, config.logging.log_to_file.then_some(config.paths.log_file.as_path()));
    log_system_information();

    match Program::new(cli, config).run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initializes terminal logging at `level` and, when `log_file` is set, a full-detail log file.
fn initialize_logger(level: &str, log_file: Option<&Path>) {
    let term_level = LevelFilter::from_str(level).unwrap_or_else(|_| {
        eprintln!("Unknown log level \"{}\", using info", level);
        LevelFilter::Info
    });

    let term_only = || {
        let _ = TermLogger::init(term_level, Config::default(), TerminalMode::Mixed, ColorChoice::Auto);
    };

    let Some(log_file) = log_file else {
        term_only();
        return;
    };

    let buffered_file_writer = match BufferedFileWriter::new(log_file) {
        Ok(writer) => writer,
        Err(e) => {
            eprintln!(
                "Failed to open log file {}: {}. Logging will only output to terminal.",
                log_file.display(),
                e
            );
            term_only();
            return;
        }
    };

    let mut file_config = ConfigBuilder::new();
    file_config.add_filter_allow_str("triage_shipper");

    if let Err(e) = CombinedLogger::init(vec![
        TermLogger::new(term_level, Config::default(), TerminalMode::Mixed, ColorChoice::Auto),
        WriteLogger::new(LevelFilter::max(), file_config.build(), buffered_file_writer),
    ]) {
        eprintln!("Failed to initialize combined logger: {}. Falling back to terminal-only logging.", e);
        term_only();
    }
}

/// Logs information about the platform for debugging.
fn log_system_information() {
    trace!("Printing system information out into log for debug purposes...");
    trace!("ARCH:           \"{}\"", ARCH);
    trace!("EXE_SUFFIX:     \"{}\"", EXE_SUFFIX);
    trace!("FAMILY:         \"{}\"", FAMILY);
    trace!("OS:             \"{}\"", OS);
}
