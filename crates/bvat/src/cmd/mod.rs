use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bvat_frame::RecordReader;
use bvat_session::{Capture, DirectoryOpener, SessionManager, SinkConfig};
use bvat_transport::FIXED_BAUD_RATE;
use clap::{Args, Subcommand};

use crate::exit::{capture_error, CliError, CliResult, SUCCESS};
use crate::output::{print_report, OutputFormat};

pub mod capture;
pub mod ports;
pub mod replay;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Capture sessions from the sensor module's serial port.
    Capture(CaptureArgs),
    /// Run a raw serial dump through the capture pipeline.
    Replay(ReplayArgs),
    /// List serial ports and mark the detected ST-Link.
    Ports(PortsArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Capture(args) => capture::run(args, format),
        Command::Replay(args) => replay::run(args, format),
        Command::Ports(args) => ports::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Where session files are written.
#[derive(Args, Debug)]
pub struct SinkArgs {
    /// Directory for session files (created if missing).
    #[arg(long, value_name = "DIR", env = "BVAT_OUTPUT_DIR", default_value = "logs")]
    pub output_dir: PathBuf,
    /// Session file name prefix.
    #[arg(long, default_value = "datalog")]
    pub prefix: String,
}

impl SinkArgs {
    pub fn to_config(&self) -> SinkConfig {
        SinkConfig {
            output_dir: self.output_dir.clone(),
            file_prefix: self.prefix.clone(),
        }
    }
}

#[derive(Args, Debug)]
pub struct CaptureArgs {
    /// Serial port (auto-detects an ST-Link when omitted).
    #[arg(long, short = 'p', env = "BVAT_PORT")]
    pub port: Option<String>,
    /// Baud rate. The sensor module only supports 115200.
    #[arg(long, default_value_t = FIXED_BAUD_RATE)]
    pub baud: u32,
    #[command(flatten)]
    pub sink: SinkArgs,
}

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Raw serial dump to replay.
    pub file: PathBuf,
    #[command(flatten)]
    pub sink: SinkArgs,
}

#[derive(Args, Debug, Default)]
pub struct PortsArgs {}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Drive the capture pipeline over `source` and print the report.
///
/// The report is printed even when the capture fails, so the sessions that
/// were finalized before the failure are still listed.
pub(crate) fn run_pipeline<R: Read>(
    label: &str,
    source: R,
    sink: SinkConfig,
    running: Arc<AtomicBool>,
    format: OutputFormat,
) -> CliResult<i32> {
    let manager = SessionManager::new(DirectoryOpener::new(sink));
    let mut capture = Capture::new(RecordReader::new(source), manager).with_running_flag(running);

    let result = capture.run();
    let report = capture.report();

    match result {
        Ok(end) => {
            print_report(label, Some(end), &report, format);
            Ok(SUCCESS)
        }
        Err(err) => {
            print_report(label, None, &report, format);
            Err(capture_error("capture failed", err))
        }
    }
}

pub(crate) fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
