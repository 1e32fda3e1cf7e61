use std::fs::File;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::info;

use crate::cmd::{install_ctrlc_handler, run_pipeline, ReplayArgs};
use crate::exit::{io_error, CliResult};
use crate::output::OutputFormat;

pub fn run(args: ReplayArgs, format: OutputFormat) -> CliResult<i32> {
    let file = File::open(&args.file)
        .map_err(|err| io_error(&format!("cannot open {}", args.file.display()), err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let label = args.file.display().to_string();
    info!(file = %label, "replaying serial dump");

    run_pipeline(&label, file, args.sink.to_config(), running, format)
}
