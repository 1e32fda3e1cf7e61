use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use bvat_transport::{detect_stlink, list_ports, SerialConfig, SerialLink, DEFAULT_POLL_INTERVAL};
use tracing::{debug, info, warn};

use crate::cmd::{install_ctrlc_handler, run_pipeline, CaptureArgs};
use crate::exit::{transport_error, CliError, CliResult, NOT_FOUND};
use crate::output::OutputFormat;

pub fn run(args: CaptureArgs, format: OutputFormat) -> CliResult<i32> {
    let port = match args.port {
        Some(port) => port,
        None => autodetect_port()?,
    };

    let config = SerialConfig {
        port,
        baud: args.baud,
        poll_interval: DEFAULT_POLL_INTERVAL,
    };
    config
        .validate()
        .map_err(|err| transport_error("invalid serial settings", err))?;

    let link = SerialLink::open(&config).map_err(|err| transport_error("open failed", err))?;
    let label = link.name().to_string();
    match link.baud_rate() {
        Ok(baud) if baud != config.baud => {
            warn!(port = %label, requested = config.baud, actual = baud, "driver reports a different baud rate")
        }
        Ok(_) => {}
        Err(err) => debug!(port = %label, error = %err, "could not read back baud rate"),
    }

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    info!(
        port = %label,
        output_dir = %args.sink.output_dir.display(),
        "waiting for the logging button (Ctrl+C to exit)"
    );

    run_pipeline(&label, link, args.sink.to_config(), running, format)
}

fn autodetect_port() -> CliResult<String> {
    let ports = list_ports().map_err(|err| transport_error("port scan failed", err))?;
    match detect_stlink(&ports) {
        Some(port) => {
            info!(port = %port.name, description = port.description(), "detected ST-Link");
            Ok(port.name.clone())
        }
        None => Err(CliError::new(
            NOT_FOUND,
            "no ST-Link serial port detected; pass --port",
        )),
    }
}
