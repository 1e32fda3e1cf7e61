use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bvat_frame::{FrameError, RecordReader};
use bvat_message::parse_record;
use bvat_transport::TransportError;
use chrono::{NaiveDateTime, SubsecRound};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::{CaptureError, Result};
use crate::manager::{ManagerStats, SessionManager, SessionState, SessionSummary, Transition};
use crate::sink::SinkOpener;

/// Why a capture stopped without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureEnd {
    /// The byte stream reached end-of-file.
    StreamClosed,
    /// The stop flag was cleared (Ctrl+C).
    Cancelled,
}

/// Totals for one capture run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureReport {
    pub records: u64,
    pub oversized_records: u64,
    pub sessions: Vec<SessionSummary>,
    pub stats: ManagerStats,
    pub final_state: SessionState,
}

/// The capture pipeline: one reader, one session manager, one stop flag.
///
/// Records are processed strictly in arrival order on the calling thread.
/// The only blocking point is the read; a slow disk stalls the whole
/// pipeline rather than dropping samples.
pub struct Capture<R, O: SinkOpener> {
    reader: RecordReader<R>,
    manager: SessionManager<O>,
    running: Arc<AtomicBool>,
    sessions: Vec<SessionSummary>,
    oversized: u64,
}

impl<R: Read, O: SinkOpener> Capture<R, O> {
    pub fn new(reader: RecordReader<R>, manager: SessionManager<O>) -> Self {
        Self {
            reader,
            manager,
            running: Arc::new(AtomicBool::new(true)),
            sessions: Vec::new(),
            oversized: 0,
        }
    }

    /// Share an externally owned stop flag (cleared by a signal handler).
    pub fn with_running_flag(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = running;
        self
    }

    /// Handle for stopping the capture from another thread.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Run until end of stream, cancellation, or a fatal error.
    ///
    /// Whatever ends the run, an open session is closed before returning.
    pub fn run(&mut self) -> Result<CaptureEnd> {
        loop {
            if !self.running.load(Ordering::SeqCst) {
                info!("capture cancelled");
                self.finalize()?;
                return Ok(CaptureEnd::Cancelled);
            }

            let record = match self.reader.read_record() {
                Ok(record) => record,
                Err(FrameError::Idle) => continue,
                Err(err @ FrameError::RecordTooLong { .. }) => {
                    self.oversized += 1;
                    warn!(error = %err, "dropping oversized record");
                    continue;
                }
                Err(FrameError::ConnectionClosed) => {
                    info!("stream closed");
                    self.finalize()?;
                    return Ok(CaptureEnd::StreamClosed);
                }
                Err(FrameError::Io(err)) => {
                    error!(error = %err, "serial stream failed");
                    if let Err(sink_err) = self.finalize() {
                        error!(error = %sink_err, "could not finalize session after stream failure");
                    }
                    return Err(CaptureError::Transport(TransportError::Io(err)));
                }
            };

            debug!(seq = record.seq, line = %record.text_lossy(), "record");

            let transition = match self.manager.handle(parse_record(&record)) {
                Ok(transition) => transition,
                Err(err) => {
                    self.collect_interrupted();
                    return Err(err.into());
                }
            };
            match transition {
                Transition::Closed(summary) => self.sessions.push(summary),
                Transition::Opened { .. }
                | Transition::Appended
                | Transition::Discarded
                | Transition::Counted => {}
            }
        }
    }

    fn finalize(&mut self) -> Result<()> {
        match self.manager.finish(now_millis()) {
            Ok(Some(summary)) => self.sessions.push(summary),
            Ok(None) => {}
            Err(err) => {
                self.collect_interrupted();
                return Err(err.into());
            }
        }
        Ok(())
    }

    fn collect_interrupted(&mut self) {
        if let Some(summary) = self.manager.take_interrupted() {
            self.sessions.push(summary);
        }
    }

    /// Snapshot of everything processed so far.
    pub fn report(&self) -> CaptureReport {
        CaptureReport {
            records: self.reader.records_read(),
            oversized_records: self.oversized,
            sessions: self.sessions.clone(),
            stats: self.manager.stats().clone(),
            final_state: self.manager.state(),
        }
    }
}

fn now_millis() -> NaiveDateTime {
    chrono::Local::now().naive_local().trunc_subsecs(3)
}
