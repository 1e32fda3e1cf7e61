use std::collections::BTreeMap;
use std::path::PathBuf;

use bvat_message::{Announced, ControlEvent, Malformed, Message, TelemetrySample};
use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use crate::error::SinkError;
use crate::sink::{SessionSink, SinkOpener};

/// Whether a session is currently open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Recording,
}

/// What a closed session produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    /// 1-based session number within this capture.
    pub id: u64,
    pub path: PathBuf,
    pub started_at: NaiveDateTime,
    pub closed_at: NaiveDateTime,
    /// Data rows in the file.
    pub rows: u64,
    /// Malformed records received while this session was open.
    pub malformed: u64,
    /// False when the file could not be flushed and synced on close.
    pub finalized: bool,
}

/// The effect of one message on the manager.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// A toggle opened a new session file.
    Opened { id: u64, path: PathBuf },
    /// A toggle (or end of stream) closed the session.
    Closed(SessionSummary),
    /// A sample was written to the open session.
    Appended,
    /// A sample arrived while idle and was dropped.
    Discarded,
    /// A malformed record was counted.
    Counted,
}

/// Running totals across all sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ManagerStats {
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub samples_written: u64,
    pub samples_discarded: u64,
    /// All malformed records, including status chatter.
    pub malformed: u64,
    /// Malformed records that looked like samples but failed field extraction.
    pub extraction_failures: u64,
    pub malformed_by_reason: BTreeMap<&'static str, u64>,
    /// Toggles whose firmware banner disagreed with the state machine.
    pub announce_mismatches: u64,
}

struct OpenSession<T: crate::sink::SinkTarget> {
    id: u64,
    started_at: NaiveDateTime,
    sink: SessionSink<T>,
    malformed: u64,
}

/// Two-state session machine.
///
/// The sensor module only reports "button pressed", so strict alternation
/// decides meaning: a press while `Idle` opens a session, a press while
/// `Recording` closes it. The firmware's STARTED/STOPPED banner is logged
/// when it disagrees but never overrides the alternation.
pub struct SessionManager<O: SinkOpener> {
    opener: O,
    current: Option<OpenSession<O::Target>>,
    next_id: u64,
    stats: ManagerStats,
    interrupted: Option<SessionSummary>,
}

impl<O: SinkOpener> SessionManager<O> {
    /// Create an idle manager that opens sinks with `opener`.
    pub fn new(opener: O) -> Self {
        Self {
            opener,
            current: None,
            next_id: 1,
            stats: ManagerStats::default(),
            interrupted: None,
        }
    }

    /// Apply one classified record.
    ///
    /// A `SinkError` closes the current session (best effort) and leaves the
    /// manager `Idle`; the caller should stop feeding it. The session that
    /// failed is available from [`take_interrupted`](Self::take_interrupted).
    pub fn handle(&mut self, message: Message) -> Result<Transition, SinkError> {
        match message {
            Message::Control(event) => self.toggle(&event),
            Message::Sample(sample) => self.sample(&sample),
            Message::Malformed(malformed) => {
                self.count_malformed(&malformed);
                Ok(Transition::Counted)
            }
        }
    }

    /// Close the open session, if any, at end of stream or cancellation.
    pub fn finish(&mut self, at: NaiveDateTime) -> Result<Option<SessionSummary>, SinkError> {
        if self.current.is_none() {
            return Ok(None);
        }
        info!("finalizing open session at end of capture");
        self.close(at).map(Some)
    }

    pub fn state(&self) -> SessionState {
        if self.current.is_some() {
            SessionState::Recording
        } else {
            SessionState::Idle
        }
    }

    pub fn is_recording(&self) -> bool {
        self.current.is_some()
    }

    /// Path of the open session file.
    pub fn current_path(&self) -> Option<&std::path::Path> {
        self.current.as_ref().map(|open| open.sink.path())
    }

    pub fn stats(&self) -> &ManagerStats {
        &self.stats
    }

    /// The session that ended because of a sink error, if any.
    pub fn take_interrupted(&mut self) -> Option<SessionSummary> {
        self.interrupted.take()
    }

    fn toggle(&mut self, event: &ControlEvent) -> Result<Transition, SinkError> {
        let expected = if self.is_recording() {
            Announced::Stopped
        } else {
            Announced::Started
        };
        if event.announced != expected {
            self.stats.announce_mismatches += 1;
            warn!(
                seq = event.seq,
                announced = event.announced.as_str(),
                state = ?self.state(),
                "device banner disagrees with session state; following toggle order"
            );
        }

        if self.is_recording() {
            return self.close(event.received_at).map(Transition::Closed);
        }

        let id = self.next_id;
        let sink = self.opener.open(event.received_at)?;
        let path = sink.path().to_path_buf();
        self.next_id += 1;
        self.stats.sessions_opened += 1;
        info!(session = id, path = %path.display(), "logging started");

        self.current = Some(OpenSession {
            id,
            started_at: event.received_at,
            sink,
            malformed: 0,
        });
        Ok(Transition::Opened { id, path })
    }

    fn sample(&mut self, sample: &TelemetrySample) -> Result<Transition, SinkError> {
        let Some(open) = self.current.as_mut() else {
            self.stats.samples_discarded += 1;
            trace!("sample received while idle; discarded");
            return Ok(Transition::Discarded);
        };

        if let Err(err) = open.sink.append(sample) {
            self.abort(sample.timestamp, &err);
            return Err(err);
        }
        self.stats.samples_written += 1;
        Ok(Transition::Appended)
    }

    fn count_malformed(&mut self, malformed: &Malformed) {
        self.stats.malformed += 1;
        *self
            .stats
            .malformed_by_reason
            .entry(malformed.reason.label())
            .or_insert(0) += 1;
        if let Some(open) = self.current.as_mut() {
            open.malformed += 1;
        }

        let text = String::from_utf8_lossy(&malformed.bytes);
        if malformed.reason.is_extraction_failure() {
            self.stats.extraction_failures += 1;
            warn!(seq = malformed.seq, reason = %malformed.reason, record = %text, "malformed sample");
        } else {
            debug!(seq = malformed.seq, reason = %malformed.reason, record = %text, "ignoring record");
        }
    }

    fn close(&mut self, at: NaiveDateTime) -> Result<SessionSummary, SinkError> {
        let Some(open) = self.current.take() else {
            return Err(SinkError::Flush {
                path: PathBuf::new(),
                source: std::io::Error::other("no open session"),
            });
        };

        let mut summary = SessionSummary {
            id: open.id,
            path: open.sink.path().to_path_buf(),
            started_at: open.started_at,
            closed_at: at,
            rows: open.sink.rows(),
            malformed: open.malformed,
            finalized: false,
        };
        self.stats.sessions_closed += 1;

        if let Err(err) = open.sink.close() {
            error!(
                session = summary.id,
                path = %summary.path.display(),
                rows = summary.rows,
                error = %err,
                "session file could not be finalized"
            );
            self.interrupted = Some(summary);
            return Err(err);
        }
        summary.finalized = true;

        info!(
            session = summary.id,
            path = %summary.path.display(),
            rows = summary.rows,
            malformed = summary.malformed,
            "logging stopped"
        );
        Ok(summary)
    }

    fn abort(&mut self, at: NaiveDateTime, cause: &SinkError) {
        error!(error = %cause, "session write failed; closing session");
        // On failure `close` has already recorded the session.
        if let Ok(summary) = self.close(at) {
            self.interrupted = Some(summary);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use bvat_message::{GeoPosition, MalformedReason};
    use bytes::Bytes;
    use chrono::NaiveDate;

    use super::*;
    use crate::sink::{read_session_file, DirectoryOpener, SinkConfig, SinkTarget};

    fn at(sec: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 14)
            .unwrap()
            .and_hms_milli_opt(11, 0, sec, 0)
            .unwrap()
    }

    fn toggle(seq: u64, announced: Announced) -> Message {
        Message::Control(ControlEvent {
            seq,
            received_at: at(seq as u32),
            announced,
        })
    }

    fn sample(accel: f64, speed: f64) -> Message {
        Message::Sample(TelemetrySample {
            timestamp: at(30),
            accel_x: accel,
            accel_y: 0.0,
            accel_z: 1.0,
            gps_fix: 1,
            speed_kmh: speed,
            position: Some(GeoPosition {
                latitude: 1.0,
                longitude: 2.0,
            }),
        })
    }

    fn garbage(reason: MalformedReason) -> Message {
        Message::Malformed(Malformed {
            seq: 99,
            reason,
            bytes: Bytes::from_static(b"DATA, ???"),
        })
    }

    fn manager(dir: &std::path::Path) -> SessionManager<DirectoryOpener> {
        SessionManager::new(DirectoryOpener::new(SinkConfig {
            output_dir: dir.to_path_buf(),
            ..SinkConfig::default()
        }))
    }

    #[test]
    fn starts_idle() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(tmp.path());
        assert_eq!(mgr.state(), SessionState::Idle);
        assert!(mgr.current_path().is_none());
    }

    #[test]
    fn toggles_alternate_open_and_close() {
        let tmp = tempfile::tempdir().unwrap();
        let mut mgr = manager(tmp.path());

        let opened = mgr.handle(toggle(1, Announced::Started)).unwrap();
        let Transition::Opened { id, path } = opened else {
            panic!("expected open, got {opened:?}");
        };
        assert_eq!(id, 1);
        assert_eq!(mgr.state(), SessionState::Recording);
        assert_eq!(mgr.current_path(), Some(path.as_path()));

        assert_eq!(mgr.handle(sample(1.0, 10.0)).unwrap(), Transition::Appended);

        let closed = mgr.handle(toggle(2, Announced::Stopped)).unwrap();
        let Transition::Closed(summary) = closed else {
            panic!("expected close, got {closed:?}");
        };
        assert_eq!(summary.path, path);
        assert_eq!(summary.rows, 1);
        assert_eq!(summary.started_at, at(1));
        assert_eq!(summary.closed_at, at(2));
        assert_eq!(mgr.state(), SessionState::Idle);
        assert_eq!(read_session_file(&path).unwrap().len(), 1);
    }

    #[test]
    fn idle_samples_are_discarded() {
        let tmp = tempfile::tempdir().unwrap();
        let mut mgr = manager(tmp.path());

        assert_eq!(mgr.handle(sample(5.0, 5.0)).unwrap(), Transition::Discarded);
        assert_eq!(mgr.stats().samples_discarded, 1);
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn banner_is_advisory_only() {
        let tmp = tempfile::tempdir().unwrap();
        let mut mgr = manager(tmp.path());

        // A STOPPED banner while idle still opens: alternation wins.
        assert!(matches!(
            mgr.handle(toggle(1, Announced::Stopped)).unwrap(),
            Transition::Opened { .. }
        ));
        assert!(matches!(
            mgr.handle(toggle(2, Announced::Started)).unwrap(),
            Transition::Closed(_)
        ));
        assert_eq!(mgr.stats().announce_mismatches, 2);
    }

    #[test]
    fn malformed_is_counted_without_state_change() {
        let tmp = tempfile::tempdir().unwrap();
        let mut mgr = manager(tmp.path());

        mgr.handle(garbage(MalformedReason::Unrecognized)).unwrap();
        assert_eq!(mgr.state(), SessionState::Idle);

        mgr.handle(toggle(1, Announced::Started)).unwrap();
        mgr.handle(garbage(MalformedReason::BadField("X"))).unwrap();
        mgr.handle(garbage(MalformedReason::Truncated)).unwrap();
        assert_eq!(mgr.state(), SessionState::Recording);

        let Transition::Closed(summary) = mgr.handle(toggle(2, Announced::Stopped)).unwrap() else {
            panic!("expected close");
        };
        assert_eq!(summary.malformed, 2);
        assert_eq!(summary.rows, 0);

        let stats = mgr.stats();
        assert_eq!(stats.malformed, 3);
        assert_eq!(stats.extraction_failures, 2);
        assert_eq!(stats.malformed_by_reason.get("bad_field"), Some(&1));
        assert_eq!(stats.malformed_by_reason.get("unrecognized"), Some(&1));
    }

    #[test]
    fn finish_closes_open_session() {
        let tmp = tempfile::tempdir().unwrap();
        let mut mgr = manager(tmp.path());

        assert_eq!(mgr.finish(at(0)).unwrap(), None);

        mgr.handle(toggle(1, Announced::Started)).unwrap();
        for i in 0..3 {
            mgr.handle(sample(i as f64, 0.0)).unwrap();
        }
        let summary = mgr.finish(at(9)).unwrap().unwrap();
        assert_eq!(summary.rows, 3);
        assert_eq!(mgr.state(), SessionState::Idle);
        assert_eq!(read_session_file(&summary.path).unwrap().len(), 3);
    }

    #[test]
    fn sink_failure_closes_session_and_propagates() {
        let mut mgr = SessionManager::new(FailingOpener { fail_after: 1 });

        mgr.handle(toggle(1, Announced::Started)).unwrap();
        mgr.handle(sample(1.0, 1.0)).unwrap();
        let err = mgr.handle(sample(2.0, 2.0)).unwrap_err();

        assert!(matches!(err, SinkError::Flush { .. }));
        assert_eq!(mgr.state(), SessionState::Idle);
        assert_eq!(mgr.stats().samples_written, 1);
    }

    #[test]
    fn failed_append_keeps_session_in_summary() {
        let mut mgr = SessionManager::new(FailingOpener { fail_after: 1 });

        mgr.handle(toggle(1, Announced::Started)).unwrap();
        mgr.handle(sample(1.0, 1.0)).unwrap();
        mgr.handle(sample(2.0, 2.0)).unwrap_err();

        let summary = mgr.take_interrupted().expect("failed session is kept");
        assert_eq!(summary.id, 1);
        assert_eq!(summary.path, std::path::PathBuf::from("diskfull.csv"));
        assert_eq!(summary.rows, 1);
        assert!(!summary.finalized);
        assert!(mgr.take_interrupted().is_none());

        let stats = mgr.stats();
        assert_eq!(stats.sessions_opened, 1);
        assert_eq!(stats.sessions_closed, 1);
    }

    #[test]
    fn close_failure_on_toggle_goes_idle_and_propagates() {
        let mut mgr = SessionManager::new(SyncFailsOpener);

        mgr.handle(toggle(1, Announced::Started)).unwrap();
        mgr.handle(sample(1.0, 1.0)).unwrap();
        let err = mgr.handle(toggle(2, Announced::Stopped)).unwrap_err();

        assert!(matches!(err, SinkError::Flush { .. }));
        assert_eq!(mgr.state(), SessionState::Idle);
        let summary = mgr.take_interrupted().expect("failed session is kept");
        assert_eq!(summary.rows, 1);
        assert_eq!(summary.closed_at, at(2));
        assert!(!summary.finalized);
        assert_eq!(mgr.stats().sessions_closed, 1);

        // The next toggle starts a fresh session.
        assert!(matches!(
            mgr.handle(toggle(3, Announced::Started)).unwrap(),
            Transition::Opened { id: 2, .. }
        ));
    }

    #[test]
    fn clean_close_is_finalized() {
        let tmp = tempfile::tempdir().unwrap();
        let mut mgr = manager(tmp.path());

        mgr.handle(toggle(1, Announced::Started)).unwrap();
        let Transition::Closed(summary) = mgr.handle(toggle(2, Announced::Stopped)).unwrap() else {
            panic!("expected close");
        };
        assert!(summary.finalized);
        assert!(mgr.take_interrupted().is_none());
    }

    #[test]
    fn open_failure_stays_idle() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("logs");
        std::fs::write(&blocker, b"file").unwrap();
        let mut mgr = manager(&blocker);

        let err = mgr.handle(toggle(1, Announced::Started)).unwrap_err();
        assert!(matches!(err, SinkError::CreateDir { .. }));
        assert_eq!(mgr.state(), SessionState::Idle);
        assert_eq!(mgr.stats().sessions_opened, 0);
    }

    /// Accepts the header plus `fail_after` rows, then reports a full disk.
    struct FailingOpener {
        fail_after: usize,
    }

    impl SinkOpener for FailingOpener {
        type Target = DiskFull;

        fn open(&mut self, _started_at: NaiveDateTime) -> Result<SessionSink<DiskFull>, SinkError> {
            SessionSink::new(
                DiskFull {
                    flushes_left: self.fail_after + 1,
                },
                "diskfull.csv",
            )
        }
    }

    /// Writes fine but cannot sync, so every close fails.
    struct SyncFailsOpener;

    impl SinkOpener for SyncFailsOpener {
        type Target = SyncFails;

        fn open(&mut self, _started_at: NaiveDateTime) -> Result<SessionSink<SyncFails>, SinkError> {
            SessionSink::new(SyncFails(Vec::new()), "syncfails.csv")
        }
    }

    struct SyncFails(Vec<u8>);

    impl Write for SyncFails {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SinkTarget for SyncFails {
        fn sync_all(&mut self) -> std::io::Result<()> {
            Err(std::io::Error::other("input/output error"))
        }
    }

    struct DiskFull {
        flushes_left: usize,
    }

    impl Write for DiskFull {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.flushes_left == 0 {
                return Err(std::io::Error::other("no space left on device"));
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            if self.flushes_left == 0 {
                return Err(std::io::Error::other("no space left on device"));
            }
            self.flushes_left -= 1;
            Ok(())
        }
    }

    impl SinkTarget for DiskFull {
        fn sync_all(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
