//! Recognition loop: capture, embed, match, mark.
//!
//! The loop is a two-state machine (`Running` → `Stopped`). Frame
//! acquisition and presentation go through [`FrameSource`] and
//! [`DisplaySink`] so the matching and bookkeeping can run on synthetic
//! frames.

use crate::log::{AttendanceLog, AttendanceRecord, LogError, TIMESTAMP_FORMAT};
use crate::store::IdentityStore;
use chrono::{Local, NaiveDateTime, Timelike};
use rollcall_core::{AnalyzerError, EuclideanMatcher, FaceAnalyzer, Matcher};
use rollcall_hw::{Camera, CameraError, CameraStream, Frame, FrameError};
use std::collections::HashSet;
use thiserror::Error;

/// Frames are shrunk by this factor on each axis before detection.
pub const DOWNSCALE_FACTOR: u32 = 4;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("frame conversion failed: {0}")]
    Frame(#[from] FrameError),
    #[error("face analysis failed: {0}")]
    Analyze(#[from] AnalyzerError),
    #[error("attendance log: {0}")]
    Log(#[from] LogError),
    #[error("display failed: {0}")]
    Display(#[from] std::io::Error),
}

/// Produces frames one at a time. An error ends the recognition loop.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Frame, CameraError>;
}

impl FrameSource for Camera {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        self.capture_frame()
    }
}

impl FrameSource for CameraStream<'_> {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        CameraStream::next_frame(self)
    }
}

impl<S: FrameSource + ?Sized> FrameSource for &mut S {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        (**self).next_frame()
    }
}

/// Live preview and console feedback for the recognition loop.
pub trait DisplaySink {
    /// Present the full-resolution frame.
    fn show(&mut self, frame: &Frame) -> std::io::Result<()>;

    /// Poll once for the quit command.
    fn quit_requested(&mut self) -> std::io::Result<bool>;

    /// Report a newly marked identity.
    fn marked(&mut self, record: &AttendanceRecord) -> std::io::Result<()> {
        println!("Marked {} at {}", record.name, record.timestamp.format(TIMESTAMP_FORMAT));
        Ok(())
    }
}

impl<D: DisplaySink + ?Sized> DisplaySink for &mut D {
    fn show(&mut self, frame: &Frame) -> std::io::Result<()> {
        (**self).show(frame)
    }

    fn quit_requested(&mut self) -> std::io::Result<bool> {
        (**self).quit_requested()
    }

    fn marked(&mut self, record: &AttendanceRecord) -> std::io::Result<()> {
        (**self).marked(record)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The user pressed the quit key.
    QuitKey,
    /// The frame source returned no frame.
    CaptureFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Stopped(StopReason),
}

/// Outcome of [`RecognitionSession::run`].
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub reason: StopReason,
    /// Frames captured and processed.
    pub frames: u64,
    /// Rows appended during this run, in first-sighting order.
    pub marked: Vec<AttendanceRecord>,
}

/// State of one recognition run: known identities, the log, and who has been marked.
pub struct RecognitionSession<A: FaceAnalyzer> {
    store: IdentityStore,
    log: AttendanceLog,
    analyzer: A,
    tolerance: f32,
    marked: HashSet<String>,
    sightings: Vec<AttendanceRecord>,
}

impl<A: FaceAnalyzer> RecognitionSession<A> {
    pub fn new(store: IdentityStore, log: AttendanceLog, analyzer: A, tolerance: f32) -> Self {
        Self {
            store,
            log,
            analyzer,
            tolerance,
            marked: HashSet::new(),
            sightings: Vec::new(),
        }
    }

    pub fn store(&self) -> &IdentityStore {
        &self.store
    }

    /// Whether `name` already has a row in this run.
    pub fn is_marked(&self, name: &str) -> bool {
        self.marked.contains(name)
    }

    /// Rows appended so far, in first-sighting order.
    pub fn sightings(&self) -> &[AttendanceRecord] {
        &self.sightings
    }

    /// Downscale, convert to RGB, embed every face, and mark first sightings.
    ///
    /// Returns the rows appended for this frame.
    pub fn process_frame(&mut self, frame: &Frame) -> Result<Vec<AttendanceRecord>, SessionError> {
        let mut new_rows = Vec::new();
        self.mark_frame(frame, |record| {
            new_rows.push(record.clone());
            Ok(())
        })?;
        Ok(new_rows)
    }

    /// Like [`process_frame`](Self::process_frame), calling `on_mark` right after
    /// each row is appended.
    fn mark_frame<F>(&mut self, frame: &Frame, mut on_mark: F) -> Result<(), SessionError>
    where
        F: FnMut(&AttendanceRecord) -> std::io::Result<()>,
    {
        let small = frame.downscale(DOWNSCALE_FACTOR)?;
        let rgb = small.to_rgb()?;
        let faces = self.analyzer.encodings(&rgb)?;

        for face in &faces {
            let result = EuclideanMatcher.compare(face, self.store.embeddings(), self.tolerance);
            tracing::trace!(closest = ?result.closest, distance = result.distance, "face compared");

            let Some(name) = result.index.and_then(|i| self.store.name(i)) else {
                continue;
            };
            if self.marked.contains(name) {
                continue;
            }

            let record = AttendanceRecord {
                name: name.to_string(),
                timestamp: now(),
            };
            self.log.append(&record)?;
            self.marked.insert(record.name.clone());
            tracing::info!(name = %record.name, distance = result.distance, "attendance marked");

            self.sightings.push(record.clone());
            on_mark(&record)?;
        }

        Ok(())
    }

    /// One loop iteration. Returns the state after it.
    pub fn step(
        &mut self,
        source: &mut dyn FrameSource,
        display: &mut dyn DisplaySink,
    ) -> Result<LoopState, SessionError> {
        let frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::info!(error = %e, "frame capture failed; stopping");
                return Ok(LoopState::Stopped(StopReason::CaptureFailed));
            }
        };

        self.mark_frame(&frame, |record| display.marked(record))?;

        display.show(&frame)?;

        if display.quit_requested()? {
            return Ok(LoopState::Stopped(StopReason::QuitKey));
        }
        Ok(LoopState::Running)
    }

    /// Run until the quit key or a capture failure.
    ///
    /// Takes ownership of `source` and `display`; both are dropped before this
    /// returns, on success and on error.
    pub fn run<S, D>(
        &mut self,
        mut source: S,
        mut display: D,
    ) -> Result<SessionSummary, SessionError>
    where
        S: FrameSource,
        D: DisplaySink,
    {
        let already_marked = self.sightings.len();
        let mut frames = 0u64;

        tracing::info!(identities = self.store.len(), "recognition started");

        let reason = loop {
            match self.step(&mut source, &mut display)? {
                LoopState::Running => frames += 1,
                LoopState::Stopped(reason) => {
                    if reason == StopReason::QuitKey {
                        frames += 1;
                    }
                    break reason;
                }
            }
        };

        tracing::info!(
            ?reason,
            frames,
            marked = self.sightings.len() - already_marked,
            "recognition stopped"
        );

        Ok(SessionSummary {
            reason,
            frames,
            marked: self.sightings[already_marked..].to_vec(),
        })
    }
}

/// Current local time truncated to whole seconds.
fn now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use rollcall_core::{BoundingBox, Embedding};
    use rollcall_hw::ChannelOrder;
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    const RED: [u8; 3] = [220, 20, 20];
    const BLUE: [u8; 3] = [20, 20, 220];
    const GREEN: [u8; 3] = [20, 220, 20];

    /// One face per image unless it is near-black; embeds by the centre colour.
    #[derive(Default)]
    struct ColourAnalyzer {
        seen_sizes: Vec<(u32, u32)>,
    }

    impl FaceAnalyzer for ColourAnalyzer {
        fn locate(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, AnalyzerError> {
            self.seen_sizes.push(image.dimensions());
            let [r, g, b] = image.get_pixel(image.width() / 2, image.height() / 2).0;
            if u16::from(r) + u16::from(g) + u16::from(b) < 30 {
                return Ok(Vec::new());
            }
            Ok(vec![BoundingBox {
                x: 0.0,
                y: 0.0,
                width: image.width() as f32,
                height: image.height() as f32,
                confidence: 0.9,
                landmarks: None,
            }])
        }

        fn encode(
            &mut self,
            image: &RgbImage,
            faces: &[BoundingBox],
        ) -> Result<Vec<Embedding>, AnalyzerError> {
            let p = image.get_pixel(image.width() / 2, image.height() / 2).0;
            Ok(faces.iter().map(|_| colour_embedding(p)).collect())
        }
    }

    fn colour_embedding(rgb: [u8; 3]) -> Embedding {
        Embedding::new(rgb.iter().map(|&c| c as f32 / 255.0).collect())
    }

    struct ScriptedSource {
        frames: VecDeque<Frame>,
        dropped: Rc<Cell<bool>>,
    }

    impl ScriptedSource {
        fn new(colours: &[[u8; 3]]) -> Self {
            Self {
                frames: colours.iter().map(|&c| Frame::solid(64, 48, c)).collect(),
                dropped: Rc::new(Cell::new(false)),
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> Result<Frame, CameraError> {
            self.frames
                .pop_front()
                .ok_or_else(|| CameraError::CaptureFailed("end of script".into()))
        }
    }

    impl Drop for ScriptedSource {
        fn drop(&mut self) {
            self.dropped.set(true);
        }
    }

    #[derive(Default)]
    struct RecordingDisplay {
        shown: Vec<(u32, u32)>,
        announced: Vec<String>,
        quit_after: Option<usize>,
        dropped: Rc<Cell<bool>>,
    }

    impl DisplaySink for RecordingDisplay {
        fn show(&mut self, frame: &Frame) -> std::io::Result<()> {
            self.shown.push((frame.width, frame.height));
            Ok(())
        }

        fn quit_requested(&mut self) -> std::io::Result<bool> {
            Ok(self.quit_after.is_some_and(|n| self.shown.len() >= n))
        }

        fn marked(&mut self, record: &AttendanceRecord) -> std::io::Result<()> {
            self.announced.push(record.name.clone());
            Ok(())
        }
    }

    impl Drop for RecordingDisplay {
        fn drop(&mut self) {
            self.dropped.set(true);
        }
    }

    fn session(dir: &tempfile::TempDir) -> RecognitionSession<ColourAnalyzer> {
        let mut store = IdentityStore::new();
        store.push("alice", colour_embedding(RED));
        store.push("bob", colour_embedding(BLUE));
        let log = AttendanceLog::new(dir.path().join("attendance.csv"));
        RecognitionSession::new(store, log, ColourAnalyzer::default(), 0.1)
    }

    fn logged_names(session: &RecognitionSession<ColourAnalyzer>) -> Vec<String> {
        session.log.records().unwrap().into_iter().map(|r| r.name).collect()
    }

    #[test]
    fn test_repeated_sightings_mark_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(&dir);

        let summary = session
            .run(ScriptedSource::new(&[RED, RED, BLUE, RED, BLUE]), RecordingDisplay::default())
            .unwrap();

        assert_eq!(summary.reason, StopReason::CaptureFailed);
        assert_eq!(summary.frames, 5);
        assert_eq!(logged_names(&session), vec!["alice", "bob"]);
        assert!(session.is_marked("alice") && session.is_marked("bob"));
    }

    #[test]
    fn test_unknown_face_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(&dir);

        let rows = session.process_frame(&Frame::solid(64, 48, GREEN)).unwrap();
        assert!(rows.is_empty());
        assert!(!session.log.path().exists());
    }

    #[test]
    fn test_frame_without_face_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(&dir);
        assert!(session.process_frame(&Frame::solid(64, 48, [0, 0, 0])).unwrap().is_empty());
    }

    #[test]
    fn test_detection_runs_on_quarter_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(&dir);

        session.process_frame(&Frame::solid(640, 480, RED)).unwrap();
        assert_eq!(session.analyzer.seen_sizes, vec![(160, 120)]);
    }

    #[test]
    fn test_bgr_frame_is_converted_before_matching() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(&dir);

        // RED stored as BGR bytes
        let bgr = [RED[2], RED[1], RED[0]].repeat(64 * 48);
        let frame = Frame::new(bgr, 64, 48, ChannelOrder::Bgr).unwrap();
        let rows = session.process_frame(&frame).unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "alice");
    }

    #[test]
    fn test_preview_gets_full_resolution_frames() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(&dir);
        let mut display = RecordingDisplay::default();

        session
            .run(ScriptedSource::new(&[GREEN, RED]), &mut display)
            .unwrap();

        assert_eq!(display.shown, vec![(64, 48), (64, 48)]);
        assert_eq!(display.announced, vec!["alice"]);
    }

    #[test]
    fn test_quit_key_stops_loop() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(&dir);
        let mut display = RecordingDisplay::default();
        display.quit_after = Some(2);

        let summary = session
            .run(ScriptedSource::new(&[GREEN, RED, BLUE, BLUE]), &mut display)
            .unwrap();

        assert_eq!(summary.reason, StopReason::QuitKey);
        assert_eq!(summary.frames, 2);
        assert_eq!(display.shown.len(), 2);
        // BLUE frames were never captured
        assert_eq!(logged_names(&session), vec!["alice"]);
    }

    #[test]
    fn test_step_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(&dir);
        let mut source = ScriptedSource::new(&[RED]);
        let mut display = RecordingDisplay::default();

        assert_eq!(session.step(&mut source, &mut display).unwrap(), LoopState::Running);
        assert_eq!(
            session.step(&mut source, &mut display).unwrap(),
            LoopState::Stopped(StopReason::CaptureFailed)
        );
    }

    #[test]
    fn test_source_and_display_released_on_every_exit() {
        struct FailingAnalyzer;
        impl FaceAnalyzer for FailingAnalyzer {
            fn locate(&mut self, _: &RgbImage) -> Result<Vec<BoundingBox>, AnalyzerError> {
                Err(AnalyzerError::Other("model crashed".into()))
            }
            fn encode(
                &mut self,
                _: &RgbImage,
                _: &[BoundingBox],
            ) -> Result<Vec<Embedding>, AnalyzerError> {
                Ok(Vec::new())
            }
        }

        let dir = tempfile::tempdir().unwrap();

        // Normal exit
        let source = ScriptedSource::new(&[RED]);
        let display = RecordingDisplay::default();
        let (source_dropped, display_dropped) = (source.dropped.clone(), display.dropped.clone());
        session(&dir).run(source, display).unwrap();
        assert!(source_dropped.get() && display_dropped.get());

        // Error exit
        let mut failing = RecognitionSession::new(
            IdentityStore::new(),
            AttendanceLog::new(dir.path().join("other.csv")),
            FailingAnalyzer,
            0.1,
        );
        let source = ScriptedSource::new(&[RED]);
        let display = RecordingDisplay::default();
        let (source_dropped, display_dropped) = (source.dropped.clone(), display.dropped.clone());
        assert!(matches!(failing.run(source, display), Err(SessionError::Analyze(_))));
        assert!(source_dropped.get() && display_dropped.get());
    }

    #[test]
    fn test_each_row_announced_before_next_append() {
        /// Two faces per frame: RED then BLUE.
        struct PairAnalyzer;
        impl FaceAnalyzer for PairAnalyzer {
            fn locate(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, AnalyzerError> {
                let face = BoundingBox {
                    x: 0.0,
                    y: 0.0,
                    width: image.width() as f32,
                    height: image.height() as f32,
                    confidence: 0.9,
                    landmarks: None,
                };
                Ok(vec![face.clone(), face])
            }
            fn encode(
                &mut self,
                _: &RgbImage,
                _: &[BoundingBox],
            ) -> Result<Vec<Embedding>, AnalyzerError> {
                Ok(vec![colour_embedding(RED), colour_embedding(BLUE)])
            }
        }

        /// Turns the log file into a directory once the first mark is announced.
        struct BreakLogDisplay {
            log_path: std::path::PathBuf,
            announced: Vec<String>,
        }
        impl DisplaySink for BreakLogDisplay {
            fn show(&mut self, _: &Frame) -> std::io::Result<()> {
                Ok(())
            }
            fn quit_requested(&mut self) -> std::io::Result<bool> {
                Ok(false)
            }
            fn marked(&mut self, record: &AttendanceRecord) -> std::io::Result<()> {
                self.announced.push(record.name.clone());
                std::fs::remove_file(&self.log_path)?;
                std::fs::create_dir(&self.log_path)
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let mut store = IdentityStore::new();
        store.push("alice", colour_embedding(RED));
        store.push("bob", colour_embedding(BLUE));
        let log_path = dir.path().join("attendance.csv");
        let mut session =
            RecognitionSession::new(store, AttendanceLog::new(&log_path), PairAnalyzer, 0.1);
        let mut display = BreakLogDisplay { log_path, announced: Vec::new() };

        let result = session.step(&mut ScriptedSource::new(&[RED]), &mut display);

        assert!(matches!(result, Err(SessionError::Log(_))));
        assert_eq!(display.announced, vec!["alice"]);
        assert!(session.is_marked("alice") && !session.is_marked("bob"));
        assert_eq!(session.sightings().len(), 1);
    }

    #[test]
    fn test_marked_rows_have_second_precision_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(&dir);

        let rows = session.process_frame(&Frame::solid(64, 48, BLUE)).unwrap();
        assert_eq!(rows[0].timestamp.nanosecond(), 0);
        assert_eq!(session.log.records().unwrap(), rows);
    }
}
