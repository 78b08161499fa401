//! Attendance session: configuration, identity store, enrollment,
//! attendance log and the recognition loop.

pub mod config;
pub mod enroll;
pub mod identity;
pub mod log;
pub mod session;
pub mod store;

pub use config::{Config, ConfigError};
pub use enroll::{enroll, EnrollError};
pub use identity::{reference_photos, IdentityKey, KeyError};
pub use log::{AttendanceLog, AttendanceRecord, LogError, TIMESTAMP_FORMAT};
pub use session::{
    DisplaySink, FrameSource, LoopState, RecognitionSession, SessionError, SessionSummary,
    StopReason, DOWNSCALE_FACTOR,
};
pub use store::{IdentityStore, StoreError};
