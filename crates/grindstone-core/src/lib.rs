//! # Grindstone Core
//!
//! Shared foundation for the Grindstone automation daemon: the data model
//! (applications, accounts, tasks, recognition states), the error type,
//! the traits that external collaborators implement (device control,
//! feature extraction, task handlers, action behaviors), process
//! configuration, and reset-time arithmetic.
//!
//! This crate owns no I/O beyond reading the config file. Vision inference
//! and device actuation live entirely behind the traits in [`traits`].

pub mod clock;
pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{GrindConfig, Settings, SettingsSnapshot};
pub use error::{GrindError, Result};
pub use traits::{
    ActionBehavior, ActivitySink, DeviceController, FeatureExtractor, Navigator, TaskContext,
    TaskHandler,
};
pub use types::{
    Account, AccountStatus, ActionEdge, ActivityEntry, AppStatus, Application, Capture, CaptureId,
    Recognition, RecognitionState, Roi, Setting, TaskKind, TaskSpec, TaskStatus, UNKNOWN_STATE,
};
