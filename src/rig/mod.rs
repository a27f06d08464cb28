//! Wheelchair rig — hand-rim rotation, wheels, and chair locomotion.
//!
//! Provides:
//! - `rotation`: per-hand and bimanual rotation estimates from tracked poses
//! - `wheel`: grab-driven push-rim wheel controllers
//! - `vehicle`: differential-drive integration of the chair body
//! - `comfort`: activity, comfort overlays, and play-area safety
//! - `chair`: the `WheelchairRig` that runs the update and physics passes

pub mod math;
pub mod pose;
pub mod history;
pub mod filter;
pub mod rotation;
pub mod wheel;
pub mod vehicle;
pub mod comfort;
pub mod session;
pub mod frame_timing;
pub mod chair;

pub use chair::{RigEvent, WheelchairRig};
pub use pose::{Hand, HandFrame, HandPose};
pub use rotation::{RotationEstimate, RotationEvent, RotationSink};
pub use session::SessionContext;
