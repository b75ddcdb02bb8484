//! Core story state: time arithmetic, asset handles, the editable data
//! model, and the composition session that owns them.

pub mod asset;
pub mod model;
pub mod session;
pub mod time;

pub use asset::{AssetSource, MediaAsset, Size};
pub use model::{
    BackgroundSong, CompositionMode, Gradient, MediaSnapshot, Point, Rgba, TextOverlay, TextSpec,
    VideoClip,
};
pub use session::{CompositionSession, SessionError};
pub use time::{Seconds, TimeRange, MAX_STORY_SECONDS};
