pub mod config;
pub mod error;
pub mod flags;
mod internal;
pub mod media_info;
pub mod message;
pub mod player;
mod reconcile;
pub mod renderer;
mod seek;
pub mod snapshot;
pub mod state;
pub mod visualization;

pub use config::PlayerConfig;
pub use error::Error;
pub use flags::PlaybinFlags;
pub use media_info::{MediaInfo, StreamDetails, StreamInfo, StreamKind};
pub use message::{MessageBus, PlayMessage};
pub use player::{BalanceChannel, Player};
pub use renderer::{SinkRenderer, VideoRenderer};
pub use snapshot::{SnapshotFormat, SnapshotSpec};
pub use state::PlaybackState;
pub use visualization::Visualization;
