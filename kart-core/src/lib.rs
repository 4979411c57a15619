pub mod frame_math;
pub mod geometry;
pub mod networking;
pub mod player_inputs;
mod settings;

pub use settings::{Drivetrain, Settings, GLOBAL_CONFIG};

pub type PlayerID = uuid::Uuid;
