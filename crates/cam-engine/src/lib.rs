pub mod camera;
pub mod command;
pub mod doctor;
pub mod engine;
pub mod error;
pub mod events;
pub mod exclusion;
pub mod gimbal;
pub mod mission;
pub mod params;
pub mod recording;
pub mod shutter;
pub mod snap;
pub mod thermal;
pub mod timer;
pub mod variant;

pub use engine::{CameraEngine, ComponentIds};
pub use error::EngineError;
pub use events::{CameraEvent, Sound};
pub use params::{ParamCache, ParamStore, ParamValue};
pub use variant::VariantConfig;
