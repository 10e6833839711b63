pub mod channel;
pub mod codec;
pub mod config;
pub mod constants;
pub mod device;
pub mod edge;
pub mod error;
pub mod output;
pub mod params;
pub mod protocol;
pub mod scan;


// Re-export the main entry points for easy access
pub use channel::{DeviceChannel, Reply, ScriptedChannel};
pub use codec::{CropRect, ImageCodec, JpegtranCodec};
pub use config::{ColorMode, CropMode, EngineConfig, PaperWait, Resolution, ScanConfig};
pub use device::{DeviceConfig, UsbChannel};
pub use error::Error;
pub use output::OutputTarget;
pub use params::ParameterBlock;
pub use scan::{ScannedPage, Scanner};
