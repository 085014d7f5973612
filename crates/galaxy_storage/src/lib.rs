pub mod codec;
pub mod settings;

pub use codec::{FileHeader, decode, load, save};
pub use settings::{load_config, load_config_or_default, save_config};
