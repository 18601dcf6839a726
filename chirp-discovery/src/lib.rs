pub mod bridge;
pub mod builder;
pub mod catchup;
pub mod classes;
pub mod filter;
pub mod log_level;
pub mod normalize;
pub mod reconcile;
pub mod runtime;
pub mod script;
pub mod settings;
pub mod timers;

pub use bridge::{Bridge, Phase};
pub use log_level::{LogLevel, LogLevelControl};
pub use runtime::{BridgeDeps, BridgeHandle, Event, run};
pub use settings::BridgeSettings;
