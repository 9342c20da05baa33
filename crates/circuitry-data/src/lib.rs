pub mod loader;
pub mod sim_config;

pub use loader::{DataLoadError, Format};
pub use sim_config::{SIM_CONFIG_BASE_NAME, find_sim_config, load_sim_config, parse_sim_config};
