/*!
Core modules of the threat relay
*/

pub mod config;
pub mod logging;
pub mod output_plugins;
pub mod state_manager;
pub mod threat_source;
pub mod tracker;
