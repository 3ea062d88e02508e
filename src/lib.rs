pub mod agent_modules;
pub mod db;
pub mod version;
