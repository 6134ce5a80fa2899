pub mod file_settings_store;
pub mod memory_settings_store;

pub use file_settings_store::FileSettingsStore;
pub use memory_settings_store::MemorySettingsStore;
