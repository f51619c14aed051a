//! Custom (administrator-uploaded) plugin loading: manifest, signature
//! verification, and dynamic library resolution.

mod dynamic;
mod manifest;
mod signature;

pub use dynamic::{BinaryStore, CustomPluginRecord, HttpObjectStore, LoaderSafetyConfig, LocalFsStore, PluginLoader, HOST_SDK_VERSION};
pub use manifest::PluginManifest;
pub use signature::KeyRegistry;
