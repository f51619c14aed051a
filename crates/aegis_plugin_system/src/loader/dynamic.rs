//! Custom plugin loading pipeline: fetch binary -> verify signature ->
//! check SDK version and required permissions -> resolve library symbols
//! -> register.
//!
//! Grounded in the teacher's `plugin_system::manager::load_single_plugin`
//! and `validate_plugin_compatibility`: same discovery-then-symbol-lookup
//! shape, same `crate_version:rust_version` compatibility string, same
//! `*mut dyn Plugin` FFI boundary. Adapted from "load every .so in a
//! directory at startup" to "load one administrator-uploaded binary at a
//! time, gated on signature and permission checks the teacher's plugin
//! loader doesn't need because it only ever loads trusted, locally built
//! plugins."

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use dashmap::DashMap;
use ed25519_dalek::Signature;
use libloading::{Library, Symbol};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::definition::PluginDefinition;
use crate::error::PluginError;
use crate::loader::manifest::PluginManifest;
use crate::loader::signature::KeyRegistry;
use crate::plugin::Plugin;
use crate::registry::PluginFactory;

/// The SDK version this build of the core exports to custom plugins, in
/// the same `crate_version:rust_version` shape the teacher's ABI check
/// uses. The Rust-compiler half is unavailable without a build script, so
/// it's left `"unknown"` and, like the teacher's check, skipped whenever
/// either side reports `"unknown"`.
pub const HOST_SDK_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), ":unknown");

#[derive(Debug, Clone, Default)]
pub struct LoaderSafetyConfig {
    /// Require exact SDK version match instead of major.minor.
    pub strict_versioning: bool,
}

/// Persisted per custom plugin upload. Kept even when verification or a
/// later check fails, so an administrator can see why a plugin never
/// activated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomPluginRecord {
    pub plugin_id: String,
    pub version: String,
    pub storage_path: String,
    pub signature: Vec<u8>,
    pub trusted_key: Option<String>,
    /// SHA-256 of the exact uploaded bytes, recorded independent of the
    /// signature check so an administrator can tell two uploads with the
    /// same plugin id/version apart, or confirm a re-upload is identical.
    pub content_sha256: String,
    pub verified: bool,
    pub enabled: bool,
    pub required_features: HashSet<String>,
    pub required_permissions: HashSet<String>,
}

#[async_trait]
pub trait BinaryStore: Send + Sync {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>, PluginError>;
}

pub struct LocalFsStore {
    pub root: PathBuf,
}

#[async_trait]
impl BinaryStore for LocalFsStore {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>, PluginError> {
        tokio::fs::read(self.root.join(path)).await.map_err(PluginError::Io)
    }
}

/// Fetches plugin binaries from an HTTP(S) object store, for deployments
/// that keep uploads off the runtime host's disk.
pub struct HttpObjectStore {
    pub client: reqwest::Client,
    pub base_url: String,
}

#[async_trait]
impl BinaryStore for HttpObjectStore {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>, PluginError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PluginError::Runtime(format!("fetching plugin binary: {e}")))?
            .error_for_status()
            .map_err(|e| PluginError::Runtime(format!("fetching plugin binary: {e}")))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| PluginError::Runtime(format!("reading plugin binary: {e}")))?;
        Ok(bytes.to_vec())
    }
}

type CreatePluginFn = unsafe extern "C" fn() -> *mut dyn Plugin;
type PluginDefinitionFn = unsafe extern "C" fn() -> *mut std::os::raw::c_char;

pub struct PluginLoader {
    store: Arc<dyn BinaryStore>,
    keys: Arc<KeyRegistry>,
    cache_dir: PathBuf,
    safety: LoaderSafetyConfig,
    records: DashMap<String, CustomPluginRecord>,
    manifests: DashMap<String, PluginManifest>,
    libraries: DashMap<String, Arc<Library>>,
}

impl PluginLoader {
    pub fn new(store: Arc<dyn BinaryStore>, keys: Arc<KeyRegistry>, cache_dir: PathBuf, safety: LoaderSafetyConfig) -> Self {
        Self {
            store,
            keys,
            cache_dir,
            safety,
            records: DashMap::new(),
            manifests: DashMap::new(),
            libraries: DashMap::new(),
        }
    }

    pub fn record(&self, plugin_id: &str) -> Option<CustomPluginRecord> {
        self.records.get(plugin_id).map(|e| e.value().clone())
    }

    pub fn list_records(&self) -> Vec<CustomPluginRecord> {
        self.records.iter().map(|e| e.value().clone()).collect()
    }

    pub fn delete(&self, plugin_id: &str) {
        self.records.remove(plugin_id);
        self.manifests.remove(plugin_id);
        self.libraries.remove(plugin_id);
    }

    pub fn set_enabled(&self, plugin_id: &str, enabled: bool) -> Result<(), PluginError> {
        let mut record = self
            .records
            .get_mut(plugin_id)
            .ok_or_else(|| PluginError::NotFound(plugin_id.to_string()))?;
        record.enabled = enabled;
        Ok(())
    }

    /// Fetches the binary and checks its signature, persisting a record
    /// regardless of outcome. Returns an error (with the record already
    /// saved) if the signature doesn't verify against any trusted key — no
    /// library symbol is touched before this check runs.
    pub async fn upload(&self, manifest: PluginManifest, signature_bytes: Vec<u8>, storage_path: String) -> Result<CustomPluginRecord, PluginError> {
        let binary = self.store.fetch(&storage_path).await?;
        let signature = Signature::from_slice(&signature_bytes).map_err(|_| PluginError::SignatureInvalid)?;
        let verify_result = self.keys.verify(&binary, &signature);
        let content_sha256 = content_digest(&binary);

        let record = CustomPluginRecord {
            plugin_id: manifest.id.clone(),
            version: manifest.version.clone(),
            storage_path,
            signature: signature_bytes,
            trusted_key: verify_result.as_ref().ok().cloned(),
            content_sha256,
            verified: verify_result.is_ok(),
            enabled: false,
            required_features: manifest.required_features.clone(),
            required_permissions: manifest.required_permissions.clone(),
        };
        self.records.insert(manifest.id.clone(), record.clone());
        self.manifests.insert(manifest.id.clone(), manifest.clone());

        if verify_result.is_err() {
            warn!(plugin_id = %manifest.id, "custom plugin signature verification failed");
            return Err(PluginError::SignatureInvalid);
        }
        info!(plugin_id = %manifest.id, key = %record.trusted_key.as_deref().unwrap_or("?"), "custom plugin signature verified");
        Ok(record)
    }

    /// Resolves a verified, permission-granted upload's library symbols
    /// and returns its definition and instance factory for registration.
    /// Never touches the binary's code until signature, SDK version, and
    /// permission checks have all passed.
    pub async fn load(&self, plugin_id: &str, granted_permissions: &HashSet<String>) -> Result<(PluginDefinition, PluginFactory), PluginError> {
        let record = self
            .records
            .get(plugin_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| PluginError::NotFound(plugin_id.to_string()))?;
        if !record.verified {
            return Err(PluginError::SignatureInvalid);
        }
        for permission in &record.required_permissions {
            if !granted_permissions.contains(permission) {
                return Err(PluginError::PermissionDenied(permission.clone()));
            }
        }
        let manifest = self
            .manifests
            .get(plugin_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| PluginError::NotFound(plugin_id.to_string()))?;
        self.check_sdk_version(&manifest.sdk_version)?;

        let binary = self.store.fetch(&record.storage_path).await?;
        let cached_path = self.cache_to_disk(plugin_id, &record.version, &binary).await?;

        let (definition, factory, library) = load_library(&cached_path)?;
        self.libraries.insert(plugin_id.to_string(), library);
        Ok((definition, factory))
    }

    fn check_sdk_version(&self, plugin_sdk_version: &str) -> Result<(), PluginError> {
        let parse = |s: &str| -> Option<(&str, &str)> {
            let mut parts = s.splitn(2, ':');
            Some((parts.next()?, parts.next()?))
        };
        let (Some((plugin_crate, plugin_rust)), Some((host_crate, host_rust))) =
            (parse(plugin_sdk_version), parse(HOST_SDK_VERSION))
        else {
            return Err(PluginError::SdkVersionMismatch {
                required: plugin_sdk_version.to_string(),
                host: HOST_SDK_VERSION.to_string(),
            });
        };

        let compatible = if self.safety.strict_versioning {
            plugin_crate == host_crate
        } else {
            major_minor_compatible(plugin_crate, host_crate)
        };
        if !compatible {
            return Err(PluginError::SdkVersionMismatch {
                required: plugin_sdk_version.to_string(),
                host: HOST_SDK_VERSION.to_string(),
            });
        }

        if plugin_rust != host_rust && plugin_rust != "unknown" && host_rust != "unknown" {
            return Err(PluginError::SdkVersionMismatch {
                required: plugin_sdk_version.to_string(),
                host: HOST_SDK_VERSION.to_string(),
            });
        }
        Ok(())
    }

    async fn cache_to_disk(&self, plugin_id: &str, version: &str, binary: &[u8]) -> Result<PathBuf, PluginError> {
        tokio::fs::create_dir_all(&self.cache_dir).await.map_err(PluginError::Io)?;
        let extension = if cfg!(target_os = "windows") {
            "dll"
        } else if cfg!(target_os = "macos") {
            "dylib"
        } else {
            "so"
        };
        let path = self.cache_dir.join(format!("{plugin_id}-{version}.{extension}"));
        tokio::fs::write(&path, binary).await.map_err(PluginError::Io)?;
        Ok(path)
    }
}

fn content_digest(binary: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(binary);
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

fn major_minor_compatible(a: &str, b: &str) -> bool {
    let major_minor = |v: &str| -> Option<(&str, &str)> {
        let mut it = v.splitn(3, '.');
        Some((it.next()?, it.next()?))
    };
    match (major_minor(a), major_minor(b)) {
        (Some(a), Some(b)) => a == b,
        _ => a == b,
    }
}

/// Loads the library and resolves `aegis_plugin_definition` (JSON
/// metadata) and `aegis_plugin_create` (instance factory) exports.
fn load_library(path: &Path) -> Result<(PluginDefinition, PluginFactory, Arc<Library>), PluginError> {
    let library = unsafe { Library::new(path) }
        .map_err(|e| PluginError::Runtime(format!("failed to load plugin library: {e}")))?;

    let definition: PluginDefinition = unsafe {
        let get_definition: Symbol<PluginDefinitionFn> = library
            .get(b"aegis_plugin_definition")
            .map_err(|e| PluginError::Runtime(format!("plugin missing aegis_plugin_definition export: {e}")))?;
        let ptr = get_definition();
        if ptr.is_null() {
            return Err(PluginError::Runtime("plugin returned a null definition".to_string()));
        }
        let json = std::ffi::CStr::from_ptr(ptr).to_string_lossy().into_owned();
        serde_json::from_str(&json).map_err(|e| PluginError::Runtime(format!("plugin definition is not valid json: {e}")))?
    };

    // Resolved eagerly so a missing export fails at load time, not on the
    // first instance creation.
    unsafe {
        let _: Symbol<CreatePluginFn> = library
            .get(b"aegis_plugin_create")
            .map_err(|e| PluginError::Runtime(format!("plugin missing aegis_plugin_create export: {e}")))?;
    }

    let library = Arc::new(library);
    let factory_library = library.clone();
    let factory: PluginFactory = Arc::new(move || {
        let create: Symbol<CreatePluginFn> = unsafe {
            factory_library
                .get(b"aegis_plugin_create")
                .expect("checked present at load time")
        };
        let ptr = unsafe { create() };
        let boxed: Box<dyn Plugin> = unsafe { Box::from_raw(ptr) };
        Arc::from(boxed)
    });

    Ok((definition, factory, library))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn major_minor_matches_ignore_patch() {
        assert!(major_minor_compatible("1.2.3", "1.2.9"));
        assert!(!major_minor_compatible("1.2.3", "1.3.0"));
    }
}
