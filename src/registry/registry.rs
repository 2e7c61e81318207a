use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, warn};

use crate::config::TiersConfig;
use crate::gguf::{is_gguf_file, GgufError, GgufMetadata};
use crate::registry::types::{ModelEntry, RegistryError, RuntimeSettings, Tier};

/// Name of the persisted registry file inside the models directory.
const REGISTRY_FILENAME: &str = "model_registry.json";

/// Outcome of one discovery scan.
#[derive(Debug, Clone, Default)]
pub struct ScanSummary {
    /// Models added by this scan
    pub new_models: usize,
    /// Entries dropped because their file disappeared
    pub removed_models: usize,
    /// Files that looked like GGUF but could not be processed
    pub failed_models: usize,
}

/// Manages the model registry, including scanning for models and loading
/// registry data. The registry is the single owner of ModelEntry state;
/// every mutation goes through its write lock.
pub struct ModelRegistry {
    /// Directory where model files are stored
    pub models_dir: PathBuf,
    /// Registry of all available models and their metadata, keyed by model id
    registry: RwLock<HashMap<String, ModelEntry>>,
}

impl ModelRegistry {
    /// Creates a new model registry for the specified models directory.
    pub fn new(models_dir: PathBuf) -> Self {
        Self {
            models_dir,
            registry: RwLock::new(HashMap::new()),
        }
    }

    /// Loads the registry file if one exists.
    pub fn load_or_create(&self) -> Result<(), RegistryError> {
        let registry_path = self.models_dir.join(REGISTRY_FILENAME);
        let mut registry = self.registry.write().map_err(|_| RegistryError::LockPoisoned)?;

        if registry_path.exists() {
            let content = fs::read_to_string(&registry_path)?;
            *registry = serde_json::from_str(&content)?;
        }

        Ok(())
    }

    /// Ensures the models directory exists, creating it if necessary.
    fn ensure_models_dir(&self) -> Result<(), RegistryError> {
        if !self.models_dir.exists() {
            fs::create_dir_all(&self.models_dir)?;
            info!("Created models directory: {}", self.models_dir.display());
        }
        Ok(())
    }

    /// Scans the models directory and reconciles the registry against it.
    ///
    /// New GGUF files are read for metadata, auto-assigned a tier from their
    /// parameter count, and given the tier's default runtime settings.
    /// Entries whose file no longer exists are removed. Existing entries are
    /// left untouched so user overrides survive.
    pub fn scan_models(&self, tiers: &TiersConfig) -> Result<ScanSummary, RegistryError> {
        // Load existing registry first
        self.load_or_create()?;
        self.ensure_models_dir()?;

        let mut registry = self.registry.write().map_err(|_| RegistryError::LockPoisoned)?;

        info!("Scanning for new models in {}", self.models_dir.display());

        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{prefix:.bold.dim} {spinner} {wide_msg}")
                .unwrap()
        );
        pb.enable_steady_tick(Duration::from_millis(120));
        pb.set_message("Checking models directory...");

        let mut summary = ScanSummary::default();

        // Remove entries for files that no longer exist
        let before = registry.len();
        registry.retain(|_, entry| self.models_dir.join(&entry.filename).exists());
        summary.removed_models = before - registry.len();
        if summary.removed_models > 0 {
            info!("Removed {} entries for vanished model files", summary.removed_models);
        }

        // Get current files in directory
        let current_files: Vec<_> = fs::read_dir(&self.models_dir)?
            .filter_map(Result::ok)
            .filter(|entry| {
                let path = entry.path();
                path.is_file()
                    && !path.file_name().map_or(true, |name| name.to_string_lossy().starts_with("."))
                    && path.extension().map_or(false, |ext| ext.to_string_lossy().to_lowercase() == "gguf")
            })
            .collect();

        let total = current_files.len();
        if total == 0 {
            pb.finish_with_message("No GGUF model files found in models directory");
            drop(registry);
            self.save()?;
            return Ok(summary);
        }

        let known_files: std::collections::HashSet<String> =
            registry.values().map(|e| e.filename.clone()).collect();

        for (i, entry) in current_files.iter().enumerate() {
            let filename = entry.file_name().to_string_lossy().to_string();

            // Skip if file is already in registry
            if known_files.contains(&filename) {
                continue;
            }

            pb.set_message(format!("Checking file: {}... ({}/{})", filename, i + 1, total));

            if !is_gguf_file(entry.path()) {
                pb.set_message(format!("Skipping non-GGUF file: {} ({}/{})", filename, i + 1, total));
                info!("Skipping non-GGUF file: {}", filename);
                continue;
            }

            match GgufMetadata::read(entry.path()) {
                Ok(meta) => {
                    pb.set_message(format!("Reading metadata from: {}... ({}/{})", filename, i + 1, total));

                    let model_entry = build_entry(&filename, &meta, tiers);
                    info!(
                        "Registered model {} ({}, {}) on tier {}",
                        model_entry.model_id, model_entry.architecture,
                        model_entry.size_label, model_entry.tier
                    );
                    registry.insert(model_entry.model_id.clone(), model_entry);
                    summary.new_models += 1;
                }
                Err(GgufError::InvalidFormat(_)) => {
                    // Magic matched but the header is broken; count it
                    pb.set_message(format!("Failed to process GGUF file: {} ({}/{})", filename, i + 1, total));
                    summary.failed_models += 1;
                    error!("Failed to read metadata from: {}", filename);
                }
                Err(e) => {
                    pb.set_message(format!("Error processing file: {} ({}/{})", filename, i + 1, total));
                    summary.failed_models += 1;
                    error!("Error with file {}: {}", filename, e);
                }
            }
        }

        let status = format!(
            "Scan complete. Found {} new model{}, {} failed",
            summary.new_models,
            if summary.new_models == 1 { "" } else { "s" },
            summary.failed_models
        );
        pb.disable_steady_tick();
        pb.finish_with_message(status);

        drop(registry);
        self.save()?;

        Ok(summary)
    }

    /// Saves the registry to disk.
    pub fn save(&self) -> Result<(), RegistryError> {
        let registry = self.registry.read().map_err(|_| RegistryError::LockPoisoned)?;
        let registry_path = self.models_dir.join(REGISTRY_FILENAME);
        let content = serde_json::to_string_pretty(&*registry)?;
        fs::write(registry_path, content)?;
        Ok(())
    }

    /// Returns all entries, sorted by model id for stable listings.
    pub fn list(&self) -> Result<Vec<ModelEntry>, RegistryError> {
        let registry = self.registry.read().map_err(|_| RegistryError::LockPoisoned)?;
        let mut models: Vec<ModelEntry> = registry.values().cloned().collect();
        models.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        Ok(models)
    }

    /// Gets a model entry by id.
    pub fn get(&self, model_id: &str) -> Result<ModelEntry, RegistryError> {
        let registry = self.registry.read().map_err(|_| RegistryError::LockPoisoned)?;
        registry
            .get(model_id)
            .cloned()
            .ok_or_else(|| RegistryError::ModelNotFound(model_id.to_string()))
    }

    /// Returns the enabled entries assigned to the given tier.
    pub fn enabled_for_tier(&self, tier: Tier) -> Result<Vec<ModelEntry>, RegistryError> {
        let registry = self.registry.read().map_err(|_| RegistryError::LockPoisoned)?;
        let mut models: Vec<ModelEntry> = registry
            .values()
            .filter(|e| e.enabled && e.tier == tier)
            .cloned()
            .collect();
        models.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        Ok(models)
    }

    /// Enables or disables a model and persists the change.
    pub fn set_enabled(&self, model_id: &str, enabled: bool) -> Result<ModelEntry, RegistryError> {
        let updated = {
            let mut registry = self.registry.write().map_err(|_| RegistryError::LockPoisoned)?;
            let entry = registry
                .get_mut(model_id)
                .ok_or_else(|| RegistryError::ModelNotFound(model_id.to_string()))?;
            entry.enabled = enabled;
            if !enabled {
                entry.assigned_port = None;
            }
            entry.clone()
        };
        self.save()?;
        info!("Model {} {}", model_id, if enabled { "enabled" } else { "disabled" });
        Ok(updated)
    }

    /// Overrides a model's tier assignment and persists the change.
    pub fn set_tier(&self, model_id: &str, tier: Tier) -> Result<ModelEntry, RegistryError> {
        let updated = {
            let mut registry = self.registry.write().map_err(|_| RegistryError::LockPoisoned)?;
            let entry = registry
                .get_mut(model_id)
                .ok_or_else(|| RegistryError::ModelNotFound(model_id.to_string()))?;
            entry.tier = tier;
            entry.clone()
        };
        self.save()?;
        info!("Model {} moved to tier {}", model_id, tier);
        Ok(updated)
    }

    /// Updates a model's runtime settings and persists the change.
    pub fn update_runtime(&self, model_id: &str, runtime: RuntimeSettings) -> Result<ModelEntry, RegistryError> {
        let updated = {
            let mut registry = self.registry.write().map_err(|_| RegistryError::LockPoisoned)?;
            let entry = registry
                .get_mut(model_id)
                .ok_or_else(|| RegistryError::ModelNotFound(model_id.to_string()))?;
            entry.runtime = runtime;
            entry.clone()
        };
        self.save()?;
        Ok(updated)
    }

    /// Records the port a model's server is bound to (or clears it). Called
    /// by the fleet on lifecycle transitions; not persisted separately from
    /// the next save.
    pub fn set_assigned_port(&self, model_id: &str, port: Option<u16>) -> Result<(), RegistryError> {
        let mut registry = self.registry.write().map_err(|_| RegistryError::LockPoisoned)?;
        let entry = registry
            .get_mut(model_id)
            .ok_or_else(|| RegistryError::ModelNotFound(model_id.to_string()))?;
        entry.assigned_port = port;
        Ok(())
    }

    /// Gets the full path to a model file.
    pub fn model_path(&self, entry: &ModelEntry) -> PathBuf {
        self.models_dir.join(&entry.filename)
    }
}

/// Builds a fresh registry entry from parsed GGUF metadata.
fn build_entry(filename: &str, meta: &GgufMetadata, tiers: &TiersConfig) -> ModelEntry {
    let model_id = Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| filename.to_string());

    let params = meta.parameter_billions();
    let tier = Tier::for_parameter_billions(params);
    if params.is_none() {
        warn!("Model {} has no parseable size label; defaulting to tier {}", model_id, tier);
    }

    let defaults = tiers.get(tier);
    let runtime = RuntimeSettings {
        gpu_layers: defaults.gpu_layers,
        context_size: defaults.context_size,
        threads: defaults.threads,
        batch_size: defaults.batch_size,
        flash_attention: defaults.flash_attention,
        mmap: defaults.mmap,
    };

    ModelEntry {
        model_id,
        filename: filename.to_string(),
        name: meta.name().unwrap_or(filename).to_string(),
        architecture: meta.architecture().unwrap_or("unknown").to_string(),
        size_label: meta.size_label().unwrap_or("").to_string(),
        quantization: meta.quantization_label().to_string(),
        parameter_billions: params,
        tensor_count: meta.tensor_count,
        tier,
        enabled: true,
        assigned_port: None,
        runtime,
        added_date: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TierConfig;
    use byteorder::{LittleEndian, WriteBytesExt};
    use std::io::Write;

    fn tier_config() -> TierConfig {
        TierConfig {
            timeout_seconds: 30.0,
            max_retries: 1,
            retry_delay_seconds: 1.0,
            max_concurrent: 1,
            context_size: 4096,
            gpu_layers: 0,
            threads: None,
            batch_size: 512,
            flash_attention: false,
            mmap: true,
        }
    }

    fn tiers() -> TiersConfig {
        TiersConfig {
            fast: tier_config(),
            balanced: tier_config(),
            powerful: tier_config(),
        }
    }

    // Minimal v3 GGUF file with string metadata only.
    fn write_gguf(path: &Path, entries: &[(&str, &str)]) {
        let mut buf: Vec<u8> = Vec::new();
        buf.write_u32::<LittleEndian>(0x46554747).unwrap();
        buf.write_u32::<LittleEndian>(3).unwrap();
        buf.write_u64::<LittleEndian>(10).unwrap();
        buf.write_u64::<LittleEndian>(entries.len() as u64).unwrap();
        for (key, value) in entries {
            buf.write_u64::<LittleEndian>(key.len() as u64).unwrap();
            buf.extend_from_slice(key.as_bytes());
            buf.write_u32::<LittleEndian>(8).unwrap();
            buf.write_u64::<LittleEndian>(value.len() as u64).unwrap();
            buf.extend_from_slice(value.as_bytes());
        }
        let mut file = fs::File::create(path).unwrap();
        file.write_all(&buf).unwrap();
    }

    fn seed_model(dir: &Path, filename: &str, size_label: &str) {
        write_gguf(
            &dir.join(filename),
            &[
                ("general.name", filename),
                ("general.architecture", "llama"),
                ("general.size_label", size_label),
            ],
        );
    }

    #[test]
    fn scan_registers_models_with_tier_from_size() {
        let dir = tempfile::tempdir().unwrap();
        seed_model(dir.path(), "tiny.gguf", "1B");
        seed_model(dir.path(), "medium.gguf", "8B");
        seed_model(dir.path(), "large.gguf", "70B");

        let registry = ModelRegistry::new(dir.path().to_path_buf());
        let summary = registry.scan_models(&tiers()).unwrap();
        assert_eq!(summary.new_models, 3);

        assert_eq!(registry.get("tiny").unwrap().tier, Tier::Fast);
        assert_eq!(registry.get("medium").unwrap().tier, Tier::Balanced);
        assert_eq!(registry.get("large").unwrap().tier, Tier::Powerful);
    }

    #[test]
    fn rescan_preserves_overrides_and_drops_vanished_files() {
        let dir = tempfile::tempdir().unwrap();
        seed_model(dir.path(), "tiny.gguf", "1B");
        seed_model(dir.path(), "gone.gguf", "8B");

        let registry = ModelRegistry::new(dir.path().to_path_buf());
        registry.scan_models(&tiers()).unwrap();

        // Override the tier and disable, then delete one file and rescan
        registry.set_tier("tiny", Tier::Powerful).unwrap();
        registry.set_enabled("tiny", false).unwrap();
        fs::remove_file(dir.path().join("gone.gguf")).unwrap();

        let reloaded = ModelRegistry::new(dir.path().to_path_buf());
        let summary = reloaded.scan_models(&tiers()).unwrap();

        assert_eq!(summary.new_models, 0);
        assert_eq!(summary.removed_models, 1);
        let tiny = reloaded.get("tiny").unwrap();
        assert_eq!(tiny.tier, Tier::Powerful);
        assert!(!tiny.enabled);
        assert!(reloaded.get("gone").is_err());
    }

    #[test]
    fn enabled_for_tier_filters_disabled_models() {
        let dir = tempfile::tempdir().unwrap();
        seed_model(dir.path(), "one.gguf", "1B");
        seed_model(dir.path(), "two.gguf", "2B");

        let registry = ModelRegistry::new(dir.path().to_path_buf());
        registry.scan_models(&tiers()).unwrap();
        registry.set_enabled("two", false).unwrap();

        let fast = registry.enabled_for_tier(Tier::Fast).unwrap();
        assert_eq!(fast.len(), 1);
        assert_eq!(fast[0].model_id, "one");
    }

    #[test]
    fn non_gguf_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "not a model").unwrap();
        fs::write(dir.path().join("fake.gguf"), "wrong magic").unwrap();

        let registry = ModelRegistry::new(dir.path().to_path_buf());
        let summary = registry.scan_models(&tiers()).unwrap();
        assert_eq!(summary.new_models, 0);
        assert!(registry.list().unwrap().is_empty());
    }
}
