//! Storage-engine configuration. `vellum-server`/`vellum-cli` layer env
//! vars and CLI flags on top of this; `vellum-core` itself only needs the
//! resolved values.

use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    /// Hex-encoded AES-256 key, if at-rest encryption is enabled.
    pub encryption_key_hex: Option<String>,
}

impl EngineConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        EngineConfig { data_dir: data_dir.into(), encryption_key_hex: None }
    }

    pub fn with_encryption_key_hex(mut self, key_hex: impl Into<String>) -> Self {
        self.encryption_key_hex = Some(key_hex.into());
        self
    }
}
