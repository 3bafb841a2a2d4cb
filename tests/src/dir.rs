use std::collections::HashMap;
use std::env::consts::DLL_EXTENSION;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hotswap_runtime::{SwapperConfig, TableLoader};
use tempfile::TempDir;

use crate::plugin::MockPlugin;

/// A temporary plugin directory
///
/// Every mock plugin gets an artifact file whose content stands in for the
/// build output; [`rebuild`](Self::rebuild) changes it so the next reload
/// sees a new fingerprint.
pub struct PluginDir {
    dir: TempDir,
    plugins: HashMap<String, MockPlugin>,
    builds: HashMap<String, u32>,
}

impl PluginDir {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir()?,
            plugins: HashMap::new(),
            builds: HashMap::new(),
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path of the artifact of `name`.
    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.path().join(format!("{name}.{DLL_EXTENSION}"))
    }

    /// Add a plugin and write its first build.
    pub fn add(&mut self, plugin: MockPlugin) -> io::Result<()> {
        let name = plugin.name().to_string();
        self.plugins.insert(name.clone(), plugin);
        self.builds.insert(name.clone(), 0);
        self.rebuild(&name)
    }

    /// Write a new build of `name`.
    pub fn rebuild(&mut self, name: &str) -> io::Result<()> {
        let build = {
            let counter = self.builds.entry(name.to_string()).or_default();
            *counter += 1;
            *counter
        };
        std::fs::write(self.artifact_path(name), format!("{name} build {build}"))
    }

    /// Delete the artifact of `name`. The plugin stays known to the loader.
    pub fn remove(&self, name: &str) -> io::Result<()> {
        std::fs::remove_file(self.artifact_path(name))
    }

    /// Write a file the directory scan must ignore.
    pub fn add_noise(&self, file: &str) -> io::Result<()> {
        std::fs::write(self.path().join(file), "noise")
    }

    pub fn plugin(&self, name: &str) -> Option<&MockPlugin> {
        self.plugins.get(name)
    }

    /// A loader resolving every added plugin to its mock symbol table.
    pub fn loader(&self) -> TableLoader {
        let mut loader = TableLoader::new();
        for (name, plugin) in &self.plugins {
            let plugin = plugin.clone();
            loader.insert(name, move |_| plugin.table());
        }
        loader
    }

    /// Swapper configuration for this directory, with the shortest free
    /// delay.
    pub fn config(&self) -> SwapperConfig {
        SwapperConfig::new(self.path())
            .with_loader(self.loader())
            .with_free_delay(Duration::ZERO)
    }
}
