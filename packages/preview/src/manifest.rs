// ABOUTME: Fixed bootstrap files mounted before dependency install
// ABOUTME: Generates the package.json manifest and the vite dev-server config

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::capability::CapabilityError;
use crate::tree::VirtualFileTree;

pub const MANIFEST_PATH: &str = "package.json";
pub const DEV_SERVER_CONFIG_PATH: &str = "vite.config.js";

/// Port the dev server binds when none is configured
pub const DEFAULT_DEV_SERVER_PORT: u16 = 5173;

/// Dependency manifest written as `package.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    pub name: String,
    #[serde(rename = "type")]
    pub module_type: String,
    pub scripts: BTreeMap<String, String>,
    pub dependencies: BTreeMap<String, String>,
    pub dev_dependencies: BTreeMap<String, String>,
}

impl PackageManifest {
    /// The preview app manifest: a `dev` script plus React and Vite.
    pub fn preview_app(port: u16) -> Self {
        let scripts = BTreeMap::from([(
            "dev".to_string(),
            format!("vite --port {} --host", port),
        )]);
        let dependencies = BTreeMap::from([
            ("react".to_string(), "^18.2.0".to_string()),
            ("react-dom".to_string(), "^18.2.0".to_string()),
        ]);
        let dev_dependencies = BTreeMap::from([
            ("@vitejs/plugin-react".to_string(), "^4.2.1".to_string()),
            ("vite".to_string(), "^5.0.12".to_string()),
        ]);

        Self {
            name: "preview-app".to_string(),
            module_type: "module".to_string(),
            scripts,
            dependencies,
            dev_dependencies,
        }
    }

    /// Pretty JSON with two-space indentation
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Vite config: React plugin, all interfaces, strict port with no fallback.
pub fn dev_server_config(port: u16) -> String {
    format!(
        r#"
import {{ defineConfig }} from 'vite';
import react from '@vitejs/plugin-react';

export default defineConfig({{
  plugins: [react()],
  server: {{
    host: true,
    strictPort: true,
    port: {port}
  }}
}});"#
    )
}

/// Tree holding only the dependency manifest
pub fn manifest_tree(port: u16) -> Result<VirtualFileTree, CapabilityError> {
    let contents = PackageManifest::preview_app(port)
        .to_json()
        .map_err(|e| CapabilityError::Mount(format!("Failed to serialize manifest: {}", e)))?;
    VirtualFileTree::new().with_file(MANIFEST_PATH, contents)
}

/// Tree holding only the dev-server config
pub fn dev_server_config_tree(port: u16) -> Result<VirtualFileTree, CapabilityError> {
    VirtualFileTree::new().with_file(DEV_SERVER_CONFIG_PATH, dev_server_config(port))
}
