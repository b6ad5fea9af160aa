// ABOUTME: In-memory file tree handed to the sandbox on mount
// ABOUTME: Maps unique relative paths to immutable text contents

use std::collections::BTreeMap;

use crate::capability::CapabilityError;
use crate::validation::validate_virtual_path;

/// Mapping from path to text content, mounted into a sandbox as one unit.
///
/// Paths are unique and validated on insert; iteration is in path order so
/// mounts are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VirtualFileTree {
    files: BTreeMap<String, String>,
}

impl VirtualFileTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file, rejecting invalid or duplicate paths.
    pub fn insert(
        &mut self,
        path: impl Into<String>,
        contents: impl Into<String>,
    ) -> Result<(), CapabilityError> {
        let path = path.into();
        validate_virtual_path(&path).map_err(|reason| CapabilityError::InvalidPath {
            path: path.clone(),
            reason,
        })?;

        if self.files.contains_key(&path) {
            return Err(CapabilityError::InvalidPath {
                reason: format!("Duplicate path '{}'", path),
                path,
            });
        }

        self.files.insert(path, contents.into());
        Ok(())
    }

    /// Builder-style variant of [`insert`](Self::insert).
    pub fn with_file(
        mut self,
        path: impl Into<String>,
        contents: impl Into<String>,
    ) -> Result<Self, CapabilityError> {
        self.insert(path, contents)?;
        Ok(self)
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(p, c)| (p.as_str(), c.as_str()))
    }
}
