//! The produced template archive.

use std::fmt;
use std::path::{Path, PathBuf};

use proxlxc_shared::constants::BUILDER_ID;
use proxlxc_shared::errors::ProxlxcResult;
use serde_json::Value;

use crate::hook::GeneratedData;

/// A `.tar.gz` template on the local filesystem.
#[derive(Debug, Clone)]
pub struct Artifact {
    template_path: PathBuf,
    state_data: GeneratedData,
}

impl Artifact {
    pub fn new(template_path: PathBuf, state_data: GeneratedData) -> Self {
        Self {
            template_path,
            state_data,
        }
    }

    pub fn builder_id(&self) -> &'static str {
        BUILDER_ID
    }

    pub fn files(&self) -> Vec<PathBuf> {
        vec![self.template_path.clone()]
    }

    /// The template path.
    pub fn id(&self) -> String {
        self.template_path.display().to_string()
    }

    pub fn path(&self) -> &Path {
        &self.template_path
    }

    /// `"generated_data"` returns the whole map; any other name looks up one entry.
    pub fn state(&self, name: &str) -> Option<Value> {
        if name == "generated_data" {
            let map = self
                .state_data
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            return Some(Value::Object(map));
        }
        self.state_data.get(name).cloned()
    }

    /// Delete the template file. Deleting an already-missing file succeeds.
    pub fn destroy(&self) -> ProxlxcResult<()> {
        match std::fs::remove_file(&self.template_path) {
            Ok(()) => {
                tracing::info!(path = %self.template_path.display(), "Template deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "A template was created: {}", self.template_path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describes_the_template() {
        let mut data = GeneratedData::new();
        data.insert("vmid".into(), Value::from(9000));
        let artifact = Artifact::new(PathBuf::from("/tmp/out.tar.gz"), data);

        assert_eq!(artifact.builder_id(), "proxmox.builder");
        assert_eq!(artifact.id(), "/tmp/out.tar.gz");
        assert_eq!(artifact.files(), vec![PathBuf::from("/tmp/out.tar.gz")]);
        assert_eq!(artifact.to_string(), "A template was created: /tmp/out.tar.gz");
        assert_eq!(artifact.state("vmid"), Some(Value::from(9000)));
        assert_eq!(
            artifact.state("generated_data"),
            Some(serde_json::json!({ "vmid": 9000 }))
        );
        assert_eq!(artifact.state("missing"), None);
    }

    #[test]
    fn destroy_removes_the_file_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.tar.gz");
        std::fs::write(&path, b"archive").unwrap();

        let artifact = Artifact::new(path.clone(), GeneratedData::new());
        artifact.destroy().unwrap();
        assert!(!path.exists());
        artifact.destroy().unwrap();
    }
}
