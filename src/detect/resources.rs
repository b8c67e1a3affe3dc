use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};

use crate::error::SessionError;

/// Static files a detector needs: topology/config, weights, and class names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DetectorResources {
    pub config_path: PathBuf,
    pub weights_path: PathBuf,
    pub classes_path: PathBuf,
}

impl DetectorResources {
    /// Fail with `ResourceMissing` naming the first absent file.
    pub fn verify(&self) -> Result<(), SessionError> {
        for (what, path) in [
            ("detector config", &self.config_path),
            ("detector weights", &self.weights_path),
            ("class names", &self.classes_path),
        ] {
            if !path.is_file() {
                return Err(SessionError::ResourceMissing {
                    what,
                    path: path.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn load_class_names(&self) -> Result<ClassNames> {
        ClassNames::load(&self.classes_path)
    }
}

/// Class-id to label table, one name per line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassNames {
    names: Vec<String>,
}

impl ClassNames {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read class names {}: {}", path.display(), e))?;
        Ok(Self::parse(&raw))
    }

    pub fn parse(raw: &str) -> Self {
        Self {
            names: raw.lines().map(|line| line.trim().to_string()).collect(),
        }
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Label for `class_id`; ids outside the table render as `class <id>`.
    pub fn label(&self, class_id: usize) -> String {
        match self.names.get(class_id) {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("class {}", class_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn verify_reports_first_missing_file() -> Result<()> {
        let dir = tempdir()?;
        let resources = DetectorResources {
            config_path: dir.path().join("yolov3.cfg"),
            weights_path: dir.path().join("yolov3.weights"),
            classes_path: dir.path().join("coco.names"),
        };
        std::fs::write(&resources.config_path, "{}")?;

        match resources.verify() {
            Err(SessionError::ResourceMissing { what, path }) => {
                assert_eq!(what, "detector weights");
                assert_eq!(path, resources.weights_path);
            }
            other => panic!("expected ResourceMissing, got {:?}", other),
        }

        std::fs::write(&resources.weights_path, b"w")?;
        std::fs::write(&resources.classes_path, "person\n")?;
        assert!(resources.verify().is_ok());
        Ok(())
    }

    #[test]
    fn class_names_trim_and_fall_back() {
        let names = ClassNames::parse("person \nbicycle\ncar\n");
        assert_eq!(names.len(), 3);
        assert_eq!(names.label(0), "person");
        assert_eq!(names.label(2), "car");
        assert_eq!(names.label(9), "class 9");
    }
}
