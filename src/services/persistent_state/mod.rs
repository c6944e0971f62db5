//! Save JSON documents to disk
use std::{
    io::Write,
    marker::PhantomData,
    path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Errors that can occur when using a `JsonFile`.
#[derive(Error, Debug)]
pub enum Error {
    /// An IO error occurred.
    #[error("IO error file {0}: {1}")]
    IoError(String, std::io::Error),

    /// An error occurred while serializing or deserializing JSON.
    #[error("JSON error file {0}: {1}")]
    JsonError(String, serde_json::Error),
}

impl Error {
    /// Does the file not exist?
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::IoError(_, e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}

fn display(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// A single JSON document stored in a file.
///
/// Writes go to a temporary file that is renamed over the target, so readers never see a
/// partially written document.
pub struct JsonFile<T: Serialize + DeserializeOwned> {
    path: PathBuf,
    phantom: PhantomData<T>,
}

impl<T: Serialize + DeserializeOwned> JsonFile<T> {
    /// Create a handle for the file at `path`.
    ///
    /// Nothing is read or written until `load` or `save` is called.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFile {
            path: path.into(),
            phantom: PhantomData,
        }
    }

    /// Where the document is stored.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Save a value to disk.
    ///
    /// # Errors
    ///
    /// This function will return an error if the value cannot be serialized to JSON or if the file
    /// cannot be written.
    pub fn save(&self, value: &T) -> Result<(), Error> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                std::fs::create_dir_all(parent).map_err(|e| Error::IoError(display(parent), e))?;
            }
        }

        let tmp_file = self.path.with_extension("tmp");

        {
            let file = std::fs::File::create(&tmp_file)
                .map_err(|e| Error::IoError(display(&tmp_file), e))?;

            let mut writer = std::io::BufWriter::new(file);
            serde_json::to_writer(&mut writer, value)
                .map_err(|e| Error::JsonError(display(&tmp_file), e))?;

            writer
                .flush()
                .map_err(|e| Error::IoError(display(&tmp_file), e))?;
        }

        std::fs::rename(&tmp_file, &self.path).map_err(|e| Error::IoError(display(&self.path), e))?;

        Ok(())
    }

    /// Load a value from disk.
    ///
    /// # Errors
    ///
    /// This function will return an error if the file cannot be read or if the value cannot be
    /// deserialized from JSON.
    pub fn load(&self) -> Result<T, Error> {
        let file =
            std::fs::File::open(&self.path).map_err(|e| Error::IoError(display(&self.path), e))?;
        let reader = std::io::BufReader::new(file);
        let value = serde_json::from_reader(reader)
            .map_err(|e| Error::JsonError(display(&self.path), e))?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let file = JsonFile::<Value>::new(dir.path().join("nested").join("doc.json"));

        let value = json!({"a": 1, "b": [true, null]});
        file.save(&value).unwrap();
        file.save(&value).unwrap();

        assert_eq!(file.load().unwrap(), value);
        assert!(!file.path().with_extension("tmp").exists());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = JsonFile::<Value>::new(dir.path().join("missing.json"));

        let err = file.load().unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_load_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = JsonFile::<Value>::new(&path).load().unwrap_err();
        assert!(matches!(err, Error::JsonError(_, _)));
        assert!(!err.is_not_found());
    }
}
