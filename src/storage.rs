//! Secure Storage Module
//!
//! Small key/value store on disk. Values are JSON, protected with DPAPI on
//! Windows and restricted to the owner elsewhere.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

/// File-backed secure storage rooted at a single directory
#[derive(Debug, Clone)]
pub struct SecureStorage {
    root: PathBuf,
}

impl SecureStorage {
    /// Open (and create if needed) storage under `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StorageError::Io(e.to_string()))?;
        debug!("Secure storage opened at: {:?}", root);
        Ok(Self { root })
    }

    /// Serialize and store `data` under `key`, replacing any previous value
    pub fn save<T: Serialize>(&self, key: &str, data: &T) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let json =
            serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))?;
        let sealed = protect(&json)?;

        // Write to a sibling file first so a reader never sees a torn value.
        let staging = path.with_extension("tmp");
        fs::write(&staging, sealed).map_err(|e| StorageError::Io(e.to_string()))?;
        restrict_permissions(&staging)?;
        fs::rename(&staging, &path).map_err(|e| StorageError::Io(e.to_string()))?;

        info!("Saved protected data for key: {}", key);
        Ok(())
    }

    /// Load the value stored under `key`. Missing keys yield `StorageError::NotFound`.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<T, StorageError> {
        let path = self.path_for(key)?;
        let sealed = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => return Err(StorageError::Io(e.to_string())),
        };
        let json = unprotect(&sealed)?;
        serde_json::from_slice(&json).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    /// Delete the value under `key`. Deleting a missing key is not an error.
    pub fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Deleted stored data for key: {}", key);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e.to_string())),
        }
    }

    pub fn exists(&self, key: &str) -> bool {
        self.path_for(key).map(|p| p.exists()).unwrap_or(false)
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(format!("{}.dat", key)))
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), StorageError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .map_err(|e| StorageError::Io(e.to_string()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), StorageError> {
    Ok(())
}

#[cfg(windows)]
fn protect(data: &[u8]) -> Result<Vec<u8>, StorageError> {
    dpapi::run(data, true).map_err(StorageError::Encryption)
}

#[cfg(windows)]
fn unprotect(data: &[u8]) -> Result<Vec<u8>, StorageError> {
    dpapi::run(data, false).map_err(StorageError::Decryption)
}

#[cfg(not(windows))]
fn protect(data: &[u8]) -> Result<Vec<u8>, StorageError> {
    // File permissions are the protection here.
    Ok(data.to_vec())
}

#[cfg(not(windows))]
fn unprotect(data: &[u8]) -> Result<Vec<u8>, StorageError> {
    Ok(data.to_vec())
}

#[cfg(windows)]
mod dpapi {
    use std::ptr::null_mut;

    use windows::Win32::Foundation::{LocalFree, HLOCAL};
    use windows::Win32::Security::Cryptography::{
        CryptProtectData, CryptUnprotectData, CRYPTPROTECT_UI_FORBIDDEN, CRYPT_INTEGER_BLOB,
    };

    /// Seal (`encrypt == true`) or unseal a buffer for the current user
    pub fn run(data: &[u8], encrypt: bool) -> Result<Vec<u8>, String> {
        let input = CRYPT_INTEGER_BLOB {
            cbData: data.len() as u32,
            pbData: data.as_ptr() as *mut u8,
        };
        let mut output = CRYPT_INTEGER_BLOB {
            cbData: 0,
            pbData: null_mut(),
        };

        unsafe {
            let result = if encrypt {
                CryptProtectData(
                    &input,
                    None,
                    None,
                    None,
                    None,
                    CRYPTPROTECT_UI_FORBIDDEN,
                    &mut output,
                )
            } else {
                CryptUnprotectData(
                    &input,
                    None,
                    None,
                    None,
                    None,
                    CRYPTPROTECT_UI_FORBIDDEN,
                    &mut output,
                )
            };
            if result.is_err() {
                return Err(if encrypt {
                    "DPAPI encryption failed".into()
                } else {
                    "DPAPI decryption failed".into()
                });
            }

            let bytes = std::slice::from_raw_parts(output.pbData, output.cbData as usize).to_vec();
            // The output buffer is owned by us once DPAPI returns.
            let _ = LocalFree(HLOCAL(output.pbData as *mut std::ffi::c_void));
            Ok(bytes)
        }
    }
}

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("No stored value for key: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0:?}")]
    InvalidKey(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn save_then_load_returns_value() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SecureStorage::open(dir.path()).unwrap();
        let sample = Sample { name: "draft".into(), count: 3 };

        storage.save("sample", &sample).unwrap();
        assert!(storage.exists("sample"));
        assert_eq!(storage.load::<Sample>("sample").unwrap(), sample);
    }

    #[test]
    fn missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SecureStorage::open(dir.path()).unwrap();
        assert!(matches!(
            storage.load::<Sample>("absent"),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SecureStorage::open(dir.path()).unwrap();
        storage.save("gone", &1u8).unwrap();

        storage.delete("gone").unwrap();
        storage.delete("gone").unwrap();
        assert!(!storage.exists("gone"));
    }

    #[test]
    fn keys_cannot_escape_root() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SecureStorage::open(dir.path()).unwrap();
        assert!(matches!(
            storage.save("../escape", &1u8),
            Err(StorageError::InvalidKey(_))
        ));
        assert!(!storage.exists(""));
    }

    #[test]
    fn corrupt_value_is_a_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SecureStorage::open(dir.path()).unwrap();
        fs::write(dir.path().join("broken.dat"), b"{not json").unwrap();
        assert!(matches!(
            storage.load::<Sample>("broken"),
            Err(StorageError::Serialization(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn stored_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let storage = SecureStorage::open(dir.path()).unwrap();
        storage.save("secret", &"value").unwrap();
        let mode = fs::metadata(dir.path().join("secret.dat")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
