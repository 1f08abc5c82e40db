//! Profile catalog
//!
//! Profiles are kept in a single JSON file. Ids are assigned from a counter
//! stored alongside the records, so a deleted id is never handed out again.
//! The file holds passwords in clear text and is written owner-only.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Failed to access profile catalog: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse profile catalog: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Profile not found: {0}")]
    NotFound(String),
    #[error("Invalid profile: {0}")]
    Invalid(String),
}

/// A stored VPN profile
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub id: u64,
    pub name: String,
    pub username: String,
    pub password: String,
    pub qr_code_path: PathBuf,
    pub ovpn_config_path: PathBuf,
}

impl fmt::Debug for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profile")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("username", &self.username)
            .field("password", &"******")
            .field("qr_code_path", &self.qr_code_path)
            .field("ovpn_config_path", &self.ovpn_config_path)
            .finish()
    }
}

/// Fields supplied by the user when creating a profile
#[derive(Clone)]
pub struct NewProfile {
    pub name: String,
    pub username: String,
    pub password: String,
    pub qr_code_path: PathBuf,
    pub ovpn_config_path: PathBuf,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Catalog {
    next_id: u64,
    profiles: Vec<Profile>,
}

pub struct ProfileStore {
    path: PathBuf,
}

impl ProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `(id, name)` pairs, in creation order
    pub fn list(&self) -> Result<Vec<(u64, String)>, ProfileError> {
        let catalog = self.read()?;
        Ok(catalog
            .profiles
            .into_iter()
            .map(|p| (p.id, p.name))
            .collect())
    }

    /// Store a new profile and return its id
    pub fn create(&self, new: NewProfile) -> Result<u64, ProfileError> {
        if new.name.trim().is_empty() {
            return Err(ProfileError::Invalid("name must not be empty".to_string()));
        }

        let mut catalog = self.read()?;
        let id = catalog.next_id.max(1);
        catalog.next_id = id + 1;
        catalog.profiles.push(Profile {
            id,
            name: new.name,
            username: new.username,
            password: new.password,
            qr_code_path: new.qr_code_path,
            ovpn_config_path: new.ovpn_config_path,
        });
        self.write(&catalog)?;

        info!("Created profile {}", id);
        Ok(id)
    }

    pub fn delete(&self, id: u64) -> Result<(), ProfileError> {
        let mut catalog = self.read()?;
        let before = catalog.profiles.len();
        catalog.profiles.retain(|p| p.id != id);
        if catalog.profiles.len() == before {
            return Err(ProfileError::NotFound(id.to_string()));
        }
        self.write(&catalog)?;

        info!("Deleted profile {}", id);
        Ok(())
    }

    pub fn get(&self, id: u64) -> Result<Profile, ProfileError> {
        self.read()?
            .profiles
            .into_iter()
            .find(|p| p.id == id)
            .ok_or_else(|| ProfileError::NotFound(id.to_string()))
    }

    /// Look a profile up by id, falling back to an exact name match
    pub fn find(&self, key: &str) -> Result<Profile, ProfileError> {
        let mut profiles = self.read()?.profiles;
        let position = key
            .parse::<u64>()
            .ok()
            .and_then(|id| profiles.iter().position(|p| p.id == id))
            .or_else(|| profiles.iter().position(|p| p.name == key));
        match position {
            Some(i) => Ok(profiles.swap_remove(i)),
            None => Err(ProfileError::NotFound(key.to_string())),
        }
    }

    fn read(&self) -> Result<Catalog, ProfileError> {
        if !self.path.exists() {
            debug!("No catalog at {}, starting empty", self.path.display());
            return Ok(Catalog::default());
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn write(&self, catalog: &Catalog) -> Result<(), ProfileError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        // NamedTempFile is created 0600; persisting renames it over the old catalog
        let mut file = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut file, catalog)?;
        file.write_all(b"\n")?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}
