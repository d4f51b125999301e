use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::backup::KdfParams;
use crate::error::StoreError;

/// Expand environment variables in a string.
/// Supports $VAR_NAME and ${VAR_NAME} syntax.
fn expand_env_vars(input: &str) -> String {
  let mut result = input.to_string();

  // ${VAR_NAME} first (more specific)
  while let Some(start) = result.find("${") {
    if let Some(end) = result[start..].find('}') {
      let var_name = &result[start + 2..start + end];
      let value = std::env::var(var_name).unwrap_or_default();
      result = format!("{}{}{}", &result[..start], value, &result[start + end + 1..]);
    } else {
      break;
    }
  }

  // $VAR_NAME (word boundary: alphanumeric + underscore)
  let mut out = String::with_capacity(result.len());
  let mut rest = result.as_str();
  while let Some(pos) = rest.find('$') {
    out.push_str(&rest[..pos]);
    let after = &rest[pos + 1..];
    let var_len = after
      .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
      .unwrap_or(after.len());
    if var_len == 0 {
      out.push('$');
    } else {
      out.push_str(&std::env::var(&after[..var_len]).unwrap_or_default());
    }
    rest = &after[var_len..];
  }
  out.push_str(rest);

  out
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
  #[serde(default)]
  pub storage: StorageSection,
  #[serde(default)]
  pub backup: BackupSection,
  #[serde(default)]
  pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
  /// Holds `main.db` and `projects/<id>.db`
  #[serde(default = "default_data_dir")]
  pub data_dir: String,
  /// Open private in-memory databases instead of files
  #[serde(default)]
  pub in_memory: bool,
}

fn default_data_dir() -> String {
  "./data".into()
}

impl Default for StorageSection {
  fn default() -> Self {
    Self {
      data_dir: default_data_dir(),
      in_memory: false,
    }
  }
}

impl StorageSection {
  pub fn main_path(&self) -> Option<PathBuf> {
    (!self.in_memory).then(|| Path::new(&self.data_dir).join("main.db"))
  }

  pub fn project_dir(&self) -> PathBuf {
    Path::new(&self.data_dir).join("projects")
  }

  pub fn project_path(&self, project_id: &str) -> Option<PathBuf> {
    (!self.in_memory).then(|| self.project_dir().join(format!("{}.db", project_id)))
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSection {
  /// Directory for archive files
  #[serde(default = "default_backup_dir")]
  pub dir: String,
  /// Argon2id memory cost in KiB
  #[serde(default = "default_kdf_memory_kib")]
  pub kdf_memory_kib: u32,
  #[serde(default = "default_kdf_iterations")]
  pub kdf_iterations: u32,
  #[serde(default = "default_kdf_parallelism")]
  pub kdf_parallelism: u32,
  /// Length of passwords generated when the caller supplies none
  #[serde(default = "default_generated_password_length")]
  pub generated_password_length: usize,
}

fn default_backup_dir() -> String {
  "./data/backups".into()
}

fn default_kdf_memory_kib() -> u32 {
  19 * 1024 // 19 MiB
}

fn default_kdf_iterations() -> u32 {
  2
}

fn default_kdf_parallelism() -> u32 {
  1
}

fn default_generated_password_length() -> usize {
  32
}

impl Default for BackupSection {
  fn default() -> Self {
    Self {
      dir: default_backup_dir(),
      kdf_memory_kib: default_kdf_memory_kib(),
      kdf_iterations: default_kdf_iterations(),
      kdf_parallelism: default_kdf_parallelism(),
      generated_password_length: default_generated_password_length(),
    }
  }
}

impl BackupSection {
  pub fn kdf(&self) -> KdfParams {
    KdfParams {
      memory_kib: self.kdf_memory_kib,
      iterations: self.kdf_iterations,
      parallelism: self.kdf_parallelism,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
  #[serde(default = "default_level")]
  pub level: String,
}

fn default_level() -> String {
  "info".into()
}

impl Default for LoggingSection {
  fn default() -> Self {
    Self {
      level: default_level(),
    }
  }
}

impl StoreConfig {
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
      .map_err(|e| StoreError::io(format!("reading config {}", path.display()), e))?;
    Self::from_yaml(&content)
  }

  pub fn from_yaml(content: &str) -> Result<Self, StoreError> {
    let expanded = expand_env_vars(content);
    Ok(serde_yaml::from_str(&expanded)?)
  }

  pub fn find_and_load() -> Result<Option<Self>, StoreError> {
    for p in ["krapi.yaml", "krapi.yml"] {
      if Path::new(p).exists() {
        tracing::info!("Loading config from {}", p);
        return Ok(Some(Self::from_file(p)?));
      }
    }
    Ok(None)
  }

  /// Databases and backups rooted at `dir`.
  pub fn for_data_dir(dir: impl AsRef<Path>) -> Self {
    let dir = dir.as_ref();
    let mut config = Self::default();
    config.storage.data_dir = dir.to_string_lossy().into_owned();
    config.backup.dir = dir.join("backups").to_string_lossy().into_owned();
    config
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn expands_braced_and_bare_variables() {
    std::env::set_var("KRAPI_TEST_ROOT", "/srv/krapi");
    assert_eq!(expand_env_vars("${KRAPI_TEST_ROOT}/data"), "/srv/krapi/data");
    assert_eq!(expand_env_vars("$KRAPI_TEST_ROOT/backups"), "/srv/krapi/backups");
    assert_eq!(expand_env_vars("no vars here"), "no vars here");
  }

  #[test]
  fn unset_variables_expand_to_empty() {
    assert_eq!(expand_env_vars("x${KRAPI_TEST_SURELY_UNSET}y"), "xy");
  }

  #[test]
  fn non_ascii_text_around_variables() {
    std::env::set_var("KRAPI_TEST_MENU", "menu");
    assert_eq!(expand_env_vars("/srv/café/$KRAPI_TEST_MENU"), "/srv/café/menu");
    assert_eq!(expand_env_vars("$KRAPI_TEST_MENUé"), "menué");
    assert_eq!(expand_env_vars("# naïve $ and $é"), "# naïve $ and $é");
    assert_eq!(expand_env_vars("prix: 5€$"), "prix: 5€$");
  }

  #[test]
  fn paths_follow_storage_mode() {
    let mut storage = StorageSection {
      data_dir: "/var/lib/krapi".into(),
      in_memory: false,
    };
    assert_eq!(storage.main_path(), Some(PathBuf::from("/var/lib/krapi/main.db")));
    assert_eq!(
      storage.project_path("p1"),
      Some(PathBuf::from("/var/lib/krapi/projects/p1.db"))
    );

    storage.in_memory = true;
    assert_eq!(storage.main_path(), None);
    assert_eq!(storage.project_path("p1"), None);
  }
}
