use std::{
    collections::BTreeMap,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use consumption_core::{Fluid, FluidState};
use serde::{Deserialize, Serialize};

const STATE_FILE_VERSION: u32 = 1;

#[derive(thiserror::Error, Debug)]
pub enum StateStoreError {
    #[error("state file I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("state file {path} is corrupt: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode fluid states: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("state file {path} has unsupported version {version}")]
    Version { path: PathBuf, version: u32 },
}

#[derive(Serialize, Deserialize)]
struct StateFile {
    version: u32,
    fluids: BTreeMap<Fluid, FluidState>,
}

/// JSON file with the last fluid states, so that a restart can still compute
/// today's delta from yesterday's total.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is an empty state.
    pub async fn load(&self) -> Result<BTreeMap<Fluid, FluidState>, StateStoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "no saved fluid state, starting fresh");
                return Ok(BTreeMap::new());
            }
            Err(source) => return Err(self.io_error(source)),
        };

        let file: StateFile =
            serde_json::from_slice(&bytes).map_err(|source| StateStoreError::Decode {
                path: self.path.clone(),
                source,
            })?;
        if file.version != STATE_FILE_VERSION {
            return Err(StateStoreError::Version {
                path: self.path.clone(),
                version: file.version,
            });
        }

        tracing::info!(
            path = %self.path.display(),
            fluids = file.fluids.len(),
            "restored fluid state"
        );
        Ok(file.fluids)
    }

    /// Writes to a sibling temp file and renames it over the target.
    pub async fn save(&self, fluids: &BTreeMap<Fluid, FluidState>) -> Result<(), StateStoreError> {
        let file = StateFile {
            version: STATE_FILE_VERSION,
            fluids: fluids.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| self.io_error(source))?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|source| self.io_error(source))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|source| self.io_error(source))?;

        tracing::debug!(path = %self.path.display(), "saved fluid state");
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> StateStoreError {
        StateStoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use consumption_core::{DailySource, DailyStatus, ValueStatus};
    use time::macros::date;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("ocea-collector-test-{}", std::process::id()))
            .join(name)
    }

    #[tokio::test]
    async fn missing_file_loads_as_empty() {
        let store = StateStore::new(scratch_path("does-not-exist.json"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn saved_state_is_restored() {
        let store = StateStore::new(scratch_path("restore/state.json"));
        let mut fluids = BTreeMap::new();
        fluids.insert(
            Fluid::ColdWater,
            FluidState {
                last_total: Some(200.0),
                published_total: Some(1000.0),
                effective_date: Some(date!(2024-03-04)),
                api_date: Some(date!(2024-03-01)),
                daily_estimate: Some(12.5),
                daily_status: DailyStatus::Estimated,
                daily_source: Some(DailySource::MultiDayEstimate),
                estimated_today: Some(12.5),
                estimated_today_source: Some(DailySource::MultiDayEstimate),
                value_status: ValueStatus::Corrected,
            },
        );
        fluids.insert(Fluid::Heat, FluidState::default());

        store.save(&fluids).await.unwrap();
        let restored = store.load().await.unwrap();

        assert_eq!(restored, fluids);
        let _ = tokio::fs::remove_file(store.path()).await;
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let path = scratch_path("corrupt.json");
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let res = StateStore::new(&path).load().await;
        assert!(matches!(res, Err(StateStoreError::Decode { .. })));
        let _ = tokio::fs::remove_file(&path).await;
    }
}
