//! Experiment cache and service layer.
//!
//! One [`ExperimentService`] wraps one source format (the HTTP layer above
//! this crate constructs one per format). Each experiment id owns one cache
//! slot holding the last parsed [`ChannelSet`]; a read below the TTL is a
//! hit, anything older triggers a synchronous re-parse that replaces the slot
//! wholesale. Slots are never partially updated.
//!
//! Concurrent misses for the same experiment id are single-flighted: the
//! per-key async mutex is held across the parse, so the second request waits
//! and then reads the fresh entry instead of parsing again. CPU-bound parses
//! run on the blocking pool to keep the async executor responsive.
//!
//! Every public operation returns the uniform [`ServiceResponse`] envelope;
//! internal errors never cross this boundary unwrapped.

use crate::channel::{ChannelSet, ChannelStatistics, SourceFormat, TimeRange};
use crate::config::Settings;
use crate::error::{AppResult, WeldError};
use crate::readers::{detect_format, load_channel_set, CancelFlag};
use crate::resample::{resample, Resampled, Window};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

/// Uniform result envelope for every service operation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ServiceResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn ok_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
        }
    }

    fn from_result(result: AppResult<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::error(e.to_string()),
        }
    }
}

/// Time source for TTL decisions. The service owns its clock so tests can
/// advance time without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock-backed clock used in production.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

struct CachedSet {
    set: Arc<ChannelSet>,
    inserted_at: Instant,
}

#[derive(Default)]
struct CacheSlot {
    cached: Option<CachedSet>,
}

/// Channel listing entry in the metadata response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    pub id: String,
    pub label: String,
    pub unit: String,
    pub kind: crate::channel::ChannelKind,
    pub points: usize,
}

/// Metadata response for one experiment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExperimentMetadata {
    pub experiment_id: String,
    pub reader: crate::channel::ReaderMetadata,
    pub channels: Vec<ChannelDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
}

/// One entry of a bulk response. Channels fail independently.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BulkChannelResult {
    pub channel_id: String,
    #[serde(flatten)]
    pub result: ServiceResponse<Resampled>,
}

/// Bulk response with per-channel outcomes and tallies.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BulkChannelData {
    pub results: Vec<BulkChannelResult>,
    pub successful_channels: usize,
    pub failed_channels: usize,
}

/// Per-experiment TTL cache plus the channel-query operations for one
/// source format.
pub struct ExperimentService {
    settings: Arc<Settings>,
    format: SourceFormat,
    clock: Arc<dyn Clock>,
    slots: Mutex<HashMap<String, Arc<Mutex<CacheSlot>>>>,
}

impl ExperimentService {
    pub fn new(settings: Arc<Settings>, format: SourceFormat) -> Self {
        Self::with_clock(settings, format, Arc::new(SystemClock))
    }

    pub fn with_clock(
        settings: Arc<Settings>,
        format: SourceFormat,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings,
            format,
            clock,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn format(&self) -> SourceFormat {
        self.format
    }

    /// Finds this format's source file inside the experiment folder.
    ///
    /// The listing is sorted so repeated scans of a folder with several
    /// matching exports resolve deterministically.
    fn resolve_source(&self, experiment_id: &str) -> AppResult<PathBuf> {
        let folder = self.settings.data_root.join(experiment_id);
        if !folder.is_dir() {
            return Err(WeldError::NotFound(format!(
                "experiment folder '{}'",
                folder.display()
            )));
        }
        let mut candidates: Vec<PathBuf> = list_files_recursive(&folder)?
            .into_iter()
            .filter(|p| detect_format(p) == Some(self.format))
            .collect();
        candidates.sort();
        candidates.into_iter().next().ok_or_else(|| {
            WeldError::NotFound(format!(
                "{} export in '{}'",
                self.format,
                folder.display()
            ))
        })
    }

    async fn slot(&self, experiment_id: &str) -> Arc<Mutex<CacheSlot>> {
        let mut slots = self.slots.lock().await;
        slots
            .entry(experiment_id.to_string())
            .or_default()
            .clone()
    }

    /// Returns the cached channel set or re-parses the source file.
    ///
    /// The per-key lock is held across the parse: at most one parse per
    /// experiment id runs at a time, and a waiting request observes the
    /// fresh entry instead of re-parsing.
    #[instrument(skip(self, cancel), fields(format = %self.format))]
    pub async fn channel_set(
        &self,
        experiment_id: &str,
        force_refresh: bool,
        cancel: CancelFlag,
    ) -> AppResult<Arc<ChannelSet>> {
        let slot = self.slot(experiment_id).await;
        let mut guard = slot.lock().await;

        if !force_refresh {
            if let Some(cached) = &guard.cached {
                let age = self.clock.now().duration_since(cached.inserted_at);
                if age < self.settings.cache.ttl {
                    debug!(age_secs = age.as_secs(), "cache hit");
                    return Ok(cached.set.clone());
                }
                debug!(age_secs = age.as_secs(), "cache entry expired");
            }
        }

        let path = self.resolve_source(experiment_id)?;
        let settings = self.settings.clone();
        let format = self.format;
        info!(path = %path.display(), "parsing source file");
        let set = tokio::task::spawn_blocking(move || {
            load_channel_set(format, path, &settings, &cancel)
        })
        .await??;

        let set = Arc::new(set);
        guard.cached = Some(CachedSet {
            set: set.clone(),
            inserted_at: self.clock.now(),
        });
        Ok(set)
    }

    async fn channel_set_default(
        &self,
        experiment_id: &str,
        force_refresh: bool,
    ) -> AppResult<Arc<ChannelSet>> {
        self.channel_set(experiment_id, force_refresh, CancelFlag::new())
            .await
    }

    /// File/channel metadata for one experiment.
    pub async fn get_metadata(
        &self,
        experiment_id: &str,
        force_refresh: bool,
    ) -> ServiceResponse<ExperimentMetadata> {
        let result = self
            .channel_set_default(experiment_id, force_refresh)
            .await
            .map(|set| ExperimentMetadata {
                experiment_id: experiment_id.to_string(),
                reader: set.metadata.clone(),
                channels: set
                    .all_channels()
                    .map(|ch| ChannelDescriptor {
                        id: ch.id.clone(),
                        label: ch.label.clone(),
                        unit: ch.unit.clone(),
                        kind: ch.kind,
                        points: ch.len(),
                    })
                    .collect(),
                time_range: set.time_range(),
            });
        ServiceResponse::from_result(result)
    }

    /// Windowed, decimated samples of one channel.
    pub async fn get_channel_data(
        &self,
        experiment_id: &str,
        channel_id: &str,
        window: Window,
        max_points: Option<usize>,
        force_refresh: bool,
    ) -> ServiceResponse<Resampled> {
        let set = match self.channel_set_default(experiment_id, force_refresh).await {
            Ok(set) => set,
            Err(e) => return ServiceResponse::error(e.to_string()),
        };
        let max_points = max_points.unwrap_or(self.settings.resample.default_max_points);
        match set.channel(channel_id) {
            Ok(channel) => {
                let resampled = resample(channel, window, max_points);
                match set.metadata.downsampling_stride {
                    Some(stride) => ServiceResponse::ok_with_message(
                        resampled,
                        format!(
                            "resolution floor: samples are stored at summary stride {}",
                            stride
                        ),
                    ),
                    None => ServiceResponse::ok(resampled),
                }
            }
            Err(e) => ServiceResponse::error(e.to_string()),
        }
    }

    /// Windowed samples for several channels at once. Channels succeed or
    /// fail independently; one bad id never spoils the rest.
    pub async fn get_bulk_channel_data(
        &self,
        experiment_id: &str,
        channel_ids: &[String],
        window: Window,
        max_points: Option<usize>,
        force_refresh: bool,
    ) -> ServiceResponse<BulkChannelData> {
        let set = match self.channel_set_default(experiment_id, force_refresh).await {
            Ok(set) => set,
            Err(e) => return ServiceResponse::error(e.to_string()),
        };
        let max_points = max_points.unwrap_or(self.settings.resample.default_max_points);

        let mut results = Vec::with_capacity(channel_ids.len());
        let mut successful = 0usize;
        let mut failed = 0usize;
        for channel_id in channel_ids {
            let result = match set.channel(channel_id) {
                Ok(channel) => {
                    successful += 1;
                    ServiceResponse::ok(resample(channel, window, max_points))
                }
                Err(e) => {
                    failed += 1;
                    ServiceResponse::error(e.to_string())
                }
            };
            results.push(BulkChannelResult {
                channel_id: channel_id.clone(),
                result,
            });
        }

        ServiceResponse::ok(BulkChannelData {
            results,
            successful_channels: successful,
            failed_channels: failed,
        })
    }

    /// Summary statistics for one channel.
    pub async fn get_channel_statistics(
        &self,
        experiment_id: &str,
        channel_id: &str,
    ) -> ServiceResponse<ChannelStatistics> {
        let result = self
            .channel_set_default(experiment_id, false)
            .await
            .and_then(|set| set.channel(channel_id).map(|ch| ch.statistics()));
        ServiceResponse::from_result(result)
    }

    /// Whether this format's source file exists for the experiment. Never
    /// parses anything.
    pub async fn has_file(&self, experiment_id: &str) -> ServiceResponse<bool> {
        match self.resolve_source(experiment_id) {
            Ok(_) => ServiceResponse::ok(true),
            Err(WeldError::NotFound(_)) => ServiceResponse::ok(false),
            Err(e) => ServiceResponse::error(e.to_string()),
        }
    }

    /// Drops the cache slot for one experiment, or every slot.
    pub async fn clear_cache(&self, experiment_id: Option<&str>) -> ServiceResponse<usize> {
        let mut slots = self.slots.lock().await;
        let cleared = match experiment_id {
            Some(id) => slots.remove(id).map(|_| 1).unwrap_or(0),
            None => {
                let n = slots.len();
                slots.clear();
                n
            }
        };
        info!(cleared, "cache cleared");
        ServiceResponse::ok(cleared)
    }
}

/// Recursive file listing, depth-first, symlinks not followed.
pub(crate) fn list_files_recursive(dir: &std::path::Path) -> AppResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current)? {
            let path = entry?.path();
            let file_type = std::fs::symlink_metadata(&path)?.file_type();
            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file() {
                files.push(path);
            }
        }
    }
    Ok(files)
}
