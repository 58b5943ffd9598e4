//! Content addressed remote result cache
//!
//! Layout on the server, relative to the base URL:
//!
//! - `<job>/<id>/index`: JSON list of `{ "<hid>": { "<file>": "<fingerprint>" } }`
//! - `<job>/<id>/<hid>.json`: `{ "result": "<path>" }`
//! - `<job>/<id>/<hid>.bin`: the artifact bytes
//! - `<job>/<id>/<hid>.dep`: `{ "<hid>": { "<file>": "<fingerprint>" } }`
//!
//! `id` covers the job's sources and the build file, `hid` the implicit
//! dependencies discovered when the entry was produced. A `.dep` object is
//! one index entry; the server appends it to the index.
//!
//! Every request is bounded by timeouts, so an unresponsive server costs a
//! cache miss rather than a stuck build.

use super::{BuildPolicy, ModificationTimePolicy};
use crate::error::{RmkError, RmkResult};
use crate::fingerprint::{file_fingerprint, Fingerprint, MISSING};
use crate::job::{Dep, Job, Scheduler, Value};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

const MAX_ARTIFACT_BYTES: u64 = 1024 * 1024 * 1024;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for the server to start answering a request
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound for a whole request, artifact transfer included
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(600);

type Index = Vec<BTreeMap<String, BTreeMap<String, String>>>;

#[derive(Debug, Serialize, Deserialize)]
struct Metadata {
    result: String,
}

/// Client for a remote result cache
#[derive(Clone)]
pub struct RemoteCache {
    base: String,
    agent: ureq::Agent,
    fingerprints: Arc<Mutex<HashMap<PathBuf, String>>>,
}

impl RemoteCache {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            agent: agent(DEFAULT_RESPONSE_TIMEOUT),
            fingerprints: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Give up on requests the server has not started answering after
    /// `timeout`
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.agent = agent(timeout);
        self
    }

    /// Content fingerprint of `path`, computed once per cache client
    async fn fingerprint(&self, path: &Path) -> String {
        let known = self
            .fingerprints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned();
        if let Some(fp) = known {
            return fp;
        }
        let fp = file_fingerprint(path).await;
        self.fingerprints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_path_buf(), fp.clone());
        fp
    }

    /// Lookup key for `job`: its sources and its build file, each paired
    /// with a content fingerprint.
    pub async fn entry_id(&self, job: &Job) -> String {
        let mut keys: Vec<(String, bool)> = job
            .sources()
            .iter()
            .map(|source| (source.identity(), source.as_str().is_some()))
            .collect();
        keys.push((job.scope().file().display().to_string(), true));
        keys.sort();
        keys.dedup();

        let mut id = Fingerprint::new();
        for (key, is_path) in &keys {
            let fp = if *is_path {
                self.fingerprint(&job.dir().join(key)).await
            } else {
                MISSING.to_string()
            };
            id.update(key).update(&fp);
        }
        id.finish()
    }

    async fn get(&self, path: String) -> RmkResult<Vec<u8>> {
        let agent = self.agent.clone();
        let url = format!("{}/{}", self.base, path);
        tokio::task::spawn_blocking(move || {
            let mut response = agent.get(&url).call().map_err(|e| transport_error(&url, e))?;
            response
                .body_mut()
                .with_config()
                .limit(MAX_ARTIFACT_BYTES)
                .read_to_vec()
                .map_err(|e| transport_error(&url, e))
        })
        .await
        .map_err(|e| RmkError::Internal(format!("remote cache request panicked: {}", e)))?
    }

    async fn put(&self, path: String, body: Vec<u8>) -> RmkResult<()> {
        let agent = self.agent.clone();
        let url = format!("{}/{}", self.base, path);
        tokio::task::spawn_blocking(move || {
            agent
                .put(&url)
                .send(&body[..])
                .map(|_| ())
                .map_err(|e| transport_error(&url, e))
        })
        .await
        .map_err(|e| RmkError::Internal(format!("remote cache request panicked: {}", e)))?
    }

    async fn matches(&self, job: &Job, recorded: &BTreeMap<String, String>) -> bool {
        for (file, expected) in recorded {
            if self.fingerprint(&job.dir().join(file)).await != *expected {
                debug!("{} changed since the entry was published", file);
                return false;
            }
        }
        true
    }

    /// Import the first entry whose implicit dependencies still match.
    /// Returns whether one was found.
    pub async fn fetch(&self, job: &Job, id: &str) -> RmkResult<bool> {
        let prefix = format!("{}/{}", job.name(), id);
        let index: Index = serde_json::from_slice(&self.get(format!("{}/index", prefix)).await?)?;

        for entry in index {
            for (hid, recorded) in entry {
                if !self.matches(job, &recorded).await {
                    continue;
                }
                let meta: Metadata =
                    serde_json::from_slice(&self.get(format!("{}/{}.json", prefix, hid)).await?)?;
                let artifact = self.get(format!("{}/{}.bin", prefix, hid)).await?;

                let target = job.dir().join(&meta.result);
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| RmkError::io(format!("creating {}", parent.display()), e))?;
                }
                tokio::fs::write(&target, artifact)
                    .await
                    .map_err(|e| RmkError::io(format!("writing {}", target.display()), e))?;

                info!("GET {}", meta.result);
                job.import(Value::Str(meta.result), recorded.into_keys().collect())
                    .await;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Upload the artifact named by `value`. Results that do not name an
    /// existing file are only cached locally.
    pub async fn publish(&self, job: &Job, id: &str, value: &Value) -> RmkResult<()> {
        let Some(result) = value.as_str() else {
            debug!("Result of {} is not a file, not publishing", job);
            return Ok(());
        };
        let artifact = match tokio::fs::read(job.dir().join(result)).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("Not publishing {}: {}", result, e);
                return Ok(());
            }
        };

        let mut hid = Fingerprint::new();
        let mut recorded = BTreeMap::new();
        for file in job.implicit_dependencies() {
            let fp = self.fingerprint(&job.dir().join(&file)).await;
            hid.update(&file).update(&fp);
            recorded.insert(file, fp);
        }
        let hid = hid.finish();
        let prefix = format!("{}/{}/{}", job.name(), id, hid);

        let meta = Metadata {
            result: result.to_string(),
        };
        self.put(format!("{}.json", prefix), serde_json::to_vec(&meta)?)
            .await?;
        self.put(format!("{}.bin", prefix), artifact).await?;
        let entry = BTreeMap::from([(hid, recorded)]);
        self.put(format!("{}.dep", prefix), serde_json::to_vec(&entry)?)
            .await?;
        info!("PUT {}", result);
        Ok(())
    }

    /// Import `job` from the remote cache, or build it locally through
    /// `policy` and publish the result. Remote errors never fail the build.
    pub async fn fetch_or_build(&self, job: &Job, policy: &dyn BuildPolicy) -> RmkResult<()> {
        let id = self.entry_id(job).await;
        match self.fetch(job, &id).await {
            Ok(true) => return Ok(()),
            Ok(false) => debug!("No matching remote entry for {}", job),
            Err(RmkError::RemoteMiss(url)) => debug!("Remote miss: {}", url),
            Err(e) => warn!("Remote lookup for {} failed: {}", job, e),
        }

        job.build(policy).await?;
        let value = job.result().await?;
        if let Err(e) = self.publish(job, &id, &value).await {
            warn!("Publishing {} failed: {}", job, e);
        }
        Ok(())
    }
}

fn agent(response_timeout: Duration) -> ureq::Agent {
    let config = ureq::Agent::config_builder()
        .timeout_connect(Some(CONNECT_TIMEOUT))
        .timeout_recv_response(Some(response_timeout))
        .timeout_global(Some(TRANSFER_TIMEOUT.max(response_timeout)))
        .build();
    ureq::Agent::new_with_config(config)
}

fn transport_error(url: &str, err: ureq::Error) -> RmkError {
    match err {
        ureq::Error::StatusCode(_) => RmkError::RemoteMiss(url.to_string()),
        other => RmkError::RemoteCache(format!("{}: {}", url, other)),
    }
}

/// Modification time policy that consults a remote cache before running
/// a stale job
#[derive(Clone)]
pub struct RemoteCachePolicy {
    inner: ModificationTimePolicy,
}

impl RemoteCachePolicy {
    pub fn new(scheduler: Scheduler, remote: RemoteCache) -> Self {
        Self {
            inner: ModificationTimePolicy::new(scheduler).with_remote(remote),
        }
    }
}

#[async_trait]
impl BuildPolicy for RemoteCachePolicy {
    async fn build(&self, deps: &[Dep]) -> RmkResult<Vec<Value>> {
        self.inner.build(deps).await
    }

    fn scheduler(&self) -> &Scheduler {
        self.inner.scheduler()
    }
}
