use std::collections::{BTreeSet, HashMap};

use redis::Commands;
use tracing::info;

use crate::app::config::QueueSettings;
use crate::app::error::AppError;

/// Named sets with atomic pop, the contract the orchestrator relies on.
pub trait WorkQueue {
    fn count(&mut self, key: &str, trace_id: &str) -> Result<usize, AppError>;
    fn pop(&mut self, key: &str, trace_id: &str) -> Result<Option<String>, AppError>;
    fn add(&mut self, key: &str, member: &str, trace_id: &str) -> Result<(), AppError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    pub install: String,
    pub analysis: String,
}

impl QueueKeys {
    pub fn for_device(settings: &QueueSettings, device_id: &str) -> Self {
        Self {
            install: format!("{}:{device_id}", settings.install_key_prefix),
            analysis: format!("{}:{device_id}", settings.analysis_key_prefix),
        }
    }
}

pub struct RedisQueue {
    conn: redis::Connection,
}

impl RedisQueue {
    pub fn connect(url: &str, trace_id: &str) -> Result<Self, AppError> {
        let client = redis::Client::open(url).map_err(|err| {
            AppError::queue(format!("Invalid queue url {}: {err}", redact_url(url)), trace_id)
        })?;
        let conn = client
            .get_connection()
            .map_err(|err| AppError::queue(format!("Failed to connect to queue: {err}"), trace_id))?;
        info!(trace_id = %trace_id, url = %redact_url(url), "queue connected");
        Ok(Self { conn })
    }
}

impl WorkQueue for RedisQueue {
    fn count(&mut self, key: &str, trace_id: &str) -> Result<usize, AppError> {
        self.conn
            .scard(key)
            .map_err(|err| AppError::queue(format!("SCARD {key} failed: {err}"), trace_id))
    }

    fn pop(&mut self, key: &str, trace_id: &str) -> Result<Option<String>, AppError> {
        self.conn
            .spop(key)
            .map_err(|err| AppError::queue(format!("SPOP {key} failed: {err}"), trace_id))
    }

    fn add(&mut self, key: &str, member: &str, trace_id: &str) -> Result<(), AppError> {
        self.conn
            .sadd::<_, _, ()>(key, member)
            .map_err(|err| AppError::queue(format!("SADD {key} failed: {err}"), trace_id))
    }
}

/// In-process set queue, for single-host runs and tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryQueue {
    sets: HashMap<String, BTreeSet<String>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn members(&self, key: &str) -> Vec<String> {
        self.sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl WorkQueue for MemoryQueue {
    fn count(&mut self, key: &str, _trace_id: &str) -> Result<usize, AppError> {
        Ok(self.sets.get(key).map(BTreeSet::len).unwrap_or(0))
    }

    fn pop(&mut self, key: &str, _trace_id: &str) -> Result<Option<String>, AppError> {
        Ok(self.sets.get_mut(key).and_then(BTreeSet::pop_first))
    }

    fn add(&mut self, key: &str, member: &str, _trace_id: &str) -> Result<(), AppError> {
        self.sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }
}

fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
