use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::app::error::AppError;
use crate::app::state::BackgroundTaskInfo;

pub fn new_trace_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceSummary {
    pub serial: String,
    pub state: String,
}

impl DeviceSummary {
    /// Splits a `host:port` identifier. USB serials have no port and yield `None`.
    pub fn network_address(&self) -> Option<(&str, &str)> {
        split_network_address(&self.serial)
    }
}

pub fn split_network_address(serial: &str) -> Option<(&str, &str)> {
    let (host, port) = serial.rsplit_once(':')?;
    if host.is_empty() || port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some((host, port))
}

/// Character sets tried, in order, when decoding tool output.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Charset {
    #[serde(rename = "UTF-8")]
    Utf8,
    #[serde(rename = "ISO-8859-1")]
    Latin1,
    #[serde(rename = "GBK")]
    Gbk,
    #[serde(rename = "GB2312")]
    Gb2312,
}

impl Charset {
    pub fn label(&self) -> &'static str {
        match self {
            Charset::Utf8 => "UTF-8",
            Charset::Latin1 => "ISO-8859-1",
            Charset::Gbk => "GBK",
            Charset::Gb2312 => "GB2312",
        }
    }

    pub fn default_order() -> Vec<Charset> {
        vec![Charset::Utf8, Charset::Latin1, Charset::Gbk, Charset::Gb2312]
    }

    /// Strict decode; `None` when the bytes are not valid in this charset.
    pub fn decode(&self, bytes: &[u8]) -> Option<String> {
        match self {
            Charset::Utf8 => std::str::from_utf8(bytes).ok().map(str::to_string),
            Charset::Latin1 => Some(bytes.iter().map(|&b| b as char).collect()),
            // encoding_rs serves GB2312 through its GBK superset.
            Charset::Gbk | Charset::Gb2312 => encoding_rs::GBK
                .decode_without_bom_handling_and_without_replacement(bytes)
                .map(|text| text.into_owned()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InstallTaskKind {
    Single,
    Split,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallTask {
    pub archive: PathBuf,
    pub kind: InstallTaskKind,
}

impl InstallTask {
    pub fn from_path(path: &str, trace_id: &str) -> Result<Self, AppError> {
        let lower = path.trim().to_lowercase();
        let kind = if lower.ends_with(".apk") {
            InstallTaskKind::Single
        } else if lower.ends_with(".xapk") {
            InstallTaskKind::Split
        } else {
            return Err(AppError::unsupported_type(
                format!("Unsupported package type: {path}"),
                trace_id,
            ));
        };
        Ok(Self {
            archive: PathBuf::from(path.trim()),
            kind,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct InstallOutcome {
    pub success: bool,
    pub package_name: Option<String>,
}

impl InstallOutcome {
    pub fn installed(package_name: Option<String>) -> Self {
        Self {
            success: true,
            package_name,
        }
    }

    pub fn failed() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SplitApkEntry {
    pub id: String,
    pub file: String,
}

/// The `manifest.json` shipped at the root of an XAPK.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct XapkManifest {
    pub package_name: String,
    #[serde(default)]
    pub split_apks: Option<Vec<SplitApkEntry>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallSequence {
    pub apk_paths: Vec<PathBuf>,
    pub package_name: String,
}

impl InstallSequence {
    /// Quoted, space-joined form used in log lines.
    pub fn display(&self) -> String {
        self.apk_paths
            .iter()
            .map(|path| format!("\"{}\"", path.display()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    QueueDrained,
    RuntimeExceeded,
    NoDevice,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RunSummary {
    pub device_id: Option<String>,
    pub popped: usize,
    pub installed: usize,
    pub forwarded: usize,
    pub failed: usize,
    pub stop_reason: StopReason,
    /// Detached launches known to the runner when the run ended, reaped afterwards.
    pub background: Vec<BackgroundTaskInfo>,
}
