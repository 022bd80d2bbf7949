use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::models::{DriftReport, EndpointSnapshot, RunStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Machine-readable view of one endpoint snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointEntry {
    pub label: String,
    pub url: String,
    pub connected: bool,
    pub chain_id: Option<u64>,
    pub block_number: Option<u64>,
    pub block_timestamp: Option<u64>,
    pub latency_ms: Option<f64>,
    pub error_kind: Option<ErrorKind>,
    pub error: Option<String>,
}

impl From<&EndpointSnapshot> for EndpointEntry {
    fn from(snapshot: &EndpointSnapshot) -> Self {
        let head = snapshot.head();
        Self {
            label: snapshot.nickname.clone(),
            url: snapshot.url.clone(),
            connected: snapshot.is_connected(),
            chain_id: head.map(|h| h.chain_id),
            block_number: head.map(|h| h.block_number),
            block_timestamp: head.map(|h| h.block_timestamp),
            latency_ms: snapshot.latency_ms(),
            error_kind: snapshot.error_kind(),
            error: snapshot.error().map(ToString::to_string),
        }
    }
}

/// Top-level structured document. Field names are a stable contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutput {
    pub endpoints: Vec<EndpointEntry>,
    pub drift: Vec<DriftReport>,
    pub status: RunStatus,
}

impl ProbeOutput {
    pub fn new(snapshots: &[EndpointSnapshot], reports: &[DriftReport], status: RunStatus) -> Self {
        Self {
            endpoints: snapshots.iter().map(EndpointEntry::from).collect(),
            drift: reports.to_vec(),
            status,
        }
    }
}

/// Renders one cycle. Pure: no I/O beyond building the string.
pub fn render(
    snapshots: &[EndpointSnapshot],
    reports: &[DriftReport],
    status: RunStatus,
    format: OutputFormat,
) -> Result<String, serde_json::Error> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(&ProbeOutput::new(snapshots, reports, status)),
        OutputFormat::Text => Ok(Narrative {
            snapshots,
            reports,
            status,
        }
        .to_string()),
    }
}

struct Narrative<'a> {
    snapshots: &'a [EndpointSnapshot],
    reports: &'a [DriftReport],
    status: RunStatus,
}

fn or_unknown<T: fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| v.to_string())
}

impl fmt::Display for Narrative<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "🔍 rpc-drift-probe")?;

        for (i, snapshot) in self.snapshots.iter().enumerate() {
            let entry = EndpointEntry::from(snapshot);
            let role = if i == 0 { "[Primary]  " } else { "[Secondary]" };
            writeln!(f)?;
            writeln!(f, "{} {}", role, entry.label)?;
            writeln!(f, "  RPC URL       : {}", entry.url)?;
            writeln!(f, "  Connected     : {}", if entry.connected { "yes" } else { "no" })?;
            writeln!(f, "  Chain ID      : {}", or_unknown(entry.chain_id))?;
            writeln!(f, "  Latest block  : {}", or_unknown(entry.block_number))?;
            writeln!(f, "  Block time    : {}", or_unknown(entry.block_timestamp))?;
            writeln!(
                f,
                "  Latency (ms)  : {}",
                or_unknown(entry.latency_ms.map(|ms| format!("{:.2}", ms)))
            )?;
            if let Some(error) = &entry.error {
                writeln!(f, "  Error         : {}", error)?;
            }
        }

        for report in self.reports {
            writeln!(f)?;
            writeln!(
                f,
                "Drift analysis: {} -> {}",
                report.primary_label, report.secondary_label
            )?;
            if !report.consistent_chain {
                writeln!(
                    f,
                    "  ⚠️ Chain IDs differ or endpoints are offline; drift metrics may be invalid."
                )?;
            }
            match report.block_diff {
                None => writeln!(f, "  Block drift   : unknown")?,
                Some(diff) => {
                    let direction = match diff {
                        d if d > 0 => "ahead",
                        d if d < 0 => "behind",
                        _ => "aligned",
                    };
                    writeln!(f, "  Block drift   : {} blocks ({} vs primary)", diff, direction)?;
                }
            }
            match report.time_diff_sec {
                None => writeln!(f, "  Time drift    : unknown")?,
                Some(diff) => writeln!(
                    f,
                    "  Time drift    : {} seconds (secondary minus primary)",
                    diff
                )?,
            }
            for warning in &report.warnings {
                writeln!(f, "  Warning       : {}", warning)?;
            }
        }

        writeln!(f)?;
        let status = match self.status {
            RunStatus::Success => "success",
            RunStatus::Inconsistent => "inconsistent",
        };
        writeln!(f, "Status: {}", status)
    }
}
