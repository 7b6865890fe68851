//! Batch output: one JSON summary per problem, then one aggregate record

use std::io::Write;

use serde::Serialize;

use crate::domain::{BatchRun, BatchStats};

/// Final line of a batch report
#[derive(Debug, Clone, Serialize)]
pub struct AggregateRecord<'a> {
    /// Always `"aggregate"`, to tell it apart from item lines
    #[serde(rename = "type")]
    pub record_type: &'static str,
    #[serde(flatten)]
    pub stats: &'a BatchStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

impl<'a> AggregateRecord<'a> {
    pub fn new(stats: &'a BatchStats) -> Self {
        Self {
            record_type: "aggregate",
            stats,
            accuracy: stats.accuracy(),
        }
    }
}

/// Write the report as JSON Lines
pub fn write_report<W: Write>(run: &BatchRun, mut out: W) -> eyre::Result<()> {
    for entry in run.entries() {
        serde_json::to_writer(&mut out, &entry.summary())?;
        out.write_all(b"\n")?;
    }
    serde_json::to_writer(&mut out, &AggregateRecord::new(run.stats()))?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}
