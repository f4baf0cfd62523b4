//! `covharvest decode` command: inspect a pulled coverage artifact without a
//! device or class files.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use covharvest_core::exec::{self, ExecutionData};

#[derive(Debug, Serialize)]
struct SessionSummary {
    id: String,
    start: Option<DateTime<Utc>>,
    dump: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct ClassSummary {
    id: String,
    name: String,
    probes: usize,
    hit: usize,
}

#[derive(Debug, Serialize)]
struct ArtifactSummary {
    sessions: Vec<SessionSummary>,
    classes: usize,
    probes: usize,
    probes_hit: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    class_details: Vec<ClassSummary>,
}

fn summarize(data: &ExecutionData, with_classes: bool) -> ArtifactSummary {
    let sessions = data
        .sessions()
        .iter()
        .map(|s| SessionSummary {
            id: s.id.clone(),
            start: DateTime::from_timestamp_millis(s.start),
            dump: DateTime::from_timestamp_millis(s.dump),
        })
        .collect();

    let class_details = if with_classes {
        data.entries()
            .map(|e| ClassSummary {
                id: format!("{:016x}", e.id),
                name: e.name.clone(),
                probes: e.probes.len(),
                hit: e.hit_count(),
            })
            .collect()
    } else {
        Vec::new()
    };

    ArtifactSummary {
        sessions,
        classes: data.class_count(),
        probes: data.probe_count(),
        probes_hit: data.covered_probe_count(),
        class_details,
    }
}

fn format_time(t: Option<DateTime<Utc>>) -> String {
    t.map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string())
        .unwrap_or_else(|| "?".to_string())
}

/// Run the decode command.
pub fn run_decode(artifact: &Path, classes: bool, json: bool) -> Result<()> {
    let data = exec::decode_file(artifact)
        .with_context(|| format!("failed to decode {}", artifact.display()))?;
    let summary = summarize(&data, classes);

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Artifact: {}", artifact.display());
    if summary.sessions.is_empty() {
        println!("Sessions: none");
    } else {
        println!("Sessions ({}):", summary.sessions.len());
        for s in &summary.sessions {
            println!(
                "  {}  start {}  dump {}",
                s.id,
                format_time(s.start),
                format_time(s.dump)
            );
        }
    }
    println!("Classes: {}", summary.classes);
    println!("Probes:  {} of {} hit", summary.probes_hit, summary.probes);

    for c in &summary.class_details {
        println!("  {}  {:>5}/{:<5}  {}", c.id, c.hit, c.probes, c.name);
    }

    Ok(())
}
