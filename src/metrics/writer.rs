// =============================================================================
// Metrics Writer Worker — CSV append and atomic Prometheus exposition
// =============================================================================
//
// Runs on its own OS thread, fully isolated from the engine: it owns the
// files, consumes records from the bounded queue, and dies when the queue
// disconnects at shutdown (after draining what is left).
//
//   - CSV: append-only, header written once when the file is created.
//   - Prometheus: the whole exposition is rewritten to a tmp file and
//     renamed over the target, so scrapers never see a torn write.
// =============================================================================

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use crossbeam::channel::Receiver;
use tracing::{debug, error, info};

use crate::metrics::MetricsRecord;

/// Spawn the writer worker. The handle joins cleanly once the sending side
/// of the queue is dropped.
pub fn spawn(
    rx: Receiver<MetricsRecord>,
    csv_path: impl Into<PathBuf>,
    prom_path: impl Into<PathBuf>,
) -> JoinHandle<()> {
    let csv_path = csv_path.into();
    let prom_path = prom_path.into();

    std::thread::Builder::new()
        .name("metrics-writer".into())
        .spawn(move || {
            info!(
                csv = %csv_path.display(),
                prom = %prom_path.display(),
                "metrics writer started"
            );
            while let Ok(record) = rx.recv() {
                if let Err(e) = append_csv(&csv_path, &record) {
                    error!(error = %e, "csv append failed");
                }
                if let Err(e) = write_prometheus(&prom_path, &record) {
                    error!(error = %e, "prometheus write failed");
                }
            }
            debug!("metrics queue disconnected — writer exiting");
        })
        .expect("spawning the metrics writer thread cannot fail")
}

/// Append one record to the CSV, creating the file with a header first.
fn append_csv(path: &Path, record: &MetricsRecord) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let needs_header = !path.exists();
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;

    if needs_header {
        let header: Vec<&str> = record.fields.iter().map(|(n, _)| *n).collect();
        writeln!(file, "{}", header.join(","))?;
    }

    let row: Vec<String> = record.fields.iter().map(|(_, v)| format_value(*v)).collect();
    writeln!(file, "{}", row.join(","))?;
    Ok(())
}

/// Rewrite the Prometheus exposition atomically (tmp + rename).
fn write_prometheus(path: &Path, record: &MetricsRecord) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut body = String::with_capacity(record.fields.len() * 48);
    for (name, value) in &record.fields {
        body.push_str("# TYPE cthulu_");
        body.push_str(name);
        body.push_str(" gauge\ncthulu_");
        body.push_str(name);
        body.push(' ');
        body.push_str(&format_value(*value));
        body.push('\n');
    }

    let tmp = path.with_extension("prom.tmp");
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn format_value(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v:.6}")
    }
}
