use crate::experiment::CellReport;
use log::warn;
use prettytable::{row, Table};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

/// Reads the reports stored in `file_path`, or nothing if it does not exist.
pub fn read_cell_reports(file_path: &Path) -> io::Result<Vec<CellReport>> {
    if !file_path.exists() {
        return Ok(Vec::new());
    }

    let file_content = fs::read_to_string(file_path)?;
    serde_json::from_str::<Vec<CellReport>>(&file_content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Appends `reports` to the JSON array stored in `file_path`.
pub fn append_cell_reports(reports: &[CellReport], file_path: &Path) -> io::Result<()> {
    let mut results = match read_cell_reports(file_path) {
        Ok(results) => results,
        Err(e) => {
            warn!("Error parsing results file '{}': {}. Starting fresh.", file_path.display(), e);
            Vec::new()
        }
    };

    results.extend_from_slice(reports);

    let json = serde_json::to_string_pretty(&results).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    fs::write(file_path, json)
}

#[derive(Default)]
struct Aggregate<'a> {
    first: Option<&'a CellReport>,
    accuracy: f64,
    accuracy_delta: f64,
    latency_ms: f64,
    size_bytes: f64,
    measured: usize,
    failures: Vec<String>,
}

/// Prints one table per dataset. Repeated runs of the same cell are averaged.
pub fn print_cell_reports(reports: &[CellReport]) {
    // Group by dataset, then by cell directory
    let mut grouped: BTreeMap<&str, BTreeMap<&Path, Aggregate>> = BTreeMap::new();
    for report in reports {
        let aggregate = grouped
            .entry(report.dataset_name.as_str())
            .or_default()
            .entry(report.directory.as_path())
            .or_default();
        aggregate.first.get_or_insert(report);

        match report.record() {
            Some(record) => {
                aggregate.accuracy += record.accuracy;
                aggregate.accuracy_delta += record.accuracy_delta;
                aggregate.latency_ms += record.latency_ms;
                aggregate.size_bytes += record.size_bytes as f64;
                aggregate.measured += 1;
            }
            None => {
                if let Some(phase) = report.failed_phase() {
                    aggregate.failures.push(phase.to_string());
                }
            }
        }
    }

    for (dataset, cells) in grouped {
        let mut table = Table::new();
        table.add_row(row![
            "Implementation",
            "Args",
            "Optimizer",
            "Accuracy (%)",
            "Diff Accuracy",
            "Latency (ms)",
            "Size (Bytes)",
            "Runs",
            "Failed"
        ]);

        for aggregate in cells.values() {
            let Some(report) = aggregate.first else { continue };
            let args = serde_json::to_string(&report.implementation_args).unwrap_or_default();
            let optimizer: Vec<&str> = report.optimizer.iter().map(|o| o.as_deref().unwrap_or("-")).collect();

            if aggregate.measured > 0 {
                let n = aggregate.measured as f64;
                table.add_row(row![
                    &report.implementation,
                    args,
                    optimizer.join(","),
                    format!("{:.3}", aggregate.accuracy / n),
                    format!("{:.3}", aggregate.accuracy_delta / n),
                    format!("{:.4}", aggregate.latency_ms / n),
                    format!("{}", (aggregate.size_bytes / n).round() as u64),
                    aggregate.measured,
                    aggregate.failures.join(","),
                ]);
            } else {
                table.add_row(row![
                    &report.implementation,
                    args,
                    optimizer.join(","),
                    "-",
                    "-",
                    "-",
                    "-",
                    0,
                    aggregate.failures.join(","),
                ]);
            }
        }

        println!("\nResults for Dataset: {}", dataset);
        table.printstd();
    }
}

/// Pins the current process to `core_id`. Child processes inherit the mask.
#[cfg(target_os = "linux")]
pub fn set_affinity(core_id: usize) -> io::Result<()> {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core_id, &mut set);
        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn set_affinity(_core_id: usize) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "CPU pinning is only supported on Linux"))
}
