//! Status command - show ledger contents

use crate::cli::args::{OutputFormat, StatusArgs};
use crate::config::{Config, ConfigManager};
use crate::error::HangarResult;
use crate::ledger::{Ledger, LedgerCounts, MemoryLedger};
use crate::ui::{self, UiContext};
use crate::volume::VolumeRecord;
use crate::worker::{Worker, WorkerState};
use console::style;
use serde::Serialize;

#[derive(Serialize)]
struct StatusReport {
    counts: LedgerCounts,
    workers: Vec<Worker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    volumes: Option<Vec<VolumeRecord>>,
}

/// Execute the status command
pub async fn execute(args: StatusArgs, config: &Config) -> HangarResult<()> {
    // Read-only: no worker registration, no snapshot write.
    let ledger = MemoryLedger::open(ConfigManager::snapshot_path(config)).await?;

    let report = StatusReport {
        counts: ledger.counts().await?,
        workers: ledger.list_workers().await?,
        volumes: if args.volumes {
            Some(ledger.list_volumes().await?)
        } else {
            None
        },
    };

    match args.format {
        OutputFormat::Table => print_table(&report, config),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Plain => print_plain(&report),
    }

    Ok(())
}

fn print_table(report: &StatusReport, config: &Config) {
    let ctx = UiContext::detect();
    ui::intro(&ctx, "Hangar Status");

    ui::section(&ctx, "Workers");
    if report.workers.is_empty() {
        ui::step_info(&ctx, "No workers registered");
    }
    for worker in &report.workers {
        let team = worker
            .team
            .as_ref()
            .map_or_else(|| "global".to_string(), ToString::to_string);
        let detail = format!(
            "{}, {} containers, tags [{}]",
            team,
            worker.active_containers,
            worker.tags.iter().cloned().collect::<Vec<_>>().join(", ")
        );
        match worker.state {
            WorkerState::Running => ui::step_ok_detail(&ctx, &worker.name, &detail),
            state => ui::step_warn_hint(&ctx, &format!("{} ({})", worker.name, state), &detail),
        }
    }

    ui::section(&ctx, "Ledger");
    ui::key_value(&ctx, "Volumes", &report.counts.volumes.to_string());
    ui::key_value(&ctx, "Resource caches", &report.counts.resource_caches.to_string());
    ui::key_value(&ctx, "Cache uses", &report.counts.resource_cache_uses.to_string());
    ui::key_value(&ctx, "Artifacts", &report.counts.artifacts.to_string());
    ui::key_value(
        &ctx,
        "Reclamation bound",
        &format!("{}s", config.gc.reclamation_bound().as_secs()),
    );

    if let Some(volumes) = &report.volumes {
        ui::section(&ctx, "Volumes");
        println!(
            "{:<38} {:<12} {:<15} {:<11} {:<20}",
            style("HANDLE").bold(),
            style("WORKER").bold(),
            style("TYPE").bold(),
            style("STATE").bold(),
            style("OWNER").bold()
        );
        println!("{}", "-".repeat(96));
        for volume in volumes {
            let owner = volume
                .owner
                .as_ref()
                .map_or_else(|| "-".to_string(), ToString::to_string);
            println!(
                "{:<38} {:<12} {:<15} {:<11} {:<20}",
                volume.handle,
                volume.worker,
                volume.volume_type.to_string(),
                volume.state.to_string(),
                owner
            );
        }
        ui::remark(&ctx, &format!("{} volume(s)", volumes.len()));
    }
}

fn print_plain(report: &StatusReport) {
    match &report.volumes {
        Some(volumes) => {
            for volume in volumes {
                println!("{}", volume.handle);
            }
        }
        None => {
            for worker in &report.workers {
                println!("{}", worker.name);
            }
        }
    }
}
