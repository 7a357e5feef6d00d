//! Sweep command - run one reclamation cycle

use crate::cli::args::{OutputFormat, SweepArgs};
use crate::config::Config;
use crate::error::HangarResult;
use crate::gc::SweepReport;
use crate::node::Node;
use crate::ui::{self, UiContext};

/// Execute the sweep command
pub async fn execute(args: SweepArgs, config: &Config) -> HangarResult<()> {
    let node = Node::open(config).await?;
    let report = node.sweeper().sweep_once().await;
    node.save().await?;

    match args.format {
        OutputFormat::Table => print_table(&report),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Plain => println!(
            "{} {} {} {} {}",
            report.uses_reaped,
            report.caches_reaped,
            report.volumes_destroyed,
            report.volumes_deferred,
            report.volumes_overdue
        ),
    }

    Ok(())
}

fn print_table(report: &SweepReport) {
    let ctx = UiContext::detect();
    ui::intro(&ctx, "Sweep");

    ui::key_value(&ctx, "Cache uses reaped", &report.uses_reaped.to_string());
    ui::key_value(&ctx, "Caches reaped", &report.caches_reaped.to_string());
    ui::key_value(&ctx, "Volumes destroyed", &report.volumes_destroyed.to_string());
    ui::key_value_status(
        &ctx,
        "Volumes deferred",
        &report.volumes_deferred.to_string(),
        report.volumes_deferred == 0,
    );
    if report.volumes_overdue > 0 {
        ui::step_warn_hint(
            &ctx,
            &format!("{} volume(s) past the reclamation bound", report.volumes_overdue),
            "Check worker connectivity or retire the worker",
        );
    }

    for error in &report.errors {
        ui::step_warn(&ctx, error);
    }

    if report.has_errors() {
        ui::outro_warn(&ctx, "Sweep finished with errors");
    } else if report.is_empty() {
        ui::outro_success(&ctx, "Nothing to reclaim");
    } else {
        ui::outro_success(&ctx, "Sweep complete");
    }
}
