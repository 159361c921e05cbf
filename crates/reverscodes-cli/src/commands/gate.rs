//! Gate subcommand: inspect and drive the deferral quota, run detection.
//!
//! Only the network probes run here; bait and mutation probes need a page.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::Subcommand;
use reverscodes_core::{
    Config, Database, DeferralManager, DetectionEngine, DetectionVerdict, GateDecision,
    HttpLoader, QuotaRecord, QuotaStore,
};
use serde::Serialize;

#[derive(Subcommand)]
pub enum GateAction {
    /// Show the quota record and what a blocked visit would get now
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the network probes from this machine
    Detect {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Record a "maybe later"
    Defer,
    /// Clear the quota, as after a successful recheck
    Reset,
}

#[derive(Serialize)]
struct StatusView {
    record: QuotaRecord,
    remaining: u32,
    decision: GateDecision,
}

#[derive(Serialize)]
struct DetectView {
    verdict: DetectionVerdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    decision: Option<GateDecision>,
}

pub fn run(action: GateAction) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    match action {
        GateAction::Status { json } => status(&config, json),
        GateAction::Detect { json } => detect(&config, json),
        GateAction::Defer => defer(&config),
        GateAction::Reset => {
            manager(&config)?.reset_after_disable(Utc::now());
            println!("quota reset");
            Ok(())
        }
    }
}

fn manager(config: &Config) -> Result<DeferralManager<Database>, Box<dyn std::error::Error>> {
    let db = Database::open()?;
    Ok(DeferralManager::new(QuotaStore::new(db, config.quota_policy())))
}

fn status(config: &Config, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let manager = manager(config)?;
    let now = Utc::now();
    let view = StatusView {
        record: manager.record(now),
        remaining: manager.remaining(now),
        decision: manager.preview(now),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    let policy = manager.policy();
    println!(
        "Deferrals: {}/{} ({} left)",
        view.record.deferral_count, policy.max_deferrals, view.remaining
    );
    println!("Window resets: {}", local(view.record.window_reset_at));
    if let Some(until) = view.record.defer_until.filter(|u| *u > now) {
        println!("Cooldown until: {}", local(until));
    }
    if let Some(at) = view.record.last_modal_shown_at {
        println!("Last prompt: {}", local(at));
    }
    println!("If blocked now: {}", describe(&view.decision));
    Ok(())
}

fn detect(config: &Config, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let loader = Arc::new(HttpLoader::new()?);
    let engine =
        DetectionEngine::standard(config.detection_settings(), &config.probe_plan(), None, loader);
    if engine.probe_count() == 0 {
        return Err("no probe URLs configured".into());
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let verdict = runtime.block_on(engine.detect());
    let decision = if verdict.blocked {
        Some(manager(config)?.preview(Utc::now()))
    } else {
        None
    };

    if json {
        let view = DetectView { verdict, decision };
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    println!(
        "Blocked: {} ({} signal(s), {} attempt(s){})",
        if verdict.blocked { "yes" } else { "no" },
        verdict.signals,
        verdict.attempts,
        if verdict.timed_out { ", timed out" } else { "" }
    );
    for report in &verdict.reports {
        println!(
            "  {:<8} {}/{} suppressed{}",
            format!("{:?}", report.kind).to_lowercase(),
            report.suppressed,
            report.total,
            if report.blocked { "  <- blocked" } else { "" }
        );
    }
    if let Some(decision) = decision {
        println!("Gate: {}", describe(&decision));
    }
    Ok(())
}

fn defer(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let manager = manager(config)?;
    match manager.record_deferral(Utc::now()) {
        Some(d) => {
            println!(
                "Deferred ({} left), prompt returns at {}",
                d.remaining,
                local(d.defer_until)
            );
            Ok(())
        }
        None => Err("no deferrals left in this window".into()),
    }
}

fn describe(decision: &GateDecision) -> String {
    match decision {
        GateDecision::Suppressed { resume_at } => {
            format!("nothing shown, recheck at {}", local(*resume_at))
        }
        GateDecision::Block => "blocking modal (quota exhausted)".to_string(),
        GateDecision::Prompt { remaining } => {
            format!("prompt with {remaining} deferral(s) available")
        }
    }
}

fn local(at: DateTime<Utc>) -> String {
    at.with_timezone(&chrono::Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}
