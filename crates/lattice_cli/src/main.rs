//! CLI smoke entry point.
//!
//! # Responsibility
//! - Open a planner at the given root (or the current directory) and print
//!   the open backlog in claim order.
//! - Keep output deterministic for quick local sanity checks.

use lattice_core::{
    default_log_level, init_logging, BacklogQuery, ObjectStatus, Planner, PlannerConfig,
};
use std::path::PathBuf;
use std::process::ExitCode;

const LOG_DIR_ENV: &str = "LATTICE_LOG_DIR";

fn main() -> ExitCode {
    if let Some(log_dir) = std::env::var_os(LOG_DIR_ENV) {
        if let Err(err) = init_logging(default_log_level(), PathBuf::from(log_dir)) {
            eprintln!("lattice: logging disabled: {err}");
        }
    }

    let root = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    println!("lattice_core version={}", lattice_core::core_version());

    let planner = match Planner::open(PlannerConfig::new(root)) {
        Ok(planner) => planner,
        Err(err) => {
            eprintln!("lattice: {} ({})", err, err.code());
            return ExitCode::FAILURE;
        }
    };
    let query = BacklogQuery {
        status: Some(ObjectStatus::Open),
        ..BacklogQuery::default()
    };
    match planner.list_backlog(query) {
        Ok(items) => {
            for item in items {
                let marker = if item.blocked_by.is_empty() { " " } else { "!" };
                println!(
                    "{marker} {:<8} {:<7} {}  {}",
                    item.priority.as_str(),
                    item.status.as_str(),
                    item.id,
                    item.title
                );
            }
            log::info!("event=cli_backlog module=cli status=ok");
            ExitCode::SUCCESS
        }
        Err(err) => {
            log::error!("event=cli_backlog module=cli status=error code={}", err.code());
            eprintln!("lattice: {} ({})", err, err.code());
            ExitCode::FAILURE
        }
    }
}
