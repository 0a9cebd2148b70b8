use std::path::PathBuf;
use std::process::ExitCode;

use modupdater::{UpdateEngine, UpdateOutcome};

/// Host entry point: replay deferred operations from the previous run, then
/// reconcile the tree against the remote manifests.
///
/// Exit codes: 0 success, 1 failure, 2 configuration incomplete, 3 cancelled
/// or declined.
#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let root = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    let engine = UpdateEngine::new(&root);

    match engine.replay_pending().await {
        Ok(report) if report.completed + report.obsolete + report.remaining > 0 => {
            log::info!(
                "pending ops: {} completed, {} obsolete, {} remaining",
                report.completed,
                report.obsolete,
                report.remaining
            );
        }
        Ok(_) => {}
        // A failed replay is retried next start; the update itself can proceed.
        Err(e) => log::warn!("pending-ops replay failed: {e}"),
    }

    match engine.run_update().await {
        Ok(UpdateOutcome::UpToDate { version }) => {
            log::info!("already up to date at {version}");
            ExitCode::SUCCESS
        }
        Ok(UpdateOutcome::Applied { version, report }) => {
            let deferred = report.deferred();
            if deferred > 0 {
                log::info!(
                    "updated to {version}; {deferred} file(s) in use, restart required to finish"
                );
            } else {
                log::info!("updated to {version}");
            }
            ExitCode::SUCCESS
        }
        Ok(UpdateOutcome::Declined) => {
            log::info!("update declined by the user");
            ExitCode::from(3)
        }
        Err(e) => {
            log::error!("update failed: {e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
