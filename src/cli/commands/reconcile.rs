use anyhow::Result;
use compute::ReconcileOutcome;
use tracing::{error, info, trace, warn};

use crate::config::{AppConfig, initialize_app_state};

/// One reconcile pass over a single account, every account, or the stale ones.
pub async fn reconcile(config: &AppConfig, entity_id: Option<&str>, all: bool) -> Result<()> {
    trace!("Entering reconcile function");
    let state = initialize_app_state(config, false).await?;
    let reconciler = &state.reconciler;

    if let Some(entity_id) = entity_id {
        match reconciler.reconcile(entity_id).await {
            Ok(ReconcileOutcome::InSync) => info!("Account {} already in sync", entity_id),
            Ok(ReconcileOutcome::Repaired { previous }) => info!(
                "Account {} repaired (accounting copy was {:?})",
                entity_id,
                previous.map(|account| account.balance())
            ),
            Err(e) => {
                error!("Failed to reconcile account {}: {}", entity_id, e);
                return Err(e.into());
            }
        }
        return Ok(());
    }

    let report = if all {
        reconciler.reconcile_all().await?
    } else {
        reconciler.reconcile_stale().await?
    };
    info!(
        "Sweep checked {} accounts, repaired {}, failed {}",
        report.checked, report.repaired, report.failed
    );
    if report.failed > 0 {
        warn!("{} accounts are still out of step", report.failed);
        anyhow::bail!("{} accounts could not be reconciled", report.failed);
    }
    Ok(())
}
