//! Keeps the accounting copy of every account in step with the primary copy.
//!
//! The primary store is the source of truth. Every account change is committed
//! there atomically with the transaction that caused it, guarded by the
//! account document's version. The new snapshot is then pushed to the
//! secondary store with bounded exponential backoff; when that keeps failing
//! the account is flagged with a stale marker and left for the sweep.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use model::{
    Account, Actor, AuditAction, NewTransaction, SyncFailure, SyncMarker, Transaction,
    TransactionStatus, paths,
    store::{Document, LedgerStore, Precondition, StoreError, WriteOp},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, error, info, instrument, trace, warn};
use uuid::Uuid;

use crate::{
    audit,
    error::{LedgerError, Result},
    log::{self, TransactionFilter, TransactionLog},
    projector,
};

/// Retry limits for primary commits and secondary propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    /// Secondary write attempts before an account is marked stale.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Re-reads allowed after losing an optimistic-concurrency race.
    pub commit_retries: u32,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            commit_retries: 16,
        }
    }
}

impl SyncPolicy {
    /// Delay after the `attempt`-th failed secondary write (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// What happened to the secondary copy after a primary write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecondaryStatus {
    /// The snapshot was written.
    Synced,
    /// The secondary already held this snapshot or a newer one.
    AlreadyCurrent,
    /// Propagation gave up; a stale marker was left for the sweep.
    Deferred,
    /// No account was touched.
    NotApplicable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    pub transaction: Transaction,
    pub account: Option<Account>,
    pub secondary: SecondaryStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    InSync,
    /// The secondary copy was overwritten with the primary one.
    Repaired { previous: Option<Account> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RebuildOutcome {
    Consistent { account: Account },
    Rewritten {
        previous: Option<Account>,
        current: Account,
        secondary: SecondaryStatus,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub checked: usize,
    pub repaired: usize,
    pub failed: usize,
}

/// Stops the background sweep when cancelled or dropped.
#[derive(Debug)]
pub struct SweeperHandle {
    task: JoinHandle<()>,
}

impl SweeperHandle {
    pub fn cancel(self) {
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    primary: Arc<dyn LedgerStore>,
    secondary: Arc<dyn LedgerStore>,
    policy: SyncPolicy,
    log: TransactionLog,
}

impl Reconciler {
    pub fn new(
        primary: Arc<dyn LedgerStore>,
        secondary: Arc<dyn LedgerStore>,
        policy: SyncPolicy,
    ) -> Self {
        let log = TransactionLog::new(primary.clone());
        Self {
            primary,
            secondary,
            policy,
            log,
        }
    }

    pub fn log(&self) -> &TransactionLog {
        &self.log
    }

    pub fn policy(&self) -> SyncPolicy {
        self.policy
    }

    pub fn primary(&self) -> &Arc<dyn LedgerStore> {
        &self.primary
    }

    pub fn secondary(&self) -> &Arc<dyn LedgerStore> {
        &self.secondary
    }

    /// The primary copy of an account.
    pub async fn account(&self, entity_id: &str) -> Result<Option<Account>> {
        let document = self.primary.get(&paths::account(entity_id)).await?;
        document.as_ref().map(decode_account).transpose()
    }

    /// All primary accounts, ordered by entity id.
    pub async fn accounts(&self) -> Result<Vec<Account>> {
        self.primary
            .list(paths::ACCOUNTS)
            .await?
            .iter()
            .map(decode_account)
            .collect()
    }

    /// The secondary copy of an account. Its version is the primary version
    /// the snapshot was taken at.
    pub async fn secondary_account(&self, entity_id: &str) -> Result<Option<Account>> {
        match self.secondary.get(&paths::account(entity_id)).await? {
            Some(document) => Ok(Some(document.decode()?)),
            None => Ok(None),
        }
    }

    pub async fn stale_markers(&self) -> Result<Vec<SyncMarker>> {
        decode_all(&self.primary.list(paths::STALE_MARKERS).await?)
    }

    pub async fn sync_failures(&self) -> Result<Vec<SyncFailure>> {
        decode_all(&self.primary.list(paths::SYNC_FAILURES).await?)
    }

    /// Validates and records a transaction, updates its account and writes the
    /// `create` audit entry in the same primary commit, then pushes the new
    /// account snapshot to the secondary.
    ///
    /// A secondary failure does not fail the call; see [`SecondaryStatus::Deferred`].
    #[instrument(skip(self, new, actor), fields(entity_id = ?new.entity_id, kind = %new.kind, user_id = %actor.user_id))]
    pub async fn record_and_sync(&self, new: NewTransaction, actor: &Actor) -> Result<SyncOutcome> {
        let transaction = log::validate(new)?;
        let transaction_path = paths::transaction(transaction.id);
        let body = serde_json::to_value(&transaction)?;
        let audit_op = audit::create_op(&audit::entry(
            AuditAction::Create,
            "transaction",
            transaction.id,
            actor,
            json!({
                "type": transaction.kind,
                "amount": transaction.amount,
                "category": transaction.category,
                "entityId": transaction.entity_id,
                "status": transaction.status,
            }),
        ))?;

        let Some(entity_id) = transaction.entity_id.clone() else {
            self.primary
                .commit(vec![WriteOp::create(transaction_path, body), audit_op])
                .await?;
            debug!(id = %transaction.id, "recorded institution-level transaction");
            return Ok(SyncOutcome {
                transaction,
                account: None,
                secondary: SecondaryStatus::NotApplicable,
            });
        };

        let mut attempt = 0;
        let account = loop {
            attempt += 1;
            let (current, expect) = self.read_for_write(&entity_id).await?;
            let next = projector::apply(current, &transaction, Utc::now())?
                .with_version(expect.next_version().unwrap_or_default());

            let ops = vec![
                WriteOp::create(transaction_path.clone(), body.clone()),
                WriteOp::put_if(
                    paths::account(&entity_id),
                    serde_json::to_value(&next)?,
                    expect,
                ),
                audit_op.clone(),
            ];
            match self.primary.commit(ops).await {
                Ok(_) => break next,
                Err(StoreError::Conflict { path }) if attempt <= self.policy.commit_retries => {
                    debug!(%path, attempt, "lost account update race, retrying");
                }
                Err(store_error) => return Err(store_error.into()),
            }
        };

        info!(
            id = %transaction.id,
            entity_id = %entity_id,
            balance = %account.balance(),
            version = account.version(),
            "recorded transaction"
        );
        let secondary = self.propagate(&account).await;
        Ok(SyncOutcome {
            transaction,
            account: Some(account),
            secondary,
        })
    }

    /// Moves a pending transaction to `status` and, when the new status counts
    /// toward the balance, applies it to the account in the same commit. The
    /// audit entry for the change is part of that commit too.
    ///
    /// The commit is conditional on the transaction document's version, so two
    /// concurrent updates cannot both apply the same transaction.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn update_status_and_sync(
        &self,
        id: Uuid,
        status: TransactionStatus,
        actor: &Actor,
    ) -> Result<SyncOutcome> {
        let transaction_path = paths::transaction(id);
        let mut attempt = 0;

        let (transaction, account) = loop {
            attempt += 1;
            let document = self
                .primary
                .get(&transaction_path)
                .await?
                .ok_or_else(|| LedgerError::NotFound(format!("transaction {id}")))?;
            let mut transaction: Transaction = document.decode()?;
            if !transaction.status.can_transition_to(status) {
                return Err(LedgerError::validation(format!(
                    "transaction {id} is {} and cannot become {status}",
                    transaction.status
                )));
            }

            let now = Utc::now();
            let previous = transaction.status;
            transaction.status = status;
            transaction.updated_at = Some(now);
            let mut ops = vec![
                WriteOp::put_if(
                    transaction_path.clone(),
                    serde_json::to_value(&transaction)?,
                    Precondition::Version(document.version),
                ),
                audit::create_op(&audit::entry(
                    status_action(status),
                    "transaction",
                    id,
                    actor,
                    json!({ "status": status, "previousStatus": previous }),
                ))?,
            ];

            let account = match transaction.entity_id.as_deref() {
                Some(entity_id) if status.counts_toward_balance() => {
                    let (current, expect) = self.read_for_write(entity_id).await?;
                    let next = projector::apply(current, &transaction, now)?
                        .with_version(expect.next_version().unwrap_or_default());
                    ops.push(WriteOp::put_if(
                        paths::account(entity_id),
                        serde_json::to_value(&next)?,
                        expect,
                    ));
                    Some(next)
                }
                _ => None,
            };

            match self.primary.commit(ops).await {
                Ok(_) => break (transaction, account),
                Err(StoreError::Conflict { path }) if attempt <= self.policy.commit_retries => {
                    debug!(%path, attempt, "lost status update race, retrying");
                }
                Err(store_error) => return Err(store_error.into()),
            }
        };

        info!(%id, %status, "updated transaction status");
        let secondary = match &account {
            Some(account) => self.propagate(account).await,
            None => SecondaryStatus::NotApplicable,
        };
        Ok(SyncOutcome {
            transaction,
            account,
            secondary,
        })
    }

    /// Pushes `account` to the secondary store, retrying with exponential
    /// backoff. Gives up after `max_attempts`, recording a stale marker and a
    /// sync failure in the primary store. Never returns an error.
    #[instrument(skip(self, account), fields(entity_id = %account.entity_id(), version = account.version()))]
    pub async fn propagate(&self, account: &Account) -> SecondaryStatus {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            match self.write_secondary(account).await {
                Ok(status) => {
                    trace!(?status, attempt, "propagated account");
                    return status;
                }
                Err(store_error) => {
                    warn!(error = %store_error, attempt, "secondary write failed");
                    last_error = Some(store_error);
                    if attempt < max_attempts {
                        tokio::time::sleep(self.policy.backoff(attempt)).await;
                    }
                }
            }
        }

        let reason = last_error
            .map(|store_error| store_error.to_string())
            .unwrap_or_default();
        self.defer(account, max_attempts, reason).await;
        SecondaryStatus::Deferred
    }

    /// Writes `account` to the secondary unless it already holds the same or a
    /// newer snapshot.
    pub async fn write_secondary(
        &self,
        account: &Account,
    ) -> std::result::Result<SecondaryStatus, StoreError> {
        let path = paths::account(account.entity_id());
        let mut attempt = 0;
        loop {
            attempt += 1;
            let document = self.secondary.get(&path).await?;
            if let Some(document) = &document {
                let held: Account = document.decode()?;
                if held.version() > account.version()
                    || (held.version() == account.version() && held.same_figures(account))
                {
                    return Ok(SecondaryStatus::AlreadyCurrent);
                }
            }

            let op = WriteOp::put_if(
                path.clone(),
                serde_json::to_value(account)?,
                Precondition::from_read(document.as_ref()),
            );
            match self.secondary.commit(vec![op]).await {
                Ok(_) => return Ok(SecondaryStatus::Synced),
                Err(StoreError::Conflict { .. }) if attempt <= self.policy.commit_retries => {
                    trace!(attempt, "secondary copy moved, re-reading");
                }
                Err(store_error) => return Err(store_error),
            }
        }
    }

    async fn defer(&self, account: &Account, attempts: u32, reason: String) {
        let entity_id = account.entity_id();
        let now = Utc::now();
        let marker = SyncMarker {
            entity_id: entity_id.to_string(),
            account_version: account.version(),
            marked_at: now,
            attempts,
            last_error: reason.clone(),
        };
        let failure = SyncFailure {
            id: Uuid::new_v4(),
            entity_id: entity_id.to_string(),
            occurred_at: now,
            attempts,
            error: reason,
        };

        let ops = match (serde_json::to_value(&marker), serde_json::to_value(&failure)) {
            (Ok(marker_body), Ok(failure_body)) => vec![
                WriteOp::put(paths::stale_marker(entity_id), marker_body),
                WriteOp::create(paths::sync_failure(failure.id), failure_body),
            ],
            (Err(serde_error), _) | (_, Err(serde_error)) => {
                error!(error = %serde_error, entity_id, "could not encode sync failure");
                return;
            }
        };
        match self.primary.commit(ops).await {
            Ok(_) => warn!(entity_id, attempts, "secondary sync deferred to sweep"),
            Err(store_error) => {
                error!(error = %store_error, entity_id, "could not record stale marker")
            }
        }
    }

    /// Makes the secondary copy of one account equal to the primary copy.
    ///
    /// The primary always wins; nothing is ever copied back. After writing the
    /// secondary the primary is read again, and the pass repeats if it moved.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, entity_id: &str) -> Result<ReconcileOutcome> {
        let path = paths::account(entity_id);
        let mut repaired_from = None;
        let mut last_seen = (0, None);

        for attempt in 1..=self.policy.commit_retries.saturating_add(1) {
            let primary_document = self
                .primary
                .get(&path)
                .await?
                .ok_or_else(|| LedgerError::NotFound(format!("account {entity_id}")))?;
            let truth = decode_account(&primary_document)?;

            let secondary_document = self.secondary.get(&path).await?;
            let held: Option<Account> = secondary_document
                .as_ref()
                .map(Document::decode)
                .transpose()?;

            let in_sync = held.as_ref().is_some_and(|held| {
                held.same_figures(&truth) && held.version() == truth.version()
            });
            if in_sync {
                self.clear_marker(entity_id, truth.version()).await?;
                return Ok(match repaired_from {
                    Some(previous) => ReconcileOutcome::Repaired { previous },
                    None => ReconcileOutcome::InSync,
                });
            }

            let op = WriteOp::put_if(
                path.clone(),
                serde_json::to_value(&truth)?,
                Precondition::from_read(secondary_document.as_ref()),
            );
            match self.secondary.commit(vec![op]).await {
                Ok(_) => {}
                Err(StoreError::Conflict { .. }) => {
                    debug!(attempt, "secondary copy moved during reconcile");
                    continue;
                }
                Err(store_error) => return Err(store_error.into()),
            }
            if repaired_from.is_none() {
                repaired_from = Some(held);
            }

            let latest = self.primary.get(&path).await?.map(|document| document.version);
            if latest == Some(primary_document.version) {
                self.clear_marker(entity_id, truth.version()).await?;
                info!(version = truth.version(), "repaired secondary copy");
                return Ok(ReconcileOutcome::Repaired {
                    previous: repaired_from.flatten(),
                });
            }
            debug!(attempt, read = primary_document.version, ?latest, "primary moved during reconcile");
            last_seen = (primary_document.version, latest);
        }

        Err(LedgerError::StaleRead {
            entity_id: entity_id.to_string(),
            expected: last_seen.0,
            found: last_seen.1,
        })
    }

    /// Removes the stale marker if it flags `reconciled` or an older version.
    /// The removal is conditional on the marker document read here, so a
    /// marker rewritten by a later failed propagation survives for the next sweep.
    async fn clear_marker(&self, entity_id: &str, reconciled: u64) -> Result<()> {
        let path = paths::stale_marker(entity_id);
        let Some(document) = self.primary.get(&path).await? else {
            return Ok(());
        };
        let marker: SyncMarker = document.decode()?;
        if marker.account_version > reconciled {
            debug!(
                entity_id,
                marked = marker.account_version,
                reconciled,
                "stale marker is newer, keeping it"
            );
            return Ok(());
        }
        let op = WriteOp::Remove {
            path,
            expect: Precondition::Version(document.version),
        };
        match self.primary.commit(vec![op]).await {
            Ok(_) => Ok(()),
            Err(StoreError::Conflict { .. }) => {
                debug!(entity_id, "stale marker was rewritten, keeping it");
                Ok(())
            }
            Err(store_error) => Err(store_error.into()),
        }
    }

    /// Reconciles every account that carries a stale marker.
    #[instrument(skip(self))]
    pub async fn reconcile_stale(&self) -> Result<SweepReport> {
        let markers = self.stale_markers().await?;
        let entity_ids = markers.into_iter().map(|marker| marker.entity_id).collect();
        Ok(self.sweep(entity_ids).await)
    }

    /// Reconciles every account in the primary store.
    #[instrument(skip(self))]
    pub async fn reconcile_all(&self) -> Result<SweepReport> {
        let entity_ids = self
            .accounts()
            .await?
            .into_iter()
            .map(|account| account.entity_id().to_string())
            .collect();
        Ok(self.sweep(entity_ids).await)
    }

    async fn sweep(&self, entity_ids: Vec<String>) -> SweepReport {
        let mut report = SweepReport::default();
        for entity_id in entity_ids {
            report.checked += 1;
            match self.reconcile(&entity_id).await {
                Ok(ReconcileOutcome::InSync) => {}
                Ok(ReconcileOutcome::Repaired { .. }) => report.repaired += 1,
                Err(ledger_error) => {
                    warn!(%entity_id, error = %ledger_error, "reconcile failed");
                    report.failed += 1;
                }
            }
        }
        if report.checked > 0 {
            info!(?report, "sweep finished");
        }
        report
    }

    /// Recomputes an account from the full transaction log and rewrites the
    /// stored aggregate when it disagrees.
    #[instrument(skip(self))]
    pub async fn rebuild(&self, entity_id: &str) -> Result<RebuildOutcome> {
        let path = paths::account(entity_id);
        let filter = TransactionFilter::for_entity(entity_id);
        let mut attempt = 0;

        loop {
            attempt += 1;
            // The aggregate is read before the log: a transaction committed in
            // between makes the conditional write below fail and retry.
            let document = self.primary.get(&path).await?;
            let stored = document.as_ref().map(decode_account).transpose()?;
            let transactions = self.log.query(&filter).await?;
            if stored.is_none() && transactions.is_empty() {
                return Err(LedgerError::NotFound(format!("account {entity_id}")));
            }

            let projected = projector::project(entity_id, &transactions, Utc::now())?;
            if let Some(stored) = &stored {
                if stored.same_figures(&projected) {
                    debug!(transactions = transactions.len(), "aggregate matches the log");
                    return Ok(RebuildOutcome::Consistent {
                        account: stored.clone(),
                    });
                }
            }

            let expect = Precondition::from_read(document.as_ref());
            let current = projected.with_version(expect.next_version().unwrap_or_default());
            let op = WriteOp::put_if(path.clone(), serde_json::to_value(&current)?, expect);
            match self.primary.commit(vec![op]).await {
                Ok(_) => {
                    warn!(
                        previous = ?stored.as_ref().map(Account::balance),
                        current = %current.balance(),
                        "aggregate disagreed with the log and was rewritten"
                    );
                    let secondary = self.propagate(&current).await;
                    return Ok(RebuildOutcome::Rewritten {
                        previous: stored,
                        current,
                        secondary,
                    });
                }
                Err(StoreError::Conflict { path }) if attempt <= self.policy.commit_retries => {
                    debug!(%path, attempt, "account moved during rebuild, retrying");
                }
                Err(store_error) => return Err(store_error.into()),
            }
        }
    }

    /// Runs [`Reconciler::reconcile_stale`] every `every` until the handle is
    /// cancelled or dropped.
    pub fn spawn_sweeper(&self, every: Duration) -> SweeperHandle {
        let reconciler = self.clone();
        let every = every.max(Duration::from_millis(1));
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(ledger_error) = reconciler.reconcile_stale().await {
                    warn!(error = %ledger_error, "stale sweep could not run");
                }
            }
        });
        info!(?every, "started stale sweeper");
        SweeperHandle { task }
    }

    /// The account to build on and the precondition that protects it.
    async fn read_for_write(&self, entity_id: &str) -> Result<(Account, Precondition)> {
        let document = self.primary.get(&paths::account(entity_id)).await?;
        let expect = Precondition::from_read(document.as_ref());
        let account = match &document {
            Some(document) => decode_account(document)?,
            None => Account::new(entity_id, Utc::now()),
        };
        Ok((account, expect))
    }
}

/// Decodes an account, taking its version from the document it came from.
fn decode_account(document: &Document) -> Result<Account> {
    let account: Account = document.decode()?;
    Ok(account.with_version(document.version))
}

/// Audit action recorded for a status change.
fn status_action(status: TransactionStatus) -> AuditAction {
    match status {
        TransactionStatus::Rejected => AuditAction::Reject,
        TransactionStatus::Approved | TransactionStatus::Completed => AuditAction::Approve,
        TransactionStatus::Pending => AuditAction::Update,
    }
}

fn decode_all<T: serde::de::DeserializeOwned>(documents: &[Document]) -> Result<Vec<T>> {
    documents
        .iter()
        .map(|document| document.decode::<T>().map_err(LedgerError::from))
        .collect()
}
