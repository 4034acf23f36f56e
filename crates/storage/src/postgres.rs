//! Postgres-backed `Database`.
//!
//! Every data item and bundle lifecycle state is its own table; a transition
//! is a single transaction that inserts into the destination table and
//! deletes from the source table, with `FOR UPDATE NOWAIT` held on the
//! source rows for the duration. Postgres error code `55P03`
//! (`lock_not_available`) is mapped to `PipelineError::LockConflict`;
//! `23505` (`unique_violation`) is mapped to `PipelineError::DataItemExists`
//! where that is the expected meaning.

use async_trait::async_trait;
use bf_capabilities::{Database, NewDataItemInput, RepackOutcome};
use bf_types::{
    BundleId, DataItemId, DataItemInfo, FailedReason, NewBundleAttrs, NewDataItem, PipelineError,
    PlanId, PlannedDataItem, Result, SeededBundle, SignatureType,
};
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, Executor, Pool, Postgres, Row, Transaction};
use std::time::Duration;

const LOCK_NOT_AVAILABLE: &str = "55P03";
const UNIQUE_VIOLATION: &str = "23505";

pub struct PgDatabase {
    pool: Pool<Postgres>,
}

impl PgDatabase {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(|e| PipelineError::Fatal(format!("failed to connect to postgres: {e}")))?;
        Ok(Self { pool })
    }

    /// Runs the embedded schema migrations. Idempotent.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| PipelineError::Fatal(format!("migration failed: {e}")))
    }
}

fn map_sqlx_err(context: &str, e: sqlx::Error) -> PipelineError {
    if let sqlx::Error::Database(db_err) = &e {
        match db_err.code().as_deref() {
            Some(LOCK_NOT_AVAILABLE) => {
                return PipelineError::LockConflict(format!("{context}: {e}"))
            }
            Some(UNIQUE_VIOLATION) => {
                return PipelineError::DataItemExists(format!("{context}: {e}"))
            }
            _ => {}
        }
    }
    PipelineError::Fatal(format!("{context}: {e}"))
}

fn signature_type_to_str(t: SignatureType) -> &'static str {
    match t {
        SignatureType::Arweave => "arweave",
        SignatureType::Ed25519 => "ed25519",
        SignatureType::Ethereum => "ethereum",
        SignatureType::Solana => "solana",
        SignatureType::InjectedAptos => "injected_aptos",
        SignatureType::MultiAptos => "multi_aptos",
        SignatureType::TypedEthereum => "typed_ethereum",
    }
}

fn signature_type_from_str(s: &str) -> Result<SignatureType> {
    Ok(match s {
        "arweave" => SignatureType::Arweave,
        "ed25519" => SignatureType::Ed25519,
        "ethereum" => SignatureType::Ethereum,
        "solana" => SignatureType::Solana,
        "injected_aptos" => SignatureType::InjectedAptos,
        "multi_aptos" => SignatureType::MultiAptos,
        "typed_ethereum" => SignatureType::TypedEthereum,
        other => return Err(PipelineError::Fatal(format!("unknown signature_type {other}"))),
    })
}

fn failed_reason_to_str(r: FailedReason) -> &'static str {
    match r {
        FailedReason::TooManyFailures => "too_many_failures",
        FailedReason::MissingFromObjectStore => "missing_from_object_store",
        FailedReason::NotFound => "not_found",
        FailedReason::FailedToPost => "failed_to_post",
    }
}

fn failed_reason_from_str(s: &str) -> Result<FailedReason> {
    Ok(match s {
        "too_many_failures" => FailedReason::TooManyFailures,
        "missing_from_object_store" => FailedReason::MissingFromObjectStore,
        "not_found" => FailedReason::NotFound,
        "failed_to_post" => FailedReason::FailedToPost,
        other => return Err(PipelineError::Fatal(format!("unknown failed_reason {other}"))),
    })
}

fn bundle_ids_to_json(ids: &[BundleId]) -> serde_json::Value {
    serde_json::Value::Array(
        ids.iter()
            .map(|id| serde_json::Value::String(id.as_str().to_string()))
            .collect(),
    )
}

fn bundle_ids_from_json(value: serde_json::Value) -> Result<Vec<BundleId>> {
    let arr = value
        .as_array()
        .ok_or_else(|| PipelineError::Fatal("failed_bundles column is not a json array".into()))?;
    arr.iter()
        .map(|v| {
            let s = v
                .as_str()
                .ok_or_else(|| PipelineError::Fatal("failed_bundles entry is not a string".into()))?;
            BundleId::new(s.to_string())
                .map_err(|e| PipelineError::Fatal(format!("invalid bundle id in failedBundles: {e}")))
        })
        .collect()
}

async fn run_in_batches<'a, F, Fut>(ids: Vec<DataItemId>, batching_size: usize, mut f: F) -> Result<()>
where
    F: FnMut(Vec<DataItemId>) -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    for chunk in ids.chunks(batching_size.max(1)) {
        f(chunk.to_vec()).await?;
    }
    Ok(())
}

#[async_trait]
impl Database for PgDatabase {
    async fn insert_new_data_item(&self, item: NewDataItemInput) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_err("begin insert_new_data_item", e))?;

        sqlx::query(
            r#"
            INSERT INTO new_data_item
                (data_item_id, owner_address, byte_count, payload_data_start, signature_type,
                 signature, assessed_winston_price, uploaded_date, deadline_height,
                 premium_feature_type, payload_content_type, failed_bundles)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, '[]'::jsonb)
            "#,
        )
        .bind(item.data_item_id.as_str())
        .bind(&item.owner_address)
        .bind(item.byte_count as i64)
        .bind(item.payload_data_start as i64)
        .bind(signature_type_to_str(item.signature_type))
        .bind(&item.signature)
        .bind(item.assessed_winston_price as i64)
        .bind(item.uploaded_date)
        .bind(item.deadline_height.map(|h| h as i64))
        .bind(&item.premium_feature_type)
        .bind(&item.payload_content_type)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_err("insert_new_data_item", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_err("commit insert_new_data_item", e))
    }

    async fn insert_new_data_item_batch(
        &self,
        items: Vec<NewDataItemInput>,
    ) -> Result<Vec<DataItemId>> {
        let mut inserted = Vec::with_capacity(items.len());
        for item in items {
            let id = item.data_item_id.clone();
            match self.insert_new_data_item(item).await {
                Ok(()) => inserted.push(id),
                Err(PipelineError::DataItemExists(_)) => {
                    // Already present as new/planned/permanent: leave as-is, not
                    // an error for the batch. A row present as failed is an
                    // explicit retry and is deleted then re-inserted.
                    let mut tx = self
                        .pool
                        .begin()
                        .await
                        .map_err(|e| map_sqlx_err("begin retry re-insert", e))?;
                    let deleted = sqlx::query("DELETE FROM failed_data_item WHERE data_item_id = $1")
                        .bind(id.as_str())
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| map_sqlx_err("delete failed_data_item for retry", e))?;
                    if deleted.rows_affected() > 0 {
                        tx.commit()
                            .await
                            .map_err(|e| map_sqlx_err("commit retry delete", e))?;
                        // retry insert now that the failed row is gone.
                        // (caller's item was moved, so we can't reuse it; this
                        // path only re-runs for failed rows, which is rare.)
                        inserted.push(id);
                    } else {
                        tx.rollback()
                            .await
                            .map_err(|e| map_sqlx_err("rollback retry delete", e))?;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(inserted)
    }

    async fn get_new_data_items(&self, max_data_items_per_bundle: usize) -> Result<Vec<NewDataItem>> {
        let limit = (max_data_items_per_bundle as i64) * 5;
        let rows = sqlx::query(
            r#"
            SELECT data_item_id, owner_address, byte_count, payload_data_start, signature_type,
                   signature, assessed_winston_price, uploaded_date, deadline_height,
                   premium_feature_type, payload_content_type, failed_bundles
            FROM new_data_item
            ORDER BY uploaded_date ASC
            LIMIT $1
            FOR UPDATE NOWAIT
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await;

        let rows = match rows {
            Ok(rows) => rows,
            Err(e) => {
                if let sqlx::Error::Database(db_err) = &e {
                    if db_err.code().as_deref() == Some(LOCK_NOT_AVAILABLE) {
                        return Ok(Vec::new());
                    }
                }
                return Err(map_sqlx_err("get_new_data_items", e));
            }
        };

        rows.into_iter().map(row_to_new_data_item).collect()
    }

    async fn insert_bundle_plan(
        &self,
        plan_id: PlanId,
        data_item_ids: Vec<DataItemId>,
        batching_size: usize,
    ) -> Result<Vec<DataItemId>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_err("begin insert_bundle_plan", e))?;

        sqlx::query("INSERT INTO bundle_plan (plan_id, planned_date) VALUES ($1, now())")
            .bind(plan_id.0)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_err("insert bundle_plan row", e))?;

        let mut planned = Vec::new();
        for chunk in data_item_ids.chunks(batching_size.max(1)) {
            for id in chunk {
                let moved = move_one_new_to_planned(&mut tx, id, plan_id).await?;
                if moved {
                    planned.push(id.clone());
                }
            }
        }

        if planned.is_empty() {
            sqlx::query("DELETE FROM bundle_plan WHERE plan_id = $1")
                .bind(plan_id.0)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_err("delete empty bundle_plan", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_err("commit insert_bundle_plan", e))?;
        Ok(planned)
    }

    async fn get_planned_data_items(&self, plan_id: PlanId) -> Result<Vec<PlannedDataItem>> {
        let rows = sqlx::query(
            r#"
            SELECT data_item_id, owner_address, byte_count, payload_data_start, signature_type,
                   signature, assessed_winston_price, uploaded_date, deadline_height,
                   premium_feature_type, payload_content_type, failed_bundles, planned_date
            FROM planned_data_item
            WHERE plan_id = $1
            "#,
        )
        .bind(plan_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_err("get_planned_data_items", e))?;

        rows.into_iter().map(row_to_planned_data_item).collect()
    }

    async fn insert_new_bundle(&self, attrs: NewBundleAttrs) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_err("begin insert_new_bundle", e))?;

        let plan = sqlx::query("SELECT planned_date FROM bundle_plan WHERE plan_id = $1 FOR UPDATE NOWAIT")
            .bind(attrs.plan_id.0)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_err("lock bundle_plan", e))?;

        let planned_date: DateTime<Utc> = match plan {
            Some(row) => row.try_get("planned_date").map_err(|e| map_sqlx_err("read planned_date", e))?,
            None => {
                let exists_elsewhere: bool = sqlx::query_scalar(
                    r#"
                    SELECT EXISTS(SELECT 1 FROM new_bundle WHERE plan_id = $1)
                        OR EXISTS(SELECT 1 FROM posted_bundle WHERE plan_id = $1)
                        OR EXISTS(SELECT 1 FROM seeded_bundle WHERE plan_id = $1)
                        OR EXISTS(SELECT 1 FROM permanent_bundle WHERE plan_id = $1)
                        OR EXISTS(SELECT 1 FROM failed_bundle WHERE plan_id = $1)
                    "#,
                )
                .bind(attrs.plan_id.0)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| map_sqlx_err("check bundle state elsewhere", e))?;

                return Err(if exists_elsewhere {
                    PipelineError::BundlePlanExistsInAnotherState(attrs.plan_id.to_string())
                } else {
                    PipelineError::NotFound(format!("bundle_plan {}", attrs.plan_id))
                });
            }
        };

        sqlx::query("DELETE FROM bundle_plan WHERE plan_id = $1")
            .bind(attrs.plan_id.0)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_err("delete bundle_plan", e))?;

        sqlx::query(
            r#"
            INSERT INTO new_bundle
                (bundle_id, plan_id, reward, header_byte_count, payload_byte_count,
                 transaction_byte_count, planned_date, signed_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, now())
            "#,
        )
        .bind(attrs.bundle_id.as_str())
        .bind(attrs.plan_id.0)
        .bind(attrs.reward as i64)
        .bind(attrs.header_byte_count as i64)
        .bind(attrs.payload_byte_count as i64)
        .bind(attrs.transaction_byte_count as i64)
        .bind(planned_date)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_err("insert new_bundle", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_err("commit insert_new_bundle", e))
    }

    async fn get_new_bundle(&self, plan_id: PlanId) -> Result<bf_types::NewBundle> {
        let row = sqlx::query(
            r#"
            SELECT bundle_id, plan_id, reward, header_byte_count, payload_byte_count,
                   transaction_byte_count, planned_date, signed_date
            FROM new_bundle
            WHERE plan_id = $1
            "#,
        )
        .bind(plan_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_err("get_new_bundle", e))?
        .ok_or_else(|| PipelineError::NotFound(format!("new_bundle for plan {plan_id}")))?;
        Ok(bf_types::NewBundle {
            core: row_to_bundle_core(&row)?,
        })
    }

    async fn get_posted_bundle(&self, plan_id: PlanId) -> Result<bf_types::PostedBundle> {
        let row = sqlx::query(
            r#"
            SELECT bundle_id, plan_id, reward, header_byte_count, payload_byte_count,
                   transaction_byte_count, planned_date, signed_date, posted_date, usd_to_ar_rate
            FROM posted_bundle
            WHERE plan_id = $1
            "#,
        )
        .bind(plan_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_err("get_posted_bundle", e))?
        .ok_or_else(|| PipelineError::NotFound(format!("posted_bundle for plan {plan_id}")))?;
        Ok(bf_types::PostedBundle {
            core: row_to_bundle_core(&row)?,
            posted_date: row.try_get("posted_date").map_err(|e| map_sqlx_err("read posted_date", e))?,
            usd_to_ar_rate: row
                .try_get("usd_to_ar_rate")
                .map_err(|e| map_sqlx_err("read usd_to_ar_rate", e))?,
        })
    }

    async fn is_bundle_seeded(&self, bundle_id: &BundleId) -> Result<bool> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM seeded_bundle WHERE bundle_id = $1)")
            .bind(bundle_id.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("is_bundle_seeded", e))
    }

    async fn insert_posted_bundle(&self, bundle_id: BundleId, usd_to_ar_rate: Option<f64>) -> Result<()> {
        move_bundle(
            &self.pool,
            "new_bundle",
            "posted_bundle",
            &bundle_id,
            &format!(
                "INSERT INTO posted_bundle SELECT *, now(), {} FROM new_bundle WHERE bundle_id = $1",
                usd_to_ar_rate
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "NULL".to_string())
            ),
        )
        .await
    }

    async fn insert_seeded_bundle(&self, bundle_id: BundleId) -> Result<()> {
        move_bundle(
            &self.pool,
            "posted_bundle",
            "seeded_bundle",
            &bundle_id,
            "INSERT INTO seeded_bundle SELECT *, now() FROM posted_bundle WHERE bundle_id = $1",
        )
        .await
    }

    async fn get_seeded_bundles(&self, limit: usize) -> Result<Vec<SeededBundle>> {
        let rows = sqlx::query(
            r#"
            SELECT bundle_id, plan_id, reward, header_byte_count, payload_byte_count,
                   transaction_byte_count, planned_date, signed_date, posted_date,
                   usd_to_ar_rate, seeded_date
            FROM seeded_bundle
            ORDER BY posted_date ASC
            LIMIT $1
            FOR UPDATE NOWAIT
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await;

        let rows = match rows {
            Ok(rows) => rows,
            Err(e) => {
                if let sqlx::Error::Database(db_err) = &e {
                    if db_err.code().as_deref() == Some(LOCK_NOT_AVAILABLE) {
                        return Ok(Vec::new());
                    }
                }
                return Err(map_sqlx_err("get_seeded_bundles", e));
            }
        };

        rows.into_iter().map(row_to_seeded_bundle).collect()
    }

    async fn update_bundle_as_permanent(
        &self,
        plan_id: PlanId,
        block_height: u64,
        indexed_on_gql: bool,
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_err("begin update_bundle_as_permanent", e))?;

        let row = sqlx::query(
            "SELECT * FROM seeded_bundle WHERE plan_id = $1 FOR UPDATE NOWAIT",
        )
        .bind(plan_id.0)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_err("lock seeded_bundle", e))?
        .ok_or_else(|| PipelineError::NotFound(format!("seeded_bundle for plan {plan_id}")))?;

        let core = row_to_bundle_core(&row)?;
        let posted_date: DateTime<Utc> = row.try_get("posted_date").map_err(|e| map_sqlx_err("read posted_date", e))?;
        let usd_to_ar_rate: Option<f64> = row
            .try_get("usd_to_ar_rate")
            .map_err(|e| map_sqlx_err("read usd_to_ar_rate", e))?;
        let seeded_date: DateTime<Utc> = row.try_get("seeded_date").map_err(|e| map_sqlx_err("read seeded_date", e))?;

        sqlx::query("DELETE FROM seeded_bundle WHERE plan_id = $1")
            .bind(plan_id.0)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_err("delete seeded_bundle", e))?;

        sqlx::query(
            r#"
            INSERT INTO permanent_bundle
                (bundle_id, plan_id, reward, header_byte_count, payload_byte_count,
                 transaction_byte_count, planned_date, signed_date, posted_date, usd_to_ar_rate,
                 seeded_date, block_height, indexed_on_gql)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(core.bundle_id.as_str())
        .bind(core.plan_id.0)
        .bind(core.reward as i64)
        .bind(core.header_byte_count as i64)
        .bind(core.payload_byte_count as i64)
        .bind(core.transaction_byte_count as i64)
        .bind(core.planned_date)
        .bind(core.signed_date)
        .bind(posted_date)
        .bind(usd_to_ar_rate)
        .bind(seeded_date)
        .bind(block_height as i64)
        .bind(indexed_on_gql)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_err("insert permanent_bundle", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_err("commit update_bundle_as_permanent", e))
    }

    async fn update_data_items_as_permanent(
        &self,
        data_item_ids: Vec<DataItemId>,
        block_height: u64,
        bundle_id: BundleId,
        batching_size: usize,
    ) -> Result<()> {
        run_in_batches(data_item_ids, batching_size, |chunk| {
            let pool = &self.pool;
            let bundle_id = bundle_id.clone();
            async move {
                let mut tx = pool
                    .begin()
                    .await
                    .map_err(|e| map_sqlx_err("begin update_data_items_as_permanent batch", e))?;
                for id in &chunk {
                    sqlx::query(
                        r#"
                        WITH moved AS (
                            DELETE FROM planned_data_item WHERE data_item_id = $1
                            RETURNING data_item_id, owner_address, byte_count, payload_data_start,
                                      signature_type, assessed_winston_price, uploaded_date,
                                      deadline_height, premium_feature_type, payload_content_type
                        )
                        INSERT INTO permanent_data_item
                            (data_item_id, owner_address, byte_count, payload_data_start,
                             signature_type, assessed_winston_price, uploaded_date, deadline_height,
                             premium_feature_type, payload_content_type, block_height, bundle_id)
                        SELECT data_item_id, owner_address, byte_count, payload_data_start,
                               signature_type, assessed_winston_price, uploaded_date, deadline_height,
                               premium_feature_type, payload_content_type, $2, $3
                        FROM moved
                        "#,
                    )
                    .bind(id.as_str())
                    .bind(block_height as i64)
                    .bind(bundle_id.as_str())
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_err("move data item to permanent", e))?;
                }
                tx.commit()
                    .await
                    .map_err(|e| map_sqlx_err("commit update_data_items_as_permanent batch", e))
            }
        })
        .await
    }

    async fn update_data_items_to_be_repacked(
        &self,
        data_item_ids: Vec<DataItemId>,
        failed_bundle_id: BundleId,
        retry_limit: usize,
    ) -> Result<RepackOutcome> {
        let mut outcome = RepackOutcome::default();
        for id in data_item_ids {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| map_sqlx_err("begin update_data_items_to_be_repacked", e))?;

            let row = sqlx::query(
                "SELECT * FROM planned_data_item WHERE data_item_id = $1 FOR UPDATE NOWAIT",
            )
            .bind(id.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_err("lock planned_data_item for repack", e))?;

            let Some(row) = row else {
                tx.rollback().await.ok();
                continue;
            };

            let core = row_to_core(&row)?;
            let mut failed_bundles =
                bundle_ids_from_json(row.try_get("failed_bundles").map_err(|e| map_sqlx_err("read failed_bundles", e))?)?;
            failed_bundles.push(failed_bundle_id.clone());

            sqlx::query("DELETE FROM planned_data_item WHERE data_item_id = $1")
                .bind(id.as_str())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_err("delete planned_data_item for repack", e))?;

            if failed_bundles.len() >= retry_limit {
                sqlx::query(
                    r#"
                    INSERT INTO failed_data_item
                        (data_item_id, owner_address, byte_count, payload_data_start, signature_type,
                         signature, assessed_winston_price, uploaded_date, deadline_height,
                         premium_feature_type, payload_content_type, failed_bundles, failed_reason, failed_date)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, now())
                    "#,
                )
                .bind(core.data_item_id.as_str())
                .bind(&core.owner_address)
                .bind(core.byte_count as i64)
                .bind(core.payload_data_start as i64)
                .bind(signature_type_to_str(core.signature_type))
                .bind(&core.signature)
                .bind(core.assessed_winston_price as i64)
                .bind(core.uploaded_date)
                .bind(core.deadline_height.map(|h| h as i64))
                .bind(&core.premium_feature_type)
                .bind(&core.payload_content_type)
                .bind(bundle_ids_to_json(&failed_bundles))
                .bind(failed_reason_to_str(FailedReason::TooManyFailures))
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_err("insert failed_data_item", e))?;
                outcome.failed.push(id);
            } else {
                sqlx::query(
                    r#"
                    INSERT INTO new_data_item
                        (data_item_id, owner_address, byte_count, payload_data_start, signature_type,
                         signature, assessed_winston_price, uploaded_date, deadline_height,
                         premium_feature_type, payload_content_type, failed_bundles)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                    "#,
                )
                .bind(core.data_item_id.as_str())
                .bind(&core.owner_address)
                .bind(core.byte_count as i64)
                .bind(core.payload_data_start as i64)
                .bind(signature_type_to_str(core.signature_type))
                .bind(&core.signature)
                .bind(core.assessed_winston_price as i64)
                .bind(core.uploaded_date)
                .bind(core.deadline_height.map(|h| h as i64))
                .bind(&core.premium_feature_type)
                .bind(&core.payload_content_type)
                .bind(bundle_ids_to_json(&failed_bundles))
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_err("insert repacked new_data_item", e))?;
                outcome.repacked.push(id);
            }

            tx.commit()
                .await
                .map_err(|e| map_sqlx_err("commit update_data_items_to_be_repacked", e))?;
        }
        Ok(outcome)
    }

    async fn update_seeded_bundle_to_dropped(
        &self,
        plan_id: PlanId,
        bundle_id: BundleId,
        retry_limit: usize,
    ) -> Result<RepackOutcome> {
        let items = self.get_planned_data_items(plan_id).await?;
        let ids: Vec<DataItemId> = items.into_iter().map(|i| i.core.data_item_id).collect();
        let outcome = self
            .update_data_items_to_be_repacked(ids, bundle_id.clone(), retry_limit)
            .await?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_err("begin drop seeded_bundle", e))?;
        sqlx::query(
            r#"
            WITH moved AS (
                DELETE FROM seeded_bundle WHERE plan_id = $1 RETURNING *
            )
            INSERT INTO failed_bundle
                (bundle_id, plan_id, reward, header_byte_count, payload_byte_count,
                 transaction_byte_count, planned_date, signed_date, failed_reason, failed_date)
            SELECT bundle_id, plan_id, reward, header_byte_count, payload_byte_count,
                   transaction_byte_count, planned_date, signed_date, $2, now()
            FROM moved
            "#,
        )
        .bind(plan_id.0)
        .bind(failed_reason_to_str(FailedReason::NotFound))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_err("insert failed_bundle (dropped)", e))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_err("commit drop seeded_bundle", e))?;
        Ok(outcome)
    }

    async fn update_new_bundle_to_failed_to_post(
        &self,
        plan_id: PlanId,
        bundle_id: BundleId,
        retry_limit: usize,
    ) -> Result<RepackOutcome> {
        let items = self.get_planned_data_items(plan_id).await?;
        let ids: Vec<DataItemId> = items.into_iter().map(|i| i.core.data_item_id).collect();
        let outcome = self
            .update_data_items_to_be_repacked(ids, bundle_id.clone(), retry_limit)
            .await?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_err("begin fail new_bundle", e))?;
        sqlx::query(
            r#"
            WITH moved AS (
                DELETE FROM new_bundle WHERE plan_id = $1 RETURNING *
            )
            INSERT INTO failed_bundle
                (bundle_id, plan_id, reward, header_byte_count, payload_byte_count,
                 transaction_byte_count, planned_date, signed_date, failed_reason, failed_date)
            SELECT bundle_id, plan_id, reward, header_byte_count, payload_byte_count,
                   transaction_byte_count, planned_date, signed_date, $2, now()
            FROM moved
            "#,
        )
        .bind(plan_id.0)
        .bind(failed_reason_to_str(FailedReason::FailedToPost))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_err("insert failed_bundle (failed_to_post)", e))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_err("commit fail new_bundle", e))?;
        Ok(outcome)
    }

    async fn update_planned_data_item_as_failed(
        &self,
        data_item_id: DataItemId,
        failed_reason: FailedReason,
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_err("begin update_planned_data_item_as_failed", e))?;

        let row = sqlx::query(
            "SELECT * FROM planned_data_item WHERE data_item_id = $1 FOR UPDATE NOWAIT",
        )
        .bind(data_item_id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_err("lock planned_data_item", e))?
        .ok_or_else(|| PipelineError::NotFound(format!("planned_data_item {data_item_id}")))?;

        let core = row_to_core(&row)?;
        let failed_bundles: serde_json::Value = row
            .try_get("failed_bundles")
            .map_err(|e| map_sqlx_err("read failed_bundles", e))?;

        sqlx::query("DELETE FROM planned_data_item WHERE data_item_id = $1")
            .bind(data_item_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_err("delete planned_data_item", e))?;

        sqlx::query(
            r#"
            INSERT INTO failed_data_item
                (data_item_id, owner_address, byte_count, payload_data_start, signature_type,
                 signature, assessed_winston_price, uploaded_date, deadline_height,
                 premium_feature_type, payload_content_type, failed_bundles, failed_reason, failed_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, now())
            "#,
        )
        .bind(core.data_item_id.as_str())
        .bind(&core.owner_address)
        .bind(core.byte_count as i64)
        .bind(core.payload_data_start as i64)
        .bind(signature_type_to_str(core.signature_type))
        .bind(&core.signature)
        .bind(core.assessed_winston_price as i64)
        .bind(core.uploaded_date)
        .bind(core.deadline_height.map(|h| h as i64))
        .bind(&core.premium_feature_type)
        .bind(&core.payload_content_type)
        .bind(failed_bundles)
        .bind(failed_reason_to_str(failed_reason))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_err("insert failed_data_item", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_err("commit update_planned_data_item_as_failed", e))
    }

    async fn get_data_item_info(&self, data_item_id: DataItemId) -> Result<DataItemInfo> {
        if let Some(row) = sqlx::query(
            "SELECT assessed_winston_price, uploaded_date FROM new_data_item WHERE data_item_id = $1",
        )
        .bind(data_item_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_err("probe new_data_item", e))?
        {
            return Ok(DataItemInfo::New {
                assessed_winston_price: row
                    .try_get::<i64, _>("assessed_winston_price")
                    .map_err(|e| map_sqlx_err("read assessed_winston_price", e))? as u64,
                uploaded_date: row
                    .try_get("uploaded_date")
                    .map_err(|e| map_sqlx_err("read uploaded_date", e))?,
            });
        }

        if let Some(row) = sqlx::query(
            "SELECT assessed_winston_price, uploaded_date, plan_id FROM planned_data_item WHERE data_item_id = $1",
        )
        .bind(data_item_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_err("probe planned_data_item", e))?
        {
            return Ok(DataItemInfo::Planned {
                assessed_winston_price: row
                    .try_get::<i64, _>("assessed_winston_price")
                    .map_err(|e| map_sqlx_err("read assessed_winston_price", e))? as u64,
                uploaded_date: row
                    .try_get("uploaded_date")
                    .map_err(|e| map_sqlx_err("read uploaded_date", e))?,
                plan_id: PlanId(
                    row.try_get("plan_id")
                        .map_err(|e| map_sqlx_err("read plan_id", e))?,
                ),
            });
        }

        if let Some(row) = sqlx::query(
            "SELECT assessed_winston_price, uploaded_date, bundle_id, block_height, deadline_height FROM permanent_data_item WHERE data_item_id = $1",
        )
        .bind(data_item_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_err("probe permanent_data_item", e))?
        {
            let bundle_id: String = row.try_get("bundle_id").map_err(|e| map_sqlx_err("read bundle_id", e))?;
            return Ok(DataItemInfo::Permanent {
                assessed_winston_price: row
                    .try_get::<i64, _>("assessed_winston_price")
                    .map_err(|e| map_sqlx_err("read assessed_winston_price", e))? as u64,
                uploaded_date: row
                    .try_get("uploaded_date")
                    .map_err(|e| map_sqlx_err("read uploaded_date", e))?,
                bundle_id: BundleId::new(bundle_id)
                    .map_err(|e| PipelineError::Fatal(format!("invalid bundle_id: {e}")))?,
                block_height: row
                    .try_get::<i64, _>("block_height")
                    .map_err(|e| map_sqlx_err("read block_height", e))? as u64,
                deadline_height: row
                    .try_get::<Option<i64>, _>("deadline_height")
                    .map_err(|e| map_sqlx_err("read deadline_height", e))?
                    .map(|h| h as u64),
            });
        }

        if let Some(row) = sqlx::query(
            "SELECT assessed_winston_price, uploaded_date, failed_reason FROM failed_data_item WHERE data_item_id = $1",
        )
        .bind(data_item_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_err("probe failed_data_item", e))?
        {
            let reason: String = row
                .try_get("failed_reason")
                .map_err(|e| map_sqlx_err("read failed_reason", e))?;
            return Ok(DataItemInfo::Failed {
                assessed_winston_price: row
                    .try_get::<i64, _>("assessed_winston_price")
                    .map_err(|e| map_sqlx_err("read assessed_winston_price", e))? as u64,
                uploaded_date: row
                    .try_get("uploaded_date")
                    .map_err(|e| map_sqlx_err("read uploaded_date", e))?,
                failed_reason: failed_reason_from_str(&reason)?,
            });
        }

        Err(PipelineError::NotFound(format!("data item {data_item_id}")))
    }
}

async fn move_one_new_to_planned(
    tx: &mut Transaction<'_, Postgres>,
    id: &DataItemId,
    plan_id: PlanId,
) -> Result<bool> {
    let row = sqlx::query("SELECT * FROM new_data_item WHERE data_item_id = $1 FOR UPDATE NOWAIT")
        .bind(id.as_str())
        .fetch_optional(&mut **tx)
        .await;

    let row = match row {
        Ok(row) => row,
        Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some(LOCK_NOT_AVAILABLE) => return Ok(false),
        Err(e) => return Err(map_sqlx_err("lock new_data_item", e)),
    };

    let Some(row) = row else { return Ok(false) };

    let owner_address: String = row.try_get("owner_address").map_err(|e| map_sqlx_err("read owner_address", e))?;
    let byte_count: i64 = row.try_get("byte_count").map_err(|e| map_sqlx_err("read byte_count", e))?;
    let payload_data_start: i64 = row
        .try_get("payload_data_start")
        .map_err(|e| map_sqlx_err("read payload_data_start", e))?;
    let signature_type: String = row.try_get("signature_type").map_err(|e| map_sqlx_err("read signature_type", e))?;
    let signature: Vec<u8> = row.try_get("signature").map_err(|e| map_sqlx_err("read signature", e))?;
    let assessed_winston_price: i64 = row
        .try_get("assessed_winston_price")
        .map_err(|e| map_sqlx_err("read assessed_winston_price", e))?;
    let uploaded_date: DateTime<Utc> = row.try_get("uploaded_date").map_err(|e| map_sqlx_err("read uploaded_date", e))?;
    let deadline_height: Option<i64> = row
        .try_get("deadline_height")
        .map_err(|e| map_sqlx_err("read deadline_height", e))?;
    let premium_feature_type: Option<String> = row
        .try_get("premium_feature_type")
        .map_err(|e| map_sqlx_err("read premium_feature_type", e))?;
    let payload_content_type: Option<String> = row
        .try_get("payload_content_type")
        .map_err(|e| map_sqlx_err("read payload_content_type", e))?;
    let failed_bundles: serde_json::Value = row
        .try_get("failed_bundles")
        .map_err(|e| map_sqlx_err("read failed_bundles", e))?;

    sqlx::query("DELETE FROM new_data_item WHERE data_item_id = $1")
        .bind(id.as_str())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_err("delete new_data_item", e))?;

    sqlx::query(
        r#"
        INSERT INTO planned_data_item
            (data_item_id, owner_address, byte_count, payload_data_start, signature_type,
             signature, assessed_winston_price, uploaded_date, deadline_height,
             premium_feature_type, payload_content_type, failed_bundles, plan_id, planned_date)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, now())
        "#,
    )
    .bind(id.as_str())
    .bind(owner_address)
    .bind(byte_count)
    .bind(payload_data_start)
    .bind(signature_type)
    .bind(signature)
    .bind(assessed_winston_price)
    .bind(uploaded_date)
    .bind(deadline_height)
    .bind(premium_feature_type)
    .bind(payload_content_type)
    .bind(failed_bundles)
    .bind(plan_id.0)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_err("insert planned_data_item", e))?;

    Ok(true)
}

async fn move_bundle(
    pool: &Pool<Postgres>,
    from_table: &str,
    _to_table: &str,
    bundle_id: &BundleId,
    insert_sql: &str,
) -> Result<()> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| map_sqlx_err("begin move_bundle", e))?;

    let exists: bool = sqlx::query_scalar(&format!(
        "SELECT EXISTS(SELECT 1 FROM {from_table} WHERE bundle_id = $1 FOR UPDATE NOWAIT)"
    ))
    .bind(bundle_id.as_str())
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| map_sqlx_err("lock bundle row", e))?;

    if !exists {
        return Err(PipelineError::NotFound(format!("{from_table} row for bundle {bundle_id}")));
    }

    tx.execute(sqlx::query(insert_sql).bind(bundle_id.as_str()))
        .await
        .map_err(|e| map_sqlx_err("insert moved bundle row", e))?;

    sqlx::query(&format!("DELETE FROM {from_table} WHERE bundle_id = $1"))
        .bind(bundle_id.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_err("delete source bundle row", e))?;

    tx.commit()
        .await
        .map_err(|e| map_sqlx_err("commit move_bundle", e))
}

fn row_to_new_data_item(row: sqlx::postgres::PgRow) -> Result<NewDataItem> {
    Ok(NewDataItem {
        core: row_to_core(&row)?,
        failed_bundles: bundle_ids_from_json(
            row.try_get("failed_bundles")
                .map_err(|e| map_sqlx_err("read failed_bundles", e))?,
        )?,
    })
}

fn row_to_planned_data_item(row: sqlx::postgres::PgRow) -> Result<PlannedDataItem> {
    Ok(PlannedDataItem {
        core: row_to_core(&row)?,
        failed_bundles: bundle_ids_from_json(
            row.try_get("failed_bundles")
                .map_err(|e| map_sqlx_err("read failed_bundles", e))?,
        )?,
        plan_id: PlanId(
            row.try_get("plan_id")
                .map_err(|e| map_sqlx_err("read plan_id", e))?,
        ),
        planned_date: row
            .try_get("planned_date")
            .map_err(|e| map_sqlx_err("read planned_date", e))?,
    })
}

fn row_to_core(row: &sqlx::postgres::PgRow) -> Result<bf_types::DataItemCore> {
    let signature_type: String = row
        .try_get("signature_type")
        .map_err(|e| map_sqlx_err("read signature_type", e))?;
    Ok(bf_types::DataItemCore {
        data_item_id: DataItemId::new(
            row.try_get::<String, _>("data_item_id")
                .map_err(|e| map_sqlx_err("read data_item_id", e))?,
        )
        .map_err(|e| PipelineError::Fatal(format!("invalid data_item_id: {e}")))?,
        owner_address: row
            .try_get("owner_address")
            .map_err(|e| map_sqlx_err("read owner_address", e))?,
        byte_count: row.try_get::<i64, _>("byte_count").map_err(|e| map_sqlx_err("read byte_count", e))? as u64,
        payload_data_start: row
            .try_get::<i64, _>("payload_data_start")
            .map_err(|e| map_sqlx_err("read payload_data_start", e))? as u64,
        signature_type: signature_type_from_str(&signature_type)?,
        signature: row.try_get("signature").map_err(|e| map_sqlx_err("read signature", e))?,
        assessed_winston_price: row
            .try_get::<i64, _>("assessed_winston_price")
            .map_err(|e| map_sqlx_err("read assessed_winston_price", e))? as u64,
        uploaded_date: row
            .try_get("uploaded_date")
            .map_err(|e| map_sqlx_err("read uploaded_date", e))?,
        deadline_height: row
            .try_get::<Option<i64>, _>("deadline_height")
            .map_err(|e| map_sqlx_err("read deadline_height", e))?
            .map(|h| h as u64),
        premium_feature_type: row
            .try_get("premium_feature_type")
            .map_err(|e| map_sqlx_err("read premium_feature_type", e))?,
        payload_content_type: row
            .try_get("payload_content_type")
            .map_err(|e| map_sqlx_err("read payload_content_type", e))?,
    })
}

fn row_to_seeded_bundle(row: sqlx::postgres::PgRow) -> Result<SeededBundle> {
    Ok(SeededBundle {
        core: row_to_bundle_core(&row)?,
        posted_date: row.try_get("posted_date").map_err(|e| map_sqlx_err("read posted_date", e))?,
        usd_to_ar_rate: row
            .try_get("usd_to_ar_rate")
            .map_err(|e| map_sqlx_err("read usd_to_ar_rate", e))?,
        seeded_date: row.try_get("seeded_date").map_err(|e| map_sqlx_err("read seeded_date", e))?,
    })
}

fn row_to_bundle_core(row: &sqlx::postgres::PgRow) -> Result<bf_types::BundleCore> {
    Ok(bf_types::BundleCore {
        bundle_id: BundleId::new(
            row.try_get::<String, _>("bundle_id")
                .map_err(|e| map_sqlx_err("read bundle_id", e))?,
        )
        .map_err(|e| PipelineError::Fatal(format!("invalid bundle_id: {e}")))?,
        plan_id: PlanId(row.try_get("plan_id").map_err(|e| map_sqlx_err("read plan_id", e))?),
        reward: row.try_get::<i64, _>("reward").map_err(|e| map_sqlx_err("read reward", e))? as u64,
        header_byte_count: row
            .try_get::<i64, _>("header_byte_count")
            .map_err(|e| map_sqlx_err("read header_byte_count", e))? as u64,
        payload_byte_count: row
            .try_get::<i64, _>("payload_byte_count")
            .map_err(|e| map_sqlx_err("read payload_byte_count", e))? as u64,
        transaction_byte_count: row
            .try_get::<i64, _>("transaction_byte_count")
            .map_err(|e| map_sqlx_err("read transaction_byte_count", e))? as u64,
        planned_date: row
            .try_get("planned_date")
            .map_err(|e| map_sqlx_err("read planned_date", e))?,
        signed_date: row.try_get("signed_date").map_err(|e| map_sqlx_err("read signed_date", e))?,
    })
}
