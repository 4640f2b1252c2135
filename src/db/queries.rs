use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use crate::db::store::StoreError;
use crate::models::job::{JobError, JobRecord, JobStatus};
use crate::models::npc::{NpcEntity, NpcStat};

const NPC_COLUMNS: &str = r#"
    id, owner_id, name, appearance, stats, dialogue, modules,
    generation_job_id, generation_job_status, generation_job_started_at, generation_job_error,
    archived_at, created_at, updated_at
"#;

/// Fields for inserting an NPC (seeding and tests; entity CRUD lives elsewhere).
#[derive(Debug, Clone)]
pub struct NewNpc {
    pub owner_id: String,
    pub name: String,
    pub appearance: Option<String>,
    pub stats: Vec<NpcStat>,
    pub dialogue: Vec<String>,
    pub modules: Vec<String>,
}

fn parse_status(value: Option<String>) -> Result<Option<JobStatus>, StoreError> {
    value
        .map(|s| {
            JobStatus::from_str(&s)
                .map_err(|_| StoreError::Corrupt(format!("unknown job status '{s}'")))
        })
        .transpose()
}

fn npc_from_row(row: &PgRow) -> Result<NpcEntity, StoreError> {
    let status: Option<String> = row.try_get("generation_job_status")?;
    let error: Option<Json<JobError>> = row.try_get("generation_job_error")?;
    let stats: Json<Vec<NpcStat>> = row.try_get("stats")?;
    let dialogue: Json<Vec<String>> = row.try_get("dialogue")?;
    let modules: Json<Vec<String>> = row.try_get("modules")?;

    Ok(NpcEntity {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        name: row.try_get("name")?,
        appearance: row.try_get("appearance")?,
        stats: stats.0,
        dialogue: dialogue.0,
        modules: modules.0,
        job: JobRecord {
            job_id: row.try_get("generation_job_id")?,
            status: parse_status(status)?,
            started_at: row.try_get("generation_job_started_at")?,
            error: error.map(|e| e.0),
        },
        archived_at: row.try_get("archived_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Insert a new NPC with an empty job record
pub async fn insert_npc(pool: &PgPool, npc: &NewNpc) -> Result<NpcEntity, StoreError> {
    let sql = format!(
        r#"
        INSERT INTO npcs (owner_id, name, appearance, stats, dialogue, modules)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {NPC_COLUMNS}
        "#
    );
    let row = sqlx::query(&sql)
        .bind(&npc.owner_id)
        .bind(&npc.name)
        .bind(&npc.appearance)
        .bind(Json(&npc.stats))
        .bind(Json(&npc.dialogue))
        .bind(Json(&npc.modules))
        .fetch_one(pool)
        .await?;

    npc_from_row(&row)
}

/// Get an NPC by ID, archived or not
pub async fn get_npc(pool: &PgPool, entity_id: Uuid) -> Result<Option<NpcEntity>, StoreError> {
    let sql = format!("SELECT {NPC_COLUMNS} FROM npcs WHERE id = $1");
    let row = sqlx::query(&sql)
        .bind(entity_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(npc_from_row).transpose()
}

/// Job status of an NPC visible to `owner_id`.
///
/// Outer `None`: not visible. Inner `None`: never generated.
pub async fn get_visible_job_status(
    pool: &PgPool,
    entity_id: Uuid,
    owner_id: &str,
) -> Result<Option<Option<JobStatus>>, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT generation_job_status
        FROM npcs
        WHERE id = $1 AND owner_id = $2 AND archived_at IS NULL
        "#,
    )
    .bind(entity_id)
    .bind(owner_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(r) => Ok(Some(parse_status(r.try_get("generation_job_status")?)?)),
        None => Ok(None),
    }
}

/// Queue a new job if no job is active (and, unless regenerating, none has run).
///
/// Returns the submission time, or `None` if the guard refused the write.
pub async fn queue_job(
    pool: &PgPool,
    entity_id: Uuid,
    owner_id: &str,
    regenerate: bool,
    job_id: Uuid,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    let row = sqlx::query(
        r#"
        UPDATE npcs
        SET generation_job_id = $3,
            generation_job_status = 'queued',
            generation_job_started_at = NULL,
            generation_job_error = NULL,
            updated_at = NOW()
        WHERE id = $1
          AND owner_id = $2
          AND archived_at IS NULL
          AND (
              generation_job_status IS NULL
              OR ($4 AND generation_job_status IN ('succeeded', 'failed'))
          )
        RETURNING updated_at
        "#,
    )
    .bind(entity_id)
    .bind(owner_id)
    .bind(job_id)
    .bind(regenerate)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(r) => Ok(Some(r.try_get("updated_at")?)),
        None => Ok(None),
    }
}

/// Transition a queued job to processing
pub async fn mark_job_processing(
    pool: &PgPool,
    entity_id: Uuid,
    job_id: Uuid,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE npcs
        SET generation_job_status = 'processing',
            generation_job_started_at = NOW(),
            generation_job_error = NULL,
            updated_at = NOW()
        WHERE id = $1
          AND generation_job_id = $2
          AND generation_job_status = 'queued'
        "#,
    )
    .bind(entity_id)
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Transition a processing job to succeeded
pub async fn mark_job_succeeded(
    pool: &PgPool,
    entity_id: Uuid,
    job_id: Uuid,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE npcs
        SET generation_job_status = 'succeeded',
            generation_job_error = NULL,
            updated_at = NOW()
        WHERE id = $1
          AND generation_job_id = $2
          AND generation_job_status = 'processing'
        "#,
    )
    .bind(entity_id)
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Transition an active job to failed with a structured error
pub async fn mark_job_failed(
    pool: &PgPool,
    entity_id: Uuid,
    job_id: Uuid,
    error: &JobError,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE npcs
        SET generation_job_status = 'failed',
            generation_job_error = $3,
            updated_at = NOW()
        WHERE id = $1
          AND generation_job_id = $2
          AND generation_job_status IN ('queued', 'processing')
        "#,
    )
    .bind(entity_id)
    .bind(job_id)
    .bind(Json(error))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Jobs stuck in processing since before `started_before` (for the stall sweep)
pub async fn get_stalled_jobs(
    pool: &PgPool,
    started_before: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<(Uuid, Uuid)>, StoreError> {
    let rows = sqlx::query(
        r#"
        SELECT id, generation_job_id
        FROM npcs
        WHERE generation_job_status = 'processing'
          AND generation_job_started_at < $1
        ORDER BY generation_job_started_at ASC
        LIMIT $2
        "#,
    )
    .bind(started_before)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|r| -> Result<(Uuid, Uuid), StoreError> {
            Ok((r.try_get("id")?, r.try_get("generation_job_id")?))
        })
        .collect()
}
