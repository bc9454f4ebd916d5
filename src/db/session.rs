//! Session and assignment persistence on Postgres.
//!
//! Group and session mutations lock their rows with `SELECT ... FOR UPDATE`
//! inside one transaction, apply the caller's closure, and write every row
//! back with a single `UPDATE ... FROM UNNEST(...)`. Two concurrent claims on
//! one group serialize on the row locks; the second sees the first's commit.

use async_trait::async_trait;
use sqlx::PgConnection;
use uuid::Uuid;

use super::Db;
use crate::error::{Error, Result};
use crate::model::{
    Assignment, AssignmentId, GroupKey, ResourceId, Session, SessionCode, SessionInfo,
};
use crate::store::Store;

const SESSION_COLUMNS: &str = "code, creator_id, participant_count, description, created_at";

const ASSIGNMENT_COLUMNS: &str = "id, session_code, resource_id, participant_index, seq, \
     start_unit, end_unit, progress, claimed_by, claimed, completed";

#[async_trait]
impl Store for Db {
    async fn insert_session(&self, session: &Session) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        let info = &session.info;

        sqlx::query(
            "INSERT INTO sessions (code, creator_id, participant_count, description, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(info.code.as_str())
        .bind(&info.creator_id)
        .bind(i64::from(info.participant_count))
        .bind(&info.description)
        .bind(info.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                Error::Conflict(format!("session code {} already exists", info.code))
            }
            other => Error::Database(other),
        })?;

        insert_assignments_on(&mut tx, &session.assignments).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_session(&self, code: &SessionCode) -> Result<Session> {
        let mut conn = self.pool().acquire().await?;
        let info = fetch_session_on(&mut conn, code, false).await?;
        let assignments = fetch_session_assignments_on(&mut conn, code, false).await?;
        Ok(Session { info, assignments })
    }

    async fn append_assignments<F>(&self, code: &SessionCode, build: F) -> Result<Vec<Assignment>>
    where
        F: FnOnce(&Session) -> Result<Vec<Assignment>> + Send,
    {
        let mut tx = self.pool().begin().await?;
        // Locking the session row serializes concurrent additions.
        let info = fetch_session_on(&mut tx, code, true).await?;
        let assignments = fetch_session_assignments_on(&mut tx, code, false).await?;
        let session = Session { info, assignments };

        let new = build(&session)?;
        insert_assignments_on(&mut tx, &new).await?;
        tx.commit().await?;
        Ok(new)
    }

    async fn get_assignment(&self, id: AssignmentId) -> Result<Assignment> {
        let sql = format!("SELECT {ASSIGNMENT_COLUMNS} FROM assignments WHERE id = $1");
        let row: Option<AssignmentRow> = sqlx::query_as(&sql)
            .bind(id.0)
            .fetch_optional(self.pool())
            .await?;
        row.ok_or_else(|| Error::NotFound(format!("assignment {id}")))?
            .try_into_assignment()
    }

    async fn update_group<F, T>(&self, key: &GroupKey, f: F) -> Result<(Vec<Assignment>, T)>
    where
        F: FnOnce(&mut [Assignment]) -> Result<T> + Send,
        T: Send,
    {
        let mut tx = self.pool().begin().await?;

        let sql = format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM assignments
             WHERE session_code = $1 AND resource_id = $2 AND participant_index = $3
             ORDER BY seq
             FOR UPDATE"
        );
        let rows: Vec<AssignmentRow> = sqlx::query_as(&sql)
            .bind(key.session.as_str())
            .bind(key.resource.0)
            .bind(i64::from(key.participant))
            .fetch_all(&mut *tx)
            .await?;
        if rows.is_empty() {
            return Err(Error::NotFound(format!("assignment group {key}")));
        }

        let mut group = rows
            .into_iter()
            .map(AssignmentRow::try_into_assignment)
            .collect::<Result<Vec<_>>>()?;
        let out = f(&mut group)?;

        write_back_on(&mut tx, &group).await?;
        tx.commit().await?;
        Ok((group, out))
    }

    async fn update_session<F, T>(&self, code: &SessionCode, f: F) -> Result<T>
    where
        F: FnOnce(&SessionInfo, &mut [Assignment]) -> Result<T> + Send,
        T: Send,
    {
        let mut tx = self.pool().begin().await?;
        let info = fetch_session_on(&mut tx, code, true).await?;
        let mut rows = fetch_session_assignments_on(&mut tx, code, true).await?;

        let out = f(&info, &mut rows)?;

        write_back_on(&mut tx, &rows).await?;
        tx.commit().await?;
        Ok(out)
    }

    async fn delete_session<F>(&self, code: &SessionCode, authorize: F) -> Result<()>
    where
        F: FnOnce(&SessionInfo) -> Result<()> + Send,
    {
        let mut tx = self.pool().begin().await?;
        let info = fetch_session_on(&mut tx, code, true).await?;
        authorize(&info)?;

        // Assignments go with it (ON DELETE CASCADE).
        sqlx::query("DELETE FROM sessions WHERE code = $1")
            .bind(code.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_created_by(&self, creator: &str) -> Result<Vec<SessionInfo>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE creator_id = $1
             ORDER BY created_at DESC"
        );
        let rows: Vec<SessionRow> = sqlx::query_as(&sql)
            .bind(creator)
            .fetch_all(self.pool())
            .await?;
        rows.into_iter().map(SessionRow::try_into_info).collect()
    }

    async fn list_joined_by(&self, participant: &str) -> Result<Vec<SessionInfo>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions s
             WHERE EXISTS (
                 SELECT 1 FROM assignments a
                 WHERE a.session_code = s.code AND a.claimed AND a.claimed_by = $1
             )
             ORDER BY created_at DESC"
        );
        let rows: Vec<SessionRow> = sqlx::query_as(&sql)
            .bind(participant)
            .fetch_all(self.pool())
            .await?;
        rows.into_iter().map(SessionRow::try_into_info).collect()
    }
}

// ---------------------------------------------------------------------------
// Inner functions: accept &mut PgConnection so they run on a pooled
// connection or inside a transaction alike.
// ---------------------------------------------------------------------------

async fn fetch_session_on(
    conn: &mut PgConnection,
    code: &SessionCode,
    lock: bool,
) -> Result<SessionInfo> {
    let sql = format!(
        "SELECT {SESSION_COLUMNS} FROM sessions WHERE code = $1{}",
        if lock { " FOR UPDATE" } else { "" }
    );
    let row: Option<SessionRow> = sqlx::query_as(&sql)
        .bind(code.as_str())
        .fetch_optional(&mut *conn)
        .await?;
    row.ok_or_else(|| Error::NotFound(format!("session {code}")))?
        .try_into_info()
}

async fn fetch_session_assignments_on(
    conn: &mut PgConnection,
    code: &SessionCode,
    lock: bool,
) -> Result<Vec<Assignment>> {
    let sql = format!(
        "SELECT {ASSIGNMENT_COLUMNS} FROM assignments WHERE session_code = $1 ORDER BY seq{}",
        if lock { " FOR UPDATE" } else { "" }
    );
    let rows: Vec<AssignmentRow> = sqlx::query_as(&sql)
        .bind(code.as_str())
        .fetch_all(&mut *conn)
        .await?;
    rows.into_iter()
        .map(AssignmentRow::try_into_assignment)
        .collect()
}

async fn insert_assignments_on(conn: &mut PgConnection, rows: &[Assignment]) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }

    let ids: Vec<Uuid> = rows.iter().map(|a| a.id.0).collect();
    let codes: Vec<String> = rows.iter().map(|a| a.session_code.0.clone()).collect();
    let resources: Vec<i64> = rows.iter().map(|a| a.resource_id.0).collect();
    let participants: Vec<i64> = rows.iter().map(|a| i64::from(a.participant_index)).collect();
    let seqs: Vec<i64> = rows.iter().map(|a| i64::from(a.seq)).collect();
    let starts: Vec<i64> = rows.iter().map(|a| i64::from(a.start_unit)).collect();
    let ends: Vec<i64> = rows.iter().map(|a| i64::from(a.end_unit)).collect();
    let progress: Vec<Option<i64>> = rows.iter().map(|a| a.progress.map(i64::from)).collect();
    let claimed_by: Vec<Option<String>> = rows.iter().map(|a| a.claimed_by.clone()).collect();
    let claimed: Vec<bool> = rows.iter().map(|a| a.claimed).collect();
    let completed: Vec<bool> = rows.iter().map(|a| a.completed).collect();

    sqlx::query(
        "INSERT INTO assignments (id, session_code, resource_id, participant_index, seq,
                                  start_unit, end_unit, progress, claimed_by, claimed, completed)
         SELECT * FROM UNNEST($1::uuid[], $2::text[], $3::bigint[], $4::bigint[], $5::bigint[],
                              $6::bigint[], $7::bigint[], $8::bigint[], $9::text[], $10::bool[], $11::bool[])",
    )
    .bind(ids)
    .bind(codes)
    .bind(resources)
    .bind(participants)
    .bind(seqs)
    .bind(starts)
    .bind(ends)
    .bind(progress)
    .bind(claimed_by)
    .bind(claimed)
    .bind(completed)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Write the mutable columns of `rows` back in one statement.
async fn write_back_on(conn: &mut PgConnection, rows: &[Assignment]) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }

    let ids: Vec<Uuid> = rows.iter().map(|a| a.id.0).collect();
    let progress: Vec<Option<i64>> = rows.iter().map(|a| a.progress.map(i64::from)).collect();
    let claimed_by: Vec<Option<String>> = rows.iter().map(|a| a.claimed_by.clone()).collect();
    let claimed: Vec<bool> = rows.iter().map(|a| a.claimed).collect();
    let completed: Vec<bool> = rows.iter().map(|a| a.completed).collect();

    let updated = sqlx::query(
        "UPDATE assignments AS a
         SET progress = u.progress, claimed_by = u.claimed_by,
             claimed = u.claimed, completed = u.completed
         FROM UNNEST($1::uuid[], $2::bigint[], $3::text[], $4::bool[], $5::bool[])
              AS u(id, progress, claimed_by, claimed, completed)
         WHERE a.id = u.id",
    )
    .bind(ids)
    .bind(progress)
    .bind(claimed_by)
    .bind(claimed)
    .bind(completed)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if updated != rows.len() as u64 {
        return Err(Error::Other(format!(
            "wrote {updated} of {} assignment rows",
            rows.len()
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

fn column_u32(value: i64, column: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::Other(format!("column {column} out of range: {value}")))
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    code: String,
    creator_id: String,
    participant_count: i64,
    description: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl SessionRow {
    fn try_into_info(self) -> Result<SessionInfo> {
        Ok(SessionInfo {
            code: SessionCode(self.code),
            creator_id: self.creator_id,
            participant_count: column_u32(self.participant_count, "participant_count")?,
            description: self.description,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AssignmentRow {
    id: Uuid,
    session_code: String,
    resource_id: i64,
    participant_index: i64,
    seq: i64,
    start_unit: i64,
    end_unit: i64,
    progress: Option<i64>,
    claimed_by: Option<String>,
    claimed: bool,
    completed: bool,
}

impl AssignmentRow {
    fn try_into_assignment(self) -> Result<Assignment> {
        Ok(Assignment {
            id: AssignmentId(self.id),
            session_code: SessionCode(self.session_code),
            resource_id: ResourceId(self.resource_id),
            participant_index: column_u32(self.participant_index, "participant_index")?,
            seq: column_u32(self.seq, "seq")?,
            start_unit: column_u32(self.start_unit, "start_unit")?,
            end_unit: column_u32(self.end_unit, "end_unit")?,
            progress: self
                .progress
                .map(|p| column_u32(p, "progress"))
                .transpose()?,
            claimed_by: self.claimed_by,
            claimed: self.claimed,
            completed: self.completed,
        })
    }
}
