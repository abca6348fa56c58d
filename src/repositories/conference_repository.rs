use diesel::dsl::sql;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sql_types::BigInt;
use diesel::upsert::excluded;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    models::conference_models::{
        Conference, ConferenceChanges, ConferenceChangeset, ConferenceInsert, ConferenceRow,
        ConferenceType, NewConference,
    },
    schema::conferences,
    utils::time::now_millis,
    DbPool,
};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Failed to get DB connection: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("Database error: {0}")]
    Database(DieselError),
    #[error("Failed to encode cohosts: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("Upsert requires an id")]
    MissingId,
}

impl From<DieselError> for RepositoryError {
    fn from(e: DieselError) -> Self {
        match e {
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info)
            | DieselError::DatabaseError(DatabaseErrorKind::CheckViolation, info) => {
                RepositoryError::ConstraintViolation(info.message().to_string())
            }
            other => RepositoryError::Database(other),
        }
    }
}

/// Local conference store. Every method is a single statement or a single
/// immediate transaction, so each call is atomic on its own.
pub struct ConferenceRepository {
    pool: DbPool,
    join_base: String,
}

impl ConferenceRepository {
    /// `join_base` is the public Telemost host used to synthesize links,
    /// e.g. `https://telemost.yandex.ru`.
    pub fn new(pool: DbPool, join_base: impl Into<String>) -> Self {
        Self {
            pool,
            join_base: join_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn join_link(&self, id: i64) -> String {
        format!("{}/j/{}", self.join_base, id)
    }

    /// Inserts a conference and returns its id. A missing id comes from the
    /// table's autoincrement; a missing link is derived from that id inside
    /// the same transaction.
    pub fn insert(&self, conference: NewConference) -> Result<i64, RepositoryError> {
        let record = to_insert(&conference, now_millis())?;
        let mut conn = self.pool.get()?;

        conn.immediate_transaction(|conn| {
            diesel::insert_into(conferences::table)
                .values(&record)
                .execute(conn)?;

            let id = match conference.id {
                Some(id) => id,
                None => diesel::select(sql::<BigInt>("last_insert_rowid()")).get_result::<i64>(conn)?,
            };

            if conference.link.is_none() {
                diesel::update(conferences::table.find(id))
                    .set(conferences::link.eq(self.join_link(id)))
                    .execute(conn)?;
            }

            Ok(id)
        })
    }

    /// Insert-or-update keyed by id. On conflict every column except
    /// `created_at` is overwritten and `updated_at` moves strictly forward.
    pub fn upsert(&self, conference: NewConference) -> Result<i64, RepositoryError> {
        let id = conference.id.ok_or(RepositoryError::MissingId)?;
        let mut record = to_insert(&conference, now_millis())?;
        if conference.link.is_none() {
            record.link = self.join_link(id);
        }

        let mut conn = self.pool.get()?;
        diesel::insert_into(conferences::table)
            .values(&record)
            .on_conflict(conferences::id)
            .do_update()
            .set((
                conferences::name.eq(excluded(conferences::name)),
                conferences::conference_type.eq(excluded(conferences::conference_type)),
                conferences::description.eq(excluded(conferences::description)),
                conferences::start_date.eq(excluded(conferences::start_date)),
                conferences::start_time.eq(excluded(conferences::start_time)),
                conferences::cohosts.eq(excluded(conferences::cohosts)),
                conferences::create_calendar_event.eq(excluded(conferences::create_calendar_event)),
                conferences::invite_users.eq(excluded(conferences::invite_users)),
                conferences::live_stream_title.eq(excluded(conferences::live_stream_title)),
                conferences::live_stream_description.eq(excluded(conferences::live_stream_description)),
                conferences::owner_id.eq(excluded(conferences::owner_id)),
                conferences::owner_name.eq(excluded(conferences::owner_name)),
                conferences::link.eq(excluded(conferences::link)),
                conferences::status.eq(excluded(conferences::status)),
                // never behind the stored value, even when created_at lies in the future
                conferences::updated_at.eq(sql::<BigInt>(
                    "MAX(excluded.updated_at, conferences.updated_at + 1)",
                )),
            ))
            .execute(&mut conn)?;

        Ok(id)
    }

    pub fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Conference>, RepositoryError> {
        let mut conn = self.pool.get()?;

        let rows = conferences::table
            .filter(conferences::owner_id.eq(owner_id))
            .order((conferences::created_at.desc(), conferences::id.desc()))
            .select(ConferenceRow::as_select())
            .load(&mut conn)?;

        Ok(rows.into_iter().map(Conference::from).collect())
    }

    pub fn list_all(&self) -> Result<Vec<Conference>, RepositoryError> {
        let mut conn = self.pool.get()?;

        let rows = conferences::table
            .order((conferences::created_at.desc(), conferences::id.desc()))
            .select(ConferenceRow::as_select())
            .load(&mut conn)?;

        Ok(rows.into_iter().map(Conference::from).collect())
    }

    pub fn list_by_type(&self, conference_type: ConferenceType) -> Result<Vec<Conference>, RepositoryError> {
        let mut conn = self.pool.get()?;

        let rows = conferences::table
            .filter(conferences::conference_type.eq(conference_type.as_str()))
            .order((conferences::created_at.desc(), conferences::id.desc()))
            .select(ConferenceRow::as_select())
            .load(&mut conn)?;

        Ok(rows.into_iter().map(Conference::from).collect())
    }

    pub fn get_by_id(&self, id: i64) -> Result<Option<Conference>, RepositoryError> {
        let mut conn = self.pool.get()?;

        let row = conferences::table
            .find(id)
            .select(ConferenceRow::as_select())
            .first(&mut conn)
            .optional()?;

        Ok(row.map(Conference::from))
    }

    /// Applies the present fields of `changes`. Returns false when no row has
    /// this id. `updated_at` always moves forward, even within one millisecond.
    pub fn update(&self, id: i64, changes: &ConferenceChanges) -> Result<bool, RepositoryError> {
        let cohosts = changes.cohosts.as_ref().map(serde_json::to_string).transpose()?;
        let mut conn = self.pool.get()?;

        conn.immediate_transaction(|conn| {
            let previous = conferences::table
                .find(id)
                .select(conferences::updated_at)
                .first::<i64>(conn)
                .optional()?;

            let Some(previous) = previous else {
                return Ok(false);
            };

            let changeset = ConferenceChangeset {
                name: changes.name.clone(),
                conference_type: changes.conference_type.map(|t| t.as_str().to_string()),
                description: changes.description.clone(),
                start_date: changes.start_date.clone(),
                start_time: changes.start_time.clone(),
                cohosts: cohosts.clone(),
                create_calendar_event: changes.create_calendar_event,
                invite_users: changes.invite_users,
                live_stream_title: changes.live_stream_title.clone(),
                live_stream_description: changes.live_stream_description.clone(),
                owner_name: changes.owner_name.clone(),
                status: changes.status.clone(),
                link: changes.link.clone(),
                updated_at: now_millis().max(previous + 1),
            };

            let updated = diesel::update(conferences::table.find(id))
                .set(&changeset)
                .execute(conn)?;

            Ok(updated > 0)
        })
    }

    pub fn delete(&self, id: i64) -> Result<bool, RepositoryError> {
        let mut conn = self.pool.get()?;

        let deleted = diesel::delete(conferences::table.find(id)).execute(&mut conn)?;

        Ok(deleted > 0)
    }
}

fn to_insert(conference: &NewConference, now: i64) -> Result<ConferenceInsert, RepositoryError> {
    let created_at = conference
        .created_at
        .map(|dt| dt.timestamp_millis())
        .unwrap_or(now);

    Ok(ConferenceInsert {
        id: conference.id,
        name: conference.name.clone(),
        conference_type: conference.conference_type.as_str().to_string(),
        description: conference.description.clone(),
        start_date: conference.start_date.clone(),
        start_time: conference.start_time.clone(),
        cohosts: serde_json::to_string(&conference.cohosts)?,
        create_calendar_event: conference.create_calendar_event,
        invite_users: conference.invite_users,
        live_stream_title: conference.live_stream_title.clone(),
        live_stream_description: conference.live_stream_description.clone(),
        owner_id: conference.owner_id.clone(),
        owner_name: conference.owner_name.clone(),
        // unique placeholder, replaced with the id-derived link before commit
        link: conference
            .link
            .clone()
            .unwrap_or_else(|| format!("pending:{}", Uuid::new_v4())),
        status: conference.status.clone(),
        created_at,
        updated_at: now.max(created_at),
    })
}
