use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError, OptionalExtension};
use diesel_async::pooled_connection::deadpool::PoolError;

use super::{MessageStore, StoreError};
use crate::db::pool::DbPool;
use crate::db::schema::messages;
use crate::models::message::Message;

/// PostgreSQL-backed message store.
pub struct PgMessageStore {
    db: DbPool,
}

impl PgMessageStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

impl From<PoolError> for StoreError {
    fn from(err: PoolError) -> Self {
        tracing::error!(?err, "pool error");
        StoreError::Unavailable(err.to_string())
    }
}

impl From<DieselError> for StoreError {
    fn from(err: DieselError) -> Self {
        tracing::error!(?err, "database error");
        let connection_lost = matches!(
            err,
            DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, _)
                | DieselError::BrokenTransactionManager
        );
        if connection_lost {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::Query(err.to_string())
        }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn save(&self, message: &Message) -> Result<(), StoreError> {
        let mut conn = self.db.get().await?;

        diesel_async::RunQueryDsl::execute(
            diesel::insert_into(messages::table).values(message),
            &mut conn,
        )
        .await?;

        Ok(())
    }

    async fn query_room_history(
        &self,
        room: &str,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let mut conn = self.db.get().await?;
        let limit = limit as i64;

        if let Some(since) = since {
            // Fetch messages after the cursor, ascending.
            let rows: Vec<Message> = diesel_async::RunQueryDsl::load(
                messages::table
                    .filter(messages::room.eq(room))
                    .filter(messages::created_at.gt(since))
                    .order((messages::created_at.asc(), messages::id.asc()))
                    .limit(limit)
                    .select(Message::as_select()),
                &mut conn,
            )
            .await?;
            return Ok(rows);
        }

        // Latest messages, returned in chronological order.
        let mut rows: Vec<Message> = diesel_async::RunQueryDsl::load(
            messages::table
                .filter(messages::room.eq(room))
                .order((messages::created_at.desc(), messages::id.desc()))
                .limit(limit)
                .select(Message::as_select()),
            &mut conn,
        )
        .await?;
        rows.reverse();

        Ok(rows)
    }

    async fn get(&self, id: i64) -> Result<Option<Message>, StoreError> {
        let mut conn = self.db.get().await?;

        let message = diesel_async::RunQueryDsl::get_result(
            messages::table.find(id).select(Message::as_select()),
            &mut conn,
        )
        .await
        .optional()?;

        Ok(message)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.db.get().await?;
        diesel_async::RunQueryDsl::execute(diesel::sql_query("SELECT 1"), &mut conn).await?;
        Ok(())
    }
}
