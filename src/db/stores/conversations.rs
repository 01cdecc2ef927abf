use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;

use super::{from_naive, parse_column, ConversationStore};
use crate::db::models::{Conversation, NewConversation, SentimentLabel};
use crate::db::schema::conversations;
use crate::db::{DatabaseError, DbPool};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = conversations)]
struct DbConversation {
    id: i64,
    hotel_id: i64,
    guest_id: i64,
    message_id: Option<String>,
    direction: String,
    content: String,
    sentiment_score: Option<f64>,
    sentiment_label: Option<String>,
    requires_attention: bool,
    created_at: NaiveDateTime,
}

impl TryFrom<DbConversation> for Conversation {
    type Error = DatabaseError;

    fn try_from(value: DbConversation) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.id,
            hotel_id: value.hotel_id,
            guest_id: value.guest_id,
            message_id: value.message_id,
            direction: parse_column(&value.direction)?,
            content: value.content,
            sentiment_score: value.sentiment_score,
            sentiment_label: value
                .sentiment_label
                .as_deref()
                .map(parse_column)
                .transpose()?,
            requires_attention: value.requires_attention,
            created_at: from_naive(value.created_at),
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = conversations)]
struct InsertConversation<'a> {
    hotel_id: i64,
    guest_id: i64,
    message_id: Option<&'a str>,
    direction: &'a str,
    content: &'a str,
    requires_attention: bool,
    created_at: NaiveDateTime,
}

pub struct SqlConversationStore {
    pool: DbPool,
}

impl SqlConversationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationStore for SqlConversationStore {
    async fn record_message(
        &self,
        hotel_id: i64,
        message: &NewConversation,
    ) -> Result<Conversation, DatabaseError> {
        let message = message.clone();
        let now = Utc::now().naive_utc();
        with_connection!(self.pool, |conn| {
            let row = diesel::insert_into(conversations::table)
                .values(&InsertConversation {
                    hotel_id,
                    guest_id: message.guest_id,
                    message_id: message.message_id.as_deref(),
                    direction: message.direction.as_str(),
                    content: &message.content,
                    requires_attention: false,
                    created_at: now,
                })
                .returning(DbConversation::as_returning())
                .get_result::<DbConversation>(conn)?;
            Conversation::try_from(row)
        })
    }

    async fn message_exists(&self, message_id: &str) -> Result<bool, DatabaseError> {
        let message_id = message_id.to_string();
        with_connection!(self.pool, |conn| {
            let count: i64 = conversations::table
                .filter(conversations::message_id.eq(&message_id))
                .count()
                .get_result(conn)?;
            Ok(count > 0)
        })
    }

    async fn update_sentiment(
        &self,
        hotel_id: i64,
        conversation_id: i64,
        score: f64,
        label: SentimentLabel,
        requires_attention: bool,
    ) -> Result<Option<Conversation>, DatabaseError> {
        with_connection!(self.pool, |conn| {
            diesel::update(
                conversations::table
                    .filter(conversations::hotel_id.eq(hotel_id))
                    .filter(conversations::id.eq(conversation_id)),
            )
            .set((
                conversations::sentiment_score.eq(Some(score)),
                conversations::sentiment_label.eq(Some(label.as_str())),
                conversations::requires_attention.eq(requires_attention),
            ))
            .returning(DbConversation::as_returning())
            .get_result::<DbConversation>(conn)
            .optional()?
            .map(Conversation::try_from)
            .transpose()
        })
    }

    async fn list_for_guest(
        &self,
        hotel_id: i64,
        guest_id: i64,
        limit: i64,
    ) -> Result<Vec<Conversation>, DatabaseError> {
        with_connection!(self.pool, |conn| {
            conversations::table
                .filter(conversations::hotel_id.eq(hotel_id))
                .filter(conversations::guest_id.eq(guest_id))
                .order((conversations::created_at.desc(), conversations::id.desc()))
                .limit(limit)
                .select(DbConversation::as_select())
                .load::<DbConversation>(conn)?
                .into_iter()
                .map(Conversation::try_from)
                .collect()
        })
    }

    async fn list_requiring_attention(
        &self,
        hotel_id: i64,
        limit: i64,
    ) -> Result<Vec<Conversation>, DatabaseError> {
        with_connection!(self.pool, |conn| {
            conversations::table
                .filter(conversations::hotel_id.eq(hotel_id))
                .filter(conversations::requires_attention.eq(true))
                .order(conversations::id.desc())
                .limit(limit)
                .select(DbConversation::as_select())
                .load::<DbConversation>(conn)?
                .into_iter()
                .map(Conversation::try_from)
                .collect()
        })
    }
}
