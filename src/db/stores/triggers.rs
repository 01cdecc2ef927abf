use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;

use super::{from_naive, json_to_text, parse_column, text_to_json, TriggerStore};
use crate::db::models::{NewTrigger, Trigger, TriggerType, TriggerUpdate};
use crate::db::schema::{trigger_executions, triggers};
use crate::db::{DatabaseError, DbPool};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = triggers)]
struct DbTrigger {
    id: i64,
    hotel_id: i64,
    name: String,
    trigger_type: String,
    conditions: String,
    message_template: String,
    is_active: bool,
    priority: i32,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

impl TryFrom<DbTrigger> for Trigger {
    type Error = DatabaseError;

    fn try_from(value: DbTrigger) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.id,
            hotel_id: value.hotel_id,
            name: value.name,
            trigger_type: parse_column(&value.trigger_type)?,
            conditions: text_to_json(&value.conditions)?,
            message_template: value.message_template,
            is_active: value.is_active,
            priority: value.priority,
            created_at: from_naive(value.created_at),
            updated_at: from_naive(value.updated_at),
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = triggers)]
struct InsertTrigger<'a> {
    hotel_id: i64,
    name: &'a str,
    trigger_type: &'a str,
    conditions: &'a str,
    message_template: &'a str,
    is_active: bool,
    priority: i32,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

#[derive(AsChangeset)]
#[diesel(table_name = triggers)]
struct TriggerChangeset {
    name: Option<String>,
    conditions: Option<String>,
    message_template: Option<String>,
    is_active: Option<bool>,
    priority: Option<i32>,
    updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = trigger_executions)]
struct InsertExecution {
    hotel_id: i64,
    trigger_id: i64,
    guest_id: i64,
    executed_at: NaiveDateTime,
}

pub struct SqlTriggerStore {
    pool: DbPool,
}

impl SqlTriggerStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TriggerStore for SqlTriggerStore {
    async fn create_trigger(
        &self,
        hotel_id: i64,
        trigger: &NewTrigger,
    ) -> Result<Trigger, DatabaseError> {
        let trigger = trigger.clone();
        let conditions = json_to_text(&trigger.conditions)?;
        let now = Utc::now().naive_utc();
        with_connection!(self.pool, |conn| {
            let row = diesel::insert_into(triggers::table)
                .values(&InsertTrigger {
                    hotel_id,
                    name: &trigger.name,
                    trigger_type: trigger.trigger_type.as_str(),
                    conditions: &conditions,
                    message_template: &trigger.message_template,
                    is_active: trigger.is_active,
                    priority: trigger.priority,
                    created_at: now,
                    updated_at: now,
                })
                .returning(DbTrigger::as_returning())
                .get_result::<DbTrigger>(conn)?;
            Trigger::try_from(row)
        })
    }

    async fn get_trigger(
        &self,
        hotel_id: i64,
        trigger_id: i64,
    ) -> Result<Option<Trigger>, DatabaseError> {
        with_connection!(self.pool, |conn| {
            triggers::table
                .filter(triggers::hotel_id.eq(hotel_id))
                .filter(triggers::id.eq(trigger_id))
                .select(DbTrigger::as_select())
                .first::<DbTrigger>(conn)
                .optional()?
                .map(Trigger::try_from)
                .transpose()
        })
    }

    async fn list_triggers(
        &self,
        hotel_id: i64,
        active_only: bool,
    ) -> Result<Vec<Trigger>, DatabaseError> {
        with_connection!(self.pool, |conn| {
            let mut query = triggers::table
                .filter(triggers::hotel_id.eq(hotel_id))
                .select(DbTrigger::as_select())
                .into_boxed();
            if active_only {
                query = query.filter(triggers::is_active.eq(true));
            }
            query
                .order((triggers::priority.desc(), triggers::id.asc()))
                .load::<DbTrigger>(conn)?
                .into_iter()
                .map(Trigger::try_from)
                .collect()
        })
    }

    async fn list_active_by_type(
        &self,
        hotel_id: i64,
        trigger_type: TriggerType,
    ) -> Result<Vec<Trigger>, DatabaseError> {
        with_connection!(self.pool, |conn| {
            triggers::table
                .filter(triggers::hotel_id.eq(hotel_id))
                .filter(triggers::trigger_type.eq(trigger_type.as_str()))
                .filter(triggers::is_active.eq(true))
                .order((triggers::priority.desc(), triggers::id.asc()))
                .select(DbTrigger::as_select())
                .load::<DbTrigger>(conn)?
                .into_iter()
                .map(Trigger::try_from)
                .collect()
        })
    }

    async fn update_trigger(
        &self,
        hotel_id: i64,
        trigger_id: i64,
        update: &TriggerUpdate,
    ) -> Result<Option<Trigger>, DatabaseError> {
        let changes = TriggerChangeset {
            name: update.name.clone(),
            conditions: update.conditions.as_ref().map(json_to_text).transpose()?,
            message_template: update.message_template.clone(),
            is_active: update.is_active,
            priority: update.priority,
            updated_at: Utc::now().naive_utc(),
        };
        with_connection!(self.pool, |conn| {
            diesel::update(
                triggers::table
                    .filter(triggers::hotel_id.eq(hotel_id))
                    .filter(triggers::id.eq(trigger_id)),
            )
            .set(&changes)
            .returning(DbTrigger::as_returning())
            .get_result::<DbTrigger>(conn)
            .optional()?
            .map(Trigger::try_from)
            .transpose()
        })
    }

    async fn delete_trigger(&self, hotel_id: i64, trigger_id: i64) -> Result<bool, DatabaseError> {
        with_connection!(self.pool, |conn| {
            conn.transaction::<bool, DatabaseError, _>(|conn| {
                let owned = triggers::table
                    .filter(triggers::hotel_id.eq(hotel_id))
                    .filter(triggers::id.eq(trigger_id))
                    .count()
                    .get_result::<i64>(conn)?;
                if owned == 0 {
                    return Ok(false);
                }
                diesel::delete(
                    trigger_executions::table.filter(trigger_executions::trigger_id.eq(trigger_id)),
                )
                .execute(conn)?;
                let deleted = diesel::delete(
                    triggers::table
                        .filter(triggers::hotel_id.eq(hotel_id))
                        .filter(triggers::id.eq(trigger_id)),
                )
                .execute(conn)?;
                Ok(deleted > 0)
            })
        })
    }

    async fn record_execution(
        &self,
        hotel_id: i64,
        trigger_id: i64,
        guest_id: i64,
    ) -> Result<bool, DatabaseError> {
        let now = Utc::now().naive_utc();
        with_connection!(self.pool, |conn| {
            let inserted = diesel::insert_into(trigger_executions::table)
                .values(&InsertExecution {
                    hotel_id,
                    trigger_id,
                    guest_id,
                    executed_at: now,
                })
                .on_conflict((trigger_executions::trigger_id, trigger_executions::guest_id))
                .do_nothing()
                .execute(conn)?;
            Ok(inserted > 0)
        })
    }
}
