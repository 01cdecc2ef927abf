use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::prelude::*;

use super::{from_naive, json_to_text, text_to_json, to_naive, GuestStore};
use crate::db::models::{Guest, GuestUpdate, NewGuest};
use crate::db::schema::guests;
use crate::db::{DatabaseError, DbPool};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = guests)]
struct DbGuest {
    id: i64,
    hotel_id: i64,
    phone_number: String,
    name: Option<String>,
    check_in_date: Option<NaiveDateTime>,
    check_out_date: Option<NaiveDateTime>,
    room_number: Option<String>,
    preferences: String,
    last_interaction_at: Option<NaiveDateTime>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

impl TryFrom<DbGuest> for Guest {
    type Error = DatabaseError;

    fn try_from(value: DbGuest) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.id,
            hotel_id: value.hotel_id,
            phone_number: value.phone_number,
            name: value.name,
            check_in_date: value.check_in_date.map(from_naive),
            check_out_date: value.check_out_date.map(from_naive),
            room_number: value.room_number,
            preferences: text_to_json(&value.preferences)?,
            last_interaction_at: value.last_interaction_at.map(from_naive),
            created_at: from_naive(value.created_at),
            updated_at: from_naive(value.updated_at),
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = guests)]
struct InsertGuest<'a> {
    hotel_id: i64,
    phone_number: &'a str,
    name: Option<&'a str>,
    check_in_date: Option<NaiveDateTime>,
    check_out_date: Option<NaiveDateTime>,
    room_number: Option<&'a str>,
    preferences: &'a str,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

#[derive(AsChangeset)]
#[diesel(table_name = guests)]
struct GuestChangeset {
    name: Option<String>,
    check_in_date: Option<NaiveDateTime>,
    check_out_date: Option<NaiveDateTime>,
    room_number: Option<String>,
    preferences: Option<String>,
    updated_at: NaiveDateTime,
}

pub struct SqlGuestStore {
    pool: DbPool,
}

impl SqlGuestStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GuestStore for SqlGuestStore {
    async fn create_guest(&self, hotel_id: i64, guest: &NewGuest) -> Result<Guest, DatabaseError> {
        let guest = guest.clone();
        let preferences = json_to_text(&guest.preferences)?;
        let now = Utc::now().naive_utc();
        with_connection!(self.pool, |conn| {
            let row = diesel::insert_into(guests::table)
                .values(&InsertGuest {
                    hotel_id,
                    phone_number: &guest.phone_number,
                    name: guest.name.as_deref(),
                    check_in_date: guest.check_in_date.as_ref().map(to_naive),
                    check_out_date: guest.check_out_date.as_ref().map(to_naive),
                    room_number: guest.room_number.as_deref(),
                    preferences: &preferences,
                    created_at: now,
                    updated_at: now,
                })
                .returning(DbGuest::as_returning())
                .get_result::<DbGuest>(conn)?;
            Guest::try_from(row)
        })
    }

    async fn get_guest(
        &self,
        hotel_id: i64,
        guest_id: i64,
    ) -> Result<Option<Guest>, DatabaseError> {
        with_connection!(self.pool, |conn| {
            guests::table
                .filter(guests::hotel_id.eq(hotel_id))
                .filter(guests::id.eq(guest_id))
                .select(DbGuest::as_select())
                .first::<DbGuest>(conn)
                .optional()?
                .map(Guest::try_from)
                .transpose()
        })
    }

    async fn get_guest_by_phone(
        &self,
        hotel_id: i64,
        phone_number: &str,
    ) -> Result<Option<Guest>, DatabaseError> {
        let phone_number = phone_number.to_string();
        with_connection!(self.pool, |conn| {
            guests::table
                .filter(guests::hotel_id.eq(hotel_id))
                .filter(guests::phone_number.eq(&phone_number))
                .select(DbGuest::as_select())
                .first::<DbGuest>(conn)
                .optional()?
                .map(Guest::try_from)
                .transpose()
        })
    }

    async fn list_guests(
        &self,
        hotel_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Guest>, DatabaseError> {
        with_connection!(self.pool, |conn| {
            guests::table
                .filter(guests::hotel_id.eq(hotel_id))
                .order(guests::id.asc())
                .limit(limit)
                .offset(offset)
                .select(DbGuest::as_select())
                .load::<DbGuest>(conn)?
                .into_iter()
                .map(Guest::try_from)
                .collect()
        })
    }

    async fn list_guests_with_stay_dates(&self, hotel_id: i64) -> Result<Vec<Guest>, DatabaseError> {
        with_connection!(self.pool, |conn| {
            guests::table
                .filter(guests::hotel_id.eq(hotel_id))
                .filter(
                    guests::check_in_date
                        .is_not_null()
                        .or(guests::check_out_date.is_not_null()),
                )
                .order(guests::id.asc())
                .select(DbGuest::as_select())
                .load::<DbGuest>(conn)?
                .into_iter()
                .map(Guest::try_from)
                .collect()
        })
    }

    async fn update_guest(
        &self,
        hotel_id: i64,
        guest_id: i64,
        update: &GuestUpdate,
    ) -> Result<Option<Guest>, DatabaseError> {
        let changes = GuestChangeset {
            name: update.name.clone(),
            check_in_date: update.check_in_date.as_ref().map(to_naive),
            check_out_date: update.check_out_date.as_ref().map(to_naive),
            room_number: update.room_number.clone(),
            preferences: update.preferences.as_ref().map(json_to_text).transpose()?,
            updated_at: Utc::now().naive_utc(),
        };
        with_connection!(self.pool, |conn| {
            diesel::update(
                guests::table
                    .filter(guests::hotel_id.eq(hotel_id))
                    .filter(guests::id.eq(guest_id)),
            )
            .set(&changes)
            .returning(DbGuest::as_returning())
            .get_result::<DbGuest>(conn)
            .optional()?
            .map(Guest::try_from)
            .transpose()
        })
    }

    async fn touch_guest(
        &self,
        hotel_id: i64,
        guest_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let at = to_naive(&at);
        with_connection!(self.pool, |conn| {
            diesel::update(
                guests::table
                    .filter(guests::hotel_id.eq(hotel_id))
                    .filter(guests::id.eq(guest_id)),
            )
            .set(guests::last_interaction_at.eq(Some(at)))
            .execute(conn)?;
            Ok(())
        })
    }
}
