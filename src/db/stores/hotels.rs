use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;

use super::{from_naive, json_to_text, text_to_json, HotelStore};
use crate::db::models::{Hotel, HotelUpdate, NewHotel};
use crate::db::schema::hotels;
use crate::db::{DatabaseError, DbPool};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = hotels)]
struct DbHotel {
    id: i64,
    name: String,
    whatsapp_number: String,
    green_api_instance_id: Option<String>,
    green_api_token: Option<String>,
    settings: String,
    is_active: bool,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

impl TryFrom<DbHotel> for Hotel {
    type Error = DatabaseError;

    fn try_from(value: DbHotel) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.id,
            name: value.name,
            whatsapp_number: value.whatsapp_number,
            green_api_instance_id: value.green_api_instance_id,
            green_api_token: value.green_api_token,
            settings: text_to_json(&value.settings)?,
            is_active: value.is_active,
            created_at: from_naive(value.created_at),
            updated_at: from_naive(value.updated_at),
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = hotels)]
struct InsertHotel<'a> {
    name: &'a str,
    whatsapp_number: &'a str,
    green_api_instance_id: Option<&'a str>,
    green_api_token: Option<&'a str>,
    settings: &'a str,
    is_active: bool,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

#[derive(AsChangeset)]
#[diesel(table_name = hotels)]
struct HotelChangeset {
    name: Option<String>,
    whatsapp_number: Option<String>,
    green_api_instance_id: Option<String>,
    green_api_token: Option<String>,
    settings: Option<String>,
    is_active: Option<bool>,
    updated_at: NaiveDateTime,
}

pub struct SqlHotelStore {
    pool: DbPool,
}

impl SqlHotelStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HotelStore for SqlHotelStore {
    async fn create_hotel(&self, hotel: &NewHotel) -> Result<Hotel, DatabaseError> {
        let hotel = hotel.clone();
        let settings = json_to_text(&hotel.settings)?;
        let now = Utc::now().naive_utc();
        with_connection!(self.pool, |conn| {
            let row = diesel::insert_into(hotels::table)
                .values(&InsertHotel {
                    name: &hotel.name,
                    whatsapp_number: &hotel.whatsapp_number,
                    green_api_instance_id: hotel.green_api_instance_id.as_deref(),
                    green_api_token: hotel.green_api_token.as_deref(),
                    settings: &settings,
                    is_active: true,
                    created_at: now,
                    updated_at: now,
                })
                .returning(DbHotel::as_returning())
                .get_result::<DbHotel>(conn)?;
            Hotel::try_from(row)
        })
    }

    async fn get_hotel(&self, id: i64) -> Result<Option<Hotel>, DatabaseError> {
        with_connection!(self.pool, |conn| {
            hotels::table
                .find(id)
                .select(DbHotel::as_select())
                .first::<DbHotel>(conn)
                .optional()?
                .map(Hotel::try_from)
                .transpose()
        })
    }

    async fn get_hotel_by_instance(
        &self,
        instance_id: &str,
    ) -> Result<Option<Hotel>, DatabaseError> {
        let instance_id = instance_id.to_string();
        with_connection!(self.pool, |conn| {
            hotels::table
                .filter(hotels::green_api_instance_id.eq(&instance_id))
                .order((hotels::is_active.desc(), hotels::id.asc()))
                .select(DbHotel::as_select())
                .first::<DbHotel>(conn)
                .optional()?
                .map(Hotel::try_from)
                .transpose()
        })
    }

    async fn list_hotels(
        &self,
        active_only: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Hotel>, DatabaseError> {
        with_connection!(self.pool, |conn| {
            let mut query = hotels::table.select(DbHotel::as_select()).into_boxed();
            if active_only {
                query = query.filter(hotels::is_active.eq(true));
            }
            query
                .order(hotels::id.asc())
                .limit(limit)
                .offset(offset)
                .load::<DbHotel>(conn)?
                .into_iter()
                .map(Hotel::try_from)
                .collect()
        })
    }

    async fn update_hotel(
        &self,
        id: i64,
        update: &HotelUpdate,
    ) -> Result<Option<Hotel>, DatabaseError> {
        let changes = HotelChangeset {
            name: update.name.clone(),
            whatsapp_number: update.whatsapp_number.clone(),
            green_api_instance_id: update.green_api_instance_id.clone(),
            green_api_token: update.green_api_token.clone(),
            settings: update.settings.as_ref().map(json_to_text).transpose()?,
            is_active: update.is_active,
            updated_at: Utc::now().naive_utc(),
        };
        with_connection!(self.pool, |conn| {
            diesel::update(hotels::table.find(id))
                .set(&changes)
                .returning(DbHotel::as_returning())
                .get_result::<DbHotel>(conn)
                .optional()?
                .map(Hotel::try_from)
                .transpose()
        })
    }

    async fn deactivate_hotel(&self, id: i64) -> Result<bool, DatabaseError> {
        let now = Utc::now().naive_utc();
        with_connection!(self.pool, |conn| {
            let updated = diesel::update(hotels::table.find(id))
                .set((hotels::is_active.eq(false), hotels::updated_at.eq(now)))
                .execute(conn)?;
            Ok(updated > 0)
        })
    }
}
