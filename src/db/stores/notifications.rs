use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;

use super::{from_naive, parse_column, NotificationStore};
use crate::db::models::{NewStaffNotification, NotificationStatus, StaffNotification};
use crate::db::schema::staff_notifications;
use crate::db::{DatabaseError, DbPool};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = staff_notifications)]
struct DbNotification {
    id: i64,
    hotel_id: i64,
    guest_id: Option<i64>,
    conversation_id: Option<i64>,
    notification_type: String,
    message: String,
    status: String,
    acknowledged_at: Option<NaiveDateTime>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

impl TryFrom<DbNotification> for StaffNotification {
    type Error = DatabaseError;

    fn try_from(value: DbNotification) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.id,
            hotel_id: value.hotel_id,
            guest_id: value.guest_id,
            conversation_id: value.conversation_id,
            notification_type: value.notification_type,
            message: value.message,
            status: parse_column(&value.status)?,
            acknowledged_at: value.acknowledged_at.map(from_naive),
            created_at: from_naive(value.created_at),
            updated_at: from_naive(value.updated_at),
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = staff_notifications)]
struct InsertNotification<'a> {
    hotel_id: i64,
    guest_id: Option<i64>,
    conversation_id: Option<i64>,
    notification_type: &'a str,
    message: &'a str,
    status: &'a str,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

#[derive(AsChangeset)]
#[diesel(table_name = staff_notifications)]
struct StatusChangeset<'a> {
    status: &'a str,
    acknowledged_at: Option<NaiveDateTime>,
    updated_at: NaiveDateTime,
}

pub struct SqlNotificationStore {
    pool: DbPool,
}

impl SqlNotificationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationStore for SqlNotificationStore {
    async fn create_notification(
        &self,
        hotel_id: i64,
        notification: &NewStaffNotification,
    ) -> Result<StaffNotification, DatabaseError> {
        let notification = notification.clone();
        let now = Utc::now().naive_utc();
        with_connection!(self.pool, |conn| {
            let row = diesel::insert_into(staff_notifications::table)
                .values(&InsertNotification {
                    hotel_id,
                    guest_id: notification.guest_id,
                    conversation_id: notification.conversation_id,
                    notification_type: &notification.notification_type,
                    message: &notification.message,
                    status: NotificationStatus::Pending.as_str(),
                    created_at: now,
                    updated_at: now,
                })
                .returning(DbNotification::as_returning())
                .get_result::<DbNotification>(conn)?;
            StaffNotification::try_from(row)
        })
    }

    async fn get_notification(
        &self,
        hotel_id: i64,
        notification_id: i64,
    ) -> Result<Option<StaffNotification>, DatabaseError> {
        with_connection!(self.pool, |conn| {
            staff_notifications::table
                .filter(staff_notifications::hotel_id.eq(hotel_id))
                .filter(staff_notifications::id.eq(notification_id))
                .select(DbNotification::as_select())
                .first::<DbNotification>(conn)
                .optional()?
                .map(StaffNotification::try_from)
                .transpose()
        })
    }

    async fn list_notifications(
        &self,
        hotel_id: i64,
        status: Option<NotificationStatus>,
        limit: i64,
    ) -> Result<Vec<StaffNotification>, DatabaseError> {
        with_connection!(self.pool, |conn| {
            let mut query = staff_notifications::table
                .filter(staff_notifications::hotel_id.eq(hotel_id))
                .select(DbNotification::as_select())
                .into_boxed();
            if let Some(status) = status {
                query = query.filter(staff_notifications::status.eq(status.as_str()));
            }
            query
                .order(staff_notifications::id.desc())
                .limit(limit)
                .load::<DbNotification>(conn)?
                .into_iter()
                .map(StaffNotification::try_from)
                .collect()
        })
    }

    async fn transition_notification(
        &self,
        hotel_id: i64,
        notification_id: i64,
        from: NotificationStatus,
        to: NotificationStatus,
    ) -> Result<Option<StaffNotification>, DatabaseError> {
        if !from.can_transition_to(to) {
            return Ok(None);
        }
        let now = Utc::now().naive_utc();
        let acknowledged_at = (to == NotificationStatus::Acknowledged).then_some(now);
        with_connection!(self.pool, |conn| {
            diesel::update(
                staff_notifications::table
                    .filter(staff_notifications::hotel_id.eq(hotel_id))
                    .filter(staff_notifications::id.eq(notification_id))
                    .filter(staff_notifications::status.eq(from.as_str())),
            )
            .set(&StatusChangeset {
                status: to.as_str(),
                acknowledged_at,
                updated_at: now,
            })
            .returning(DbNotification::as_returning())
            .get_result::<DbNotification>(conn)
            .optional()?
            .map(StaffNotification::try_from)
            .transpose()
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::db::models::{NewStaffNotification, NotificationStatus};
    use crate::db::testing::{seed_guest, seed_hotel, sqlite_manager};

    fn alert(guest_id: i64) -> NewStaffNotification {
        NewStaffNotification {
            guest_id: Some(guest_id),
            conversation_id: None,
            notification_type: "negative_sentiment".to_string(),
            message: "Guest is unhappy".to_string(),
        }
    }

    #[tokio::test]
    async fn status_moves_forward_only() {
        let (db, _file) = sqlite_manager().await;
        let hotel = seed_hotel(&db, "+1", "a").await;
        let guest = seed_guest(&db, hotel.id, "100").await;
        let store = db.notification_store();

        let created = store
            .create_notification(hotel.id, &alert(guest.id))
            .await
            .expect("create");
        assert_eq!(created.status, NotificationStatus::Pending);

        let sent = store
            .transition_notification(
                hotel.id,
                created.id,
                NotificationStatus::Pending,
                NotificationStatus::Sent,
            )
            .await
            .expect("send")
            .expect("row");
        assert_eq!(sent.status, NotificationStatus::Sent);
        assert!(sent.acknowledged_at.is_none());

        // Stale expectation: the row is no longer pending.
        assert!(store
            .transition_notification(
                hotel.id,
                created.id,
                NotificationStatus::Pending,
                NotificationStatus::Acknowledged,
            )
            .await
            .expect("stale")
            .is_none());

        let acked = store
            .transition_notification(
                hotel.id,
                created.id,
                NotificationStatus::Sent,
                NotificationStatus::Acknowledged,
            )
            .await
            .expect("ack")
            .expect("row");
        assert!(acked.acknowledged_at.is_some());

        assert!(store
            .transition_notification(
                hotel.id,
                created.id,
                NotificationStatus::Acknowledged,
                NotificationStatus::Pending,
            )
            .await
            .expect("backwards")
            .is_none());
    }

    #[tokio::test]
    async fn listing_filters_by_status_and_hotel() {
        let (db, _file) = sqlite_manager().await;
        let hotel = seed_hotel(&db, "+1", "a").await;
        let other = seed_hotel(&db, "+2", "b").await;
        let guest = seed_guest(&db, hotel.id, "100").await;
        let store = db.notification_store();

        let first = store
            .create_notification(hotel.id, &alert(guest.id))
            .await
            .expect("create");
        store
            .create_notification(hotel.id, &alert(guest.id))
            .await
            .expect("create");
        store
            .transition_notification(
                hotel.id,
                first.id,
                NotificationStatus::Pending,
                NotificationStatus::Acknowledged,
            )
            .await
            .expect("ack");

        let pending = store
            .list_notifications(hotel.id, Some(NotificationStatus::Pending), 10)
            .await
            .expect("pending");
        assert_eq!(pending.len(), 1);
        assert_eq!(store.list_notifications(hotel.id, None, 10).await.expect("all").len(), 2);
        assert!(store
            .list_notifications(other.id, None, 10)
            .await
            .expect("other")
            .is_empty());
        assert!(store
            .get_notification(other.id, first.id)
            .await
            .expect("get other")
            .is_none());
    }
}
