// Column types are chosen so the same table definitions serve both the
// PostgreSQL and the SQLite backend.

diesel::table! {
    hotels (id) {
        id -> BigInt,
        name -> Text,
        whatsapp_number -> Text,
        green_api_instance_id -> Nullable<Text>,
        green_api_token -> Nullable<Text>,
        settings -> Text,
        is_active -> Bool,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    guests (id) {
        id -> BigInt,
        hotel_id -> BigInt,
        phone_number -> Text,
        name -> Nullable<Text>,
        check_in_date -> Nullable<Timestamp>,
        check_out_date -> Nullable<Timestamp>,
        room_number -> Nullable<Text>,
        preferences -> Text,
        last_interaction_at -> Nullable<Timestamp>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    conversations (id) {
        id -> BigInt,
        hotel_id -> BigInt,
        guest_id -> BigInt,
        message_id -> Nullable<Text>,
        direction -> Text,
        content -> Text,
        sentiment_score -> Nullable<Double>,
        sentiment_label -> Nullable<Text>,
        requires_attention -> Bool,
        created_at -> Timestamp,
    }
}

diesel::table! {
    triggers (id) {
        id -> BigInt,
        hotel_id -> BigInt,
        name -> Text,
        trigger_type -> Text,
        conditions -> Text,
        message_template -> Text,
        is_active -> Bool,
        priority -> Integer,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    trigger_executions (id) {
        id -> BigInt,
        hotel_id -> BigInt,
        trigger_id -> BigInt,
        guest_id -> BigInt,
        executed_at -> Timestamp,
    }
}

diesel::table! {
    staff_notifications (id) {
        id -> BigInt,
        hotel_id -> BigInt,
        guest_id -> Nullable<BigInt>,
        conversation_id -> Nullable<BigInt>,
        notification_type -> Text,
        message -> Text,
        status -> Text,
        acknowledged_at -> Nullable<Timestamp>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    hotels,
    guests,
    conversations,
    triggers,
    trigger_executions,
    staff_notifications,
);
