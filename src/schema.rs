diesel::table! {
    source_tables (id) {
        id -> Uuid,
        name -> Text,
        raw_content -> Text,
        content -> Nullable<Json>,
        column_types -> Nullable<Json>,
        status -> Text,
        failure_reason -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    derived_tables (id) {
        id -> Uuid,
        parent_id -> Uuid,
        content -> Json,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    change_batches (id) {
        id -> Uuid,
        target_kind -> Text,
        target_id -> Uuid,
        data -> Json,
        status -> Text,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(derived_tables -> source_tables (parent_id));

diesel::allow_tables_to_appear_in_same_query!(source_tables, derived_tables, change_batches,);
