// Mirrors the tables created by `DbContext::init_schema`.

diesel::table! {
    channel_snapshots (id) {
        id -> BigInt,
        channel_id -> Text,
        service -> Text,
        // `YYYY-MM-DD`, or empty for latest-only rows.
        snapshot_date -> Text,
        name -> Nullable<Text>,
        icon_url -> Nullable<Text>,
        category -> Nullable<Text>,
        tags -> Nullable<Text>,
        metrics -> Text,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    service_crawl_state (job_id) {
        job_id -> Text,
        service -> Text,
        last_crawled_at -> Text,
        last_status -> Text,
        last_error -> Nullable<Text>,
        last_cursor -> Nullable<Text>,
        updated_at -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(channel_snapshots, service_crawl_state);
