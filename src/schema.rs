//! Handwritten Diesel schema declarations matching `migrations/`.
//!
//! Kept in sync by hand so the model structs can derive Insertable/Queryable
//! without running `diesel print-schema`.

diesel::table! {
    temperature_readings (id) {
        id -> BigInt,
        trace_id -> BigInt,
        fire_id -> Text,
        latitude -> Double,
        longitude -> Double,
        temperature_celsius -> Double,
        humidity_level -> Nullable<Double>,
        batch_timestamp -> Timestamptz,
        reading_timestamp -> Timestamptz,
        arrival_time -> Timestamptz, // server default clock_timestamp()
    }
}

diesel::table! {
    airquality_readings (id) {
        id -> BigInt,
        trace_id -> BigInt,
        fire_id -> Text,
        location_name -> Text,
        particulate_level -> Double,
        air_quality -> Double,
        smoke_opacity -> Double,
        batch_timestamp -> Timestamptz,
        reading_timestamp -> Timestamptz,
        arrival_time -> Timestamptz,
    }
}

// One row per reading kind; all rows share the checkpoint of the last pass
diesel::table! {
    reading_stats (kind) {
        kind -> Text,
        count -> BigInt,
        max_value -> Nullable<Double>,
        checkpoint -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(temperature_readings, airquality_readings, reading_stats,);
