use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter, IntCounterVec,
    IntGauge,
};

lazy_static! {
    // Ingest metrics
    pub static ref RECORDS_INGESTED: IntCounterVec = register_int_counter_vec!(
        "marketflow_records_ingested_total",
        "Records read from upstream sources",
        &["exchange"]
    ).unwrap();

    pub static ref DECODE_FAILURES: IntCounterVec = register_int_counter_vec!(
        "marketflow_decode_failures_total",
        "Upstream records that failed to decode",
        &["exchange"]
    ).unwrap();

    // Pipeline metrics
    pub static ref RECORDS_PROCESSED: IntCounter = register_int_counter!(
        "marketflow_records_processed_total",
        "Records that passed the worker pool into the result channel"
    ).unwrap();

    pub static ref RECORDS_REJECTED: IntCounterVec = register_int_counter_vec!(
        "marketflow_records_rejected_total",
        "Records dropped by worker validation",
        &["reason"]
    ).unwrap();

    pub static ref BACKPRESSURE_DROPS: IntCounterVec = register_int_counter_vec!(
        "marketflow_backpressure_drops_total",
        "Records discarded because a downstream buffer stayed full",
        &["stage"]
    ).unwrap();

    pub static ref PIPELINE_RUNNING: IntGauge = register_int_gauge!(
        "marketflow_pipeline_running",
        "Whether the ingestion pipeline is running (0/1)"
    ).unwrap();

    pub static ref MODE_SWITCHES: IntCounterVec = register_int_counter_vec!(
        "marketflow_mode_switches_total",
        "Completed mode transitions",
        &["to"]
    ).unwrap();

    // Cache / storage metrics
    pub static ref CACHE_WRITE_FAILURES: IntCounter = register_int_counter!(
        "marketflow_cache_write_failures_total",
        "Cache writes that failed and were swallowed"
    ).unwrap();

    pub static ref ROWS_AGGREGATED: IntCounter = register_int_counter!(
        "marketflow_rows_aggregated_total",
        "Aggregated rows written to storage"
    ).unwrap();

    pub static ref TICKS_ABANDONED: IntCounter = register_int_counter!(
        "marketflow_aggregation_ticks_abandoned_total",
        "Aggregation ticks abandoned on storage failure"
    ).unwrap();
}

pub fn record_ingested(exchange: &str) {
    RECORDS_INGESTED.with_label_values(&[exchange]).inc();
}

pub fn record_decode_failure(exchange: &str) {
    DECODE_FAILURES.with_label_values(&[exchange]).inc();
}

pub fn record_rejected(reason: &str) {
    RECORDS_REJECTED.with_label_values(&[reason]).inc();
}

pub fn record_backpressure_drop(stage: &str) {
    BACKPRESSURE_DROPS.with_label_values(&[stage]).inc();
}

pub fn record_mode_switch(to: &str) {
    MODE_SWITCHES.with_label_values(&[to]).inc();
}
