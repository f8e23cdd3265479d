//! Stream names, subjects and header keys shared by producers and the aggregator

/// Header naming the kind of an inbox message
pub const KIND_HEADER: &str = "kind";

/// Header carrying the request id of a submit or confirm message
pub const REQUEST_ID_HEADER: &str = "request_id";

/// `kind` value of a submit message
pub const KIND_SUBMIT: &str = "submit";

/// `kind` value of a confirmation signal
pub const KIND_CONFIRM: &str = "confirm";

/// Ordered inbox stream of an aggregator
pub fn inbox_stream(aggregator_id: &str) -> String {
    format!("batcher.{}.inbox", aggregator_id)
}

/// Request/reply subject answering stats queries for an aggregator
pub fn stats_subject(aggregator_id: &str) -> String {
    format!("batcher.{}.stats", aggregator_id)
}

/// Mailbox on which a producer awaits its confirmation
pub fn confirm_subject(producer_ref: &str) -> String {
    format!("producer.{}.confirm", producer_ref)
}

/// Subject on which the health monitor publishes stats snapshots
pub fn health_subject(aggregator_id: &str) -> String {
    format!("batcher.{}.health", aggregator_id)
}
