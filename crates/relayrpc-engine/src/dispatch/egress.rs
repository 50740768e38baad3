use bytes::Bytes;

use crate::error::BoxError;

/// Outbound write callback supplied by the transport adapter.
///
/// Called concurrently from workers and sync callers, so implementations must
/// be safe to share. `tracking_id` is the ingestion tracking id for replies
/// and the correlation key for outbound calls; `code` is 0 on success.
pub trait Egress: Send + Sync + 'static {
    fn write(&self, tracking_id: &str, code: i32, payload: Bytes) -> Result<(), BoxError>;
}

impl<F> Egress for F
where
    F: Fn(&str, i32, Bytes) -> Result<(), BoxError> + Send + Sync + 'static,
{
    fn write(&self, tracking_id: &str, code: i32, payload: Bytes) -> Result<(), BoxError> {
        (self)(tracking_id, code, payload)
    }
}
