//! Request builder: form selections plus file content into a request envelope.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::domain::envelope::{CorrelationId, RequestBody, RequestEnvelope};
use crate::domain::form::FormState;

/// Build the envelope for the current selections.
///
/// The order type is included exactly when it is applicable, and the file
/// content exactly when the selection requires a file.
pub fn build(
    form: &FormState,
    correlation_id: CorrelationId,
    input_file: Option<String>,
) -> RequestEnvelope {
    RequestEnvelope {
        correlation_id,
        request: RequestBody {
            transaction_type: form.transaction_type(),
            order_type: form.order_type_applicable().then(|| form.order_type()),
            format: form.format(),
            response_type: form.response_type(),
            input_file: input_file.filter(|_| form.requires_file()),
        },
    }
}

/// Generate a random v4 correlation id.
///
/// Ids from the fallback path are well-formed but not guaranteed to be unique.
pub fn new_correlation_id() -> CorrelationId {
    correlation_id_with(getrandom::fill)
}

static FALLBACK_SEQUENCE: AtomicU64 = AtomicU64::new(0);

fn correlation_id_with<F>(fill: F) -> CorrelationId
where
    F: FnOnce(&mut [u8]) -> Result<(), getrandom::Error>,
{
    let mut bytes = [0u8; 16];
    if let Err(e) = fill(&mut bytes) {
        tracing::warn!(
            error = %e,
            "Secure random source unavailable, using pseudo-random correlation id"
        );
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        let sequence = FALLBACK_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let mut rng = StdRng::seed_from_u64(nanos ^ sequence.rotate_left(32));
        rng.fill_bytes(&mut bytes);
    }
    CorrelationId(uuid::Builder::from_random_bytes(bytes).into_uuid())
}
