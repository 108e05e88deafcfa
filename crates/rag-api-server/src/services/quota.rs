use std::sync::Arc;
use uuid::Uuid;

use crate::database::{Repository, SubscriptionRow};
use crate::utils::error::ApiError;

/// Quota Manager (C11). Reservation is row-locked at the database
/// (`SELECT ... FOR UPDATE`) so concurrent queries against the same
/// workspace cannot both observe `queries_used < query_quota` and both
/// commit — the invariant `queries_used <= query_quota` holds at every
/// observable instant, not just eventually.
pub struct QuotaManager {
    repository: Arc<Repository>,
}

pub struct Reservation {
    pub workspace_id: Uuid,
    committed: bool,
}

impl Reservation {
    /// Consumes the reservation without refunding. Called once the
    /// orchestrator has produced and persisted a billable answer.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.committed {
            tracing::warn!(
                workspace_id = %self.workspace_id,
                "quota reservation dropped without commit or explicit refund"
            );
        }
    }
}

impl QuotaManager {
    pub fn new(repository: Arc<Repository>) -> Self {
        Self { repository }
    }

    pub async fn reserve(&self, workspace_id: Uuid) -> Result<(Reservation, SubscriptionRow), ApiError> {
        let outcome = self
            .repository
            .reserve_query(workspace_id)
            .await
            .map_err(|e| ApiError::Unavailable(e.to_string()))?;

        let subscription = outcome?;
        Ok((
            Reservation {
                workspace_id,
                committed: false,
            },
            subscription,
        ))
    }

    /// Force the subscription's billing period to roll over if it has
    /// elapsed. `reserve` already does this inline before checking quota,
    /// so this is only needed for callers that want to roll a period
    /// over without also reserving a query (an operator reset, a
    /// scheduled sweep).
    pub async fn rollover(&self, workspace_id: Uuid) -> Result<Option<SubscriptionRow>, ApiError> {
        self.repository
            .rollover(workspace_id)
            .await
            .map_err(|e| ApiError::Unavailable(e.to_string()))
    }

    /// Release a reservation that will not produce a billable answer
    /// (generator unavailable, deadline exceeded before persistence).
    pub async fn refund(&self, reservation: Reservation) -> Result<(), ApiError> {
        let workspace_id = reservation.workspace_id;
        // mark committed so Drop doesn't also warn about this refund
        let mut reservation = reservation;
        reservation.committed = true;

        self.repository
            .refund_query(workspace_id)
            .await
            .map_err(|e| ApiError::Unavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservation_without_commit_does_not_panic_on_drop() {
        let reservation = Reservation {
            workspace_id: Uuid::new_v4(),
            committed: false,
        };
        drop(reservation);
    }
}
