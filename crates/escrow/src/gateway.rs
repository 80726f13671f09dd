//! [`SettlementGateway`] implementation used by the matching engine.

use crate::escrow::SettlementEscrow;
use ridemesh_core::{EscrowLock, PayoutSummary, Result, SettlementGateway, UserId};

impl SettlementGateway for SettlementEscrow {
    fn lock(&self, request: &EscrowLock) -> Result<()> {
        self.create_ride(
            &request.rider,
            &request.ride_id,
            request.amount,
            &request.driver,
            request.fee_bp,
        )?;
        Ok(())
    }

    fn release(
        &self,
        caller: &UserId,
        ride_id: &str,
        driver_signature: &[u8],
        rider_signature: &[u8],
        reduced_trust: bool,
    ) -> Result<PayoutSummary> {
        Ok(self.complete(caller, ride_id, driver_signature, rider_signature, reduced_trust)?)
    }

    fn refund(&self, caller: &UserId, ride_id: &str) -> Result<PayoutSummary> {
        Ok(self.cancel_ride(caller, ride_id)?)
    }

    fn is_locked(&self, ride_id: &str) -> bool {
        self.get_record(ride_id)
            .map(|record| record.status.holds_funds())
            .unwrap_or(false)
    }
}
