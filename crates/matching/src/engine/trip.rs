//! Trip lifecycle: start, presence exchange, completion, cancellation.

use super::MatchingEngine;
use crate::error::{MatchingError, MatchingResult};
use crate::ride::{authorize, AuthorizationFailure, PaymentMethod, Ride, RideStatus, Role};
use ridemesh_core::settlement::release_message;
use ridemesh_core::{current_timestamp_ms, Actor, PayoutSummary};
use ridemesh_governance::{ExperienceAward, TripMetrics};
use ridemesh_presence::{CompletionProof, PresenceToken, TokenType};
use tracing::{debug, info};

/// Everything a completed trip produced on this device.
#[derive(Debug, Clone)]
pub struct CompletionReceipt {
    pub ride: Ride,
    pub proof: CompletionProof,
    /// Escrow payout if this device released it
    pub payout: Option<PayoutSummary>,
    /// Experience awarded to the driver, if awarded here
    pub award: Option<ExperienceAward>,
}

impl MatchingEngine {
    /// Move a matched ride to IN_PROGRESS.
    pub async fn start_trip(&self, ride_id: &str) -> MatchingResult<Ride> {
        let ride = {
            let mut state = self.write_state()?;
            let ride = state.ride_mut(ride_id)?;
            let actor = ride.role.actor();
            ride.transition(RideStatus::InProgress, actor, current_timestamp_ms())?;
            ride.clone()
        };
        info!(ride_id, "trip started");
        self.publish_status(&ride, ride.role.actor()).await;
        Ok(ride)
    }

    /// Sign a presence token for an active ride and keep it in the local
    /// collector. The returned token is handed to the counterparty.
    pub fn generate_presence_token(
        &self,
        ride_id: &str,
        token_type: TokenType,
    ) -> MatchingResult<PresenceToken> {
        let mut state = self.write_state()?;
        let status = state.ride_mut(ride_id)?.status;
        if !matches!(status, RideStatus::Matched | RideStatus::InProgress) {
            return Err(MatchingError::NotActive {
                ride_id: ride_id.to_string(),
                status,
            });
        }

        let token = PresenceToken::generate(&self.identity, ride_id, token_type)?;
        let collector = state
            .collectors
            .get_mut(ride_id)
            .ok_or_else(|| MatchingError::RideNotFound {
                ride_id: ride_id.to_string(),
            })?;
        collector.add_token(token.clone())?;
        debug!(ride_id, token_type = %token_type, "presence token issued");
        Ok(token)
    }

    /// Record a token presented by the counterparty.
    pub fn receive_presence_token(
        &self,
        ride_id: &str,
        token: PresenceToken,
    ) -> MatchingResult<()> {
        let mut state = self.write_state()?;
        let collector = state
            .collectors
            .get_mut(ride_id)
            .ok_or_else(|| MatchingError::RideNotFound {
                ride_id: ride_id.to_string(),
            })?;
        collector.add_token(token)?;
        Ok(())
    }

    /// Decode a scanned token and record it.
    pub fn receive_encoded_token(&self, ride_id: &str, encoded: &str) -> MatchingResult<()> {
        let token = PresenceToken::decode(encoded)?;
        self.receive_presence_token(ride_id, token)
    }

    /// This participant's signature authorizing the escrow release.
    pub fn sign_release(&self, ride_id: &str) -> MatchingResult<Vec<u8>> {
        let fare_cents = self
            .ride(ride_id)
            .ok_or_else(|| MatchingError::RideNotFound {
                ride_id: ride_id.to_string(),
            })?
            .fare_cents;
        Ok(self.identity.sign(&release_message(ride_id, fare_cents))?)
    }

    /// Complete an in-progress trip.
    ///
    /// Requires END tokens from both parties in the local collector. For
    /// escrow-paid rides with a locked escrow, `counterparty_release` must
    /// be the other party's [`sign_release`](Self::sign_release) signature;
    /// the escrow is released first and the ride only completes if that
    /// succeeds. The driver's experience is awarded here unless the ride is
    /// paid externally, in which case it waits for
    /// [`confirm_external_payment`](Self::confirm_external_payment).
    ///
    /// The ride is claimed for settlement before the escrow call, so a
    /// cancellation or status update cannot interleave with the release.
    pub async fn complete_trip(
        &self,
        ride_id: &str,
        counterparty_release: Option<&[u8]>,
        rating: Option<f64>,
    ) -> MatchingResult<CompletionReceipt> {
        let (ride, proof) = {
            let mut state = self.write_state()?;
            let ride = state
                .rides
                .get(ride_id)
                .cloned()
                .ok_or_else(|| MatchingError::RideNotFound {
                    ride_id: ride_id.to_string(),
                })?;
            check_transition(&ride, RideStatus::Completed, ride.role.actor())?;
            let proof = state
                .collectors
                .get(ride_id)
                .ok_or_else(|| MatchingError::RideNotFound {
                    ride_id: ride_id.to_string(),
                })?
                .assemble_completion_proof()?;
            state.begin_settling(ride_id)?;
            (ride, proof)
        };
        let actor = ride.role.actor();

        let payout = match self.release_escrow(&ride, counterparty_release, proof.reduced_trust) {
            Ok(payout) => payout,
            Err(e) => {
                self.write_state()?.settling.remove(ride_id);
                return Err(e);
            }
        };

        let (completed, award) = {
            let mut state = self.write_state()?;
            state.settling.remove(ride_id);
            let ride = state.ride_mut(ride_id)?;
            ride.transition(RideStatus::Completed, actor, current_timestamp_ms())?;
            ride.proof_confidence = Some(proof.confidence);

            let award = if ride.payment_method == PaymentMethod::External {
                None
            } else {
                self.award_driver(ride, rating)?
            };
            let completed = ride.clone();
            state.release_ride(ride_id);
            (completed, award)
        };

        info!(
            ride_id,
            confidence = ?proof.confidence,
            reduced_trust = proof.reduced_trust,
            released = payout.is_some(),
            "trip completed"
        );
        self.record_history(&completed);
        self.publish_status(&completed, actor).await;
        if completed.role == Role::Driver {
            self.announce_quietly().await;
        }

        Ok(CompletionReceipt {
            ride: completed,
            proof,
            payout,
            award,
        })
    }

    /// Release a locked escrow with both parties' signatures. Returns `None`
    /// when nothing is locked for the ride.
    fn release_escrow(
        &self,
        ride: &Ride,
        counterparty_release: Option<&[u8]>,
        reduced_trust: bool,
    ) -> MatchingResult<Option<PayoutSummary>> {
        let gateway = match &self.settlement {
            Some(gateway)
                if ride.payment_method == PaymentMethod::Escrow
                    && gateway.is_locked(&ride.ride_id) =>
            {
                gateway
            }
            _ => return Ok(None),
        };
        let theirs = counterparty_release.ok_or(MatchingError::MissingReleaseSignature)?;
        let mine = self
            .identity
            .sign(&release_message(&ride.ride_id, ride.fare_cents))?;
        let (driver_sig, rider_sig) = match ride.role {
            Role::Rider => (theirs, mine.as_slice()),
            Role::Driver => (mine.as_slice(), theirs),
        };
        let payout = gateway.release(
            &self.public_key().to_string(),
            &ride.ride_id,
            driver_sig,
            rider_sig,
            reduced_trust,
        )?;
        Ok(Some(payout))
    }

    /// Award experience for an externally paid ride once payment is
    /// confirmed. Returns `None` if it was already awarded.
    pub fn confirm_external_payment(
        &self,
        ride_id: &str,
        rating: Option<f64>,
    ) -> MatchingResult<Option<ExperienceAward>> {
        let archived = self.load_history(ride_id)?;
        let (ride, award) = {
            let mut state = self.write_state()?;
            if !state.rides.contains_key(ride_id) {
                if let Some(ride) = archived {
                    state.rides.insert(ride_id.to_string(), ride);
                }
            }
            let ride = state.ride_mut(ride_id)?;
            if ride.payment_method != PaymentMethod::External {
                return Err(MatchingError::WrongPaymentMethod {
                    ride_id: ride_id.to_string(),
                });
            }
            if ride.status != RideStatus::Completed {
                return Err(MatchingError::NotActive {
                    ride_id: ride_id.to_string(),
                    status: ride.status,
                });
            }
            let award = self.award_driver(ride, rating)?;
            (ride.clone(), award)
        };
        if award.is_some() {
            self.record_history(&ride);
            info!(ride_id, "external payment confirmed");
        }
        Ok(award)
    }

    /// Cancel a ride this device participates in, refunding a locked escrow.
    pub async fn cancel_ride(&self, ride_id: &str) -> MatchingResult<Ride> {
        let actor = self
            .ride(ride_id)
            .ok_or_else(|| MatchingError::RideNotFound {
                ride_id: ride_id.to_string(),
            })?
            .role
            .actor();
        self.cancel_as(ride_id, actor).await
    }

    pub(crate) async fn cancel_as(&self, ride_id: &str, actor: Actor) -> MatchingResult<Ride> {
        {
            let mut state = self.write_state()?;
            let ride = state
                .rides
                .get(ride_id)
                .ok_or_else(|| MatchingError::RideNotFound {
                    ride_id: ride_id.to_string(),
                })?;
            check_transition(ride, RideStatus::Cancelled, actor)?;
            state.begin_settling(ride_id)?;
        }

        let refund = match &self.settlement {
            Some(gateway) if gateway.is_locked(ride_id) => {
                match gateway.refund(&self.public_key().to_string(), ride_id) {
                    Ok(refund) => Some(refund),
                    Err(e) => {
                        self.write_state()?.settling.remove(ride_id);
                        return Err(e.into());
                    }
                }
            }
            _ => None,
        };

        let cancelled = {
            let mut state = self.write_state()?;
            state.settling.remove(ride_id);
            let ride = state.ride_mut(ride_id)?;
            ride.transition(RideStatus::Cancelled, actor, current_timestamp_ms())?;
            let cancelled = ride.clone();
            state.release_ride(ride_id);
            cancelled
        };

        info!(
            ride_id,
            actor = %actor,
            refunded = refund.map(|r| r.rider_refund).unwrap_or(0),
            "ride cancelled"
        );
        self.record_history(&cancelled);
        self.publish_status(&cancelled, actor).await;
        if cancelled.role == Role::Driver {
            self.announce_quietly().await;
        }
        Ok(cancelled)
    }

    /// Award the driver once per ride.
    fn award_driver(
        &self,
        ride: &mut Ride,
        rating: Option<f64>,
    ) -> MatchingResult<Option<ExperienceAward>> {
        if ride.governance_awarded {
            return Ok(None);
        }
        let Some(driver_id) = ride.driver_id.clone() else {
            return Ok(None);
        };
        let metrics = TripMetrics {
            duration_minutes: ride.trip_minutes(),
            distance_km: ride.distance_km,
            rating,
        };
        let award = self.governance.award_trip_experience(&driver_id, &metrics)?;
        ride.governance_awarded = true;
        if award.leveled_up {
            info!(driver_id = %driver_id, tier = %award.new_tier, "driver reached new tier");
        }
        Ok(Some(award))
    }
}

fn check_transition(ride: &Ride, to: RideStatus, actor: Actor) -> MatchingResult<()> {
    match authorize(ride.status, to, actor) {
        Ok(()) => Ok(()),
        Err(AuthorizationFailure::NoSuchTransition) => Err(MatchingError::InvalidTransition {
            ride_id: ride.ride_id.clone(),
            from: ride.status,
            to,
        }),
        Err(AuthorizationFailure::WrongActor) => Err(MatchingError::Unauthorized {
            actor,
            from: ride.status,
            to,
        }),
    }
}
