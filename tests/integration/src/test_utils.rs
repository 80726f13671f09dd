//! Test utilities for end-to-end ride tests

use ridemesh_core::{
    Config, EscrowConfig, GeoPoint, GovernanceConfig, MemoryStore, SettlementGateway,
};
use ridemesh_crypto::IdentityKeyStore;
use ridemesh_escrow::SettlementEscrow;
use ridemesh_governance::GovernanceLedger;
use ridemesh_matching::{DriverProfile, EngineEvent, MatchingEngine, PaymentMethod, Ride};
use ridemesh_relay::{MemoryRelay, RelayClient, RelayEndpoint, Subscription};
use std::sync::Arc;
use std::time::Duration;

/// Route test logs through the test writer.
pub fn init_logging() {
    ridemesh_core::logging::init_for_tests();
}

/// Praça da Sé, São Paulo
pub fn sao_paulo() -> GeoPoint {
    GeoPoint {
        latitude: -23.5505,
        longitude: -46.6333,
    }
}

/// Shared world: relays, keys, one governance ledger and one escrow.
pub struct TestNetwork {
    pub keys: Arc<IdentityKeyStore>,
    pub relays: Vec<Arc<MemoryRelay>>,
    pub governance: Arc<GovernanceLedger>,
    pub escrow: Arc<SettlementEscrow>,
    pub config: Config,
}

impl TestNetwork {
    /// Network with `relay_count` in-memory relays.
    pub fn new(relay_count: usize) -> Self {
        init_logging();
        let relays = (0..relay_count)
            .map(|i| Arc::new(MemoryRelay::new(format!("mem://relay-{}", i))))
            .collect();
        Self {
            keys: Arc::new(IdentityKeyStore::new()),
            relays,
            governance: Arc::new(GovernanceLedger::new(GovernanceConfig::default())),
            escrow: Arc::new(SettlementEscrow::new(EscrowConfig::default())),
            config: Config::default(),
        }
    }

    pub fn client(&self) -> Arc<RelayClient> {
        let endpoints: Vec<Arc<dyn RelayEndpoint>> = self
            .relays
            .iter()
            .map(|r| Arc::clone(r) as Arc<dyn RelayEndpoint>)
            .collect();
        Arc::new(RelayClient::new(endpoints, &self.config.relay))
    }

    /// Engine for `account`, settling through the shared escrow.
    pub fn engine(&self, account: &str) -> MatchingEngine {
        let identity = self
            .keys
            .identity(account)
            .expect("identity generation");
        let gateway: Arc<dyn SettlementGateway> = self.escrow.clone();
        MatchingEngine::new(
            identity,
            self.client(),
            Arc::clone(&self.governance),
            &self.config,
        )
        .with_settlement(gateway)
        .with_storage(Arc::new(MemoryStore::new()))
    }

    /// Engine that is already online as a driver at `location`.
    pub async fn online_driver(&self, account: &str, location: GeoPoint) -> MatchingEngine {
        let engine = self.engine(account);
        engine
            .go_online(DriverProfile::new(account, "Gray Toyota Corolla", 4.9), location)
            .await
            .expect("driver online");
        engine
    }

    /// Rider engine with `balance` deposited in the escrow.
    pub fn funded_rider(&self, account: &str, balance: u64) -> MatchingEngine {
        let engine = self.engine(account);
        self.escrow
            .deposit(engine.public_key(), balance)
            .expect("deposit");
        engine
    }

    pub fn set_all_online(&self, online: bool) {
        for relay in &self.relays {
            relay.set_online(online);
        }
    }
}

/// Request a ride and have `driver` bid on it; returns the searching ride.
pub async fn request_with_candidate(
    rider: &MatchingEngine,
    driver: &MatchingEngine,
    origin: GeoPoint,
    destination: GeoPoint,
    payment_method: PaymentMethod,
) -> Ride {
    let ride = rider
        .request_ride(origin, destination, payment_method)
        .await
        .expect("ride requested");
    driver
        .backfill_ride_requests()
        .await
        .expect("requests fetched");
    driver
        .submit_candidacy(&ride.ride_id)
        .await
        .expect("candidacy submitted");
    ride
}

/// Receive the next inbox event and apply it.
pub async fn deliver_next(engine: &MatchingEngine, inbox: &mut Subscription) -> EngineEvent {
    let event = inbox
        .recv_timeout(Duration::from_secs(2))
        .await
        .expect("event delivered");
    engine.handle_event(&event).await.expect("event handled")
}
