use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::fish::{home_tank_of, Fish};
use crate::message::Message;
use crate::types::{Direction, FishLocation, PeerId};
use crate::AquaProtocolError;

use super::effect::TankEffect;
use super::snapshot::{CompletionCallback, Edge, Snapshot, SnapshotAction, SnapshotPhase};
use super::{TankConfig, TankEvent, TankStatus};

/// Called with the resolved address of a name lookup, or with
/// `LookupTimedOut` once the lookup expires.
pub type ResolveCallback = Box<dyn FnOnce(Result<SocketAddr, AquaProtocolError>) + Send>;

struct PendingLookup {
    tank_id: PeerId,
    then: OnResolved,
}

enum OnResolved {
    Reply(ResolveCallback),
    /// Send a location request to the fish's home tank.
    Locate { fish_id: String },
}

/// Complete tank state: pure logic, no async, no network.
///
/// Every method returns `Vec<TankEffect>` describing what to send,
/// which timers to arm and what to tell the application.
pub struct TankState {
    config: TankConfig,
    local_addr: SocketAddr,
    id: Option<PeerId>,
    lease_time: Option<Duration>,
    left: Option<SocketAddr>,
    right: Option<SocketAddr>,
    fishies: Vec<Fish>,
    fish_counter: u32,
    has_token: bool,
    /// Bumped on every token arrival and release; timers carry the
    /// epoch they were armed in.
    token_epoch: u64,
    snapshot: Snapshot,
    locations: HashMap<String, FishLocation>,
    pending_lookups: HashMap<String, PendingLookup>,
    rng: StdRng,
    shutting_down: bool,
}

impl TankState {
    pub fn new(local_addr: SocketAddr, config: TankConfig) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            config,
            local_addr,
            id: None,
            lease_time: None,
            left: None,
            right: None,
            fishies: Vec::new(),
            fish_counter: 0,
            has_token: false,
            token_epoch: 0,
            snapshot: Snapshot::new(),
            locations: HashMap::new(),
            pending_lookups: HashMap::new(),
            rng,
            shutting_down: false,
        }
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn id(&self) -> Option<&PeerId> {
        self.id.as_ref()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn left(&self) -> Option<SocketAddr> {
        self.left
    }

    pub fn right(&self) -> Option<SocketAddr> {
        self.right
    }

    pub fn has_token(&self) -> bool {
        self.has_token
    }

    pub fn fishies(&self) -> &[Fish] {
        &self.fishies
    }

    pub fn snapshot_phase(&self) -> SnapshotPhase {
        self.snapshot.phase()
    }

    /// Where this tank believes `fish_id` is. Unseen ids default to left.
    pub fn location_of(&self, fish_id: &str) -> FishLocation {
        self.locations
            .get(fish_id)
            .copied()
            .unwrap_or(FishLocation::Left)
    }

    pub fn status(&self) -> TankStatus {
        TankStatus {
            id: self.id.clone(),
            local_addr: self.local_addr,
            left: self.left,
            right: self.right,
            has_token: self.has_token,
            fish: self.fishies.clone(),
            snapshot_phase: self.snapshot.phase(),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Join the ring.
    pub fn start(&self) -> Vec<TankEffect> {
        vec![self.to_broker(Message::RegisterRequest)]
    }

    /// Release the token if held, then leave the ring.
    pub fn shutdown(&mut self) -> Vec<TankEffect> {
        self.shutting_down = true;
        let mut effects = Vec::new();
        if self.has_token {
            match self.left {
                Some(left) if left != self.local_addr => effects.extend(self.release_token(left)),
                _ => tracing::info!("last tank in the ring, token retires with it"),
            }
        }
        if let Some(id) = self.id.clone() {
            tracing::info!("{id} leaving the ring");
            effects.push(self.to_broker(Message::DeregisterRequest { id }));
        }
        effects
    }

    pub fn on_renew_lease(&self) -> Vec<TankEffect> {
        if self.shutting_down || !self.config.renew_lease {
            return Vec::new();
        }
        let Some(lease) = self.lease_time else {
            return Vec::new();
        };
        vec![
            self.to_broker(Message::RegisterRequest),
            TankEffect::ScheduleRenewal { after: lease / 2 },
        ]
    }

    // ── Incoming messages ────────────────────────────────────────────

    pub fn handle_message(&mut self, sender: SocketAddr, message: Message) -> Vec<TankEffect> {
        tracing::trace!("{} from {sender}", message.kind());
        match message {
            Message::RegisterResponse { id, lease_time_ms } => self.on_registered(id, lease_time_ms),
            Message::NeighbourUpdate { side, address } => self.on_neighbour_update(side, address),
            Message::Token => self.on_token(),
            Message::HandoffRequest { fish } => self.on_fish_arrived(sender, fish),
            Message::SnapshotMarker => self.on_marker(sender),
            Message::SnapshotToken { accumulated_count } => {
                let actions = self.snapshot.on_token(accumulated_count);
                self.apply_snapshot(actions)
            }
            Message::LocationRequest { fish_id } => self.locate(&fish_id),
            Message::LocationUpdate {
                fish_id,
                disposition,
            } => {
                self.locations.insert(fish_id, disposition);
                Vec::new()
            }
            Message::NameResolutionResponse {
                address,
                request_id,
            } => self.on_name_resolved(address, request_id),
            Message::RegisterRequest
            | Message::DeregisterRequest { .. }
            | Message::NameResolutionRequest { .. }
            | Message::PoisonPill => {
                tracing::warn!("{} from {sender} is meant for the broker, dropping", message.kind());
                Vec::new()
            }
        }
    }

    fn on_registered(&mut self, id: PeerId, lease_time_ms: u64) -> Vec<TankEffect> {
        let renewed = self.id.is_some();
        if let Some(current) = &self.id {
            if current != &id {
                tracing::warn!("broker changed our id from {current} to {id}");
            }
        }
        self.id = Some(id.clone());
        let lease = Duration::from_millis(lease_time_ms);
        self.lease_time = Some(lease);

        let mut effects = vec![TankEffect::Emit(TankEvent::Registered {
            id: id.clone(),
            lease_time_ms,
            renewed,
        })];
        if renewed {
            return effects;
        }

        tracing::info!("registered as {id} (lease {lease_time_ms} ms)");
        if self.config.renew_lease && !lease.is_zero() {
            effects.push(TankEffect::ScheduleRenewal { after: lease / 2 });
        }
        if self.config.spawn_initial_fish {
            effects.extend(self.spawn_fish());
        }
        effects
    }

    fn on_neighbour_update(&mut self, side: Direction, address: SocketAddr) -> Vec<TankEffect> {
        let slot = match side {
            Direction::Left => &mut self.left,
            Direction::Right => &mut self.right,
        };
        if *slot == Some(address) {
            return Vec::new();
        }
        *slot = Some(address);
        tracing::debug!("{side} neighbour is now {address}");
        let mut effects = vec![TankEffect::Emit(TankEvent::NeighbourChanged { side, address })];
        let edge = match side {
            Direction::Left => Edge::Left,
            Direction::Right => Edge::Right,
        };
        let actions = self.snapshot.on_neighbour_changed(edge);
        effects.extend(self.apply_snapshot(actions));
        effects
    }

    // ── Token ────────────────────────────────────────────────────────

    fn on_token(&mut self) -> Vec<TankEffect> {
        if self.has_token {
            tracing::error!("received a second token, discarding it");
            return Vec::new();
        }
        self.has_token = true;
        self.token_epoch += 1;
        tracing::debug!("token acquired");
        vec![
            TankEffect::Emit(TankEvent::TokenAcquired),
            TankEffect::ArmTokenTimer {
                epoch: self.token_epoch,
                after: self.config.token_hold,
            },
        ]
    }

    /// The hold timer armed in `epoch` fired.
    pub fn on_token_timeout(&mut self, epoch: u64) -> Vec<TankEffect> {
        if !self.has_token || epoch != self.token_epoch {
            return Vec::new();
        }
        match self.left {
            Some(left) => self.release_token(left),
            None => {
                tracing::debug!("no left neighbour yet, keeping the token");
                vec![TankEffect::ArmTokenTimer {
                    epoch: self.token_epoch,
                    after: self.config.token_hold,
                }]
            }
        }
    }

    fn release_token(&mut self, to: SocketAddr) -> Vec<TankEffect> {
        self.has_token = false;
        self.token_epoch += 1;
        tracing::debug!("passing token to {to}");
        vec![
            TankEffect::Send {
                to,
                message: Message::Token,
            },
            TankEffect::Emit(TankEvent::TokenReleased { to }),
        ]
    }

    // ── Fish ─────────────────────────────────────────────────────────

    /// Advance every fish one step; hand off or bounce those at the edge.
    pub fn tick(&mut self) -> Vec<TankEffect> {
        let width = self.config.width;
        let step = self.config.fish_step;
        let mut effects = Vec::new();
        let mut staying = Vec::with_capacity(self.fishies.len());

        for mut fish in std::mem::take(&mut self.fishies) {
            fish.advance(step);
            if !fish.hits_edge(width) {
                staying.push(fish);
                continue;
            }
            match self.handoff_target(fish.direction) {
                Some(target) => effects.extend(self.hand_off(fish, target)),
                None => {
                    fish.reverse();
                    fish.x = fish.x.clamp(0, width);
                    effects.push(TankEffect::Emit(TankEvent::FishReversed {
                        fish_id: fish.id.clone(),
                    }));
                    staying.push(fish);
                }
            }
        }

        self.fishies = staying;
        effects
    }

    /// Where a fish heading `direction` should go, if it may leave.
    fn handoff_target(&self, direction: Direction) -> Option<SocketAddr> {
        if !self.has_token || self.id.is_none() {
            return None;
        }
        let neighbour = match direction {
            Direction::Left => self.left,
            Direction::Right => self.right,
        };
        if self.config.handoff_via_broker {
            neighbour.map(|_| self.config.broker_addr)
        } else {
            neighbour
        }
    }

    fn hand_off(&mut self, fish: Fish, target: SocketAddr) -> Vec<TankEffect> {
        self.locations
            .insert(fish.id.clone(), FishLocation::from(fish.direction));
        tracing::debug!("handing {} {} via {target}", fish.id, fish.direction);
        vec![
            TankEffect::Emit(TankEvent::FishDeparted {
                fish_id: fish.id.clone(),
                direction: fish.direction,
            }),
            TankEffect::Send {
                to: target,
                message: Message::HandoffRequest { fish },
            },
        ]
    }

    fn on_fish_arrived(&mut self, sender: SocketAddr, mut fish: Fish) -> Vec<TankEffect> {
        // A fish swimming right entered through our left edge.
        let edge = match fish.direction {
            Direction::Right => Edge::Left,
            Direction::Left => Edge::Right,
        };
        self.snapshot.record_arrival(edge);
        fish.set_to_start(self.config.width);
        self.locations.insert(fish.id.clone(), FishLocation::Here);
        let event = TankEvent::FishArrived {
            fish_id: fish.id.clone(),
            from: sender,
        };
        self.fishies.push(fish);
        vec![TankEffect::Emit(event)]
    }

    /// Spawn a fish at a random position, up to `max_fish`.
    pub fn spawn_fish(&mut self) -> Vec<TankEffect> {
        let Some(home) = self.id.clone() else {
            tracing::warn!("cannot spawn a fish before registration");
            return Vec::new();
        };
        if self.fishies.len() >= self.config.max_fish {
            tracing::debug!("tank is full ({} fish)", self.fishies.len());
            return Vec::new();
        }
        self.fish_counter += 1;
        let direction = if self.rng.random_bool(0.5) {
            Direction::Left
        } else {
            Direction::Right
        };
        let x = self.rng.random_range(0..=self.config.width.max(0));
        let y = self.rng.random_range(0..=self.config.height.max(0));
        let fish = Fish::new(Fish::id_for(self.fish_counter, &home), x, y, direction);
        self.locations.insert(fish.id.clone(), FishLocation::Here);
        let event = TankEvent::FishSpawned {
            fish_id: fish.id.clone(),
        };
        self.fishies.push(fish);
        vec![TankEffect::Emit(event)]
    }

    // ── Snapshot ─────────────────────────────────────────────────────

    pub fn can_initiate_snapshot(&self) -> Result<(), AquaProtocolError> {
        if self.left.is_none() || self.right.is_none() {
            return Err(AquaProtocolError::NotInRing);
        }
        Ok(())
    }

    /// Start a snapshot round; `on_complete` receives the ring-wide total.
    ///
    /// An unfinished earlier round is abandoned rather than waited for:
    /// its collection token may have been lost.
    pub fn initiate_snapshot(&mut self, on_complete: CompletionCallback) -> Vec<TankEffect> {
        if let Err(e) = self.can_initiate_snapshot() {
            let effects = vec![TankEffect::Emit(TankEvent::Error {
                description: e.to_string(),
            })];
            on_complete(Err(e));
            return effects;
        }
        let local = self.fishies.len() as u64;
        let actions = self.snapshot.initiate(local, on_complete);
        self.apply_snapshot(actions)
    }

    fn on_marker(&mut self, sender: SocketAddr) -> Vec<TankEffect> {
        let from_left = self.left == Some(sender);
        let from_right = self.right == Some(sender);
        let local = self.fishies.len() as u64;
        let actions = self.snapshot.on_marker(from_left, from_right, local);
        self.apply_snapshot(actions)
    }

    fn apply_snapshot(&mut self, actions: Vec<SnapshotAction>) -> Vec<TankEffect> {
        let mut effects = Vec::new();
        for action in actions {
            match action {
                SnapshotAction::SendMarkers => {
                    for to in [self.left, self.right].into_iter().flatten() {
                        effects.push(TankEffect::Send {
                            to,
                            message: Message::SnapshotMarker,
                        });
                    }
                }
                SnapshotAction::ForwardToken { accumulated } => match self.left {
                    Some(to) => effects.push(TankEffect::Send {
                        to,
                        message: Message::SnapshotToken {
                            accumulated_count: accumulated,
                        },
                    }),
                    None => tracing::warn!("no left neighbour for the snapshot token"),
                },
                SnapshotAction::Started { count, initiator } => {
                    tracing::debug!("snapshot recorded {count} fish (initiator: {initiator})");
                    effects.push(TankEffect::Emit(TankEvent::SnapshotStarted { count, initiator }));
                }
                SnapshotAction::Closed { count } => {
                    effects.push(TankEffect::Emit(TankEvent::SnapshotClosed { count }));
                }
                SnapshotAction::Completed { total } => {
                    tracing::info!("snapshot complete: {total} fish in the ring");
                    if let Some(callback) = self.snapshot.take_callback() {
                        callback(Ok(total));
                    }
                    effects.push(TankEffect::Emit(TankEvent::SnapshotCompleted { total }));
                }
                SnapshotAction::Abandoned => {
                    tracing::warn!("unfinished snapshot round abandoned");
                    effects.push(TankEffect::Emit(TankEvent::SnapshotAbandoned));
                }
            }
        }
        effects
    }

    // ── Location ─────────────────────────────────────────────────────

    /// Toggle `fish_id` if it is here, otherwise follow the hint.
    pub fn locate(&mut self, fish_id: &str) -> Vec<TankEffect> {
        if let Some(fish) = self.fishies.iter_mut().find(|f| f.id == fish_id) {
            fish.toggle();
            return vec![TankEffect::Emit(TankEvent::FishToggled {
                fish_id: fish.id.clone(),
                toggled: fish.toggled,
            })];
        }
        let next = match self.location_of(fish_id) {
            FishLocation::Here => {
                tracing::warn!("{fish_id} should be here but is not");
                return Vec::new();
            }
            FishLocation::Left => self.left,
            FishLocation::Right => self.right,
        };
        let Some(to) = next else {
            tracing::warn!("no neighbour to forward location request for {fish_id}");
            return Vec::new();
        };
        vec![
            TankEffect::Send {
                to,
                message: Message::LocationRequest {
                    fish_id: fish_id.to_string(),
                },
            },
            TankEffect::Emit(TankEvent::LocationForwarded {
                fish_id: fish_id.to_string(),
                to,
            }),
        ]
    }

    /// Resolve the fish's home tank and ask it directly.
    pub fn locate_via_home(&mut self, fish_id: &str) -> Vec<TankEffect> {
        let Some(home) = home_tank_of(fish_id) else {
            return vec![TankEffect::Emit(TankEvent::Error {
                description: format!("no home tank in fish id {fish_id:?}"),
            })];
        };
        if self.id.as_ref() == Some(&home) {
            return self.locate(fish_id);
        }
        self.lookup(
            home,
            OnResolved::Locate {
                fish_id: fish_id.to_string(),
            },
        )
        .1
    }

    // ── Name resolution ──────────────────────────────────────────────

    /// Ask the broker for `tank_id`'s address. Returns the request id.
    pub fn resolve_name(
        &mut self,
        tank_id: PeerId,
        on_resolved: ResolveCallback,
    ) -> (String, Vec<TankEffect>) {
        self.lookup(tank_id, OnResolved::Reply(on_resolved))
    }

    /// Number of lookups still waiting for the broker.
    pub fn pending_lookups(&self) -> usize {
        self.pending_lookups.len()
    }

    /// The lookup `request_id` went unanswered for `lookup_timeout`.
    pub fn expire_lookup(&mut self, request_id: &str) -> Vec<TankEffect> {
        let Some(pending) = self.pending_lookups.remove(request_id) else {
            return Vec::new();
        };
        let tank_id = pending.tank_id.to_string();
        tracing::debug!("name resolution for {tank_id} expired");
        let description = match pending.then {
            OnResolved::Reply(callback) => {
                let e = AquaProtocolError::LookupTimedOut { tank_id };
                let description = e.to_string();
                callback(Err(e));
                description
            }
            OnResolved::Locate { fish_id } => {
                format!("home tank {tank_id} of {fish_id} did not resolve")
            }
        };
        vec![TankEffect::Emit(TankEvent::Error { description })]
    }

    fn lookup(&mut self, tank_id: PeerId, then: OnResolved) -> (String, Vec<TankEffect>) {
        let request_id = uuid::Uuid::new_v4().to_string();
        let effects = vec![
            self.to_broker(Message::NameResolutionRequest {
                tank_id: tank_id.clone(),
                request_id: request_id.clone(),
            }),
            TankEffect::ExpireLookup {
                request_id: request_id.clone(),
                after: self.config.lookup_timeout,
            },
        ];
        self.pending_lookups
            .insert(request_id.clone(), PendingLookup { tank_id, then });
        (request_id, effects)
    }

    fn on_name_resolved(&mut self, address: SocketAddr, request_id: String) -> Vec<TankEffect> {
        let Some(pending) = self.pending_lookups.remove(&request_id) else {
            tracing::debug!("name resolution response for unknown request {request_id}");
            return Vec::new();
        };
        let mut effects = vec![TankEffect::Emit(TankEvent::NameResolved {
            request_id,
            address,
        })];
        match pending.then {
            OnResolved::Reply(callback) => callback(Ok(address)),
            OnResolved::Locate { fish_id } => effects.push(TankEffect::Send {
                to: address,
                message: Message::LocationRequest { fish_id },
            }),
        }
        effects
    }

    fn to_broker(&self, message: Message) -> TankEffect {
        TankEffect::Send {
            to: self.config.broker_addr,
            message,
        }
    }
}
