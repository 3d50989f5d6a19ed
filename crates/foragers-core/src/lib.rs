//! Core simulation kernel for the Foragers colony.
//!
//! A population of mobile agents hauls mass from resource deposits to a
//! warehouse, coordinating only through a shared spatial signal grid: each
//! tick every agent broadcasts its best-known distance estimates into a disk
//! of cells and listens at its own cell, adopting any strictly smaller
//! estimate it hears. The kernel owns the tick pipeline, the agent kinematic
//! model, the concurrent signal grid, and the resource/warehouse economy;
//! rendering and persistence collaborators observe it through a drained
//! event queue and the snapshot document.

use parking_lot::{Mutex, RwLock};
use rand::{Rng, SeedableRng, rngs::SmallRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use slotmap::{SlotMap, new_key_type};
use std::collections::HashMap;
use std::f64::consts::PI;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

new_key_type! {
    /// Stable generational handle for agents.
    pub struct AgentId;
}

new_key_type! {
    /// Stable generational handle for resource and warehouse deposits.
    pub struct DepositId;
}

const HALF_TURN: f64 = PI;
const FULL_TURN: f64 = std::f64::consts::TAU;

/// Sentinel distance estimate for an agent that has never touched the
/// matching entity type.
pub const UNKNOWN_DISTANCE: f64 = 10_000.0;

const TASK_SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

fn wrap_signed_angle(mut angle: f64) -> f64 {
    if angle.is_nan() {
        return 0.0;
    }
    while angle <= -HALF_TURN {
        angle += FULL_TURN;
    }
    while angle > HALF_TURN {
        angle -= FULL_TURN;
    }
    angle
}

/// High level simulation clock (ticks processed since boot).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Resets the tick counter back to zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Axis-aligned 2D position in world units.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    /// Construct a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared euclidean distance to `other`.
    #[must_use]
    pub fn distance_sq(self, other: Self) -> f64 {
        (self.x - other.x).powi(2) + (self.y - other.y).powi(2)
    }
}

/// Centered rectangular world boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    width: u32,
    height: u32,
}

impl Bounds {
    /// Construct a boundary of `width * height` world units centered on the
    /// origin.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// World width in units.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// World height in units.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Leftmost reachable x coordinate.
    #[must_use]
    pub fn min_x(&self) -> f64 {
        -(f64::from(self.width) / 2.0)
    }

    /// Rightmost reachable x coordinate.
    #[must_use]
    pub fn max_x(&self) -> f64 {
        f64::from(self.width) / 2.0
    }

    /// Topmost reachable y coordinate.
    #[must_use]
    pub fn min_y(&self) -> f64 {
        -(f64::from(self.height) / 2.0)
    }

    /// Bottommost reachable y coordinate.
    #[must_use]
    pub fn max_y(&self) -> f64 {
        f64::from(self.height) / 2.0
    }

    /// Sample a uniform point at least `margin` away from every edge.
    #[must_use]
    pub fn random_point(&self, margin: f64, rng: &mut SmallRng) -> Point {
        Point::new(
            rng.random_range(self.min_x() + margin..self.max_x() - margin),
            rng.random_range(self.min_y() + margin..self.max_y() - margin),
        )
    }

    /// Clamp `point` so a body of radius `margin` stays inside the boundary.
    #[must_use]
    pub fn clamp(&self, point: Point, margin: f64) -> Point {
        Point::new(
            point.x.clamp(self.min_x() + margin, self.max_x() - margin),
            point.y.clamp(self.min_y() + margin, self.max_y() - margin),
        )
    }
}

/// Errors raised when constructing world state.
#[derive(Debug, Error)]
pub enum WorldError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Static configuration for a Foragers world.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForagersConfig {
    /// Width of the world in world units.
    pub world_width: u32,
    /// Height of the world in world units.
    pub world_height: u32,
    /// Agents seeded by `start()`.
    pub initial_agents: u32,
    /// Resource deposits seeded by `start()`.
    pub initial_resources: u32,
    /// Warehouses seeded by `start()`.
    pub initial_warehouses: u32,
    /// Body radius of every agent.
    pub agent_radius: f64,
    /// Lower bound of the sampled per-agent speed.
    pub agent_speed_min: f64,
    /// Upper bound of the sampled per-agent speed.
    pub agent_speed_max: f64,
    /// Tick lifespan assigned to newly created agents.
    pub agent_ttl: u32,
    /// Broadcast disk radius in grid cells.
    pub shout_range: u32,
    /// Initial radius of a freshly generated resource deposit.
    pub resource_radius: f64,
    /// Nominal radius of a freshly generated warehouse.
    pub warehouse_radius: f64,
    /// Warehouse volume above which agent spawning starts draining it.
    pub warehouse_growth_threshold: f64,
    /// Warehouse volume consumed per spawned agent.
    pub agent_spawn_price: f64,
    /// Optional RNG seed for reproducible worlds.
    pub rng_seed: Option<u64>,
}

impl Default for ForagersConfig {
    fn default() -> Self {
        Self {
            world_width: 800,
            world_height: 800,
            initial_agents: 500,
            initial_resources: 2,
            initial_warehouses: 1,
            agent_radius: 1.0,
            agent_speed_min: 2.0,
            agent_speed_max: 3.0,
            agent_ttl: 4_000,
            shout_range: 50,
            resource_radius: 25.0,
            warehouse_radius: 25.0,
            warehouse_growth_threshold: 1_000.0,
            agent_spawn_price: 77.0,
            rng_seed: None,
        }
    }
}

impl ForagersConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), WorldError> {
        if self.world_width == 0 || self.world_height == 0 {
            return Err(WorldError::InvalidConfig(
                "world dimensions must be non-zero",
            ));
        }
        if self.agent_radius <= 0.0 {
            return Err(WorldError::InvalidConfig("agent_radius must be positive"));
        }
        if self.agent_speed_min <= 0.0 || self.agent_speed_min >= self.agent_speed_max {
            return Err(WorldError::InvalidConfig(
                "agent speed range must be positive and non-empty",
            ));
        }
        if self.agent_ttl == 0 {
            return Err(WorldError::InvalidConfig("agent_ttl must be non-zero"));
        }
        if self.resource_radius <= 0.0 || self.warehouse_radius <= 0.0 {
            return Err(WorldError::InvalidConfig("deposit radii must be positive"));
        }
        if self.agent_spawn_price <= 0.0 {
            return Err(WorldError::InvalidConfig(
                "agent_spawn_price must be positive",
            ));
        }
        if self.warehouse_growth_threshold < 0.0 {
            return Err(WorldError::InvalidConfig(
                "warehouse_growth_threshold must be non-negative",
            ));
        }
        let max_margin = self
            .agent_radius
            .max(self.resource_radius)
            .max(self.warehouse_radius);
        let min_extent = f64::from(self.world_width.min(self.world_height));
        if min_extent <= 2.0 * max_margin {
            return Err(WorldError::InvalidConfig(
                "world too small for the configured entity radii",
            ));
        }
        Ok(())
    }

    /// Returns the configured RNG seed, generating one from entropy if absent.
    fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::seed_from_u64(rand::random()),
        }
    }
}

/// A circular shared deposit: a resource pile or the warehouse.
///
/// `capacity` is the nominal volume of the deposit footprint (`pi * r^2`).
/// Radius tracks volume through the same area formula, except that a
/// warehouse holding more than its capacity keeps the larger radius until
/// spawning drains it back down.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deposit {
    pub position: Point,
    pub radius: f64,
    pub volume: f64,
    pub capacity: f64,
    pub valid: bool,
    /// Cosmetic render hint carried through snapshots.
    pub color: Option<String>,
}

impl Deposit {
    /// A full resource pile: volume starts at capacity.
    #[must_use]
    pub fn resource(position: Point, radius: f64) -> Self {
        let capacity = PI * radius * radius;
        Self {
            position,
            radius,
            volume: capacity,
            capacity,
            valid: true,
            color: Some("blue".to_owned()),
        }
    }

    /// An empty warehouse: volume starts at zero.
    #[must_use]
    pub fn warehouse(position: Point, radius: f64) -> Self {
        Self {
            position,
            radius,
            volume: 0.0,
            capacity: PI * radius * radius,
            valid: true,
            color: Some("orange".to_owned()),
        }
    }

    /// Circle-vs-circle collision against a body of radius `radius` at
    /// `point`.
    #[must_use]
    pub fn collides(&self, point: Point, radius: f64) -> bool {
        self.position.distance_sq(point) <= (self.radius + radius).powi(2)
    }
}

/// Deposits are contended by many agent tasks at once; every volume
/// mutation goes through the per-entity write lock.
pub type SharedDeposit = Arc<RwLock<Deposit>>;

/// Identity and last recorded position of a broadcasting agent.
///
/// The position is captured at broadcast time so listeners never chase a
/// live reference into the agent collection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalSource {
    pub agent: AgentId,
    pub position: Point,
}

/// One field of a signal cell: the minimum advertised distance this tick
/// and who advertised it. `sender == None` means the field is empty and its
/// stale `distance` is disregarded.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SignalSlot {
    pub distance: f64,
    pub sender: Option<SignalSource>,
}

/// Distance advertisement written into every cell of a shout disk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalMessage {
    pub resource_distance: f64,
    pub warehouse_distance: f64,
    pub source: SignalSource,
}

#[derive(Debug, Default)]
struct SignalCell {
    resource: Mutex<SignalSlot>,
    warehouse: Mutex<SignalSlot>,
}

/// Integer offsets `(dx, dy)` with `dx^2 + dy^2 <= radius^2`, cached per
/// radius and shared by every agent with the same shout range.
pub fn disk_offsets(radius: u32) -> Arc<Vec<(i32, i32)>> {
    static CACHE: OnceLock<RwLock<HashMap<u32, Arc<Vec<(i32, i32)>>>>> = OnceLock::new();
    let cache = CACHE.get_or_init(|| RwLock::new(HashMap::new()));
    if let Some(found) = cache.read().get(&radius) {
        return Arc::clone(found);
    }
    let mut cache = cache.write();
    Arc::clone(cache.entry(radius).or_insert_with(|| {
        let r = radius as i64;
        let r_sq = r * r;
        let mut points = Vec::new();
        for x in -r..=r {
            for y in -r..=r {
                if x * x + y * y <= r_sq {
                    points.push((x as i32, y as i32));
                }
            }
        }
        Arc::new(points)
    }))
}

/// Dense spatial message board covering the world's integer bounding rect.
///
/// Each cell carries two independently locked fields (distance to resource,
/// distance to warehouse); concurrent shouters compare-and-set the minimum
/// per field, so the combined result is order-independent up to ties. The
/// grid holds no cross-tick memory: `clear` empties every sender before
/// each tick's concurrent phase.
#[derive(Debug)]
pub struct SignalGrid {
    min_x: i64,
    min_y: i64,
    width: usize,
    height: usize,
    cells: Vec<SignalCell>,
}

impl SignalGrid {
    /// Allocate a grid covering `bounds` at one cell per world unit.
    #[must_use]
    pub fn new(bounds: Bounds) -> Self {
        let width = bounds.width() as usize;
        let height = bounds.height() as usize;
        Self {
            min_x: bounds.min_x().floor() as i64,
            min_y: bounds.min_y().floor() as i64,
            width,
            height,
            cells: (0..width * height).map(|_| SignalCell::default()).collect(),
        }
    }

    fn cell_index(&self, x: i64, y: i64) -> Option<usize> {
        let col = x - self.min_x;
        let row = y - self.min_y;
        if col >= 0 && row >= 0 && (col as usize) < self.width && (row as usize) < self.height {
            Some(row as usize * self.width + col as usize)
        } else {
            None
        }
    }

    /// Reset every cell to "no sender". Runs in the exclusive phase, so no
    /// locks are taken.
    pub fn clear(&mut self) {
        for cell in &mut self.cells {
            cell.resource.get_mut().sender = None;
            cell.warehouse.get_mut().sender = None;
        }
    }

    /// Write `message` into every cell within `range` of `center`,
    /// keeping the per-field minimum. Cells outside the world rect are
    /// skipped.
    pub fn shout(&self, center: Point, range: u32, message: &SignalMessage) {
        let offsets = disk_offsets(range);
        let cx = center.x.floor() as i64;
        let cy = center.y.floor() as i64;
        for &(dx, dy) in offsets.iter() {
            if let Some(index) = self.cell_index(cx + i64::from(dx), cy + i64::from(dy)) {
                let cell = &self.cells[index];
                Self::relax(&cell.resource, message.resource_distance, message.source);
                Self::relax(&cell.warehouse, message.warehouse_distance, message.source);
            }
        }
    }

    fn relax(slot: &Mutex<SignalSlot>, distance: f64, source: SignalSource) {
        let mut slot = slot.lock();
        if slot.sender.is_none() || distance < slot.distance {
            slot.distance = distance;
            slot.sender = Some(source);
        }
    }

    /// Read both fields of the cell containing `position`.
    ///
    /// # Panics
    ///
    /// Positions are clamped to world bounds before grid access; an
    /// out-of-rect read is an invariant violation and aborts.
    #[must_use]
    pub fn sample(&self, position: Point) -> (SignalSlot, SignalSlot) {
        let x = position.x.floor() as i64;
        let y = position.y.floor() as i64;
        let Some(index) = self.cell_index(x, y) else {
            panic!("signal grid access out of bounds: ({x}, {y})");
        };
        let cell = &self.cells[index];
        (*cell.resource.lock(), *cell.warehouse.lock())
    }
}

/// Derived agent state; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// Alive, carrying nothing: hunts resources.
    Empty,
    /// Alive, carrying cargo: hunts the warehouse.
    Full,
    /// Lifespan exhausted; frozen until the world reaps it.
    Dead,
}

/// Append-only log of listener/sender pairs recorded during the parallel
/// phase.
pub type CommunicationLog = Mutex<Vec<(AgentId, AgentId)>>;

/// A mobile foraging agent.
///
/// State is strictly derived from `ttl` and `carried_volume` (see
/// [`Agent::state`]); the distance counters grow by `speed` each tick and
/// are only lowered by contact or by hearing a smaller estimate on the
/// signal grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Agent {
    pub position: Point,
    /// Heading in radians, normalized to `[-pi, pi]`.
    pub heading: f64,
    pub speed: f64,
    /// Remaining lifespan in ticks; zero means dead.
    pub ttl: u32,
    pub capacity: f64,
    pub radius: f64,
    pub shout_range: u32,
    pub carried_volume: f64,
    pub distance_to_resource: f64,
    pub distance_to_warehouse: f64,
    pub(crate) death_announced: bool,
}

impl Agent {
    /// Create an agent at `position` with randomized speed and heading.
    #[must_use]
    pub fn spawn(position: Point, config: &ForagersConfig, rng: &mut SmallRng) -> Self {
        let radius = config.agent_radius;
        Self {
            position,
            heading: rng.random_range(-HALF_TURN..HALF_TURN),
            speed: rng.random_range(config.agent_speed_min..config.agent_speed_max),
            ttl: config.agent_ttl,
            capacity: PI * radius * radius,
            radius,
            shout_range: config.shout_range,
            carried_volume: 0.0,
            distance_to_resource: UNKNOWN_DISTANCE,
            distance_to_warehouse: UNKNOWN_DISTANCE,
            death_announced: false,
        }
    }

    /// Current state, derived from lifespan and cargo.
    #[must_use]
    pub fn state(&self) -> AgentState {
        if self.ttl == 0 {
            AgentState::Dead
        } else if self.carried_volume > 0.0 {
            AgentState::Full
        } else {
            AgentState::Empty
        }
    }

    /// Move one tick: age, displace with boundary clamping, then resolve
    /// contacts in resource-then-warehouse order.
    pub(crate) fn advance(&mut self, ctx: &TickContext<'_>, rng: &mut SmallRng) {
        if self.ttl == 0 {
            return;
        }
        self.ttl -= 1;
        if self.ttl == 0 {
            // A dying agent does not move on its last tick.
            return;
        }

        let mut dx = self.speed * self.heading.cos();
        let mut dy = self.speed * self.heading.sin();
        let bounds = ctx.bounds;
        let mut bounced = false;
        if self.position.x + dx + self.radius > bounds.max_x() {
            dx = bounds.max_x() - self.radius - self.position.x;
            bounced = true;
        }
        if self.position.x + dx - self.radius < bounds.min_x() {
            dx = bounds.min_x() + self.radius - self.position.x;
            bounced = true;
        }
        if self.position.y + dy + self.radius > bounds.max_y() {
            dy = bounds.max_y() - self.radius - self.position.y;
            bounced = true;
        }
        if self.position.y + dy - self.radius < bounds.min_y() {
            dy = bounds.min_y() + self.radius - self.position.y;
            bounced = true;
        }
        if bounced {
            self.heading = wrap_signed_angle(self.heading + rng.random_range(0.0..HALF_TURN));
        }

        let before = self.position;
        self.position.x += dx;
        self.position.y += dy;
        self.distance_to_resource += self.speed;
        self.distance_to_warehouse += self.speed;

        if let Some(resource_id) = ctx.economy.resource_at(self.position, self.radius) {
            if self.state() == AgentState::Empty {
                self.carried_volume = ctx.economy.grab(resource_id, self.capacity);
            }
            self.distance_to_resource = 0.0;
            self.heading = wrap_signed_angle(self.heading + HALF_TURN);
            self.position = before;
        }

        if let Some(warehouse_id) = ctx.economy.warehouse_at(self.position, self.radius) {
            if self.state() == AgentState::Full {
                self.carried_volume = ctx.economy.deposit_cargo(warehouse_id, self.carried_volume);
            }
            self.distance_to_warehouse = 0.0;
            self.heading = wrap_signed_angle(self.heading + HALF_TURN);
            self.position = before;
        }
    }

    /// Advertise both distance estimates into the shout disk. The
    /// `+shout_range` term stands in for signal decay over distance.
    pub fn broadcast(&self, id: AgentId, grid: &SignalGrid) {
        let message = SignalMessage {
            resource_distance: self.distance_to_resource + f64::from(self.shout_range),
            warehouse_distance: self.distance_to_warehouse + f64::from(self.shout_range),
            source: SignalSource {
                agent: id,
                position: self.position,
            },
        };
        grid.shout(self.position, self.shout_range, &message);
    }

    /// Relax both distance estimates from the cell under the agent. When a
    /// smaller estimate is adopted for the entity type the agent is hunting,
    /// the heading snaps toward the advertiser's recorded position and the
    /// pair is logged.
    pub fn listen(&mut self, id: AgentId, grid: &SignalGrid, log: &CommunicationLog) {
        let (resource, warehouse) = grid.sample(self.position);

        if let Some(source) = resource.sender
            && resource.distance < self.distance_to_resource
        {
            self.distance_to_resource = resource.distance;
            if self.state() == AgentState::Empty {
                self.heading = (source.position.y - self.position.y)
                    .atan2(source.position.x - self.position.x);
                log.lock().push((id, source.agent));
            }
        }

        if let Some(source) = warehouse.sender
            && warehouse.distance < self.distance_to_warehouse
        {
            self.distance_to_warehouse = warehouse.distance;
            if self.state() == AgentState::Full {
                self.heading = (source.position.y - self.position.y)
                    .atan2(source.position.x - self.position.x);
                log.lock().push((id, source.agent));
            }
        }
    }
}

/// Observable events emitted by the world and drained by collaborators
/// between ticks.
#[derive(Debug, Clone, PartialEq)]
pub enum WorldEvent {
    TickStarted(Tick),
    TickCompleted { tick: Tick, elapsed: Duration },
    AgentCreated(AgentId),
    AgentDied(AgentId),
    ResourceAppeared(DepositId),
    ResourceDepleted(DepositId),
    WarehouseAppeared(DepositId),
    AgentsCommunicated(AgentId, AgentId),
}

/// Side effects queued by the economy during the parallel phase and
/// committed single-threaded afterwards.
#[derive(Debug, Default)]
struct EconomyLedger {
    depleted: Vec<DepositId>,
    resource_refills: u32,
    agent_spawns: Vec<Point>,
}

/// Borrowed view of the deposit collections handed to agent tasks.
pub(crate) struct Economy<'a> {
    resources: &'a SlotMap<DepositId, SharedDeposit>,
    warehouses: &'a SlotMap<DepositId, SharedDeposit>,
    ledger: &'a Mutex<EconomyLedger>,
    growth_threshold: f64,
    spawn_price: f64,
}

impl Economy<'_> {
    fn contact(
        deposits: &SlotMap<DepositId, SharedDeposit>,
        position: Point,
        radius: f64,
    ) -> Option<DepositId> {
        deposits.iter().find_map(|(id, cell)| {
            let deposit = cell.read();
            (deposit.valid && deposit.collides(position, radius)).then_some(id)
        })
    }

    fn resource_at(&self, position: Point, radius: f64) -> Option<DepositId> {
        Self::contact(self.resources, position, radius)
    }

    fn warehouse_at(&self, position: Point, radius: f64) -> Option<DepositId> {
        Self::contact(self.warehouses, position, radius)
    }

    /// Transfer up to `requested` volume out of the resource. When the
    /// remainder can no longer satisfy a full grab, the deposit is
    /// invalidated and one replacement is queued. Contacting a deposit that
    /// lost the race to another grabber transfers zero; never an error.
    fn grab(&self, id: DepositId, requested: f64) -> f64 {
        let Some(cell) = self.resources.get(id) else {
            return 0.0;
        };
        let mut deposit = cell.write();
        if !deposit.valid || requested <= 0.0 {
            return 0.0;
        }
        let transferred = requested.min(deposit.volume);
        deposit.volume -= transferred;
        if deposit.volume < requested {
            deposit.valid = false;
            let mut ledger = self.ledger.lock();
            ledger.depleted.push(id);
            ledger.resource_refills += 1;
        } else {
            deposit.radius = (deposit.volume / PI).sqrt();
        }
        transferred
    }

    /// Accumulate `volume` into the warehouse; past the growth threshold the
    /// balance is drained in spawn-price chunks, each funding one agent just
    /// outside the warehouse rim. Returns the volume left uncredited
    /// (always zero: warehouses never refuse a drop).
    fn deposit_cargo(&self, id: DepositId, volume: f64) -> f64 {
        let Some(cell) = self.warehouses.get(id) else {
            return volume;
        };
        let mut warehouse = cell.write();
        warehouse.volume += volume;
        if warehouse.volume > self.growth_threshold {
            let mut ledger = self.ledger.lock();
            while warehouse.volume >= self.spawn_price {
                warehouse.volume -= self.spawn_price;
                ledger.agent_spawns.push(Point::new(
                    warehouse.position.x + warehouse.radius,
                    warehouse.position.y,
                ));
            }
        }
        // Grows with the stored volume but never shrinks below the nominal
        // capacity footprint.
        warehouse.radius = (warehouse.volume.max(warehouse.capacity) / PI).sqrt();
        0.0
    }
}

/// Shared references lent to agent tasks for the duration of one tick's
/// parallel phase.
pub(crate) struct TickContext<'a> {
    bounds: Bounds,
    grid: &'a SignalGrid,
    economy: Economy<'a>,
    communications: &'a CommunicationLog,
    deaths: &'a Mutex<Vec<AgentId>>,
}

/// Aggregate world state: entity collections, signal grid, economy and the
/// event queue.
pub struct World {
    config: ForagersConfig,
    bounds: Bounds,
    tick: Tick,
    rng: SmallRng,
    agents: SlotMap<AgentId, Agent>,
    resources: SlotMap<DepositId, SharedDeposit>,
    warehouses: SlotMap<DepositId, SharedDeposit>,
    grid: SignalGrid,
    communications: CommunicationLog,
    ledger: Mutex<EconomyLedger>,
    events: Vec<WorldEvent>,
    stop_requested: bool,
    volume_introduced: f64,
    volume_spent_on_spawns: f64,
    volume_discarded: f64,
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("tick", &self.tick)
            .field("agent_count", &self.agents.len())
            .field("resource_count", &self.resources.len())
            .field("warehouse_count", &self.warehouses.len())
            .finish()
    }
}

impl World {
    /// Instantiate an empty world using the supplied configuration.
    pub fn new(config: ForagersConfig) -> Result<Self, WorldError> {
        config.validate()?;
        let bounds = Bounds::new(config.world_width, config.world_height);
        let rng = config.seeded_rng();
        Ok(Self {
            grid: SignalGrid::new(bounds),
            bounds,
            rng,
            config,
            tick: Tick::zero(),
            agents: SlotMap::with_key(),
            resources: SlotMap::with_key(),
            warehouses: SlotMap::with_key(),
            communications: Mutex::new(Vec::new()),
            ledger: Mutex::new(EconomyLedger::default()),
            events: Vec::new(),
            stop_requested: false,
            volume_introduced: 0.0,
            volume_spent_on_spawns: 0.0,
            volume_discarded: 0.0,
        })
    }

    /// Restore a world from a snapshot document. The snapshot's world size
    /// overrides the configured one, unless it cannot host the configured
    /// entity radii, in which case the default size is used instead (a bad
    /// snapshot is recovered, never fatal). Restored agents start
    /// empty-handed.
    pub fn from_snapshot(
        mut config: ForagersConfig,
        snapshot: WorldSnapshot,
    ) -> Result<Self, WorldError> {
        config.world_width = snapshot.world.size.width;
        config.world_height = snapshot.world.size.height;
        if config.validate().is_err() {
            let fallback = WorldSize::default();
            warn!(
                width = snapshot.world.size.width,
                height = snapshot.world.size.height,
                "snapshot world size unusable, falling back to default"
            );
            config.world_width = fallback.width;
            config.world_height = fallback.height;
        }
        let mut world = Self::new(config)?;
        for doc in &snapshot.agents {
            let radius = world.config.agent_radius;
            let agent = Agent {
                position: world.bounds.clamp(doc.position, radius),
                heading: wrap_signed_angle(doc.heading),
                speed: doc.speed,
                ttl: doc.lifespan,
                capacity: PI * radius * radius,
                radius,
                shout_range: doc.shout_range,
                carried_volume: 0.0,
                distance_to_resource: doc.distance_to_resource,
                distance_to_warehouse: doc.distance_to_warehouse,
                death_announced: false,
            };
            let id = world.agents.insert(agent);
            world.events.push(WorldEvent::AgentCreated(id));
        }
        for doc in &snapshot.resources {
            world.volume_introduced += doc.volume;
            let id = world
                .resources
                .insert(Arc::new(RwLock::new(doc.restore())));
            world.events.push(WorldEvent::ResourceAppeared(id));
        }
        for doc in &snapshot.warehouses {
            world.volume_introduced += doc.volume;
            let id = world
                .warehouses
                .insert(Arc::new(RwLock::new(doc.restore())));
            world.events.push(WorldEvent::WarehouseAppeared(id));
        }
        Ok(world)
    }

    /// Seed the initial population and run the first tick.
    pub fn start(&mut self) {
        self.stop_requested = false;
        for _ in 0..self.config.initial_agents {
            let position = self
                .bounds
                .random_point(self.config.agent_radius, &mut self.rng);
            self.spawn_agent_at(position);
        }
        for _ in 0..self.config.initial_warehouses {
            self.request_new_warehouse();
        }
        for _ in 0..self.config.initial_resources {
            self.request_new_resource();
        }
        self.tick();
    }

    /// Request a cooperative stop; the driving collaborator checks the flag
    /// between ticks.
    pub fn stop(&mut self) {
        self.stop_requested = true;
    }

    /// Whether a cooperative stop has been requested.
    #[must_use]
    pub const fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// Advance the simulation by one tick.
    pub fn tick(&mut self) {
        let started = Instant::now();
        let tick = self.tick.next();
        self.events.push(WorldEvent::TickStarted(tick));

        self.sweep();
        self.communications.get_mut().clear();
        self.grid.clear();
        self.run_agent_phase();
        self.drain_ledger();
        self.drain_communications();

        self.tick = tick;
        self.events.push(WorldEvent::TickCompleted {
            tick,
            elapsed: started.elapsed(),
        });
    }

    /// Remove entities flagged in a prior tick: invalidated resources and
    /// agents whose death event has already been observed. Residual deposit
    /// volume and any cargo still aboard a reaped agent leave the world
    /// through the discard counter.
    fn sweep(&mut self) {
        let mut discarded = 0.0;
        self.resources.retain(|_, cell| {
            let deposit = cell.read();
            if deposit.valid {
                true
            } else {
                discarded += deposit.volume;
                false
            }
        });
        self.agents.retain(|_, agent| {
            if agent.death_announced {
                discarded += agent.carried_volume;
                false
            } else {
                true
            }
        });
        self.volume_discarded += discarded;
    }

    /// Parallel per-agent phase: move, broadcast, listen. There is no
    /// ordering guarantee between one agent's broadcast and another's
    /// listen within the same tick.
    fn run_agent_phase(&mut self) {
        if self.agents.is_empty() {
            return;
        }
        let phase_seed: u64 = self.rng.random();
        let deaths: Mutex<Vec<AgentId>> = Mutex::new(Vec::new());
        {
            let ctx = TickContext {
                bounds: self.bounds,
                grid: &self.grid,
                economy: Economy {
                    resources: &self.resources,
                    warehouses: &self.warehouses,
                    ledger: &self.ledger,
                    growth_threshold: self.config.warehouse_growth_threshold,
                    spawn_price: self.config.agent_spawn_price,
                },
                communications: &self.communications,
                deaths: &deaths,
            };
            let mut tasks: Vec<(AgentId, &mut Agent)> = self.agents.iter_mut().collect();
            tasks
                .par_iter_mut()
                .enumerate()
                .for_each(|(lane, (agent_id, agent))| {
                    let agent_id = *agent_id;
                    let mut rng = SmallRng::seed_from_u64(
                        phase_seed ^ (lane as u64 + 1).wrapping_mul(TASK_SEED_STRIDE),
                    );
                    if agent.state() == AgentState::Dead {
                        if !agent.death_announced {
                            agent.death_announced = true;
                            ctx.deaths.lock().push(agent_id);
                        }
                        return;
                    }
                    agent.advance(&ctx, &mut rng);
                    if agent.state() != AgentState::Dead {
                        agent.broadcast(agent_id, ctx.grid);
                        agent.listen(agent_id, ctx.grid, ctx.communications);
                    }
                });
        }
        for id in deaths.into_inner() {
            self.events.push(WorldEvent::AgentDied(id));
        }
    }

    /// Commit economy side effects queued during the parallel phase.
    fn drain_ledger(&mut self) {
        let ledger = std::mem::take(self.ledger.get_mut());
        for id in ledger.depleted {
            self.events.push(WorldEvent::ResourceDepleted(id));
        }
        for _ in 0..ledger.resource_refills {
            self.request_new_resource();
        }
        for position in ledger.agent_spawns {
            self.volume_spent_on_spawns += self.config.agent_spawn_price;
            self.spawn_agent_at(position);
        }
    }

    fn drain_communications(&mut self) {
        let pairs = std::mem::take(self.communications.get_mut());
        self.events
            .extend(pairs.into_iter().map(|(a, b)| WorldEvent::AgentsCommunicated(a, b)));
    }

    /// Generate a fresh resource deposit at a random location.
    pub fn request_new_resource(&mut self) -> DepositId {
        let radius = self.config.resource_radius;
        let position = self.bounds.random_point(radius, &mut self.rng);
        let deposit = Deposit::resource(position, radius);
        self.volume_introduced += deposit.volume;
        let id = self.resources.insert(Arc::new(RwLock::new(deposit)));
        self.events.push(WorldEvent::ResourceAppeared(id));
        id
    }

    /// Generate a fresh warehouse at a random location.
    pub fn request_new_warehouse(&mut self) -> DepositId {
        let radius = self.config.warehouse_radius;
        let position = self.bounds.random_point(radius, &mut self.rng);
        let deposit = Deposit::warehouse(position, radius);
        let id = self.warehouses.insert(Arc::new(RwLock::new(deposit)));
        self.events.push(WorldEvent::WarehouseAppeared(id));
        id
    }

    /// Spawn an agent at `position` (clamped into bounds).
    pub fn request_new_agent(&mut self, position: Point) -> AgentId {
        self.spawn_agent_at(position)
    }

    fn spawn_agent_at(&mut self, position: Point) -> AgentId {
        let position = self.bounds.clamp(position, self.config.agent_radius);
        let agent = Agent::spawn(position, &self.config, &mut self.rng);
        let id = self.agents.insert(agent);
        self.events.push(WorldEvent::AgentCreated(id));
        id
    }

    /// Transfer up to `requested_capacity` out of a resource, committing any
    /// triggered replenishment immediately.
    pub fn grab_resource(&mut self, id: DepositId, requested_capacity: f64) -> f64 {
        let transferred = self.economy().grab(id, requested_capacity);
        self.drain_ledger();
        transferred
    }

    /// Drop `volume` into a warehouse, committing any triggered agent
    /// spawns immediately. Returns the unused remainder (always zero).
    pub fn drop_resource(&mut self, id: DepositId, volume: f64) -> f64 {
        let unused = self.economy().deposit_cargo(id, volume);
        self.drain_ledger();
        unused
    }

    fn economy(&self) -> Economy<'_> {
        Economy {
            resources: &self.resources,
            warehouses: &self.warehouses,
            ledger: &self.ledger,
            growth_threshold: self.config.warehouse_growth_threshold,
            spawn_price: self.config.agent_spawn_price,
        }
    }

    /// Drain all events accumulated since the last call.
    pub fn drain_events(&mut self) -> Vec<WorldEvent> {
        std::mem::take(&mut self.events)
    }

    /// Immutable access to configuration.
    #[must_use]
    pub const fn config(&self) -> &ForagersConfig {
        &self.config
    }

    /// The world boundary.
    #[must_use]
    pub const fn bounds(&self) -> Bounds {
        self.bounds
    }

    /// Ticks processed so far.
    #[must_use]
    pub const fn current_tick(&self) -> Tick {
        self.tick
    }

    /// Read-only access to the agent collection.
    #[must_use]
    pub const fn agents(&self) -> &SlotMap<AgentId, Agent> {
        &self.agents
    }

    /// Mutable access to the agent collection (single-threaded phases only).
    pub const fn agents_mut(&mut self) -> &mut SlotMap<AgentId, Agent> {
        &mut self.agents
    }

    /// Borrow an agent by handle.
    #[must_use]
    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(id)
    }

    /// Number of live (and not yet reaped) agents.
    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Read-only access to the resource deposits.
    #[must_use]
    pub const fn resources(&self) -> &SlotMap<DepositId, SharedDeposit> {
        &self.resources
    }

    /// Read-only access to the warehouses.
    #[must_use]
    pub const fn warehouses(&self) -> &SlotMap<DepositId, SharedDeposit> {
        &self.warehouses
    }

    /// Sum of cargo currently carried by agents.
    #[must_use]
    pub fn carried_volume_total(&self) -> f64 {
        self.agents.values().map(|agent| agent.carried_volume).sum()
    }

    /// Sum of volume stored in all deposits, including invalidated ones not
    /// yet swept.
    #[must_use]
    pub fn deposit_volume_total(&self) -> f64 {
        self.resources
            .values()
            .chain(self.warehouses.values())
            .map(|cell| cell.read().volume)
            .sum()
    }

    /// Total volume ever introduced by resource generation or snapshot
    /// restore.
    #[must_use]
    pub const fn volume_introduced(&self) -> f64 {
        self.volume_introduced
    }

    /// Total warehouse volume consumed by agent spawning.
    #[must_use]
    pub const fn volume_spent_on_spawns(&self) -> f64 {
        self.volume_spent_on_spawns
    }

    /// Volume removed by the sweep: residue of depleted resources plus
    /// cargo aboard reaped agents.
    #[must_use]
    pub const fn volume_discarded(&self) -> f64 {
        self.volume_discarded
    }

    /// Capture the current world as a snapshot document.
    #[must_use]
    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            world: WorldDocument {
                size: WorldSize {
                    width: self.config.world_width,
                    height: self.config.world_height,
                },
            },
            agents: self.agents.values().map(AgentSnapshot::capture).collect(),
            resources: self
                .resources
                .values()
                .map(|cell| DepositSnapshot::capture(&cell.read()))
                .collect(),
            warehouses: self
                .warehouses
                .values()
                .map(|cell| DepositSnapshot::capture(&cell.read()))
                .collect(),
        }
    }
}

/// World dimensions block of the snapshot document.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorldSize {
    pub width: u32,
    pub height: u32,
}

impl Default for WorldSize {
    fn default() -> Self {
        Self {
            width: 800,
            height: 800,
        }
    }
}

/// Top-level `world` block of the snapshot document.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorldDocument {
    pub size: WorldSize,
}

/// Serialized agent entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSnapshot {
    pub position: Point,
    pub heading: f64,
    pub speed: f64,
    pub lifespan: u32,
    pub shout_range: u32,
    pub distance_to_resource: f64,
    pub distance_to_warehouse: f64,
}

impl AgentSnapshot {
    fn capture(agent: &Agent) -> Self {
        Self {
            position: agent.position,
            heading: agent.heading,
            speed: agent.speed,
            lifespan: agent.ttl,
            shout_range: agent.shout_range,
            distance_to_resource: agent.distance_to_resource,
            distance_to_warehouse: agent.distance_to_warehouse,
        }
    }
}

/// Serialized deposit entry; color is cosmetic and optional.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DepositSnapshot {
    pub position: Point,
    pub radius: f64,
    pub volume: f64,
    pub capacity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl DepositSnapshot {
    fn capture(deposit: &Deposit) -> Self {
        Self {
            position: deposit.position,
            radius: deposit.radius,
            volume: deposit.volume,
            capacity: deposit.capacity,
            color: deposit.color.clone(),
        }
    }

    fn restore(&self) -> Deposit {
        Deposit {
            position: self.position,
            radius: self.radius,
            volume: self.volume,
            capacity: self.capacity,
            valid: true,
            color: self.color.clone(),
        }
    }
}

/// Snapshot document exchanged with persistence collaborators.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorldSnapshot {
    pub world: WorldDocument,
    pub agents: Vec<AgentSnapshot>,
    pub resources: Vec<DepositSnapshot>,
    pub warehouses: Vec<DepositSnapshot>,
}

impl WorldSnapshot {
    /// Parse a snapshot document, falling back to the default (default
    /// world size, empty collections) on malformed input.
    #[must_use]
    pub fn from_json(text: &str) -> Self {
        serde_json::from_str(text).unwrap_or_else(|error| {
            warn!(%error, "malformed snapshot document, falling back to defaults");
            Self::default()
        })
    }

    /// Serialize the document as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_rng() -> SmallRng {
        SmallRng::seed_from_u64(7)
    }

    fn test_config() -> ForagersConfig {
        ForagersConfig {
            world_width: 120,
            world_height: 120,
            initial_agents: 0,
            resource_radius: 10.0,
            warehouse_radius: 10.0,
            ..ForagersConfig::default()
        }
    }

    fn agent_ids(count: usize) -> Vec<AgentId> {
        let mut arena: SlotMap<AgentId, ()> = SlotMap::with_key();
        (0..count).map(|_| arena.insert(())).collect()
    }

    #[test]
    fn wrap_signed_angle_stays_in_range() {
        assert!((wrap_signed_angle(3.0 * PI) - PI).abs() < 1e-12);
        assert!((wrap_signed_angle(-3.0 * PI) - PI).abs() < 1e-12);
        assert!((wrap_signed_angle(0.5) - 0.5).abs() < 1e-12);
        assert_eq!(wrap_signed_angle(f64::NAN), 0.0);
    }

    #[test]
    fn disk_offsets_match_circle_membership() {
        let offsets = disk_offsets(2);
        assert_eq!(offsets.len(), 13);
        assert!(offsets.iter().all(|&(x, y)| x * x + y * y <= 4));
        assert!(offsets.contains(&(0, 0)));
        assert!(offsets.contains(&(-2, 0)));
        assert!(!offsets.contains(&(2, 2)));
        // Second lookup reuses the cached allocation.
        assert!(Arc::ptr_eq(&offsets, &disk_offsets(2)));
    }

    #[test]
    fn grid_relax_is_order_independent() {
        let ids = agent_ids(2);
        let at = Point::new(0.5, 0.5);
        let message = |distance: f64, agent: AgentId| SignalMessage {
            resource_distance: distance,
            warehouse_distance: distance,
            source: SignalSource {
                agent,
                position: at,
            },
        };

        for order in [[0usize, 1], [1, 0]] {
            let grid = SignalGrid::new(Bounds::new(40, 40));
            let payload = [(5.0, ids[0]), (3.0, ids[1])];
            for index in order {
                let (distance, agent) = payload[index];
                grid.shout(at, 0, &message(distance, agent));
            }
            let (resource, warehouse) = grid.sample(at);
            assert_eq!(resource.distance, 3.0);
            assert_eq!(resource.sender.map(|s| s.agent), Some(ids[1]));
            assert_eq!(warehouse.distance, 3.0);
            assert_eq!(warehouse.sender.map(|s| s.agent), Some(ids[1]));
        }
    }

    #[test]
    fn grid_clear_resets_every_sender() {
        let ids = agent_ids(1);
        let mut grid = SignalGrid::new(Bounds::new(20, 20));
        let at = Point::new(0.0, 0.0);
        grid.shout(
            at,
            3,
            &SignalMessage {
                resource_distance: 1.0,
                warehouse_distance: 2.0,
                source: SignalSource {
                    agent: ids[0],
                    position: at,
                },
            },
        );
        grid.clear();
        for x in -5..5 {
            for y in -5..5 {
                let (resource, warehouse) =
                    grid.sample(Point::new(f64::from(x), f64::from(y)));
                assert!(resource.sender.is_none());
                assert!(warehouse.sender.is_none());
            }
        }
    }

    #[test]
    fn agent_state_is_derived_from_ttl_and_cargo() {
        let config = test_config();
        let mut rng = test_rng();
        let mut agent = Agent::spawn(Point::new(0.0, 0.0), &config, &mut rng);
        assert_eq!(agent.state(), AgentState::Empty);
        agent.carried_volume = 1.5;
        assert_eq!(agent.state(), AgentState::Full);
        // Lifespan exhaustion dominates even while carrying cargo.
        agent.ttl = 0;
        assert_eq!(agent.state(), AgentState::Dead);
    }

    #[test]
    fn agent_spawn_samples_configured_ranges() {
        let config = test_config();
        let mut rng = test_rng();
        for _ in 0..32 {
            let agent = Agent::spawn(Point::new(1.0, -1.0), &config, &mut rng);
            assert!(agent.speed >= config.agent_speed_min);
            assert!(agent.speed < config.agent_speed_max);
            assert!(agent.heading >= -PI && agent.heading <= PI);
            assert_eq!(agent.ttl, config.agent_ttl);
            assert_eq!(agent.carried_volume, 0.0);
            assert_eq!(agent.distance_to_resource, UNKNOWN_DISTANCE);
            assert_eq!(agent.distance_to_warehouse, UNKNOWN_DISTANCE);
        }
    }

    #[test]
    fn deposit_capacity_follows_area() {
        let resource = Deposit::resource(Point::new(1.0, 2.0), 25.0);
        assert!((resource.capacity - PI * 625.0).abs() < 1e-9);
        assert_eq!(resource.volume, resource.capacity);
        assert!(resource.valid);

        let warehouse = Deposit::warehouse(Point::new(0.0, 0.0), 25.0);
        assert_eq!(warehouse.volume, 0.0);
        assert!((warehouse.capacity - PI * 625.0).abs() < 1e-9);
    }

    #[test]
    fn deposit_collision_uses_summed_radii() {
        let deposit = Deposit::resource(Point::new(0.0, 0.0), 10.0);
        assert!(deposit.collides(Point::new(10.5, 0.0), 1.0));
        assert!(deposit.collides(Point::new(11.0, 0.0), 1.0));
        assert!(!deposit.collides(Point::new(11.5, 0.0), 1.0));
    }

    #[test]
    fn config_validation_rejects_degenerate_worlds() {
        let zero_width = ForagersConfig {
            world_width: 0,
            ..ForagersConfig::default()
        };
        assert!(zero_width.validate().is_err());

        let empty_speed_range = ForagersConfig {
            agent_speed_min: 3.0,
            agent_speed_max: 3.0,
            ..ForagersConfig::default()
        };
        assert!(empty_speed_range.validate().is_err());

        let free_spawns = ForagersConfig {
            agent_spawn_price: 0.0,
            ..ForagersConfig::default()
        };
        assert!(free_spawns.validate().is_err());

        let cramped = ForagersConfig {
            world_width: 40,
            world_height: 40,
            ..ForagersConfig::default()
        };
        assert!(cramped.validate().is_err());

        assert!(ForagersConfig::default().validate().is_ok());
    }

    #[test]
    fn malformed_snapshot_falls_back_to_defaults() {
        let snapshot = WorldSnapshot::from_json("{ this is not json");
        assert_eq!(snapshot.world.size.width, 800);
        assert_eq!(snapshot.world.size.height, 800);
        assert!(snapshot.agents.is_empty());
        assert!(snapshot.resources.is_empty());
        assert!(snapshot.warehouses.is_empty());
    }

    #[test]
    fn snapshot_json_round_trips() {
        let config = test_config();
        let mut rng = test_rng();
        let agent = Agent::spawn(Point::new(3.0, -4.0), &config, &mut rng);
        let snapshot = WorldSnapshot {
            world: WorldDocument::default(),
            agents: vec![AgentSnapshot::capture(&agent)],
            resources: vec![DepositSnapshot::capture(&Deposit::resource(
                Point::new(10.0, 10.0),
                10.0,
            ))],
            warehouses: vec![DepositSnapshot::capture(&Deposit::warehouse(
                Point::new(-10.0, -10.0),
                10.0,
            ))],
        };
        let json = snapshot.to_json().expect("serialize");
        let parsed = WorldSnapshot::from_json(&json);
        assert_eq!(parsed, snapshot);
    }

    #[test]
    fn broadcast_then_listen_adopts_smaller_estimate_and_snaps_heading() {
        let config = test_config();
        let mut rng = test_rng();
        let ids = agent_ids(2);
        let grid = SignalGrid::new(Bounds::new(120, 120));
        let log: CommunicationLog = Mutex::new(Vec::new());

        let mut speaker = Agent::spawn(Point::new(0.0, 0.0), &config, &mut rng);
        speaker.distance_to_resource = 100.0;

        let mut hearer = Agent::spawn(Point::new(10.0, 0.0), &config, &mut rng);
        hearer.heading = 0.0;

        speaker.broadcast(ids[0], &grid);
        hearer.listen(ids[1], &grid, &log);

        // Resource estimate adopted with the decay term added.
        assert_eq!(hearer.distance_to_resource, 150.0);
        // The speaker knows nothing about the warehouse, so nothing beats
        // the hearer's own estimate there.
        assert_eq!(hearer.distance_to_warehouse, UNKNOWN_DISTANCE);
        // Empty hearer re-orients straight at the speaker's recorded spot.
        assert!((hearer.heading - PI).abs() < 1e-12);
        assert_eq!(log.lock().as_slice(), &[(ids[1], ids[0])]);
    }

    #[test]
    fn listen_while_full_only_tracks_warehouse_advertisements() {
        let config = test_config();
        let mut rng = test_rng();
        let ids = agent_ids(2);
        let grid = SignalGrid::new(Bounds::new(120, 120));
        let log: CommunicationLog = Mutex::new(Vec::new());

        let mut speaker = Agent::spawn(Point::new(0.0, 0.0), &config, &mut rng);
        speaker.distance_to_resource = 10.0;
        speaker.distance_to_warehouse = 20.0;

        let mut hearer = Agent::spawn(Point::new(0.0, 10.0), &config, &mut rng);
        hearer.carried_volume = 1.0;
        hearer.heading = 0.0;

        speaker.broadcast(ids[0], &grid);
        hearer.listen(ids[1], &grid, &log);

        // Both estimates relax, but only the warehouse one re-orients a
        // full agent.
        assert_eq!(hearer.distance_to_resource, 60.0);
        assert_eq!(hearer.distance_to_warehouse, 70.0);
        assert!((hearer.heading - (-PI / 2.0)).abs() < 1e-12);
        assert_eq!(log.lock().as_slice(), &[(ids[1], ids[0])]);
    }
}
