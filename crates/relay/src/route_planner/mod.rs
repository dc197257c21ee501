//! # Egress Route Planning
//!
//! Spreads outbound requests across a pool of local addresses and keeps
//! addresses that upstreams have rate limited out of rotation until their
//! cooldown lapses.

mod clock;
mod ip_block;

pub use clock::{Clock, ManualClock, SystemClock};
pub use ip_block::IpBlock;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Default ban length applied when an upstream answers 429.
pub const DEFAULT_BAN_COOLDOWN: Duration = Duration::from_millis(600_000);

/// Random picks attempted before falling back to a linear scan.
const RANDOM_ATTEMPTS: usize = 32;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum RoutePlannerError {
    #[error("No egress address available: all {0} candidates are banned or excluded")]
    NoAddressAvailable(String),
    #[error("Invalid IP block: {0}")]
    InvalidIpBlock(String),
    #[error("Route planner needs at least one IP block")]
    EmptyPool,
    #[error("Mixed address families are not supported: {0}")]
    MixedFamilies(String),
}

/// How the next address is picked from the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoutePlannerStrategy {
    /// Keep using the current address until it is banned, then move on.
    #[default]
    RotateOnBan,
    /// Cycle through the whole pool.
    RoundRobin,
    /// Pick a random address for each request.
    Random,
}

impl RoutePlannerStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RotateOnBan => "RotateOnBan",
            Self::RoundRobin => "RoundRobin",
            Self::Random => "Random",
        }
    }

    /// Name of the planner implementation reported to admin clients.
    pub fn class_name(&self) -> &'static str {
        match self {
            Self::RotateOnBan => "RotatingIpRoutePlanner",
            Self::RoundRobin | Self::Random => "BalancingIpRoutePlanner",
        }
    }
}

impl fmt::Display for RoutePlannerStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoutePlannerStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "rotateonban" => Ok(Self::RotateOnBan),
            "roundrobin" | "loadbalance" => Ok(Self::RoundRobin),
            "random" => Ok(Self::Random),
            _ => Err(format!(
                "unknown strategy `{s}`, expected rotate-on-ban, round-robin or random"
            )),
        }
    }
}

/// Route planner configuration.
#[derive(Debug, Clone)]
pub struct RoutePlannerConfig {
    pub ip_blocks: Vec<IpBlock>,
    /// Addresses inside the blocks that must never be handed out.
    pub excluded: Vec<IpAddr>,
    pub strategy: RoutePlannerStrategy,
    pub ban_cooldown: Duration,
}

impl Default for RoutePlannerConfig {
    fn default() -> Self {
        Self {
            ip_blocks: Vec::new(),
            excluded: Vec::new(),
            strategy: RoutePlannerStrategy::default(),
            ban_cooldown: DEFAULT_BAN_COOLDOWN,
        }
    }
}

impl RoutePlannerConfig {
    pub fn new(ip_blocks: Vec<IpBlock>) -> Self {
        Self {
            ip_blocks,
            ..Default::default()
        }
    }

    pub fn with_strategy(mut self, strategy: RoutePlannerStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_excluded(mut self, excluded: impl IntoIterator<Item = IpAddr>) -> Self {
        self.excluded.extend(excluded);
        self
    }

    pub fn with_ban_cooldown(mut self, cooldown: Duration) -> Self {
        self.ban_cooldown = cooldown;
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct Ban {
    until_ms: i64,
    cooldown_ms: i64,
}

#[derive(Debug, Default)]
struct PlannerState {
    bans: HashMap<IpAddr, Ban>,
    /// Pool-wide index of the next (round robin) or current (rotate on ban) address.
    cursor: u128,
    current: Option<IpAddr>,
}

impl PlannerState {
    fn prune(&mut self, now_ms: i64) {
        self.bans.retain(|_, ban| ban.until_ms > now_ms);
    }
}

/// Pool of egress addresses with per-address bans.
#[derive(Debug)]
pub struct RoutePlanner {
    blocks: Vec<IpBlock>,
    excluded: HashSet<IpAddr>,
    strategy: RoutePlannerStrategy,
    ban_cooldown: Duration,
    pool_size: u128,
    clock: Arc<dyn Clock>,
    state: Mutex<PlannerState>,
}

impl RoutePlanner {
    pub fn new(config: RoutePlannerConfig) -> Result<Self, RoutePlannerError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: RoutePlannerConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RoutePlannerError> {
        let first = config.ip_blocks.first().ok_or(RoutePlannerError::EmptyPool)?;
        if let Some(other) = config
            .ip_blocks
            .iter()
            .find(|b| b.is_ipv4() != first.is_ipv4())
        {
            return Err(RoutePlannerError::MixedFamilies(format!("{first} and {other}")));
        }

        let pool_size = config
            .ip_blocks
            .iter()
            .fold(0u128, |acc, b| acc.saturating_add(b.size()));

        info!(
            blocks = config.ip_blocks.len(),
            pool_size = %pool_size,
            strategy = %config.strategy,
            "Route planner initialized"
        );

        Ok(Self {
            blocks: config.ip_blocks,
            excluded: config.excluded.into_iter().collect(),
            strategy: config.strategy,
            ban_cooldown: config.ban_cooldown,
            pool_size,
            clock,
            state: Mutex::new(PlannerState::default()),
        })
    }

    pub fn strategy(&self) -> RoutePlannerStrategy {
        self.strategy
    }

    pub fn pool_size(&self) -> u128 {
        self.pool_size
    }

    pub fn default_cooldown(&self) -> Duration {
        self.ban_cooldown
    }

    /// Resolve a pool-wide index to `(block index, index in block, address)`.
    fn locate(&self, mut index: u128) -> Option<(usize, u128, IpAddr)> {
        for (block_index, block) in self.blocks.iter().enumerate() {
            let size = block.size();
            if index < size {
                return block
                    .address_at(index)
                    .map(|address| (block_index, index, address));
            }
            index -= size;
        }
        None
    }

    /// Reverse of [`Self::locate`] for an address inside the pool.
    fn position_of(&self, address: &IpAddr) -> Option<(usize, u128)> {
        self.blocks
            .iter()
            .enumerate()
            .find_map(|(i, block)| block.index_of(address).map(|offset| (i, offset)))
    }

    fn usable(&self, state: &PlannerState, address: &IpAddr) -> bool {
        !self.excluded.contains(address) && !state.bans.contains_key(address)
    }

    /// Upper bound on the candidates that must be inspected to find a usable
    /// address, if one exists.
    fn scan_limit(&self, state: &PlannerState) -> u128 {
        let blocked = (state.bans.len() + self.excluded.len()) as u128;
        self.pool_size.min(blocked.saturating_add(1))
    }

    /// Walk the pool from `start`, returning the first usable address and its
    /// pool-wide index.
    fn scan_from(&self, state: &PlannerState, start: u128) -> Option<(u128, IpAddr)> {
        let limit = self.scan_limit(state);
        let mut index = start % self.pool_size;
        for _ in 0..limit {
            if let Some((_, _, address)) = self.locate(index)
                && self.usable(state, &address)
            {
                return Some((index, address));
            }
            index = (index + 1) % self.pool_size;
        }
        None
    }

    /// Next address to use for an outbound request.
    pub fn get_ip(&self) -> Result<IpAddr, RoutePlannerError> {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        state.prune(now);

        let picked = match self.strategy {
            RoutePlannerStrategy::RotateOnBan => {
                let picked = self.scan_from(&state, state.cursor);
                if let Some((index, _)) = picked {
                    state.cursor = index;
                }
                picked
            }
            RoutePlannerStrategy::RoundRobin => {
                let picked = self.scan_from(&state, state.cursor);
                if let Some((index, _)) = picked {
                    state.cursor = (index + 1) % self.pool_size;
                }
                picked
            }
            RoutePlannerStrategy::Random => {
                let mut picked = None;
                for _ in 0..RANDOM_ATTEMPTS {
                    let index = rand::random_range(0..self.pool_size);
                    if let Some((_, _, address)) = self.locate(index)
                        && self.usable(&state, &address)
                    {
                        picked = Some((index, address));
                        break;
                    }
                }
                if picked.is_none() {
                    let start = rand::random_range(0..self.pool_size);
                    picked = self.scan_from(&state, start);
                }
                if let Some((index, _)) = picked {
                    state.cursor = index;
                }
                picked
            }
        };

        match picked {
            Some((_, address)) => {
                if state.current != Some(address) {
                    debug!(address = %address, strategy = %self.strategy, "Selected egress address");
                }
                state.current = Some(address);
                Ok(address)
            }
            None => {
                warn!(
                    banned = state.bans.len(),
                    pool_size = %self.pool_size,
                    "Every egress address is banned or excluded"
                );
                Err(RoutePlannerError::NoAddressAvailable(self.pool_size.to_string()))
            }
        }
    }

    /// Whether `address` is currently banned.
    pub fn is_banned(&self, address: &IpAddr) -> bool {
        let now = self.clock.now_ms();
        self.state
            .lock()
            .bans
            .get(address)
            .is_some_and(|ban| ban.until_ms > now)
    }

    /// Ban `address` for the configured default cooldown.
    pub fn ban_ip(&self, address: IpAddr) {
        self.ban_ip_for(address, self.ban_cooldown);
    }

    /// Ban `address` for `cooldown`. Banning again extends the ban, it never
    /// shortens one that is already running.
    pub fn ban_ip_for(&self, address: IpAddr, cooldown: Duration) {
        let now = self.clock.now_ms();
        let cooldown_ms = i64::try_from(cooldown.as_millis()).unwrap_or(i64::MAX);
        let until_ms = now.saturating_add(cooldown_ms);

        let mut state = self.state.lock();
        let ban = state.bans.entry(address).or_insert(Ban {
            until_ms,
            cooldown_ms,
        });
        if until_ms >= ban.until_ms {
            *ban = Ban {
                until_ms,
                cooldown_ms,
            };
        }
        info!(address = %address, cooldown_ms, "Banned egress address");
    }

    /// Lift the ban on `address`. Returns whether a ban was removed.
    pub fn free_ip(&self, address: &IpAddr) -> bool {
        let removed = self.state.lock().bans.remove(address).is_some();
        if removed {
            info!(address = %address, "Freed egress address");
        }
        removed
    }

    pub fn free_all(&self) {
        let mut state = self.state.lock();
        let count = state.bans.len();
        state.bans.clear();
        info!(count, "Freed all egress addresses");
    }

    /// Snapshot for the admin surface.
    pub fn status(&self) -> RoutePlannerStatus {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        state.prune(now);

        let mut failing_addresses: Vec<FailingAddress> = state
            .bans
            .iter()
            .map(|(address, ban)| FailingAddress::new(*address, ban.until_ms - ban.cooldown_ms))
            .collect();
        failing_addresses.sort_by_key(|f| f.failing_timestamp);

        let (block_index, ip_index) = state
            .current
            .and_then(|address| self.position_of(&address))
            .unwrap_or((0, 0));

        let first_block = self.blocks[0];
        RoutePlannerStatus {
            class: self.strategy.class_name().to_string(),
            details: RoutePlannerDetails {
                ip_block: IpBlockStatus {
                    kind: first_block.type_name().to_string(),
                    size: self.pool_size.to_string(),
                },
                failing_addresses,
                strategy: self.strategy.as_str().to_string(),
                current_address: state.current.map(|a| a.to_string()),
                block_index: block_index.to_string(),
                ip_index: ip_index.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoutePlannerStatus {
    pub class: String,
    pub details: RoutePlannerDetails,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoutePlannerDetails {
    pub ip_block: IpBlockStatus,
    pub failing_addresses: Vec<FailingAddress>,
    pub strategy: String,
    pub current_address: Option<String>,
    pub block_index: String,
    pub ip_index: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct IpBlockStatus {
    #[serde(rename = "type")]
    pub kind: String,
    pub size: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FailingAddress {
    pub failing_address: String,
    /// Epoch milliseconds at which the ban was applied.
    pub failing_timestamp: i64,
    pub failing_time: String,
}

impl FailingAddress {
    fn new(address: IpAddr, failing_timestamp: i64) -> Self {
        let failing_time = DateTime::<Utc>::from_timestamp_millis(failing_timestamp)
            .map(|t| t.format("%a %b %d %H:%M:%S UTC %Y").to_string())
            .unwrap_or_default();
        Self {
            failing_address: address.to_string(),
            failing_timestamp,
            failing_time,
        }
    }
}
