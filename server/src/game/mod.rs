//! Rules engine for the social-deduction game.
//!
//! The engine owns players, their roles and status logs, and the day/night
//! phase machine. It performs no I/O: everything observable is queued as a
//! [`GameEvent`] and drained by the owner with [`Game::take_events`].

pub mod roles;

use log::{debug, info, warn};
use rand::Rng;
use shared::{SerializedAlignment, SerializedRole};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub type PlayerId = String;

/// Status name marking a player as dead.
pub const DEAD: &str = "Dead";

pub type Effect = fn(&mut Game, &Action);
pub type WinPredicate = fn(&Game) -> bool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Day,
    Night,
}

#[derive(Clone)]
pub struct ActionDef {
    pub name: String,
    /// Lower values resolve first.
    pub priority: i32,
    /// Passive actions fire every night without being submitted.
    pub passive: bool,
    pub effect: Effect,
}

impl ActionDef {
    pub fn new(name: &str, priority: i32, effect: Effect) -> Self {
        Self {
            name: name.to_string(),
            priority,
            passive: false,
            effect,
        }
    }

    pub fn passive(name: &str, priority: i32, effect: Effect) -> Self {
        Self {
            passive: true,
            ..Self::new(name, priority, effect)
        }
    }
}

impl fmt::Debug for ActionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDef")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("passive", &self.passive)
            .finish()
    }
}

pub struct Alignment {
    pub name: String,
    pub has_won: WinPredicate,
    /// A side win never ends the game on its own.
    pub side_win: bool,
}

impl fmt::Debug for Alignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Alignment")
            .field("name", &self.name)
            .field("side_win", &self.side_win)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Role {
    pub name: String,
    pub actions: Vec<ActionDef>,
    pub alignment: Option<Arc<Alignment>>,
    pub vote_weight: Option<u32>,
}

impl Role {
    pub fn alignment_name(&self) -> Option<&str> {
        self.alignment.as_deref().map(|a| a.name.as_str())
    }
}

/// How many copies of a role to hand out.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Distribution {
    pub min: Option<usize>,
    pub max: Option<usize>,
    /// Keep assigning while the role's share of participants is below this.
    pub percentage: f64,
    /// Skip the role entirely below this many participants.
    pub min_players: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct RoleTemplate {
    pub role: Role,
    pub distribution: Distribution,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub name: String,
    pub applied_on_round: u32,
}

#[derive(Debug, Clone)]
pub struct Player {
    pub role: Role,
    /// Append-only log; the same status may appear more than once.
    pub statuses: Vec<Status>,
}

impl Player {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            statuses: Vec::new(),
        }
    }

    pub fn is_dead(&self) -> bool {
        self.statuses.iter().any(|s| s.name == DEAD)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vote {
    pub voter: PlayerId,
    pub target: PlayerId,
}

/// A night action submitted by (or injected for) a player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub actor: PlayerId,
    /// Index into the actor's role action list.
    pub index: usize,
    /// Empty for actions without a target.
    pub target: PlayerId,
    pub secondary_target: Option<PlayerId>,
}

impl Action {
    pub fn new(actor: impl Into<PlayerId>, index: usize, target: impl Into<PlayerId>) -> Self {
        Self {
            actor: actor.into(),
            index,
            target: target.into(),
            secondary_target: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameEvent {
    PlayerAssigned { player: PlayerId, role: SerializedRole },
    VoteResult(String),
    NightResult(Vec<String>),
    PlayerInfo { player: PlayerId, info: String },
    End { winners: Vec<String> },
}

#[derive(Debug)]
pub struct Game {
    players: BTreeMap<PlayerId, Player>,
    alignments: Vec<Arc<Alignment>>,
    round: u32,
    phase: Phase,
    events: Vec<GameEvent>,
}

impl Game {
    /// Deals roles to `participants` and queues one assignment event per
    /// player.
    pub fn new<R: Rng>(participants: &[PlayerId], templates: &[RoleTemplate], rng: &mut R) -> Self {
        let players = assign_roles(participants, templates, rng);
        let alignments = distinct_alignments(templates.iter().map(|t| &t.role));
        Self::build(players, alignments)
    }

    /// Builds a game with a fixed role per player.
    pub fn from_assignments<I>(assignments: I) -> Self
    where
        I: IntoIterator<Item = (PlayerId, Role)>,
    {
        let players: BTreeMap<PlayerId, Player> = assignments
            .into_iter()
            .map(|(id, role)| (id, Player::new(role)))
            .collect();
        let alignments = distinct_alignments(players.values().map(|p| &p.role));
        Self::build(players, alignments)
    }

    fn build(players: BTreeMap<PlayerId, Player>, alignments: Vec<Arc<Alignment>>) -> Self {
        let mut game = Self {
            players,
            alignments,
            round: 0,
            phase: Phase::Night,
            events: Vec::new(),
        };
        game.announce_assignments();
        game
    }

    fn announce_assignments(&mut self) {
        let mut events = Vec::with_capacity(self.players.len());

        for (id, player) in &self.players {
            info!("{} is {}", id, player.role.name);

            let alignment = player.role.alignment_name().map(|name| SerializedAlignment {
                name: name.to_string(),
                members: self
                    .players
                    .iter()
                    .filter(|(_, other)| other.role.alignment_name() == Some(name))
                    .map(|(other_id, _)| other_id.clone())
                    .collect(),
            });

            events.push(GameEvent::PlayerAssigned {
                player: id.clone(),
                role: SerializedRole {
                    name: player.role.name.clone(),
                    actions: player.role.actions.iter().map(|a| a.name.clone()).collect(),
                    alignment,
                },
            });
        }

        self.events.extend(events);
    }

    pub fn players(&self) -> &BTreeMap<PlayerId, Player> {
        &self.players
    }

    pub fn player(&self, id: &str) -> Option<&Player> {
        self.players.get(id)
    }

    pub fn player_mut(&mut self, id: &str) -> Option<&mut Player> {
        self.players.get_mut(id)
    }

    pub fn living_players(&self) -> impl Iterator<Item = (&PlayerId, &Player)> {
        self.players.iter().filter(|(_, p)| !p.is_dead())
    }

    pub fn alignments(&self) -> &[Arc<Alignment>] {
        &self.alignments
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Appends a status tagged with the current round.
    pub fn apply_status(&mut self, id: &str, name: &str) -> bool {
        let round = self.round;
        match self.players.get_mut(id) {
            Some(player) => {
                player.statuses.push(Status {
                    name: name.to_string(),
                    applied_on_round: round,
                });
                true
            }
            None => false,
        }
    }

    pub fn kill(&mut self, id: &str) -> bool {
        self.apply_status(id, DEAD)
    }

    /// Removes one death applied during the current round.
    pub fn revive(&mut self, id: &str) -> bool {
        let round = self.round;
        let Some(player) = self.players.get_mut(id) else {
            return false;
        };
        match player
            .statuses
            .iter()
            .position(|s| s.name == DEAD && s.applied_on_round == round)
        {
            Some(i) => {
                player.statuses.remove(i);
                true
            }
            None => false,
        }
    }

    /// Queues private information for one player.
    pub fn send_info(&mut self, player: &str, info: impl Into<String>) {
        self.events.push(GameEvent::PlayerInfo {
            player: player.to_string(),
            info: info.into(),
        });
    }

    pub fn take_events(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.events)
    }

    /// Resolves the day vote and moves to night.
    pub fn day(&mut self, votes: &[Vote]) {
        if self.phase != Phase::Day {
            debug!("Ignoring day resolution during {:?}", self.phase);
            return;
        }

        let mut tally: BTreeMap<&str, u32> = BTreeMap::new();
        for vote in votes {
            let Some(voter) = self.players.get(&vote.voter) else {
                continue;
            };
            if voter.is_dead() || !self.players.contains_key(&vote.target) {
                continue;
            }
            *tally.entry(vote.target.as_str()).or_default() += voter.role.vote_weight.unwrap_or(1);
        }

        match tally.values().copied().max() {
            None => self.events.push(GameEvent::VoteResult("No votes".to_string())),
            Some(top) => {
                let leaders: Vec<&str> = tally
                    .iter()
                    .filter(|(_, count)| **count == top)
                    .map(|(target, _)| *target)
                    .collect();

                if let [winner] = leaders.as_slice() {
                    let winner = winner.to_string();
                    info!("Vote result: {}", winner);
                    self.events.push(GameEvent::VoteResult(winner.clone()));
                    self.kill(&winner);
                    self.check_win();
                } else {
                    let result = format!("Tied: {}", leaders.join(", "));
                    info!("Vote result: {}", result);
                    self.events.push(GameEvent::VoteResult(result));
                }
            }
        }

        self.phase = Phase::Night;
    }

    /// Resolves the night's actions in priority order and moves to day.
    pub fn night(&mut self, submitted: Vec<Action>) {
        if self.phase != Phase::Night {
            debug!("Ignoring night resolution during {:?}", self.phase);
            return;
        }

        // passives are injected below, never taken from submissions
        let mut actions: Vec<Action> = submitted
            .into_iter()
            .filter(|a| match self.players.get(&a.actor) {
                Some(p) => !p.is_dead() && !p.role.actions.get(a.index).map_or(false, |def| def.passive),
                None => false,
            })
            .collect();

        for (id, player) in &self.players {
            for (index, action) in player.role.actions.iter().enumerate() {
                if action.passive {
                    actions.push(Action::new(id.clone(), index, ""));
                }
            }
        }

        let mut actions: Vec<(Action, ActionDef)> = actions
            .into_iter()
            .filter(|a| a.target.is_empty() || self.players.contains_key(&a.target))
            .filter_map(|a| {
                let def = self.players.get(&a.actor)?.role.actions.get(a.index)?.clone();
                Some((a, def))
            })
            .collect();
        actions.sort_by_key(|(_, def)| def.priority);

        for (action, def) in &actions {
            debug!("{} uses {} on {:?}", action.actor, def.name, action.target);
            (def.effect)(self, action);
        }

        let round = self.round;
        let results: Vec<String> = self
            .players
            .iter()
            .flat_map(|(id, player)| {
                player
                    .statuses
                    .iter()
                    .filter(move |s| s.applied_on_round == round)
                    .map(move |s| format!("{}: {}", id, s.name))
            })
            .collect();

        info!("Night result: {:?}", results);
        self.events.push(GameEvent::NightResult(results));
        self.check_win();

        self.round += 1;
        self.phase = Phase::Day;
    }

    fn check_win(&mut self) {
        let mut winners = Vec::new();
        let mut ended = false;

        for alignment in &self.alignments {
            if (alignment.has_won)(self) {
                winners.push(alignment.name.clone());
                ended |= !alignment.side_win;
            }
        }

        if ended {
            info!("Winners: {:?}", winners);
            self.events.push(GameEvent::End { winners });
        }
    }
}

fn distinct_alignments<'a>(roles: impl Iterator<Item = &'a Role>) -> Vec<Arc<Alignment>> {
    let mut alignments: Vec<Arc<Alignment>> = Vec::new();
    for alignment in roles.filter_map(|r| r.alignment.as_ref()) {
        if !alignments.iter().any(|a| a.name == alignment.name) {
            alignments.push(Arc::clone(alignment));
        }
    }
    alignments
}

fn assign_roles<R: Rng>(
    participants: &[PlayerId],
    templates: &[RoleTemplate],
    rng: &mut R,
) -> BTreeMap<PlayerId, Player> {
    let total = participants.len();
    let mut pool: Vec<PlayerId> = participants.to_vec();
    let mut assigned = BTreeMap::new();

    for template in templates {
        let dist = &template.distribution;
        if dist.min_players.map_or(false, |needed| needed > total) {
            continue;
        }

        let mut count = 0;
        let mut deal = |pool: &mut Vec<PlayerId>| -> bool {
            if pool.is_empty() {
                return false;
            }
            let player = pool.swap_remove(rng.gen_range(0..pool.len()));
            assigned.insert(player, Player::new(template.role.clone()));
            true
        };

        while count < dist.min.unwrap_or(0) && deal(&mut pool) {
            count += 1;
        }

        while (count as f64 / total as f64) < dist.percentage
            && dist.max.map_or(true, |max| count < max)
            && deal(&mut pool)
        {
            count += 1;
        }
    }

    for player in &pool {
        warn!("Unassigned player: {}", player);
    }

    assigned
}
