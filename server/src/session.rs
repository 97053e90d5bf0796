//! Game session management
//!
//! Binds connections to participant groups, runs at most one [`Game`] per
//! group, and republishes engine events into the shared state cells:
//! - `room|group` holds the roster and game status
//! - `gameEvents|group` accumulates public results
//! - `playerInfo|user` and `playerRole|user` hold private per-player state
//!
//! All methods run on the server's event loop and never block.

use crate::config::{Config, RoleCatalog};
use crate::error::ProcedureError;
use crate::game::{roles, Action, Game, GameEvent, Phase, Vote};
use crate::procedures::ProcedureTable;
use crate::state_store::{StateCell, SyncContext};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::schema::{self, cells, procedures, AddressKind};
use shared::{ConnectionId, GameStatus, Room, SerializedRole, User};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

pub const ROOM: StateCell<Room> = StateCell::new(cells::ROOM);
pub const GAME_EVENTS: StateCell<Vec<String>> = StateCell::new(cells::GAME_EVENTS);
pub const PLAYER_INFO: StateCell<Vec<String>> = StateCell::new(cells::PLAYER_INFO);
pub const PLAYER_ROLE: StateCell<SerializedRole> = StateCell::new(cells::PLAYER_ROLE);

#[derive(Debug, Clone, PartialEq, Eq)]
struct Membership {
    user_id: String,
    group_id: String,
}

struct ActiveGame {
    game: Game,
    votes: Vec<Vote>,
    actions: Vec<Action>,
    /// Players whose connection left mid-game. Readiness does not wait for them.
    absent: HashSet<String>,
    phase_started: Instant,
}

impl ActiveGame {
    fn day_ready(&self) -> bool {
        let mut present = self
            .game
            .living_players()
            .filter(|(id, _)| !self.absent.contains(*id))
            .peekable();
        present.peek().is_some() && present.all(|(id, _)| self.votes.iter().any(|v| &v.voter == id))
    }

    /// Every present living player with something to do at night has submitted.
    fn night_ready(&self) -> bool {
        self.game
            .living_players()
            .filter(|(id, _)| !self.absent.contains(*id))
            .filter(|(_, player)| player.role.actions.iter().any(|a| !a.passive))
            .all(|(id, _)| self.actions.iter().any(|a| &a.actor == id))
    }

    fn ready(&self) -> bool {
        match self.game.phase() {
            Phase::Day => self.day_ready(),
            Phase::Night => self.night_ready(),
        }
    }
}

fn status_for(phase: Phase) -> GameStatus {
    match phase {
        Phase::Day => GameStatus::InProgressDay,
        Phase::Night => GameStatus::InProgressNight,
    }
}

fn reject(reason: impl Into<String>) -> ProcedureError {
    let reason = reason.into();
    warn!("Rejected game command: {}", reason);
    ProcedureError::rejected(reason)
}

fn append(list: Option<Vec<String>>, items: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut list = list.unwrap_or_default();
    list.extend(items);
    list
}

pub struct GameSession {
    members: HashMap<ConnectionId, Membership>,
    games: HashMap<String, ActiveGame>,
    catalog: RoleCatalog,
    phase_duration: Option<Duration>,
    rng: StdRng,
}

impl GameSession {
    pub fn new(config: &Config) -> Self {
        Self::with_rng(config.roles, config.phase_duration(), StdRng::from_entropy())
    }

    pub fn with_rng(catalog: RoleCatalog, phase_duration: Option<Duration>, rng: StdRng) -> Self {
        Self {
            members: HashMap::new(),
            games: HashMap::new(),
            catalog,
            phase_duration,
            rng,
        }
    }

    /// The callable surface and readable cells exposed to clients.
    pub fn procedures() -> ProcedureTable<GameSession> {
        let mut table = ProcedureTable::new();
        table
            .register(
                procedures::CONFIRM_JOIN,
                |session: &mut GameSession, ctx, caller, (user, group_id): (User, String)| {
                    session.confirm_join(ctx, caller, user, group_id)
                },
            )
            .register(procedures::GAME_START, |session: &mut GameSession, ctx, caller, ()| {
                session.start_game(ctx, caller)
            })
            .register(
                procedures::GAME_VOTE,
                |session: &mut GameSession, ctx, caller, (target,): (String,)| session.vote(ctx, caller, target),
            )
            .register(
                procedures::GAME_ACTION,
                |session: &mut GameSession, ctx, caller, (target, index): (String, usize)| {
                    session.act(ctx, caller, target, index)
                },
            );
        for cell in schema::addresses(AddressKind::Subscription) {
            table.expose_cell(cell);
        }
        table
    }

    pub fn game(&self, group_id: &str) -> Option<&Game> {
        self.games.get(group_id).map(|active| &active.game)
    }

    fn membership(&self, caller: ConnectionId) -> Result<Membership, ProcedureError> {
        self.members
            .get(&caller)
            .cloned()
            .ok_or_else(|| reject("Join a group first"))
    }

    pub fn on_join(&mut self, connection: ConnectionId) {
        debug!("Connection {} is waiting to join a group", connection);
    }

    pub fn confirm_join(
        &mut self,
        ctx: &mut SyncContext<'_>,
        caller: ConnectionId,
        user: User,
        group_id: String,
    ) -> Result<(), ProcedureError> {
        if user.id.is_empty() || group_id.is_empty() {
            return Err(reject("User id and group id must not be empty"));
        }

        info!("{} joined group {}", user.username, group_id);
        if let Some(active) = self.games.get_mut(&group_id) {
            active.absent.remove(&user.id);
        }
        self.members.insert(
            caller,
            Membership {
                user_id: user.id.clone(),
                group_id: group_id.clone(),
            },
        );

        ROOM.update(ctx, Some(&group_id), |prev| match prev {
            None => Room::pending(vec![user]),
            Some(mut room) => {
                match room.users.iter_mut().find(|u| u.id == user.id) {
                    Some(existing) => {
                        debug!("User {} rejoined", user.username);
                        *existing = User { left: false, ..user };
                    }
                    None => room.users.push(user),
                }
                room
            }
        })?;

        Ok(())
    }

    pub fn start_game(&mut self, ctx: &mut SyncContext<'_>, caller: ConnectionId) -> Result<(), ProcedureError> {
        let group = self.membership(caller)?.group_id;

        let room = ROOM
            .get(ctx.store, Some(&group))?
            .ok_or_else(|| reject("Room does not exist"))?;
        if self.games.contains_key(&group) || !matches!(room.game_status, GameStatus::Pending | GameStatus::Ended) {
            return Err(reject("Game already started"));
        }

        let participants: Vec<String> = room.active_users().map(|u| u.id.clone()).collect();
        if participants.is_empty() {
            return Err(reject("No users in room to start game"));
        }

        info!("Starting game in group {} with {} players", group, participants.len());
        let game = Game::new(&participants, &roles::catalog(self.catalog), &mut self.rng);
        let status = status_for(game.phase());

        GAME_EVENTS.set(ctx, &Vec::new(), Some(&group))?;
        for player in &participants {
            PLAYER_INFO.set(ctx, &Vec::new(), Some(player))?;
        }

        self.games.insert(
            group.clone(),
            ActiveGame {
                game,
                votes: Vec::new(),
                actions: Vec::new(),
                absent: HashSet::new(),
                phase_started: Instant::now(),
            },
        );
        self.forward_events(ctx, &group)?;

        ROOM.set(
            ctx,
            &Room {
                users: room.users,
                game_status: status,
            },
            Some(&group),
        )?;
        Ok(())
    }

    pub fn vote(&mut self, ctx: &mut SyncContext<'_>, caller: ConnectionId, target: String) -> Result<(), ProcedureError> {
        let Membership { user_id, group_id } = self.membership(caller)?;
        let active = self
            .games
            .get_mut(&group_id)
            .ok_or_else(|| reject("No game in progress"))?;

        if active.game.phase() != Phase::Day {
            return Err(reject("Game is not in day phase"));
        }
        if active.game.player(&user_id).map_or(true, |p| p.is_dead()) {
            return Err(reject("Only living players can vote"));
        }
        if active.game.player(&target).is_none() {
            return Err(reject(format!("Unknown player {}", target)));
        }

        match active.votes.iter_mut().find(|v| v.voter == user_id) {
            Some(vote) => vote.target = target,
            None => active.votes.push(Vote { voter: user_id, target }),
        }

        self.resolve_ready(ctx, &group_id)
    }

    pub fn act(
        &mut self,
        ctx: &mut SyncContext<'_>,
        caller: ConnectionId,
        target: String,
        index: usize,
    ) -> Result<(), ProcedureError> {
        let Membership { user_id, group_id } = self.membership(caller)?;
        let active = self
            .games
            .get_mut(&group_id)
            .ok_or_else(|| reject("No game in progress"))?;

        if active.game.phase() != Phase::Night {
            return Err(reject("Game is not in night phase"));
        }
        let Some(actor) = active.game.player(&user_id).filter(|p| !p.is_dead()) else {
            return Err(reject("Only living players can act"));
        };
        match actor.role.actions.get(index) {
            Some(action) if !action.passive => {}
            _ => return Err(reject(format!("{} has no action {}", actor.role.name, index))),
        }
        if !target.is_empty() && active.game.player(&target).is_none() {
            return Err(reject(format!("Unknown player {}", target)));
        }

        match active
            .actions
            .iter_mut()
            .find(|a| a.actor == user_id && a.index == index)
        {
            Some(action) => action.target = target,
            None => active.actions.push(Action::new(user_id, index, target)),
        }

        self.resolve_ready(ctx, &group_id)
    }

    /// Notification that a connection went away.
    pub fn on_leave(&mut self, ctx: &mut SyncContext<'_>, connection: ConnectionId) -> Result<(), ProcedureError> {
        let Some(Membership { user_id, group_id }) = self.members.remove(&connection) else {
            return Ok(());
        };
        let Some(mut room) = ROOM.get(ctx.store, Some(&group_id))? else {
            return Ok(());
        };

        if room.game_status == GameStatus::Pending {
            room.users.retain(|u| u.id != user_id);
        } else {
            for user in room.users.iter_mut().filter(|u| u.id == user_id) {
                user.left = true;
            }
        }
        if let Some(active) = self.games.get_mut(&group_id) {
            active.absent.insert(user_id);
        }

        if room.active_users().next().is_none() {
            info!("Last user left group {}; closing room", group_id);
            self.games.remove(&group_id);
            room = Room::pending(Vec::new());
        }

        ROOM.set(ctx, &room, Some(&group_id))?;
        // the leaver may have been the last one the phase was waiting for
        self.resolve_ready(ctx, &group_id)
    }

    /// Force-resolves every phase that has been open longer than the
    /// configured duration. Returns how many phases were resolved.
    pub fn advance_expired(&mut self, ctx: &mut SyncContext<'_>, now: Instant) -> Result<usize, ProcedureError> {
        let Some(limit) = self.phase_duration else {
            return Ok(0);
        };

        let expired: Vec<String> = self
            .games
            .iter()
            .filter(|(_, active)| now.saturating_duration_since(active.phase_started) >= limit)
            .map(|(group, _)| group.clone())
            .collect();

        for group in &expired {
            info!("Phase timer expired in group {}", group);
            self.resolve(ctx, group)?;
        }
        Ok(expired.len())
    }

    fn resolve_ready(&mut self, ctx: &mut SyncContext<'_>, group: &str) -> Result<(), ProcedureError> {
        while self.games.get(group).map_or(false, ActiveGame::ready) {
            self.resolve(ctx, group)?;
        }
        Ok(())
    }

    fn resolve(&mut self, ctx: &mut SyncContext<'_>, group: &str) -> Result<(), ProcedureError> {
        let Some(active) = self.games.get_mut(group) else {
            return Ok(());
        };

        match active.game.phase() {
            Phase::Day => {
                let votes = std::mem::take(&mut active.votes);
                active.game.day(&votes);
            }
            Phase::Night => {
                let actions = std::mem::take(&mut active.actions);
                active.game.night(actions);
            }
        }
        active.phase_started = Instant::now();

        self.forward_events(ctx, group)
    }

    fn forward_events(&mut self, ctx: &mut SyncContext<'_>, group: &str) -> Result<(), ProcedureError> {
        let Some(active) = self.games.get_mut(group) else {
            return Ok(());
        };

        let mut ended = false;
        for event in active.game.take_events() {
            match event {
                GameEvent::PlayerAssigned { player, role } => {
                    PLAYER_ROLE.set(ctx, &role, Some(&player))?;
                }
                GameEvent::VoteResult(result) => {
                    GAME_EVENTS.update(ctx, Some(group), |prev| append(prev, [result]))?;
                    set_status(ctx, group, GameStatus::InProgressNight)?;
                }
                GameEvent::NightResult(results) => {
                    GAME_EVENTS.update(ctx, Some(group), |prev| append(prev, results))?;
                    set_status(ctx, group, GameStatus::InProgressDay)?;
                }
                GameEvent::PlayerInfo { player, info } => {
                    PLAYER_INFO.update(ctx, Some(&player), |prev| append(prev, [info]))?;
                }
                GameEvent::End { winners } => {
                    GAME_EVENTS.update(ctx, Some(group), |prev| append(prev, winners))?;
                    set_status(ctx, group, GameStatus::Ended)?;
                    ended = true;
                }
            }
        }

        if ended {
            info!("Game in group {} is over", group);
            self.games.remove(group);
        }
        Ok(())
    }
}

fn set_status(ctx: &mut SyncContext<'_>, group: &str, status: GameStatus) -> Result<(), ProcedureError> {
    ROOM.update(ctx, Some(group), |prev| {
        let mut room = prev.unwrap_or_else(|| Room::pending(Vec::new()));
        room.game_status = status;
        room
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_manager::ClientManager;
    use crate::state_store::StateStore;
    use serde_json::json;

    struct Harness {
        session: GameSession,
        store: StateStore,
        clients: ClientManager,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_duration(None)
        }

        fn with_duration(phase_duration: Option<Duration>) -> Self {
            Self {
                session: GameSession::with_rng(RoleCatalog::Classic, phase_duration, StdRng::seed_from_u64(9)),
                store: StateStore::new(),
                clients: ClientManager::new(16),
            }
        }

        fn call<T>(
            &mut self,
            f: impl FnOnce(&mut GameSession, &mut SyncContext<'_>) -> Result<T, ProcedureError>,
        ) -> Result<T, ProcedureError> {
            let mut ctx = SyncContext::new(&mut self.store, &self.clients);
            f(&mut self.session, &mut ctx)
        }

        fn join(&mut self, connection: ConnectionId, user: &str, group: &str) {
            let user = User::new(user, user);
            let group = group.to_string();
            self.call(|s, ctx| s.confirm_join(ctx, connection, user, group)).unwrap();
        }

        fn room(&self, group: &str) -> Room {
            ROOM.get(&self.store, Some(group)).unwrap().unwrap()
        }

        fn events(&self, group: &str) -> Vec<String> {
            GAME_EVENTS.get(&self.store, Some(group)).unwrap().unwrap_or_default()
        }

        fn info(&self, user: &str) -> Vec<String> {
            PLAYER_INFO.get(&self.store, Some(user)).unwrap().unwrap_or_default()
        }

        fn role_of(&self, user: &str) -> String {
            PLAYER_ROLE.get(&self.store, Some(user)).unwrap().unwrap().name
        }

        /// Three players joined to "g1" on connections 1..=3 with a game started.
        fn started_trio() -> Self {
            let mut h = Self::new();
            h.join(1, "u1", "g1");
            h.join(2, "u2", "g1");
            h.join(3, "u3", "g1");
            h.call(|s, ctx| s.start_game(ctx, 1)).unwrap();
            h
        }

        fn user_with_role(&self, role: &str) -> (ConnectionId, String) {
            (1..=3)
                .map(|c| (c, format!("u{}", c)))
                .find(|(_, u)| self.role_of(u) == role)
                .unwrap()
        }
    }

    #[test]
    fn test_confirm_join_creates_pending_room() {
        let mut h = Harness::new();
        h.join(1, "u1", "g1");
        h.join(2, "u2", "g1");

        let room = h.room("g1");
        assert_eq!(room.game_status, GameStatus::Pending);
        let ids: Vec<&str> = room.users.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["u1", "u2"]);
        assert_eq!(h.session.membership(2).unwrap().group_id, "g1");
    }

    #[test]
    fn test_rejoin_replaces_roster_entry() {
        let mut h = Harness::new();
        h.join(1, "u1", "g1");
        let renamed = User::new("u1", "new name");
        h.call(|s, ctx| s.confirm_join(ctx, 2, renamed, "g1".to_string())).unwrap();

        let room = h.room("g1");
        assert_eq!(room.users.len(), 1);
        assert_eq!(room.users[0].username, "new name");
    }

    #[test]
    fn test_confirm_join_rejects_empty_group() {
        let mut h = Harness::new();
        let err = h
            .call(|s, ctx| s.confirm_join(ctx, 1, User::new("u1", "a"), String::new()))
            .unwrap_err();
        assert_eq!(err.status(), 409);
    }

    #[test]
    fn test_start_requires_membership() {
        let mut h = Harness::new();
        let err = h.call(|s, ctx| s.start_game(ctx, 1)).unwrap_err();
        assert_eq!(err.to_string(), "Join a group first");
    }

    #[test]
    fn test_start_publishes_roles_and_status() {
        let h = Harness::started_trio();

        assert_eq!(h.room("g1").game_status, GameStatus::InProgressNight);
        let mut roles: Vec<String> = ["u1", "u2", "u3"].iter().map(|u| h.role_of(u)).collect();
        roles.sort();
        assert_eq!(roles, vec!["Detective", "Doctor", "Godfather"]);
        assert!(h.events("g1").is_empty());
        assert!(h.session.game("g1").is_some());
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let mut h = Harness::started_trio();
        let err = h.call(|s, ctx| s.start_game(ctx, 2)).unwrap_err();
        assert_eq!(err.to_string(), "Game already started");
    }

    #[test]
    fn test_vote_outside_day_is_rejected() {
        let mut h = Harness::started_trio();
        let err = h.call(|s, ctx| s.vote(ctx, 1, "u2".to_string())).unwrap_err();
        assert_eq!(err.status(), 409);
        assert_eq!(err.to_string(), "Game is not in day phase");
    }

    #[test]
    fn test_action_validation() {
        let mut h = Harness::started_trio();
        let (doctor, _) = h.user_with_role("Doctor");

        let err = h.call(|s, ctx| s.act(ctx, doctor, "u1".to_string(), 3)).unwrap_err();
        assert_eq!(err.to_string(), "Doctor has no action 3");

        let err = h.call(|s, ctx| s.act(ctx, doctor, "nobody".to_string(), 0)).unwrap_err();
        assert_eq!(err.to_string(), "Unknown player nobody");
    }

    #[test]
    fn test_night_resolves_when_every_actor_submitted() {
        let mut h = Harness::started_trio();
        let (godfather, _) = h.user_with_role("Godfather");
        let (doctor, doctor_user) = h.user_with_role("Doctor");
        let (detective, _) = h.user_with_role("Detective");
        let godfather_user = format!("u{}", godfather);

        h.call(|s, ctx| s.act(ctx, godfather, doctor_user.clone(), 0)).unwrap();
        h.call(|s, ctx| s.act(ctx, doctor, doctor_user.clone(), 0)).unwrap();
        assert_eq!(h.room("g1").game_status, GameStatus::InProgressNight);

        let detective_user = format!("u{}", detective);
        h.call(|s, ctx| s.act(ctx, detective, godfather_user.clone(), 0)).unwrap();

        assert_eq!(h.room("g1").game_status, GameStatus::InProgressDay);
        assert!(h.events("g1").is_empty(), "the save left nothing to report");
        assert_eq!(h.info(&detective_user), vec!["Target's alignment is Mafia".to_string()]);
        assert_eq!(h.session.game("g1").unwrap().round(), 1);
    }

    #[test]
    fn test_repeat_action_replaces_target() {
        let mut h = Harness::started_trio();
        let (godfather, _) = h.user_with_role("Godfather");
        let (doctor, doctor_user) = h.user_with_role("Doctor");
        let (detective, detective_user) = h.user_with_role("Detective");

        h.call(|s, ctx| s.act(ctx, godfather, doctor_user.clone(), 0)).unwrap();
        h.call(|s, ctx| s.act(ctx, godfather, detective_user.clone(), 0)).unwrap();
        h.call(|s, ctx| s.act(ctx, doctor, doctor_user.clone(), 0)).unwrap();
        h.call(|s, ctx| s.act(ctx, detective, doctor_user.clone(), 0)).unwrap();

        // one mafia against one villager
        assert_eq!(
            h.events("g1"),
            vec![format!("{}: Dead", detective_user), "Mafia".to_string()]
        );
        assert_eq!(h.room("g1").game_status, GameStatus::Ended);
    }

    #[test]
    fn test_day_vote_resolves_and_ends_game() {
        let mut h = Harness::started_trio();
        let (godfather, godfather_user) = h.user_with_role("Godfather");
        let (doctor, doctor_user) = h.user_with_role("Doctor");
        let (detective, _) = h.user_with_role("Detective");

        h.call(|s, ctx| s.act(ctx, godfather, doctor_user.clone(), 0)).unwrap();
        h.call(|s, ctx| s.act(ctx, doctor, doctor_user.clone(), 0)).unwrap();
        h.call(|s, ctx| s.act(ctx, detective, godfather_user.clone(), 0)).unwrap();
        assert_eq!(h.room("g1").game_status, GameStatus::InProgressDay);

        h.call(|s, ctx| s.vote(ctx, godfather, doctor_user.clone())).unwrap();
        h.call(|s, ctx| s.vote(ctx, doctor, godfather_user.clone())).unwrap();
        h.call(|s, ctx| s.vote(ctx, godfather, godfather_user.clone())).unwrap();
        assert_eq!(h.room("g1").game_status, GameStatus::InProgressDay);
        h.call(|s, ctx| s.vote(ctx, detective, godfather_user.clone())).unwrap();

        assert_eq!(
            h.events("g1"),
            vec![godfather_user.clone(), "Village".to_string()]
        );
        assert_eq!(h.room("g1").game_status, GameStatus::Ended);
        assert!(h.session.game("g1").is_none());

        // a finished room can host another game
        h.call(|s, ctx| s.start_game(ctx, 1)).unwrap();
        assert_eq!(h.room("g1").game_status, GameStatus::InProgressNight);
        assert!(h.events("g1").is_empty());
    }

    #[test]
    fn test_leave_before_start_removes_user() {
        let mut h = Harness::new();
        h.join(1, "u1", "g1");
        h.join(2, "u2", "g1");

        h.call(|s, ctx| s.on_leave(ctx, 2)).unwrap();

        let ids: Vec<String> = h.room("g1").users.into_iter().map(|u| u.id).collect();
        assert_eq!(ids, vec!["u1".to_string()]);
        assert!(h.session.membership(2).is_err());
    }

    #[test]
    fn test_leave_during_game_marks_user_left() {
        let mut h = Harness::started_trio();

        h.call(|s, ctx| s.on_leave(ctx, 2)).unwrap();

        let room = h.room("g1");
        assert_eq!(room.users.len(), 3);
        assert!(room.users.iter().find(|u| u.id == "u2").unwrap().left);
        assert!(h.session.game("g1").is_some());
    }

    #[test]
    fn test_last_leave_destroys_game_and_resets_room() {
        let mut h = Harness::started_trio();

        for connection in 1..=3 {
            h.call(|s, ctx| s.on_leave(ctx, connection)).unwrap();
        }

        assert_eq!(h.room("g1"), Room::pending(Vec::new()));
        assert!(h.session.game("g1").is_none());
    }

    #[test]
    fn test_leave_is_idempotent() {
        let mut h = Harness::new();
        h.join(1, "u1", "g1");
        h.call(|s, ctx| s.on_leave(ctx, 1)).unwrap();
        h.call(|s, ctx| s.on_leave(ctx, 1)).unwrap();
        h.call(|s, ctx| s.on_leave(ctx, 99)).unwrap();
    }

    #[test]
    fn test_phase_timer_forces_resolution() {
        let mut h = Harness::with_duration(Some(Duration::from_secs(60)));
        h.join(1, "u1", "g1");
        h.join(2, "u2", "g1");
        h.join(3, "u3", "g1");
        h.call(|s, ctx| s.start_game(ctx, 1)).unwrap();

        let resolved = h.call(|s, ctx| s.advance_expired(ctx, Instant::now())).unwrap();
        assert_eq!(resolved, 0);

        let later = Instant::now() + Duration::from_secs(61);
        let resolved = h.call(|s, ctx| s.advance_expired(ctx, later)).unwrap();
        assert_eq!(resolved, 1);
        assert_eq!(h.room("g1").game_status, GameStatus::InProgressDay);
    }

    #[test]
    fn test_phase_timer_disabled_by_default() {
        let mut h = Harness::started_trio();
        let later = Instant::now() + Duration::from_secs(3600);
        assert_eq!(h.call(|s, ctx| s.advance_expired(ctx, later)).unwrap(), 0);
    }

    #[test]
    fn test_table_matches_shared_schema() {
        let table = GameSession::procedures();

        let mut calls: Vec<&str> = schema::addresses(AddressKind::Call).collect();
        calls.sort_unstable();
        assert_eq!(table.addresses(), calls);

        for cell in [ROOM.address(), GAME_EVENTS.address(), PLAYER_INFO.address(), PLAYER_ROLE.address()] {
            assert!(table.is_cell(cell), "{} is not exposed", cell);
        }
        assert!(!table.is_cell(procedures::GAME_VOTE));
    }

    #[test]
    fn test_night_does_not_wait_for_players_who_left() {
        let mut h = Harness::started_trio();
        let (godfather, _) = h.user_with_role("Godfather");
        let (doctor, doctor_user) = h.user_with_role("Doctor");
        let (detective, _) = h.user_with_role("Detective");

        h.call(|s, ctx| s.on_leave(ctx, detective)).unwrap();
        h.call(|s, ctx| s.act(ctx, godfather, doctor_user.clone(), 0)).unwrap();
        h.call(|s, ctx| s.act(ctx, doctor, doctor_user.clone(), 0)).unwrap();

        assert_eq!(h.session.game("g1").unwrap().phase(), Phase::Day);
        assert_eq!(h.room("g1").game_status, GameStatus::InProgressDay);
    }

    #[test]
    fn test_leaving_releases_a_waiting_phase() {
        let mut h = Harness::started_trio();
        let (godfather, _) = h.user_with_role("Godfather");
        let (doctor, doctor_user) = h.user_with_role("Doctor");
        let (detective, detective_user) = h.user_with_role("Detective");

        h.call(|s, ctx| s.act(ctx, godfather, doctor_user.clone(), 0)).unwrap();
        h.call(|s, ctx| s.act(ctx, doctor, doctor_user.clone(), 0)).unwrap();
        assert_eq!(h.session.game("g1").unwrap().phase(), Phase::Night);

        h.call(|s, ctx| s.on_leave(ctx, detective)).unwrap();
        assert_eq!(h.session.game("g1").unwrap().phase(), Phase::Day);

        // back in time for the vote, and counted again
        h.join(detective, &detective_user, "g1");
        let (godfather_user, target) = (format!("u{}", godfather), detective_user.clone());
        h.call(|s, ctx| s.vote(ctx, godfather, target.clone())).unwrap();
        h.call(|s, ctx| s.vote(ctx, doctor, godfather_user.clone())).unwrap();
        assert_eq!(h.session.game("g1").unwrap().phase(), Phase::Day);
    }

    #[test]
    fn test_table_dispatches_to_session() {
        let table = GameSession::procedures();
        let mut h = Harness::new();

        let mut ctx = SyncContext::new(&mut h.store, &h.clients);
        let result = table
            .invoke(
                &mut h.session,
                &mut ctx,
                4,
                "confirmJoin",
                vec![json!({"id": "u4", "username": "dora"}), json!("g2")],
            )
            .unwrap();
        assert_eq!(result, serde_json::Value::Null);

        let err = table
            .invoke(&mut h.session, &mut ctx, 4, "gameAction", vec![json!("u4")])
            .unwrap_err();
        assert_eq!(err.status(), 400);

        assert_eq!(h.room("g2").users[0].username, "dora");
    }
}
