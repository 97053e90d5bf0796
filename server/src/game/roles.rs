//! Built-in alignments and role catalogs.

use super::{Action, ActionDef, Alignment, Distribution, Game, Role, RoleTemplate};
use crate::config::RoleCatalog;
use std::sync::Arc;

pub const MAFIA: &str = "Mafia";
pub const VILLAGE: &str = "Village";

fn living_in(game: &Game, alignment: &str) -> (usize, usize) {
    game.living_players()
        .fold((0, 0), |(inside, outside), (_, player)| {
            if player.role.alignment_name() == Some(alignment) {
                (inside + 1, outside)
            } else {
                (inside, outside + 1)
            }
        })
}

fn mafia_has_won(game: &Game) -> bool {
    let (mafia, others) = living_in(game, MAFIA);
    mafia >= others
}

fn village_has_won(game: &Game) -> bool {
    living_in(game, MAFIA).0 == 0
}

pub fn mafia() -> Arc<Alignment> {
    Arc::new(Alignment {
        name: MAFIA.to_string(),
        has_won: mafia_has_won,
        side_win: false,
    })
}

pub fn village() -> Arc<Alignment> {
    Arc::new(Alignment {
        name: VILLAGE.to_string(),
        has_won: village_has_won,
        side_win: false,
    })
}

fn kill(game: &mut Game, action: &Action) {
    game.kill(&action.target);
}

fn save(game: &mut Game, action: &Action) {
    game.revive(&action.target);
}

fn investigate(game: &mut Game, action: &Action) {
    let Some(target) = game.player(&action.target) else {
        return;
    };
    let alignment = target.role.alignment_name().unwrap_or(VILLAGE).to_string();
    game.send_info(&action.actor, format!("Target's alignment is {}", alignment));
}

fn shoot(game: &mut Game, action: &Action) {
    let shooter_dead = game.player(&action.actor).map_or(true, |p| p.is_dead());
    if shooter_dead {
        return;
    }
    let Some(target) = game.player(&action.target) else {
        return;
    };
    let friendly_fire = target.role.alignment_name() == Some(VILLAGE);

    game.kill(&action.target);
    if friendly_fire {
        game.kill(&action.actor);
    }
}

fn reveal(game: &mut Game, action: &Action) {
    game.apply_status(&action.actor, "Mayor");
    if let Some(player) = game.player_mut(&action.actor) {
        player.role.vote_weight = Some(2);
    }
}

fn role(name: &str, alignment: &Arc<Alignment>, actions: Vec<ActionDef>, distribution: Distribution) -> RoleTemplate {
    RoleTemplate {
        role: Role {
            name: name.to_string(),
            actions,
            alignment: Some(Arc::clone(alignment)),
            vote_weight: None,
        },
        distribution,
    }
}

fn exactly_one() -> Distribution {
    Distribution {
        min: Some(1),
        max: Some(1),
        ..Default::default()
    }
}

pub fn classic_roles() -> Vec<RoleTemplate> {
    let mafia = mafia();
    let village = village();

    vec![
        role("Godfather", &mafia, vec![ActionDef::new("Kill", 1, kill)], exactly_one()),
        role(
            "Mafia",
            &mafia,
            vec![],
            Distribution {
                percentage: 0.1,
                min_players: Some(6),
                ..Default::default()
            },
        ),
        role(
            "Doctor",
            &village,
            vec![ActionDef::new("Save", 2, save)],
            Distribution {
                min: Some(1),
                max: Some(2),
                percentage: 0.1,
                min_players: None,
            },
        ),
        role("Detective", &village, vec![ActionDef::new("Investigate", 100, investigate)], exactly_one()),
        role(
            "Villager",
            &village,
            vec![],
            Distribution {
                percentage: 1.0,
                ..Default::default()
            },
        ),
    ]
}

/// The classic catalog with Vigilante and Mayor dealt before the villagers.
pub fn extended_roles() -> Vec<RoleTemplate> {
    let mut roles = classic_roles();
    let village = roles
        .last()
        .and_then(|t| t.role.alignment.clone())
        .unwrap_or_else(self::village);

    let extra = vec![
        role(
            "Vigilante",
            &village,
            vec![ActionDef::new("Shoot", 4, shoot)],
            Distribution {
                min: Some(1),
                ..Default::default()
            },
        ),
        role("Mayor", &village, vec![ActionDef::new("Reveal", 79, reveal)], exactly_one()),
    ];

    let villager = roles.len() - 1;
    roles.splice(villager..villager, extra);
    roles
}

pub fn catalog(kind: RoleCatalog) -> Vec<RoleTemplate> {
    match kind {
        RoleCatalog::Classic => classic_roles(),
        RoleCatalog::Extended => extended_roles(),
    }
}
