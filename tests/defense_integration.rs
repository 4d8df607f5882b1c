//! Defense scenarios played through the coordinator on a sandbox map

use petra_military::command::{Command, CommandQueue};
use petra_military::core::types::{EntityId, PlayerId, Position};
use petra_military::defense::{ArmyKind, ArmyState};
use petra_military::sandbox::{Rect, Sandbox};
use petra_military::state::{Attack, DamageSet, EntityClass, EntityInfo, EventBatch, GameState};
use petra_military::{MilitaryCoordinator, PetraConfig};

/// One land, ours on the west half
fn home() -> Sandbox {
    let mut world = Sandbox::new(1, 3);
    world.add_land(Rect::new(0.0, 0.0, 400.0, 400.0));
    world.add_territory(Rect::new(0.0, 0.0, 200.0, 400.0), 1);
    world
}

fn soldier(world: &mut Sandbox, owner: PlayerId, x: f32, z: f32) -> EntityId {
    world.spawn(
        EntityInfo::new(EntityId(0), owner, EntityClass::UNIT | EntityClass::INFANTRY)
            .at(Position::new(x, z))
            .with_attack(Attack::melee(DamageSet::hack(10.0))),
    )
}

#[test]
fn test_deficit_closes_once_defenders_match_the_foe() {
    let mut world = home();
    let foe = soldier(&mut world, 2, 100.0, 100.0);
    let a = soldier(&mut world, 1, 90.0, 100.0);
    let b = soldier(&mut world, 1, 90.0, 110.0);

    let mut config = PetraConfig::default();
    config.defense.defense_ratio.own = 1.0;
    let mut coordinator = MilitaryCoordinator::new(config);
    let mut commands = CommandQueue::new();
    let (mut ctx, defense, naval) = coordinator.parts(&world, &mut commands);

    let army_id = defense
        .make_into_army(&mut ctx, foe, ArmyKind::Default)
        .expect("army created");
    let army = defense.get_army_mut(army_id).expect("army exists");
    let foe_strength = army.foe_strength();
    assert!(foe_strength > 0.0);
    assert_eq!(army.own_strength(), 0.0);
    let deficit = army.needs_defenders(&ctx).expect("short of defenders");
    assert!((deficit - foe_strength).abs() < 1e-3);

    assert!(army.add_own(&mut ctx, a, false));
    assert!(army.needs_defenders(&ctx).map_or(true, |d| d < 1e-3));
    assert!(army.add_own(&mut ctx, b, false));
    assert!(army.own_strength() >= foe_strength);
    assert_eq!(army.needs_defenders(&ctx), None);

    // Nothing was sent across water
    assert!(naval.plans().is_empty());
}

#[test]
fn test_armies_that_drift_together_merge() {
    let mut world = home();
    let a = soldier(&mut world, 2, 100.0, 100.0);
    let b = soldier(&mut world, 2, 180.0, 100.0);
    let own_a = soldier(&mut world, 1, 90.0, 100.0);
    let own_b = soldier(&mut world, 1, 170.0, 100.0);

    let mut config = PetraConfig::default();
    config.defense.army_merge_size = 100.0;
    let mut coordinator = MilitaryCoordinator::new(config);

    let (first, second) = {
        let mut commands = CommandQueue::new();
        let (mut ctx, defense, naval) = coordinator.parts(&world, &mut commands);
        let first = defense.make_into_army(&mut ctx, a, ArmyKind::Default).expect("first army");
        let second = defense.make_into_army(&mut ctx, b, ArmyKind::Default).expect("second army");
        assert_ne!(first, second);
        for (army, own) in [(first, own_a), (second, own_b)] {
            let army = defense.get_army_mut(army).expect("army exists");
            army.add_own(&mut ctx, own, false);
            army.assign_unit(&mut ctx, naval, own);
        }
        (first, second)
    };

    // The second group closes in on the first; centroids refresh after the interval
    world.teleport(b, Position::new(105.0, 100.0));
    world.advance_time(6.0);

    let mut commands = CommandQueue::new();
    let (mut ctx, defense, naval) = coordinator.parts(&world, &mut commands);
    defense.check_enemy_armies(&mut ctx, naval);

    assert_eq!(defense.armies().len(), 1);
    assert!(defense.get_army(second).is_none());
    let merged = defense.get_army(first).expect("first army survives");
    let mut foes = merged.foe_entities().to_vec();
    foes.sort();
    assert_eq!(foes, vec![a, b]);
    let mut owns = merged.own_entities().to_vec();
    owns.sort();
    assert_eq!(owns, vec![own_a, own_b]);
    for id in [a, b, own_a, own_b] {
        assert_eq!(ctx.tags.army(id), Some(first));
    }
    assert!(merged.assignments().is_symmetric());
}

#[test]
fn test_last_foe_gone_clears_the_army() {
    let mut world = home();
    let foe = soldier(&mut world, 2, 300.0, 100.0);
    let near = soldier(&mut world, 1, 300.0, 110.0);
    let far = soldier(&mut world, 1, 305.0, 110.0);
    let mut tower = EntityInfo::new(EntityId(0), 1, EntityClass::STRUCTURE).at(Position::new(150.0, 100.0));
    tower.default_arrows = 2;
    tower.obstruction_radius = 6.0;
    let tower_pos = tower.position;
    world.spawn(tower);

    let mut coordinator = MilitaryCoordinator::new(PetraConfig::default());
    let mut commands = CommandQueue::new();
    let (mut ctx, defense, naval) = coordinator.parts(&world, &mut commands);
    let army_id = defense.make_into_army(&mut ctx, foe, ArmyKind::Default).expect("army created");
    let army = defense.get_army_mut(army_id).expect("army exists");
    army.add_own(&mut ctx, near, false);
    army.add_own(&mut ctx, far, false);

    assert!(army.remove_foe(&mut ctx, foe, None));
    assert_eq!(army.state(), ArmyState::Empty);
    // Both defenders stand on neutral ground: they fall back to our tower
    let dest = army.clear(&mut ctx, naval);
    assert_eq!(dest, tower_pos);
    assert!(army.own_entities().is_empty());
    for id in [foe, near, far] {
        assert_eq!(ctx.tags.army(id), None);
    }
    assert_eq!(ctx.tags.plan(near), None);
    assert!(ctx.commands.iter().any(|c| matches!(
        c,
        Command::MoveToRange { unit, min, .. } if *unit == far && *min == 6.0
    )));
}

#[test]
fn test_raid_is_repelled() {
    let mut world = home();
    world.spawn(
        EntityInfo::new(EntityId(0), 1, EntityClass::STRUCTURE | EntityClass::CIV_CENTRE)
            .at(Position::new(100.0, 100.0)),
    );
    let mut raiders = Vec::new();
    for i in 0..3 {
        let id = soldier(&mut world, 2, 140.0 + 4.0 * i as f32, 120.0);
        if let Some(ent) = world.entity_mut(id) {
            ent.hitpoints = 20.0;
            ent.max_hitpoints = 20.0;
        }
        raiders.push(id);
    }
    let defenders: Vec<EntityId> = (0..6).map(|i| soldier(&mut world, 1, 80.0, 80.0 + 5.0 * i as f32)).collect();

    let mut coordinator = MilitaryCoordinator::new(PetraConfig::default());
    let mut events = EventBatch::new();
    let mut saw_army = false;
    for _ in 0..40 {
        let commands = coordinator.run_turn(&world, &events);
        saw_army |= !coordinator.defense().armies().is_empty();
        world.apply(commands);
        events = world.step(1.0);
        if world.count_units(2) == 0 && coordinator.defense().armies().is_empty() && saw_army {
            break;
        }
    }
    // One more turn to digest the last events
    coordinator.run_turn(&world, &events);

    assert!(saw_army);
    for id in raiders {
        assert!(world.entity(id).is_none());
    }
    assert!(coordinator.defense().armies().is_empty());
    for id in defenders {
        assert_eq!(coordinator.tags().army(id), None);
        assert_eq!(coordinator.tags().plan(id), None);
    }
}

#[test]
fn test_enemy_in_enemy_territory_is_left_alone() {
    let mut world = home();
    world.add_territory(Rect::new(200.0, 0.0, 400.0, 400.0), 2);
    world.spawn(
        EntityInfo::new(EntityId(0), 1, EntityClass::STRUCTURE | EntityClass::CIV_CENTRE)
            .at(Position::new(190.0, 100.0)),
    );
    soldier(&mut world, 2, 220.0, 100.0);
    soldier(&mut world, 1, 100.0, 100.0);

    let mut coordinator = MilitaryCoordinator::new(PetraConfig::default());
    let mut events = EventBatch::new();
    for _ in 0..6 {
        let commands = coordinator.run_turn(&world, &events);
        world.apply(commands);
        events = world.step(1.0);
    }
    assert!(coordinator.defense().armies().is_empty());
}
