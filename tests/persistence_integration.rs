//! Saving mid-raid and picking up where the save left off

use petra_military::core::types::{EntityId, PlayerId, Position};
use petra_military::sandbox::{Rect, Sandbox};
use petra_military::state::{Attack, DamageSet, EntityClass, EntityInfo, EventBatch};
use petra_military::{MilitaryCoordinator, PetraConfig};

fn raid() -> Sandbox {
    let mut world = Sandbox::new(1, 3);
    world.add_land(Rect::new(0.0, 0.0, 400.0, 400.0));
    world.add_territory(Rect::new(0.0, 0.0, 250.0, 400.0), 1);
    world.spawn(
        EntityInfo::new(EntityId(0), 1, EntityClass::STRUCTURE | EntityClass::CIV_CENTRE)
            .at(Position::new(100.0, 100.0)),
    );
    for i in 0..4 {
        soldier(&mut world, 2, 150.0 + 6.0 * i as f32, 130.0);
    }
    for i in 0..8 {
        soldier(&mut world, 1, 60.0, 60.0 + 8.0 * i as f32);
    }
    world
}

fn soldier(world: &mut Sandbox, owner: PlayerId, x: f32, z: f32) -> EntityId {
    world.spawn(
        EntityInfo::new(EntityId(0), owner, EntityClass::UNIT | EntityClass::INFANTRY)
            .at(Position::new(x, z))
            .with_attack(Attack::melee(DamageSet::hack(4.0))),
    )
}

#[test]
fn test_loaded_coordinator_plays_the_same_turn() {
    let mut world = raid();
    let mut coordinator = MilitaryCoordinator::new(PetraConfig::default());
    let mut events = EventBatch::new();
    for _ in 0..5 {
        let commands = coordinator.run_turn(&world, &events);
        world.apply(commands);
        events = world.step(1.0);
    }
    assert!(!coordinator.defense().armies().is_empty());

    let saved = coordinator.save().expect("save");
    let mut restored = MilitaryCoordinator::load(PetraConfig::default(), &saved).expect("load");
    assert_eq!(restored.save().expect("resave"), saved);

    let original = coordinator.run_turn(&world, &events);
    let replayed = restored.run_turn(&world, &events);
    assert_eq!(original, replayed);
    assert_eq!(coordinator.save().expect("save"), restored.save().expect("save"));
}

#[test]
fn test_snapshot_keeps_army_membership() {
    let mut world = raid();
    let mut coordinator = MilitaryCoordinator::new(PetraConfig::default());
    let mut events = EventBatch::new();
    for _ in 0..3 {
        let commands = coordinator.run_turn(&world, &events);
        world.apply(commands);
        events = world.step(1.0);
    }

    let restored = MilitaryCoordinator::load(PetraConfig::default(), &coordinator.save().expect("save")).expect("load");
    for (before, after) in coordinator.defense().armies().iter().zip(restored.defense().armies()) {
        assert_eq!(before.id(), after.id());
        assert_eq!(before.foe_entities(), after.foe_entities());
        assert_eq!(before.own_entities(), after.own_entities());
        for id in before.own_entities() {
            assert_eq!(restored.tags().army(*id), Some(before.id()));
        }
    }
}
