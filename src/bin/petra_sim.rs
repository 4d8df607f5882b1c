//! Headless defense simulation
//!
//! Drops a seeded raid on a small sandbox map and lets the military
//! coordinator defend against it, printing army and transport summaries.

use std::path::PathBuf;

use clap::Parser;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use petra_military::command::{Command, CommandQueue};
use petra_military::core::config::{load_config, PetraConfig};
use petra_military::core::types::{EntityId, PlayerId, Position};
use petra_military::sandbox::{Rect, Sandbox};
use petra_military::state::{Attack, Capturable, DamageSet, EntityClass, EntityInfo, EventBatch, GarrisonHolder};
use petra_military::MilitaryCoordinator;

const AI_PLAYER: PlayerId = 1;
const RAIDER: PlayerId = 2;

/// Petra defense simulator
#[derive(Parser, Debug)]
#[command(name = "petra_sim")]
#[command(about = "Run a seeded raid against the Petra defense and report what it did")]
struct Args {
    /// Number of AI turns to play
    #[arg(long, default_value_t = 60)]
    turns: u32,

    /// Seconds of game time per turn
    #[arg(long, default_value_t = 1.0)]
    turn_length: f64,

    /// Raiding units
    #[arg(long, default_value_t = 6)]
    raiders: u32,

    /// Defending soldiers
    #[arg(long, default_value_t = 8)]
    defenders: u32,

    /// Random seed for deterministic runs
    #[arg(long)]
    seed: Option<u64>,

    /// Put the raid on an island so defenders need ships
    #[arg(long)]
    island: bool,

    /// TOML configuration (defaults are used when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the final military state as JSON
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

fn soldier(owner: PlayerId, pos: Position, ranged: bool) -> EntityInfo {
    let kind = if ranged {
        EntityClass::RANGED
    } else {
        EntityClass::MELEE | EntityClass::INFANTRY
    };
    let attack = if ranged {
        Attack::ranged(DamageSet::pierce(6.0), 60.0)
    } else {
        Attack::melee(DamageSet::hack(5.5))
    };
    EntityInfo::new(EntityId(0), owner, EntityClass::UNIT | kind)
        .at(pos)
        .with_attack(attack)
        .with_attack(Attack::capture(2.5))
}

fn civic_centre(owner: PlayerId, pos: Position, num_players: usize) -> EntityInfo {
    let mut cc = EntityInfo::new(EntityId(0), owner, EntityClass::STRUCTURE | EntityClass::CIV_CENTRE).at(pos);
    cc.hitpoints = 3000.0;
    cc.max_hitpoints = 3000.0;
    cc.obstruction_radius = 12.0;
    cc.default_arrows = 3;
    cc.garrison = Some(GarrisonHolder::new(20, EntityClass::UNIT));
    let mut points = vec![0.0; num_players];
    points[owner as usize] = 2500.0;
    cc.capturable = Some(Capturable::new(points));
    cc
}

/// Home land on the west; with `island`, the raid lands on a second land
/// across a strait. Returns the world and the civic centre under attack.
fn build_world(args: &Args, rng: &mut ChaCha8Rng) -> (Sandbox, EntityId) {
    let num_players = 3;
    let mut world = Sandbox::new(AI_PLAYER, num_players);
    let home = world.add_land(Rect::new(0.0, 0.0, 300.0, 400.0));
    world.add_territory(Rect::new(0.0, 0.0, 300.0, 400.0), AI_PLAYER);
    let home_cc = world.spawn(civic_centre(AI_PLAYER, Position::new(120.0, 200.0), num_players));

    let (target, raid_center) = if args.island {
        let sea = world.add_sea(Rect::new(300.0, 0.0, 400.0, 400.0));
        let island = world.add_land(Rect::new(400.0, 0.0, 700.0, 400.0));
        world.add_territory(Rect::new(400.0, 0.0, 700.0, 400.0), AI_PLAYER);
        world.add_landing_zone(home, sea, Position::new(299.0, 200.0));
        world.add_landing_zone(island, sea, Position::new(400.0, 200.0));
        let island_cc = world.spawn(civic_centre(AI_PLAYER, Position::new(560.0, 200.0), num_players));
        for i in 0..2 {
            let mut ship = EntityInfo::new(EntityId(0), AI_PLAYER, EntityClass::UNIT | EntityClass::SHIP)
                .at(Position::new(320.0, 180.0 + 30.0 * i as f32));
            ship.sea = Some(sea);
            ship.garrison = Some(GarrisonHolder::new(10, EntityClass::UNIT));
            world.spawn(ship);
        }
        (island_cc, Position::new(590.0, 200.0))
    } else {
        (home_cc, Position::new(170.0, 220.0))
    };

    for i in 0..args.defenders {
        let pos = Position::new(rng.gen_range(40.0..110.0), rng.gen_range(120.0..280.0));
        world.spawn(soldier(AI_PLAYER, pos, i % 3 == 0));
    }
    let mut raiders = CommandQueue::new();
    for i in 0..args.raiders {
        let offset = Position::new(rng.gen_range(-20.0..20.0), rng.gen_range(-20.0..20.0));
        let id = world.spawn(soldier(RAIDER, raid_center + offset, i % 2 == 1));
        raiders.attack(id, target, false, false);
    }
    world.apply(raiders);
    (world, target)
}

fn print_summary(coordinator: &MilitaryCoordinator, world: &Sandbox, turn: u32) {
    let defense = coordinator.defense();
    println!(
        "turn {:>3}: {} defenders, {} raiders, {} armies, {} transports",
        turn,
        world.count_units(AI_PLAYER),
        world.count_units(RAIDER),
        defense.armies().len(),
        coordinator.transports().plans().len()
    );
    for army in defense.armies() {
        println!(
            "    {} {:?}: {} foes ({:.1}) vs {} own ({:.1})",
            army.id(),
            army.kind(),
            army.foe_entities().len(),
            army.foe_strength(),
            army.own_entities().len(),
            army.own_strength()
        );
    }
    for plan in coordinator.transports().plans() {
        println!("    {} {:?}", plan.id(), plan.state());
    }
}

fn run(args: &Args) -> petra_military::Result<()> {
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => PetraConfig::default(),
    };
    let seed = args.seed.unwrap_or_else(rand::random);
    info!("seed {}", seed);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let (mut world, cc) = build_world(args, &mut rng);
    let mut coordinator = MilitaryCoordinator::new(config);
    let mut events = EventBatch::new();
    let mut requests = 0;

    for turn in 0..args.turns {
        let commands = coordinator.run_turn(&world, &events);
        world.apply(commands);
        events = world.step(args.turn_length);

        let new_requests = world.requests().len();
        for request in &world.requests()[requests..] {
            if let Command::TrainEmergencyUnits { positions } = request {
                warn!("emergency production requested near {} threats", positions.len());
            }
        }
        requests = new_requests;

        if turn % 10 == 0 || turn + 1 == args.turns {
            print_summary(&coordinator, &world, turn);
        }
        if world.count_units(RAIDER) == 0 {
            println!("raid repelled on turn {}", turn);
            break;
        }
    }

    match petra_military::state::GameState::entity(&world, cc) {
        Some(ent) if ent.owner == AI_PLAYER => println!("civic centre held ({:.0} hp)", ent.hitpoints),
        Some(ent) => println!("civic centre lost to player {}", ent.owner),
        None => println!("civic centre destroyed"),
    }

    if let Some(path) = &args.snapshot {
        std::fs::write(path, coordinator.save()?)?;
        println!("snapshot written to {}", path.display());
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("petra_military=info")),
        )
        .init();

    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("petra_sim failed: {}", e);
        std::process::exit(1);
    }
}
