use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use std::time::Instant;
use stratum::{Refusal, RegionService, ServiceConfig, ServiceStatus, logging};
use stratum_blocks::Block;
use stratum_geom::{CellBox, CellPos};
use stratum_select::{FillMatcher, FillStrategy};
use stratum_world::{MemoryWorld, WorldAccess};

#[derive(Parser, Debug)]
#[command(name = "stratum", about = "Copy, rotate and undo voxel regions on an in-memory world")]
struct Args {
    /// TOML service config
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    log_level: Option<String>,
    #[arg(long)]
    tick_budget_ms: Option<u64>,
    /// rotate | flood | abort
    #[arg(long, default_value = "rotate")]
    scenario: String,
}

const OWNER: u32 = 1;
const STAIR: u16 = 53;

fn demo_world(config: &ServiceConfig) -> Result<MemoryWorld, Box<dyn Error>> {
    let rules = config.load_variant_rules()?.with_facing_rule(STAIR);
    let mut world = MemoryWorld::new(0, 128).with_variant_rules(rules);
    world.fill_box(&CellBox::new(CellPos::new(-32, 0, -32), CellPos::new(63, 3, 63)), |p| {
        Block::new(if p.y == 3 { 2 } else { 1 }, 0)
    });
    // a small house with a stair facing east
    world.fill_box(&CellBox::new(CellPos::new(0, 4, 0), CellPos::new(6, 7, 4)), |p| {
        let wall = p.x == 0 || p.x == 6 || p.z == 0 || p.z == 4;
        if wall { Block::new(5, 0) } else { Block::AIR }
    });
    world.fill_box(&CellBox::new(CellPos::new(2, 4, 2), CellPos::new(2, 4, 2)), |_| Block::new(STAIR, 1));
    Ok(world)
}

fn report(svc: &RegionService<MemoryWorld>, label: &str, ticks: usize) {
    let stats = svc.world().stats();
    println!(
        "{label}: {ticks} ticks, {} voxel writes, {} light recomputes, {} resends, history {}",
        stats.voxel_writes,
        stats.light_recomputes,
        stats.resends_queued,
        svc.history().len()
    );
}

fn run_scenario(svc: &mut RegionService<MemoryWorld>, name: &str) -> Result<(), Box<dyn Error>> {
    let dest = CellPos::new(20, 4, 10);
    let region = (CellPos::new(18, 3, 8), (12, 8, 12));
    let before = svc.snapshot(region.0, region.1);

    let strategy = match name {
        "rotate" | "abort" => FillStrategy::Box {
            corner1: CellPos::new(0, 4, 0),
            corner2: CellPos::new(6, 7, 4),
        },
        "flood" => FillStrategy::FloodFill {
            start: CellPos::new(0, 4, 0),
            bounds: Some(CellBox::new(CellPos::new(-1, 4, -1), CellPos::new(7, 8, 5))),
            diagonal: false,
            matcher: FillMatcher::SameAsStart,
        },
        other => return Err(format!("unknown scenario {other:?}").into()),
    };
    svc.start_selection(OWNER, strategy)?;
    let ticks = svc.run_until_idle();
    report(svc, "select", ticks);

    let mirrored = name == "flood";
    let tx = svc.start_region_action(OWNER, dest, 1, mirrored)?;
    if name == "abort" {
        while let ServiceStatus::PerformingAction { percent } = svc.status() {
            if percent >= 40 {
                break;
            }
            svc.tick(Instant::now());
        }
        println!("status before abort: {:?}", svc.status());
        match svc.undo_current(OWNER) {
            Ok(_) => {}
            // finished inside the budget already
            Err(Refusal::UnknownAction) => {
                svc.undo_last(OWNER)?;
            }
            Err(e) => return Err(e.into()),
        }
        let ticks = svc.run_until_idle();
        report(svc, "abort and undo", ticks);
    } else {
        let ticks = svc.run_until_idle();
        report(svc, "action", ticks);
        println!("stair now reads {:?}", svc.world().voxel(CellPos::new(22, 4, 12)));
        let undone = svc.undo_last(OWNER)?;
        debug_assert_eq!(undone, tx);
        let ticks = svc.run_until_idle();
        report(svc, "undo", ticks);
    }

    svc.verify_region(&before, region.0)?;
    println!("transaction {tx}: destination restored");
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => ServiceConfig::load_from_path(path)?,
        None => ServiceConfig::default(),
    };
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if let Some(ms) = args.tick_budget_ms {
        config.tick_budget_ms = ms;
    }
    logging::init(&config.log_level, config.log_file.as_deref())?;
    log::info!("scenario {} with {:?}", args.scenario, config);

    let world = demo_world(&config)?;
    let mut svc = RegionService::new(world, config);
    run_scenario(&mut svc, &args.scenario)
}
