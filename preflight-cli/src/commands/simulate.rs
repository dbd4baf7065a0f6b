//! Simulate command - drive the engine through a synthetic session.
//!
//! Registers a fixed demo catalog, runs startup, then replays a seeded
//! random stream of navigations, renders and scroll samples against the
//! engine. Finishes by printing the session report.

use std::sync::Arc;
use std::time::Duration;

use preflight::engine::{EngineConfig, PreloadEngine};
use preflight::loader::MockLoader;
use preflight::profile::{ConnectionInfo, EffectiveType, StaticProbe};
use preflight::registry::{ModuleDescriptor, ModulePriority};
use preflight::usage::{InteractionKind, ScrollDirection};
use preflight::viewport::{ElementGeometry, ViewportState};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::error::CliError;

/// Arguments for the simulate command.
pub struct SimulateArgs {
    /// RNG seed; the same seed replays the same session.
    pub seed: u64,
    /// Number of simulated interactions.
    pub interactions: u32,
    /// Reported device memory in GB.
    pub memory_gb: f64,
    /// Reported core count.
    pub cores: usize,
    /// Simulate a save-data connection.
    pub save_data: bool,
    /// Emit the report as JSON instead of text.
    pub json: bool,
}

const ROUTES: &[&str] = &["/dashboard", "/settings", "/archive", "/profile"];

fn demo_catalog(engine: &PreloadEngine) {
    engine.register_module(
        ModuleDescriptor::new("app-shell", "/modules/app-shell.js")
            .with_priority(ModulePriority::Critical)
            .with_estimated_size(96 * 1024),
    );
    engine.register_module(
        ModuleDescriptor::new("router", "/modules/router.js")
            .with_priority(ModulePriority::Critical)
            .with_dependency("app-shell")
            .with_estimated_size(24 * 1024),
    );
    engine.register_module(
        ModuleDescriptor::new("nav", "/modules/nav.js")
            .with_priority(ModulePriority::High)
            .with_dependency("router")
            .with_estimated_size(32 * 1024),
    );
    engine.register_module(
        ModuleDescriptor::new("dashboard", "/modules/dashboard.js")
            .with_priority(ModulePriority::High)
            .with_dependencies(["nav", "charts"])
            .with_estimated_size(180 * 1024),
    );
    engine.register_module(
        ModuleDescriptor::new("charts", "/modules/charts.js")
            .with_priority(ModulePriority::Medium)
            .with_estimated_size(340 * 1024),
    );
    engine.register_module(
        ModuleDescriptor::new("settings", "/modules/settings.js")
            .with_priority(ModulePriority::Medium)
            .with_dependency("nav")
            .with_estimated_size(60 * 1024),
    );
    engine.register_module(
        ModuleDescriptor::new("profile", "/modules/profile.js")
            .with_priority(ModulePriority::Medium)
            .with_dependency("nav")
            .with_estimated_size(48 * 1024),
    );
    engine.register_module(
        ModuleDescriptor::new("archive", "/modules/archive.js")
            .with_priority(ModulePriority::Low)
            .with_lazy(true)
            .with_estimated_size(220 * 1024),
    );
    engine.register_module(
        ModuleDescriptor::new("comments", "/modules/comments.js")
            .with_priority(ModulePriority::Low)
            .with_lazy(true)
            .with_estimated_size(90 * 1024),
    );
}

/// Run the simulate command.
pub async fn run(args: SimulateArgs) -> Result<(), CliError> {
    if args.interactions == 0 {
        return Err(CliError::InvalidArgument(
            "interactions must be at least 1".to_string(),
        ));
    }

    let probe = StaticProbe {
        memory_gb: args.memory_gb,
        cores: args.cores,
        connection: ConnectionInfo {
            effective_type: if args.save_data {
                EffectiveType::TwoG
            } else {
                EffectiveType::FourG
            },
            save_data: args.save_data,
        },
        reduced_motion: false,
    };

    let loader = Arc::new(
        MockLoader::new()
            .with_latency("charts", Duration::from_millis(30))
            .with_latency("archive", Duration::from_millis(20)),
    );
    let config = EngineConfig {
        flush_interval: Duration::from_millis(50),
        idle_tick: Duration::from_millis(20),
        ..EngineConfig::default()
    };
    let engine = PreloadEngine::start(loader, Arc::new(probe), config);
    demo_catalog(&engine);

    // Lazy placeholders sit below the fold.
    engine.observe_element(
        "archive".into(),
        ElementGeometry {
            top_px: 2_400.0,
            height_px: 600.0,
        },
    );
    engine.observe_element(
        "comments".into(),
        ElementGeometry {
            top_px: 3_200.0,
            height_px: 400.0,
        },
    );

    info!(seed = args.seed, interactions = args.interactions, "session starting");
    tokio::spawn(Arc::clone(&engine).run_startup());
    engine.critical_ready().await;

    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut scroll_top = 0.0f64;
    for _ in 0..args.interactions {
        match rng.random_range(0..10u32) {
            0..=2 => {
                let route = ROUTES[rng.random_range(0..ROUTES.len())];
                engine.record_interaction(InteractionKind::Navigation {
                    route: route.to_string(),
                });
                let module = &route[1..];
                engine.on_module_rendered(&module.into(), rng.random_range(2..40));
            }
            3..=5 => {
                engine.record_interaction(InteractionKind::Click {
                    module: Some("nav".into()),
                });
            }
            6..=8 => {
                let velocity = rng.random_range(100.0..1_500.0);
                scroll_top = (scroll_top + velocity * 0.1).min(3_000.0);
                engine.on_viewport_update(ViewportState {
                    scroll_top_px: scroll_top,
                    height_px: 900.0,
                    velocity_px_s: velocity,
                    direction: ScrollDirection::Down,
                });
            }
            _ => {
                let module = ROUTES[rng.random_range(0..ROUTES.len())];
                engine.record_interaction(InteractionKind::Hover {
                    module: module[1..].into(),
                });
            }
        }
        tokio::time::sleep(Duration::from_millis(rng.random_range(5..25))).await;
    }

    // Let the flush loop and any queued preloads settle.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let report = engine.generate_report();
    engine.shutdown();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{report}");
    }
    Ok(())
}
