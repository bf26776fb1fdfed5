mod config;
mod net;
pub mod sim;
pub mod telemetry;
pub mod world;

pub use net::frame::{
    read_frame, write_frame, Frame, FrameTransport, ReadFrameOutcome, TcpFrameTransport,
    MAX_FRAME_LEN, TAG_AUTHENTICATE, TAG_CHARACTER_STATE_DELTA, TAG_EXPERIENCE_DELTA,
    TAG_WORLD_STATE_REPORT,
};
pub use net::messages::{
    decode_experience_batch, decode_state_batch, decode_world_batch, encode_experience_batch,
    encode_state_batch, encode_world_batch, CharacterStateUpdate, ClanExperience, CombatStyle,
    DungeonRun, DungeonStatus, ExperienceUpdate, Health, JoinCounters, PlatformIdentity, Position,
    RaidRun, RaidStatus, RestSetting, SkillDelta, VillageExperience, WorldStateSnapshot,
};
pub use net::packet::{PacketReader, PacketWriter};
pub use net::server::{
    handle_delta_session, run_delta_server, DeltaHandler, DeltaServerConfig, ServerControl,
};
pub use net::session::{
    ConnectionId, ConnectionRegistry, SessionHandle, SessionId, SignedTokenValidator,
    TableTokenValidator, TokenValidator,
};

pub fn run(args: &[String]) -> Result<(), String> {
    let config = config::AppConfig::from_args(args)?;
    telemetry::logging::init(&config.root)?;

    let catalog = std::sync::Arc::new(sim::tasks::TaskCatalog::load(&config.root)?);
    let world = std::sync::Arc::new(std::sync::Mutex::new(world::state::WorldState::load(
        &config.root,
    )?));
    let events = std::sync::Arc::new(sim::events::EventQueue::default());
    let registry = std::sync::Arc::new(net::session::ConnectionRegistry::new());
    let control = std::sync::Arc::new(net::server::ServerControl::new());
    let validator = std::sync::Arc::new(net::session::SignedTokenValidator::new(
        config.token_secret.clone(),
    ));
    let handler = std::sync::Arc::new(world::sync::StoreDeltaHandler::new(
        std::sync::Arc::clone(&world),
        std::sync::Arc::clone(&events),
    ));

    {
        let world = world
            .lock()
            .map_err(|_| "world lock poisoned".to_string())?;
        telemetry::logging::game(&format!(
            "startup: sessions={}, tasks={}, tick={}ms",
            world.sessions.len(),
            catalog.len(),
            config.tick_length.as_millis()
        ));
        println!("idleforge: startup");
        println!("- data root: {}", config.root.display());
        println!("- seeded sessions: {}", world.sessions.len());
        println!("- gather tasks: {}", catalog.len());
        println!("- tick length: {}ms", config.tick_length.as_millis());
    }

    let tick_handle = sim::tick::spawn_tick_loop(
        std::sync::Arc::clone(&world),
        std::sync::Arc::clone(&events),
        std::sync::Arc::clone(&catalog),
        std::sync::Arc::clone(&control),
        config.tick_length,
        config.announce_interval,
    );

    let server_config = net::server::DeltaServerConfig {
        bind_addr: config.delta_bind_addr.clone(),
        ..net::server::DeltaServerConfig::default()
    };
    let result = net::server::run_delta_server(
        server_config,
        validator,
        handler,
        events,
        registry,
        std::sync::Arc::clone(&control),
    );

    control.request_shutdown();
    if tick_handle.join().is_err() {
        eprintln!("idleforge: tick thread panicked");
    }
    result
}
