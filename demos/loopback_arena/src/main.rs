//! Loopback Arena Example
//!
//! Runs an authoritative server and one predicting client in a single
//! process, connected by an in-memory link that drops, duplicates, and
//! reorders datagrams. The server also drives a bot the client only sees
//! through interpolation.
//!
//! Run with `RUST_LOG=debug` to see corrections and retries. An optional
//! path to a RON config file replaces the built-in settings.

use glam::Vec2;
use std::cell::RefCell;
use std::error::Error;
use std::rc::Rc;
use ticknet_core::{EntityId, Millis, PlayerId, Priority, Scheduler, Tick, TickClock};
use ticknet_netcode::{
    Address, ClientPredictor, InputEnvelope, InputProcessor, KinematicProcessor, LinkConditions,
    LocalState, MemoryNetwork, Message, MessageKind, MessageLayer, MovementInput, MovementUpdate,
    NetcodeConfig, PeerId, RemoteInterpolator, ServerInputBuffer, TickGate,
};
use tracing::{debug, info};

const CONFIG: &str = r#"(
    tick_interval_ms: 16,
    reliable: (base_retry_delay_ms: 80, max_retries: 6),
    input_buffer_size: 64,
    vault_capacity: 128,
    reconciliation_threshold: 30.0,
    interpolation_duration_ms: 100,
)"#;

const FRAME_MS: Millis = 4;
const RUN_MS: Millis = 8_000;
const INPUT_BATCH_TICKS: Tick = 3;
const BROADCAST_EVERY_TICKS: u64 = 2;

const PLAYER: PlayerId = PlayerId(1);
const AVATAR: EntityId = EntityId(1);
const BOT: EntityId = EntityId(100);

/// Server-side record of a connected player
struct Avatar {
    player: PlayerId,
    entity: EntityId,
    address: Address,
    state: LocalState,
    last_applied_ms: Option<Millis>,
}

/// Everything the server's scheduled tasks read and write
struct ServerWorld {
    tick_interval_ms: Millis,
    inputs: ServerInputBuffer,
    processor: KinematicProcessor,
    avatars: Vec<Avatar>,
    bot: LocalState,
    outbox: Vec<(Address, Message)>,
}

impl ServerWorld {
    fn simulate(&mut self, tick: Tick) {
        let dt = self.tick_interval_ms;
        for avatar in &mut self.avatars {
            let since = avatar.last_applied_ms.unwrap_or(0);
            let fresh: Vec<InputEnvelope> = self
                .inputs
                .inputs_since(avatar.player, since)
                .map(|input| input.envelope)
                .collect();

            if fresh.is_empty() {
                self.processor.apply(&mut avatar.state, None, dt);
                continue;
            }
            for envelope in &fresh {
                self.processor.apply(&mut avatar.state, Some(&envelope.input), dt);
            }
            avatar.last_applied_ms = fresh.last().map(|e| e.timestamp);
            debug!(tick, player = %avatar.player, applied = fresh.len(), "applied inputs");
        }
    }

    fn move_bot(&mut self, tick: Tick) {
        let angle = tick as f32 * 0.02;
        let previous = self.bot.position;
        self.bot.position = Vec2::new(300.0, 300.0) + Vec2::from_angle(angle) * 120.0;
        self.bot.velocity = (self.bot.position - previous) * (1000.0 / self.tick_interval_ms as f32);
        self.bot.rotation = angle;
    }

    fn broadcast(&mut self, tick: Tick, now: Millis) {
        let mut updates = Vec::with_capacity(self.avatars.len() + 1);
        for avatar in &self.avatars {
            let mut update = movement_update(avatar.entity, &avatar.state, tick, now);
            self.inputs
                .tag_update(avatar.player, &mut update, self.tick_interval_ms);
            updates.push(update);
        }
        updates.push(movement_update(BOT, &self.bot, tick, now));

        for avatar in &self.avatars {
            for update in &updates {
                self.outbox
                    .push((avatar.address.clone(), Message::MovementUpdate(*update)));
            }
        }
    }

    fn announce(&mut self, message: Message) {
        for avatar in &self.avatars {
            self.outbox.push((avatar.address.clone(), message.clone()));
        }
    }
}

fn movement_update(entity: EntityId, state: &LocalState, tick: Tick, now: Millis) -> MovementUpdate {
    MovementUpdate {
        entity,
        position: state.position,
        rotation: state.rotation,
        velocity: state.velocity,
        timestamp: now,
        game_tick: tick,
        prediction_timestamp: 0,
        prediction_tick: 0,
    }
}

/// Scripted player input: a square with pauses between the sides
fn steer(tick: Tick) -> Option<MovementInput> {
    let direction = match (tick / 60) % 8 {
        0 => Vec2::X,
        2 => Vec2::Y,
        4 => Vec2::NEG_X,
        6 => Vec2::NEG_Y,
        _ => return None,
    };
    Some(MovementInput {
        direction,
        rotation: direction.y.atan2(direction.x),
    })
}

fn load_config() -> Result<NetcodeConfig, Box<dyn Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => {
            info!(%path, "loading config");
            NetcodeConfig::from_ron_str(&std::fs::read_to_string(path)?)?
        }
        None => NetcodeConfig::from_ron_str(CONFIG)?,
    };
    config.validate()?;
    Ok(config)
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = load_config()?;
    let interval = config.tick_interval_ms;
    info!(
        tick_ms = interval,
        vault = config.vault_capacity,
        threshold = config.reconciliation_threshold,
        "starting loopback arena"
    );

    let network = MemoryNetwork::new(0xA2E7A);
    let link = LinkConditions {
        drop_rate: 0.1,
        duplicate_rate: 0.05,
        reorder_rate: 0.1,
    };
    let server_addr: Address = "server".into();
    let client_addr: Address = "client".into();
    let mut server = MessageLayer::new(
        network.endpoint(server_addr.clone(), link),
        PeerId(0),
        config.reliable.clone(),
    );
    let mut client = MessageLayer::new(
        network.endpoint(client_addr.clone(), link),
        PeerId(1),
        config.reliable.clone(),
    );

    // Server
    let world = Rc::new(RefCell::new(ServerWorld {
        tick_interval_ms: interval,
        inputs: ServerInputBuffer::new(config.input_buffer_size),
        processor: KinematicProcessor::default(),
        avatars: vec![Avatar {
            player: PLAYER,
            entity: AVATAR,
            address: client_addr.clone(),
            state: LocalState::at(Vec2::new(100.0, 100.0)),
            last_applied_ms: None,
        }],
        bot: LocalState::default(),
        outbox: Vec::new(),
    }));

    let received: Rc<RefCell<Vec<(Address, Vec<InputEnvelope>)>>> = Rc::default();
    let sink = received.clone();
    server.on_message(MessageKind::InputBatch, move |from, message| {
        if let Message::InputBatch { inputs } = message {
            sink.borrow_mut().push((from.clone(), inputs));
        }
    })?;

    let mut server_clock: TickClock = config.tick_clock()?;
    let mut scheduler = Scheduler::starting_at(server_clock.tick());

    let w = world.clone();
    scheduler.schedule_once(
        move |_| {
            let mut world = w.borrow_mut();
            world.announce(Message::PlayerJoined {
                player: PLAYER,
                entity: AVATAR,
            });
            world.announce(Message::EntitySpawned {
                entity: BOT,
                position: Vec2::new(420.0, 300.0),
            });
            Ok(())
        },
        Priority::Critical,
    );

    let w = world.clone();
    scheduler.schedule_repeating(
        move |tick| {
            w.borrow_mut().simulate(tick);
            Ok(())
        },
        1,
        0,
        Priority::High,
    )?;

    let w = world.clone();
    scheduler.schedule_repeating(
        move |tick| {
            w.borrow_mut().move_bot(tick);
            Ok(())
        },
        1,
        0,
        Priority::High,
    )?;

    let w = world.clone();
    scheduler.schedule_repeating(
        move |tick| {
            w.borrow_mut().broadcast(tick, tick * interval);
            Ok(())
        },
        BROADCAST_EVERY_TICKS,
        0,
        Priority::Normal,
    )?;

    // The bot reloads every five seconds, finishing two seconds later
    let reload_every = server_clock.ms_to_ticks(5_000);
    let reload_takes = server_clock.ms_to_ticks(2_000);
    for (delay, started) in [(reload_every, true), (reload_every + reload_takes, false)] {
        let w = world.clone();
        scheduler.schedule_repeating(
            move |tick| {
                let message = if started {
                    Message::ReloadStarted { entity: BOT, tick }
                } else {
                    Message::ReloadCompleted { entity: BOT, tick }
                };
                w.borrow_mut().announce(message);
                Ok(())
            },
            reload_every,
            delay,
            Priority::Low,
        )?;
    }

    // Client
    let inbox: Rc<RefCell<Vec<Message>>> = Rc::default();
    for kind in [
        MessageKind::PlayerJoined,
        MessageKind::EntitySpawned,
        MessageKind::MovementUpdate,
        MessageKind::ReloadStarted,
        MessageKind::ReloadCompleted,
    ] {
        let sink = inbox.clone();
        client.on_message(kind, move |_, message| sink.borrow_mut().push(message))?;
    }

    let mut client_clock = config.tick_clock()?;
    let mut predictor = ClientPredictor::new(
        AVATAR,
        KinematicProcessor::default(),
        LocalState::at(Vec2::new(100.0, 100.0)),
        &config,
    );
    let mut remotes = RemoteInterpolator::new(config.interpolation_duration_ms);
    let mut reloads = TickGate::new();

    let mut now: Millis = 0;
    while now <= RUN_MS {
        // Server frame
        server.poll(now);
        for (from, inputs) in received.borrow_mut().drain(..) {
            let mut world = world.borrow_mut();
            let Some(player) = world.avatars.iter().find(|a| a.address == from).map(|a| a.player)
            else {
                debug!(%from, "input from unknown address");
                continue;
            };
            world
                .inputs
                .add_input_batch(player, inputs, scheduler.current_tick(), now);
        }
        for _ in 0..server_clock.due_ticks(now) {
            let report = scheduler.process_tasks();
            if report.failed > 0 {
                debug!(tick = report.tick, failed = report.failed, "server tasks failed");
            }
            server_clock.advance(server_clock.tick_start_ms() + interval);
        }
        let outgoing: Vec<_> = world.borrow_mut().outbox.drain(..).collect();
        for (to, message) in outgoing {
            server.send(&to, message, now)?;
        }

        // Client frame
        client.poll(now);
        for message in inbox.borrow_mut().drain(..) {
            match message {
                Message::MovementUpdate(update) if update.entity == predictor.entity() => {
                    let outcome = predictor.on_authoritative(&update);
                    if outcome.is_correction() {
                        info!(tick = update.game_tick, ?outcome, "prediction corrected");
                    }
                }
                Message::MovementUpdate(update) => {
                    remotes.push(&update, now);
                }
                Message::PlayerJoined { player, entity } => {
                    info!(%player, %entity, "joined");
                }
                Message::EntitySpawned { entity, position } => {
                    info!(%entity, ?position, "entity spawned");
                }
                Message::ReloadStarted { entity, tick } | Message::ReloadCompleted { entity, tick }
                    if !reloads.admit(entity, tick) =>
                {
                    debug!(%entity, tick, "stale reload event ignored");
                }
                Message::ReloadStarted { entity, tick } => info!(%entity, tick, "reload started"),
                Message::ReloadCompleted { entity, tick } => info!(%entity, tick, "reload completed"),
                other => debug!(kind = ?other.kind(), "unexpected message"),
            }
        }
        for _ in 0..client_clock.due_ticks(now) {
            let tick = client_clock.tick();
            if let Some(input) = steer(tick) {
                predictor.buffer_input(input);
            }
            predictor.step(tick, now, interval);
            client_clock.advance(client_clock.tick_start_ms() + interval);

            if tick % INPUT_BATCH_TICKS == 0 {
                if let Some(batch) = predictor.take_input_batch() {
                    client.send(&server_addr, batch, now)?;
                }
            }
        }

        if now % 1_000 == 0 {
            info!(
                now,
                position = ?predictor.state().position,
                bot = ?remotes.sample(BOT, now),
                "status"
            );
        }
        now += FRAME_MS;
    }

    println!("\n=== Loopback Arena Summary ===");
    println!("Server ticks:     {}", scheduler.current_tick());
    println!("Client ticks:     {}", client_clock.tick());
    println!("Server layer:     {:?}", server.stats());
    println!("Client layer:     {:?}", client.stats());
    let metrics = predictor.metrics();
    println!(
        "Reconciliation:   {} accepted, {} corrected, {} skipped",
        metrics.accepted, metrics.corrected, metrics.skipped
    );
    println!(
        "Divergence:       mean {:.2}, max {:.2}, correction rate {:.1}%",
        metrics.mean_divergence(),
        metrics.max_divergence,
        metrics.correction_rate() * 100.0
    );
    let vault = predictor.history().stats();
    println!(
        "Vault:            {}/{} entries spanning {} ms",
        vault.count,
        vault.capacity,
        vault.span_ms()
    );
    println!("Final position:   {:?}", predictor.state().position);

    Ok(())
}
