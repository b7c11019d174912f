use std::future::IntoFuture;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::{Context, bail};
use rsa::RsaPrivateKey;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use seatrelay::cipher::{BrokerKey, SatelliteKey};
use seatrelay::config::PersonalConfig;
use seatrelay::dispatcher::{BrokerState, Dispatcher, PostOffice, spawn_satellite, task_routes};
use seatrelay::handler::BrokeredHandler;
use seatrelay::registry::{HandlerRegistry, WorkerRegistry};
use seatrelay::task::Task;
use seatrelay::worker::JoinWorker;

type Input = Lines<BufReader<Stdin>>;

async fn prompt(input: &mut Input, label: &str) -> anyhow::Result<String> {
    print!("{label}");
    std::io::stdout().flush()?;
    let line = input.next_line().await?.context("stdin closed")?;
    Ok(line.trim().to_string())
}

/// Parse a menu choice in `0..len`.
fn parse_choice(raw: &str, len: usize) -> Result<usize, String> {
    let idx: usize = raw
        .trim()
        .parse()
        .map_err(|e| format!("Failed to read your choice: {e}"))?;
    if idx >= len {
        return Err("Out of range.".to_string());
    }
    Ok(idx)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = PersonalConfig::from_env();

    println!("Seatrelay Personal v{}", env!("CARGO_PKG_VERSION"));
    println!("-----------------------");

    let workers = Arc::new(WorkerRegistry::new());
    workers
        .register("join", Arc::new(JoinWorker::default()))
        .context("registering join worker")?;
    let names = workers.names();
    if names.is_empty() {
        bail!("no workers registered");
    }

    // Both halves live in this process, so a throwaway pair is enough.
    let private = RsaPrivateKey::new(&mut rand::thread_rng(), config.key_bits)
        .context("generating RSA key pair")?;
    let broker_key = BrokerKey::new(private);
    let satellite_key = SatelliteKey::new(broker_key.public_key());

    // ── Local broker ─────────────────────────────────────────────────────
    let dispatcher = Arc::new(Dispatcher::new(config.dispatcher.clone()));
    let handlers = Arc::new(HandlerRegistry::new());
    for name in &names {
        handlers
            .register(name, Arc::new(BrokeredHandler::new(name, Arc::clone(&dispatcher))))
            .with_context(|| format!("registering handler {name}"))?;
    }

    let app = task_routes(BrokerState {
        dispatcher,
        key: Arc::new(broker_key),
        handlers: Arc::clone(&handlers),
    });
    let listener = tokio::net::TcpListener::bind(config.bind())
        .await
        .with_context(|| format!("binding {}", config.bind()))?;
    tracing::info!(addr = %config.bind(), "Launching local server");
    let server = tokio::spawn(axum::serve(listener, app).into_future());

    // ── Local satellites ─────────────────────────────────────────────────
    tracing::info!(server = %config.server(), routines = config.routines, "Launching local satellites");
    let office = Arc::new(PostOffice::new(config.server(), names.clone(), satellite_key));
    let routines: Vec<_> = (0..config.routines)
        .map(|_| spawn_satellite(Arc::clone(&office), Arc::clone(&workers), config.delay, true))
        .collect();

    // ── Interactive setup ────────────────────────────────────────────────
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    let handle = if names.len() > 1 {
        loop {
            let choice = prompt(&mut input, &format!("Select a handler in {names:?}: ")).await?;
            if handlers.contains(&choice) {
                break choice;
            }
            println!("Unknown handler.");
        }
    } else {
        names[0].clone()
    };
    let site = handlers.get(&handle)?;

    let username = prompt(&mut input, "Username: ").await?;
    let password = prompt(&mut input, "Password: ").await?;
    let user = site.make_user(&username, &password);

    let courses = user.list_courses().await.context("retrieving courses")?;
    if courses.is_empty() {
        bail!("you have no courses to be supplemented");
    }
    println!("Select a course:");
    for (i, c) in courses.iter().enumerate() {
        println!("{i}) {}: {}", c.name, c.desc);
    }
    let idx = loop {
        let raw = prompt(&mut input, &format!("Choice (0 - {}): ", courses.len() - 1)).await?;
        match parse_choice(&raw, courses.len()) {
            Ok(idx) => break idx,
            Err(msg) => println!("{msg}"),
        }
    };
    let chosen = &courses[idx];
    let course = site.make_course(&chosen.name, &chosen.desc, &chosen.token);

    // ── Run one task until elected ───────────────────────────────────────
    let task = Task::new(user, vec![course], config.scheduler);
    task.start();
    tracing::info!(
        user = %task.user().name(),
        courses = task.courses().len(),
        "Task running, waiting for a seat"
    );

    let mut report = tokio::time::interval(config.report_interval);
    let mut last_error = String::new();
    loop {
        tokio::select! {
            _ = report.tick() => {
                let stat = task.statistics();
                if stat.elected {
                    tracing::info!(succeeded = stat.succeeded, failed = stat.failed, "Elected");
                    break;
                }
                if stat.last_error != last_error {
                    tracing::warn!(failed = stat.failed, "{}", stat.last_error);
                    last_error = stat.last_error;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                task.stop();
                break;
            }
        }
    }

    for (handle, shutdown) in routines {
        shutdown.store(true, Ordering::Relaxed);
        handle.abort();
    }
    server.abort();

    Ok(())
}
