//! portico HTTP/1.1 demo server
//!
//! One connection per request: the dispatch core reads a full request
//! (header, then `Content-Length` body), hands it to a handler task, and
//! closes the connection after the response.
//!
//! Usage:
//!     ./target/release/portico-httpd [--port 6502] [--backend epoll|select]
//!         [--accept-mode inline|dedicated] [--workers N]
//!
//! Environment (overridden by flags): PORTICO_PORT, PORTICO_BIND_HOST,
//! PORTICO_BACKEND, PORTICO_ACCEPT_MODE, PORTICO_MAX_HANDLERS, ...
//! Demo accounts: PORTICO_DEMO_USERS="alice:secret,bob:hunter2"
//!
//! Benchmark:
//!     wrk -t4 -c100 -d10s http://127.0.0.1:6502/

mod demo;
mod users;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use portico_core::capability::Capability;
use portico_core::config::{AcceptMode, Backend, ServerConfig};
use portico_core::env::env_get_str;
use portico_module::{FixedPool, StaticLoader, ThreadPerTask};
use portico_server::{Server, ServerStats};
use tracing::info;
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

use crate::demo::DemoHandler;
use crate::users::PasswordTable;

const STATS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// TCP port to listen on
    #[clap(short, long)]
    port: Option<u16>,
    /// Host or address to bind; `*` binds every interface
    #[clap(short, long)]
    bind: Option<String>,
    /// Readiness events per wait
    #[clap(long)]
    max_poll: Option<usize>,
    /// Initial read chunk for the header pass
    #[clap(long)]
    buffer_size: Option<usize>,
    /// Readiness backend: epoll or select
    #[clap(long)]
    backend: Option<Backend>,
    /// Accept inline on the readiness thread or in a dedicated task
    #[clap(long)]
    accept_mode: Option<AcceptMode>,
    /// Handler tasks allowed to run at once
    #[clap(long)]
    max_handlers: Option<usize>,
    /// listen(2) backlog
    #[clap(long)]
    backlog: Option<i32>,
    /// Worker threads; 0 spawns one thread per handler task
    #[clap(short, long, default_value_t = 0)]
    workers: usize,
    /// Queue depth of the worker pool
    #[clap(long, default_value_t = 1024)]
    queue_depth: usize,
}

impl Args {
    fn config(&self) -> ServerConfig {
        let mut config = ServerConfig::from_env();
        if let Some(port) = self.port {
            config = config.port(port);
        }
        if let Some(bind) = &self.bind {
            config = config.bind_host(bind.clone());
        }
        if let Some(n) = self.max_poll {
            config = config.max_poll(n);
        }
        if let Some(n) = self.buffer_size {
            config = config.buffer_size(n);
        }
        if let Some(backend) = self.backend {
            config = config.backend(backend);
        }
        if let Some(mode) = self.accept_mode {
            config = config.accept_mode(mode);
        }
        if let Some(n) = self.max_handlers {
            config = config.max_handlers(n);
        }
        if let Some(n) = self.backlog {
            config = config.listen_backlog(n);
        }
        config
    }
}

fn stats_loop(stats: ServerStats, stop: Arc<AtomicBool>) {
    let mut last = stats.snapshot();
    while !stop.load(Ordering::Acquire) {
        thread::park_timeout(STATS_INTERVAL);
        if stop.load(Ordering::Acquire) {
            break;
        }
        let now = stats.snapshot();
        if now != last {
            info!(
                accepted = now.accepted,
                completed = now.completed,
                abandoned = now.abandoned,
                in_flight = now.in_flight,
                "[httpd] stats"
            );
            last = now;
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let args = Args::parse();
    let config = args.config();
    info!("[httpd] {}", config.summary());

    let table = PasswordTable::parse(&env_get_str("PORTICO_DEMO_USERS", ""));
    info!(users = table.users(), "[httpd] demo accounts loaded");
    let auth: Arc<dyn Capability> = table.into_capability();
    let loader = StaticLoader::new().register(users::NAME, users::VERSION, move || {
        Arc::clone(&auth)
    });

    let builder = Server::builder(config)
        .handler(DemoHandler)
        .capability_loader(loader);
    let pool = if args.workers > 0 {
        Some(Arc::new(
            FixedPool::new(args.workers, args.queue_depth).context("worker pool")?,
        ))
    } else {
        None
    };
    let builder = match &pool {
        Some(pool) => builder.executor(Arc::clone(pool)),
        None => builder.executor(ThreadPerTask::default()),
    };
    let mut server = builder.build()?;

    let addr = server.listen().context("listen")?;
    server.register_for_shutdown()?;
    info!(%addr, "[httpd] listening; ctrl-c to stop");

    let stop = Arc::new(AtomicBool::new(false));
    let reporter = {
        let stats = server.stats();
        let stop = Arc::clone(&stop);
        thread::Builder::new()
            .name("portico-stats".into())
            .spawn(move || stats_loop(stats, stop))
            .context("stats thread")?
    };

    let outcome = server.run();

    stop.store(true, Ordering::Release);
    reporter.thread().unpark();
    let _ = reporter.join();
    if let Some(pool) = pool {
        pool.shutdown();
    }
    let last = server.stats().snapshot();
    info!(
        accepted = last.accepted,
        completed = last.completed,
        abandoned = last.abandoned,
        "[httpd] stopped"
    );
    outcome.map_err(Into::into)
}
