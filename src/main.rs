mod alerts;
mod ui;

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use clap::Parser;
use env_logger::{Builder, Env};
use serde::Deserialize;
use stopwatch::{config, ConfigError, EngineConfig, Snapshot, StopwatchEngine, TimerState};

use crate::alerts::{fire_alert, limit_message, AlertConfig};

const APP_NAME: &str = "Stopwatch";

#[derive(Parser)]
#[command(version, about = "Terminal stopwatch that alerts and resets at a time limit")]
struct Cli {
    /// TOML file with engine and alert settings
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Elapsed time in milliseconds at which the stopwatch alerts and resets
    #[arg(long)]
    limit_ms: Option<u64>,
    /// Milliseconds between two clock samples
    #[arg(long)]
    interval_ms: Option<u64>,
    /// Do not ring the terminal bell on alerts
    #[arg(long)]
    no_bell: bool,
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AppConfig {
    #[serde(flatten)]
    engine: EngineConfig,
    alerts: AlertConfig,
}

impl AppConfig {
    fn resolve(cli: &Cli) -> Result<Self, ConfigError> {
        let mut app: AppConfig = match &cli.config {
            Some(path) => config::load_toml(path)?,
            None => AppConfig::default(),
        };
        if let Some(limit_ms) = cli.limit_ms {
            app.engine.limit_ms = limit_ms;
        }
        if let Some(interval_ms) = cli.interval_ms {
            app.engine.sample_interval_ms = interval_ms;
        }
        if cli.no_bell {
            app.alerts.bell = false;
        }
        app.engine.validate()?;
        Ok(app)
    }
}

#[derive(Debug)]
enum AppOp {
    Key(char),
    Redraw(Snapshot),
    LimitReached(u64),
    Quit,
}

/// Empty lines count as Enter.
fn key_for_line(line: &str) -> char {
    line.trim().chars().next().unwrap_or('\n')
}

fn input_thread(tx: Sender<AppOp>) {
    for line in io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                log::error!("can't read input: {}", e);
                break;
            }
        };
        if tx.send(AppOp::Key(key_for_line(&line))).is_err() {
            return;
        }
    }
    tx.send(AppOp::Quit).ok();
}

fn observer_thread(snapshots: Receiver<Snapshot>, tx: Sender<AppOp>) {
    for snapshot in snapshots {
        if tx.send(AppOp::Redraw(snapshot)).is_err() {
            break;
        }
    }
}

struct StopwatchApp {
    engine: StopwatchEngine,
    alert_config: AlertConfig,
}

impl StopwatchApp {
    fn redraw(&self, snapshot: &Snapshot) {
        if let Err(e) = ui::draw_stopwatch(&mut io::stdout(), snapshot, self.engine.limit_ms()) {
            log::warn!("can't draw: {}", e);
        }
    }

    /// Returns false when the app should quit.
    fn handle_key(&mut self, key: char) -> bool {
        match key {
            '\r' | '\n' | ' ' | 's' => {
                self.engine.toggle_running();
            }
            'r' => {
                // Reset is disabled while already reset
                if self.engine.state() != TimerState::Reset {
                    self.engine.reset();
                }
            }
            'h' | '?' => {
                ui::draw_help(&mut io::stdout()).ok();
                self.redraw(&self.engine.snapshot());
            }
            'q' => return false,
            _ => {}
        }
        true
    }

    fn handle_limit(&self, limit_ms: u64) {
        fire_alert(&self.alert_config, &mut io::stdout(), &limit_message(limit_ms));
        self.redraw(&self.engine.snapshot());
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    Builder::from_env(Env::default().default_filter_or(level)).init();

    let app_config = match AppConfig::resolve(&cli) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    log::info!(
        "{} starting, limit {} ms, sampling every {} ms",
        APP_NAME,
        app_config.engine.limit_ms,
        app_config.engine.sample_interval_ms
    );

    let (tx, rx) = mpsc::channel();

    let notify_tx = tx.clone();
    let engine = StopwatchEngine::new(&app_config.engine, move |limit_ms: u64| {
        notify_tx.send(AppOp::LimitReached(limit_ms)).ok();
    });

    let snapshots = engine.subscribe();
    let observer_tx = tx.clone();
    thread::spawn(move || observer_thread(snapshots, observer_tx));
    let input_tx = tx.clone();
    thread::spawn(move || input_thread(input_tx));
    drop(tx);

    let mut app = StopwatchApp {
        engine,
        alert_config: app_config.alerts,
    };
    ui::draw_help(&mut io::stdout()).ok();

    for op in rx {
        match op {
            AppOp::Key(key) => {
                if !app.handle_key(key) {
                    break;
                }
            }
            AppOp::Redraw(snapshot) => app.redraw(&snapshot),
            AppOp::LimitReached(limit_ms) => app.handle_limit(limit_ms),
            AppOp::Quit => break,
        }
    }

    app.engine.reset();
    println!();
    log::info!("{} exiting", APP_NAME);
    ExitCode::SUCCESS
}
