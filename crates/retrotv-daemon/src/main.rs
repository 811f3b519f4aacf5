use retrotv_core::config::Config;
use retrotv_core::state::StateRoot;
use retrotv_daemon::interstitial::Machine;
use retrotv_daemon::player::PlayerClient;
use retrotv_daemon::{commands, easrun, interstitial, tuner};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tracing::{info, warn};

const PIDFILE: &str = "retrotvd.pid";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    // File logging; the console stays clear for the player.
    std::fs::create_dir_all(&config.paths.base_dir)?;
    let log_path = config.paths.base_dir.join("controller.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    info!("log file: {:?}", log_path);

    let state = StateRoot::new(config.state_dir());
    state.ensure_dirs()?;

    let _pid_guard = acquire_instance_lock(&config)?;

    let mut child = spawn_player(&config)?;
    wait_for_socket(&config).await?;

    let player = PlayerClient::new(config.player.socket.clone());
    let machine = Arc::new(StdMutex::new(Machine::new()));
    let tuner = Arc::new(tuner::Tuner::new(
        config.clone(),
        player,
        state.clone(),
        machine.clone(),
    ));

    // Land on the persisted channel, or the first enabled one.
    let initial = state
        .current_channel()
        .or_else(|| tuner.channels().list_enabled().next().map(|c| c.number));
    match initial {
        Some(number) => tuner.tune_number(number).await,
        None => {
            warn!("no channels configured, loading snow");
            tuner.play_snow().await;
        }
    }

    let watchers = vec![
        tokio::spawn(commands::channel_watcher(tuner.clone())),
        tokio::spawn(commands::volume_watcher(tuner.clone())),
        tokio::spawn(commands::mute_watcher(tuner.clone())),
        tokio::spawn(interstitial::run(tuner.clone(), machine.clone())),
        tokio::spawn(easrun::alert_runner(tuner.clone())),
        tokio::spawn(easrun::crawl_keeper(tuner.clone())),
    ];
    info!("controller running, {} watchers up", watchers.len());

    tokio::select! {
        status = child.wait() => {
            match status {
                Ok(status) => info!("player exited: {}", status),
                Err(e) => warn!("player wait failed: {}", e),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
        }
    }

    for watcher in watchers {
        watcher.abort();
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
    Ok(())
}

/// One controller per machine: a stale pidfile (dead process) is reclaimed,
/// a live one refuses startup.
fn acquire_instance_lock(config: &Config) -> anyhow::Result<PidGuard> {
    let path = config.state_dir().join(PIDFILE);
    if let Ok(existing) = std::fs::read_to_string(&path) {
        if let Ok(pid) = existing.trim().parse::<u32>() {
            if std::path::Path::new(&format!("/proc/{pid}")).exists() {
                anyhow::bail!("another controller is running (pid {pid})");
            }
        }
    }
    std::fs::write(&path, std::process::id().to_string())?;
    Ok(PidGuard { path })
}

struct PidGuard {
    path: std::path::PathBuf,
}

impl Drop for PidGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn spawn_player(config: &Config) -> anyhow::Result<tokio::process::Child> {
    let _ = std::fs::remove_file(&config.player.socket);

    let mut command = tokio::process::Command::new(&config.player.binary);
    command
        .arg("--idle=yes")
        // Hold the last frame at EOF so `eof-reached` stays observable.
        .arg("--keep-open=yes")
        .arg(format!(
            "--input-ipc-server={}",
            config.player.socket.display()
        ))
        .arg("--really-quiet");
    if config.player.fullscreen {
        command.arg("--fs");
    }
    for arg in &config.player.extra_args {
        command.arg(arg);
    }
    let child = command
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()?;
    info!("player spawned: {}", config.player.binary);
    Ok(child)
}

async fn wait_for_socket(config: &Config) -> anyhow::Result<()> {
    let deadline = config.player.startup_timeout_secs.max(1) * 10;
    for _ in 0..deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if config.player.socket.exists() {
            info!("player IPC socket up at {}", config.player.socket.display());
            return Ok(());
        }
    }
    anyhow::bail!(
        "player IPC socket {} did not appear within {}s",
        config.player.socket.display(),
        config.player.startup_timeout_secs
    )
}
