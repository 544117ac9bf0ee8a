// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Binary entry point: CLI parsing, storage and logging bootstrap,
//! single-instance handling, component wiring, and the runtime.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use cms_core::{AgentConfig, AgentState, RoomAssignment, AGENT_VERSION};
use cms_net::{PushClient, ReconnectPolicy, RequestClient};
use cms_store::{KeyringStore, StateStore, StorageLayout, TokenStore};

use cms_agent::agent::{Agent, AgentEventSink, AgentHandle, HttpTokenSink, PushResultSink};
use cms_agent::connector::ServerConnector;
use cms_agent::executor::{CommandExecutor, ExecutorConfig};
use cms_agent::inspect::SysinfoInspector;
use cms_agent::ipc::{self, IpcServer, IpcStatus};
use cms_agent::prompt::{ConsolePrompter, UserPrompter};
use cms_agent::singleton::{SingletonError, SingletonGuard, LOCK_STALE_TIMEOUT};
use cms_agent::token::{SessionTokenHandle, TokenSink};
use cms_agent::update::UpdateEngine;
use cms_agent::{autostart, logging, platform};

/// How long `--force` waits for the incumbent to release the lock.
const FORCE_LOCK_WAIT: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "cms-agent", version, about = "CMS fleet management endpoint agent")]
struct Cli {
    /// Name of the configuration file within the storage directory
    #[arg(long, default_value = "agent_config.json")]
    config_name: String,

    /// Enable debug logging on the console
    #[arg(long)]
    debug: bool,

    /// Register the agent to start automatically and exit
    #[arg(long, conflicts_with = "disable_autostart")]
    enable_autostart: bool,

    /// Unregister the agent from automatic start and exit
    #[arg(long)]
    disable_autostart: bool,

    /// Ask a running instance to shut down, then start this one
    #[arg(long)]
    force: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let is_admin = platform::is_running_as_admin();

    // Storage first: logging needs the logs directory.
    let app_name = bootstrap_app_name(&cli.config_name);
    let layout = match StorageLayout::create(&app_name, is_admin) {
        Ok(layout) => layout,
        Err(e) => {
            eprintln!("CRITICAL: failed to set up storage directory structure: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = match logging::init(&layout.logs_dir(), cli.debug) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("CRITICAL: failed to initialize logging: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!(version = AGENT_VERSION, admin = is_admin, root = %layout.root().display(), "--- agent starting ---");

    // One-shot admin actions exit before anything else runs.
    if cli.enable_autostart || cli.disable_autostart {
        let executable = std::env::current_exe()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| "cms-agent".to_string());
        let result = if cli.enable_autostart {
            autostart::register(&app_name, &executable, is_admin)
        } else {
            autostart::unregister(&app_name, is_admin)
        };
        return match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!(%e, "autostart action failed");
                ExitCode::FAILURE
            }
        };
    }

    let config = match load_config(&layout, &cli.config_name) {
        Ok(config) => config,
        Err(message) => {
            error!("{message}");
            return ExitCode::FAILURE;
        }
    };

    let tokens_store = TokenStore::new(Some(Arc::new(KeyringStore)), layout.token_file());
    let store = match StateStore::open(layout, &config.agent.state_filename, tokens_store) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(%e, "failed to initialize state store");
            return ExitCode::FAILURE;
        }
    };

    let device_id = match store.ensure_device_identity(platform::physical_adapter_id()) {
        Ok(id) => id,
        Err(e) => {
            error!(%e, "CRITICAL: could not establish device identity");
            return ExitCode::FAILURE;
        }
    };
    info!(%device_id, "device identity ready");

    // `--force`: ask the incumbent to step down, then wait for its lock.
    let mut singleton: Option<SingletonGuard> = None;
    if cli.force {
        singleton = force_takeover(&store, is_admin).await;
    }

    let singleton = match singleton {
        Some(guard) => guard,
        None => match SingletonGuard::acquire(&store.layout().lock_file()) {
            Ok((guard, outcome)) => {
                info!(?outcome, "singleton lock acquired");
                guard
            }
            Err(SingletonError::HeldByLiveProcess { pid }) => {
                error!(?pid, "another agent instance is already running");
                return ExitCode::FAILURE;
            }
            Err(e) => {
                error!(%e, "failed to acquire singleton lock");
                return ExitCode::FAILURE;
            }
        },
    };
    singleton.start_heartbeat(LOCK_STALE_TIMEOUT);

    // First-run room configuration.
    let prompter = Arc::new(ConsolePrompter);
    let room = match room_assignment(&store, prompter.as_ref()) {
        Some(room) => room,
        None => {
            error!("room configuration cancelled, aborting startup");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = store.put_version(AGENT_VERSION) {
        warn!(%e, "failed to record agent version in state file");
    }

    let agent = match build_agent(config, store, device_id, singleton, room, prompter, is_admin) {
        Ok(agent) => Arc::new(agent),
        Err(message) => {
            error!("{message}");
            return ExitCode::FAILURE;
        }
    };

    // Ctrl-C / SIGTERM become a shutdown request.
    {
        let handle = Arc::clone(&agent.handle);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, stopping agent");
                handle.request_shutdown();
            }
        });
    }

    let final_state = agent.run().await;
    // After an update hand-off the external updater restarts us; exiting
    // naturally here keeps the hand-off intact either way.
    if final_state == AgentState::UpdatingPreparingShutdown {
        info!("exiting for update hand-off");
    }
    ExitCode::SUCCESS
}

/// App name from a config template near the executable, before the real
/// config (which lives under the storage root) can be read.
fn bootstrap_app_name(config_name: &str) -> String {
    let fallback = "CMSAgent".to_string();
    let Some(template) = template_config_path(config_name) else {
        return fallback;
    };
    std::fs::read_to_string(template)
        .ok()
        .and_then(|raw| serde_json::from_str::<serde_json::Value>(&raw).ok())
        .and_then(|v| v["agent"]["app_name"].as_str().map(str::to_string))
        .unwrap_or(fallback)
}

/// Config template shipped next to the executable: `config/<name>`, then
/// `<name>`.
fn template_config_path(config_name: &str) -> Option<PathBuf> {
    let exe_dir = std::env::current_exe().ok()?.parent()?.to_path_buf();
    let nested = exe_dir.join("config").join(config_name);
    if nested.is_file() {
        return Some(nested);
    }
    let flat = exe_dir.join(config_name);
    flat.is_file().then_some(flat)
}

fn load_config(layout: &StorageLayout, config_name: &str) -> Result<AgentConfig, String> {
    let config_path = layout.root().join(config_name);
    if !config_path.exists() {
        match template_config_path(config_name) {
            Some(template) => {
                info!(from = %template.display(), to = %config_path.display(), "copying config template");
                std::fs::copy(&template, &config_path)
                    .map_err(|e| format!("failed to copy config template: {e}"))?;
            }
            None => {
                return Err(format!(
                    "config file missing in storage ('{}') and no template found near the executable",
                    config_path.display()
                ));
            }
        }
    }
    AgentConfig::load(&config_path).map_err(|e| format!("config file error: {e}"))
}

/// Ask the running instance to restart and wait for its lock to free up.
/// Returns the acquired guard when the takeover succeeds in time.
async fn force_takeover(store: &Arc<StateStore>, is_admin: bool) -> Option<SingletonGuard> {
    info!("--force: requesting running instance to shut down");
    let token = store
        .device_identity()
        .and_then(|id| store.load_token(&id))
        .map(|t| t.as_str().to_string())
        .unwrap_or_else(|| "FORCE_IPC_NO_TOKEN".to_string());

    let socket = platform::ipc_socket_path(is_admin);
    let args: Vec<String> = std::env::args().collect();
    let response = ipc::send_force_command(&socket, args, &token).await;
    match response.status {
        IpcStatus::Acknowledged => {
            info!("running agent acknowledged restart, waiting for lock release");
            let deadline = tokio::time::Instant::now() + FORCE_LOCK_WAIT;
            while tokio::time::Instant::now() < deadline {
                match SingletonGuard::acquire(&store.layout().lock_file()) {
                    Ok((guard, _)) => {
                        info!("lock released by previous instance");
                        return Some(guard);
                    }
                    Err(_) => tokio::time::sleep(Duration::from_secs(1)).await,
                }
            }
            warn!("previous instance did not release the lock in time");
            None
        }
        IpcStatus::AgentNotRunning => {
            info!("no running agent found, proceeding normally");
            None
        }
        status => {
            warn!(?status, "force request was not acknowledged, proceeding normally");
            None
        }
    }
}

fn room_assignment(store: &Arc<StateStore>, prompter: &dyn UserPrompter) -> Option<RoomAssignment> {
    if let Some(room) = store.room() {
        return Some(room);
    }
    let room = prompter.prompt_room()?;
    if let Err(e) = store.put_room(room.clone()) {
        error!(%e, "CRITICAL: failed to persist room configuration");
    }
    Some(room)
}

#[allow(clippy::too_many_arguments)]
fn build_agent(
    config: AgentConfig,
    store: Arc<StateStore>,
    device_id: cms_core::DeviceIdentity,
    singleton: SingletonGuard,
    room: RoomAssignment,
    prompter: Arc<ConsolePrompter>,
    is_admin: bool,
) -> Result<Agent, String> {
    let http = Arc::new(
        RequestClient::new(
            &config.server_url,
            Duration::from_secs(config.http_client.request_timeout_sec),
        )
        .map_err(|e| format!("request client init failed: {e}"))?,
    );
    let policy = ReconnectPolicy {
        initial: Duration::from_secs(config.websocket.reconnect_delay_initial_sec),
        max: Duration::from_secs(config.websocket.reconnect_delay_max_sec),
        max_attempts: config.websocket.reconnect_attempts_max,
        randomization: 0.5,
    };
    let push = Arc::new(
        PushClient::new(&config.server_url, policy)
            .map_err(|e| format!("push client init failed: {e}"))?,
    );

    let handle = AgentHandle::new();
    let executor = Arc::new(CommandExecutor::new(
        ExecutorConfig::from_section(&config.command_executor),
        Arc::new(PushResultSink(Arc::clone(&push))),
    ));
    let event_sink = Arc::new(AgentEventSink::new(Arc::clone(&executor), Arc::clone(&handle)));

    let inspector = Arc::new(SysinfoInspector::new(store.layout().root()));
    let connector = Arc::new(ServerConnector::new(
        Arc::clone(&store),
        Arc::clone(&http),
        Arc::clone(&push),
        inspector,
        prompter,
        Arc::clone(&event_sink) as Arc<dyn cms_net::EventSink>,
        device_id.clone(),
    ));
    let update = Arc::new(UpdateEngine::new(
        Arc::clone(&store),
        Arc::clone(&http),
        Arc::clone(&connector),
        Arc::clone(&handle),
    ));
    event_sink.set_update_engine(Arc::clone(&update));

    let ipc_server =
        Arc::new(IpcServer::new(platform::ipc_socket_path(is_admin), Arc::clone(&handle)));

    // Token fan-out: the request client and the IPC server both track
    // the live session token.
    let tokens = SessionTokenHandle::new();
    tokens.register(Arc::new(HttpTokenSink { http, device_id }) as Arc<dyn TokenSink>);
    tokens.register(Arc::clone(&ipc_server) as Arc<dyn TokenSink>);

    Ok(Agent {
        handle,
        connector,
        executor,
        push,
        ipc: ipc_server,
        update,
        tokens,
        singleton,
        room,
        status_interval: Duration::from_secs(config.agent.status_report_interval_sec),
    })
}
