use std::sync::Arc;

use teloxide::prelude::*;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use chatrelay::chatbot::{
    ChatEvent, ChatPlatform, Database, OpenRouterClient, PhotoRef, RelayConfig, RelayEngine, Sender,
    TelegramClient,
};
use chatrelay::config::{Config, DEFAULT_CONFIG_PATH};
use chatrelay::telegram_log::TelegramLogLayer;

#[tokio::main]
async fn main() {
    let dotenv = dotenvy::dotenv();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);
    let platform: Arc<dyn ChatPlatform> = Arc::new(TelegramClient::new(bot.clone()));

    // Setup logging
    let log_dir = config.log_dir();
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("chatrelay.log"))
        .expect("Failed to open log file");
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        );

    if let Some(log_chat_id) = config.log_chat_id {
        let tg_layer = TelegramLogLayer::new(platform.clone(), log_chat_id);
        registry.with(tg_layer).init();
    } else {
        registry.init();
    }

    info!("🚀 Starting chatrelay...");
    match dotenv {
        Ok(path) => info!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => warn!("No .env file found, using process environment"),
        Err(e) => warn!("Failed to load .env file: {e}"),
    }
    info!("Loaded config from {config_path}");
    info!("Text model: {}, vision model: {}", config.text_model, config.vision_model);
    info!("Data dir: {}", config.data_dir.display());

    let database = match Database::open(&config.database_path()) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!("Failed to open database {}: {e}", config.database_path().display());
            std::process::exit(1);
        }
    };

    // Conversations start fresh on every restart
    match database.clear_all_chat_history() {
        Ok(removed) => info!("🧹 Cleared chat history ({removed} message(s))"),
        Err(e) => warn!("Failed to clear chat history: {e}"),
    }

    let bot_username = match bot.get_me().await {
        Ok(me) => {
            info!("Bot user ID: {}, username: @{}", me.id, me.username());
            me.username().to_string()
        }
        Err(e) => {
            warn!("Failed to get bot info: {e}");
            "bot".to_string()
        }
    };

    let completion = Arc::new(OpenRouterClient::with_base_url(
        config.openrouter_api_key.clone(),
        config.openrouter_base_url.clone(),
    ));
    let relay_config = RelayConfig {
        text_model: config.text_model.clone(),
        vision_model: config.vision_model.clone(),
        bot_username,
    };
    let engine = Arc::new(RelayEngine::new(relay_config, database, platform, completion));

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handle_message));

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![engine])
        .enable_ctrlc_handler()
        .build();

    let shutdown = dispatcher.shutdown_token();
    tokio::spawn(async move {
        wait_for_sigterm().await;
        info!("SIGTERM received, shutting down");
        if let Ok(done) = shutdown.shutdown() {
            done.await;
        }
    });

    dispatcher.dispatch().await;
    info!("👋 Stopped");
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {e}");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}

async fn handle_message(msg: Message, engine: Arc<RelayEngine>) -> ResponseResult<()> {
    let Some(event) = telegram_to_chat_event(&msg) else {
        return Ok(());
    };

    // Each event runs on its own task; the dispatcher only converts.
    engine.spawn(event);
    Ok(())
}

fn telegram_to_chat_event(msg: &Message) -> Option<ChatEvent> {
    let user = msg.from.as_ref()?;

    let photos = msg
        .photo()
        .unwrap_or_default()
        .iter()
        .map(|size| PhotoRef {
            file_id: size.file.id.to_string(),
            width: size.width,
            height: size.height,
            file_size: size.file.size,
        })
        .collect();

    Some(ChatEvent {
        message_id: msg.id.0 as i64,
        chat_id: msg.chat.id.0,
        sender: Sender {
            id: user.id.0 as i64,
            username: user.username.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
        },
        text: msg.text().map(str::to_string),
        photos,
        caption: msg.caption().map(str::to_string),
    })
}
