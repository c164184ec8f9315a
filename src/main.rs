use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info, warn};
mod config;
mod error;
mod events;
mod services;
mod utils;

use config::Config;
use services::{create_display_factory, BlockerSource, LogConsumer};

#[derive(Parser, Debug)]
#[command(name = "x11-blocker")]
#[command(about = "Перекрывает оверлеем окна X11 из блок-листа")]
struct Args {
    /// Путь к файлу конфигурации
    #[arg(short, long, default_value = "x11-blocker.toml")]
    config: String,

    /// Режим сухого запуска (сценарий событий вместо X-сервера)
    #[arg(long)]
    dry_run: bool,

    /// Уровень логирования (по умолчанию logging.level из конфигурации)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Загрузка конфигурации
    let config = Config::load(&args.config)?;

    // Инициализация системы логирования
    init_tracing(args.log_level.as_deref().unwrap_or(&config.logging.level))?;

    info!("Запуск x11-blocker v{}", env!("CARGO_PKG_VERSION"));
    info!("Конфигурация загружена из: {}", args.config);

    if args.dry_run {
        warn!("Режим сухого запуска - события X11 эмулируются");
    }

    let source = BlockerSource::new(&config);
    source.start(create_display_factory(&config, args.dry_run))?;

    info!(
        "Цикл отрисовки запущен: {} кадров/с, отступ {}",
        config.render.frame_rate, config.overlay.padding
    );

    let mut frames = interval(Duration::from_secs_f64(1.0 / f64::from(config.render.frame_rate)));
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut hangup = unix_signal(SignalKind::hangup())?;
    let mut toggle = unix_signal(SignalKind::user_defined1())?;
    let mut consumer = LogConsumer::new();

    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = frames.tick() => {
                source.render_frame(&mut consumer);

                if !source.is_listening() {
                    error!("Слушатель событий X11 остановлен, завершаем работу");
                    break;
                }
            }
            _ = hangup.recv() => {
                info!("Получен SIGHUP - перечитываем конфигурацию");
                match Config::load(&args.config) {
                    Ok(new_config) => source.update(&new_config.settings()),
                    Err(e) => warn!("Конфигурация не применена: {:#}", e),
                }
            }
            _ = toggle.recv() => {
                if source.is_active() {
                    info!("Получен SIGUSR1 - оверлей выключен");
                    source.deactivate();
                } else {
                    info!("Получен SIGUSR1 - оверлей включён");
                    source.activate();
                }
            }
            result = &mut ctrl_c => {
                match result {
                    Ok(()) => info!("Получен сигнал завершения (Ctrl+C)"),
                    Err(err) => error!("Ошибка при ожидании сигнала завершения: {}", err),
                }
                break;
            }
        }
    }

    info!("Завершение работы...");

    if let Err(e) = source.stop().await {
        warn!("Слушатель завершился с ошибкой: {}", e);
    }

    info!(
        "x11-blocker завершил работу (нарисовано оверлеев: {}, окон под наблюдением: {})",
        consumer.draw_count(),
        source.tracker().table().len()
    );
    Ok(())
}

fn init_tracing(level: &str) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .init();

    Ok(())
}
