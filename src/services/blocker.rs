use crate::blocker_error;
use crate::config::{BlockerSettings, Config};
use crate::error::{BlockerError, Result};
use crate::services::block_list::{BlockList, SharedBlockList};
use crate::services::display::{DisplayConnection, DisplayFactory};
use crate::services::overlay::{OverlayConsumer, OverlayImage};
use crate::services::tracker::Tracker;
use crate::services::window_table::SharedWindowTable;
use crate::trace_if_enabled;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Параметры слушателя и супервизора
#[derive(Debug, Clone)]
struct ListenerOptions {
    poll_timeout: Duration,
    reconnect_delay: Duration,
    max_reconnects: u32,
}

/// Источник оверлея: владеет таблицей окон, блок-листом, текстурой и
/// фоновым слушателем событий X11.
///
/// Два контекста выполнения: слушатель (отдельная блокирующая задача) и
/// `render_frame`, который хост вызывает раз в кадр.
pub struct BlockerSource {
    tracker: Tracker,
    block_list: SharedBlockList,
    overlay: Mutex<OverlayImage>,
    padding: u32,
    evict_on_unblock: bool,
    options: ListenerOptions,
    active: AtomicBool,
    listening: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    supervisor: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl BlockerSource {
    pub fn new(config: &Config) -> Self {
        info!(
            "Инициализация BlockerSource (вместимость: {}, debounce: {} кадров)",
            config.tracker.capacity, config.tracker.debounce_frames
        );

        let settings = config.settings();
        let block_list = SharedBlockList::new(block_list_from(&settings));
        let tracker = Tracker::new(
            SharedWindowTable::new(config.tracker.capacity),
            block_list.clone(),
            config.tracker.debounce_frames,
        );

        Self {
            tracker,
            block_list,
            overlay: Mutex::new(OverlayImage::new(settings.image_path())),
            padding: config.overlay.padding,
            evict_on_unblock: config.tracker.evict_on_unblock,
            options: ListenerOptions {
                poll_timeout: Duration::from_millis(config.tracker.poll_timeout_ms),
                reconnect_delay: Duration::from_millis(config.tracker.reconnect_delay_ms),
                max_reconnects: config.tracker.max_reconnects,
            },
            active: AtomicBool::new(true),
            listening: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(AtomicBool::new(false)),
            supervisor: Mutex::new(None),
        }
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn activate(&self) {
        self.active.store(true, Ordering::Relaxed);
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Relaxed);
    }

    /// Применить новые настройки: заменить блок-лист и при необходимости перечитать картинку
    pub fn update(&self, settings: &BlockerSettings) {
        self.block_list.replace(block_list_from(settings));

        if self.evict_on_unblock {
            let current = self.block_list.snapshot();
            let evicted = self
                .tracker
                .table()
                .with(|table| table.retain(|w| current.contains(&w.class_name)));
            for window in evicted {
                info!("Окно больше не в блок-листе, удалено: {}", window);
            }
        }

        self.overlay.lock().update(settings.image_path());
    }

    /// Запустить фоновый слушатель. Должен вызываться внутри runtime tokio.
    pub fn start(&self, factory: DisplayFactory) -> Result<()> {
        let mut supervisor = self.supervisor.lock();
        if supervisor.is_some() && self.is_listening() {
            warn!("Слушатель уже запущен");
            return Ok(());
        }

        info!("Запуск слушателя событий");
        self.shutdown.store(false, Ordering::Release);
        self.listening.store(true, Ordering::Release);

        let handle = tokio::spawn(supervise(
            self.tracker.clone(),
            Arc::new(factory),
            self.options.clone(),
            Arc::clone(&self.shutdown),
            Arc::clone(&self.listening),
        ));
        *supervisor = Some(handle);
        Ok(())
    }

    /// Остановить слушатель и дождаться освобождения соединения
    pub async fn stop(&self) -> Result<()> {
        self.shutdown.store(true, Ordering::Release);

        let handle = self.supervisor.lock().take();
        let Some(handle) = handle else {
            return Ok(());
        };

        info!("Остановка слушателя событий...");
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
            Ok(Ok(result)) => {
                info!("Слушатель событий остановлен");
                result
            }
            Ok(Err(e)) => Err(blocker_error!(internal, "Задача слушателя упала: {}", e)),
            Err(_) => {
                warn!("Таймаут при остановке слушателя");
                Err(blocker_error!(internal, "таймаут остановки слушателя"))
            }
        }
    }

    /// Один кадр: обратный отсчёт скрытия и отрисовка оверлея над видимыми окнами.
    /// Возвращает число нарисованных прямоугольников.
    pub fn render_frame(&self, consumer: &mut dyn OverlayConsumer) -> usize {
        let rects = self.tracker.table().advance_frame(self.padding);

        if !self.is_active() {
            return 0;
        }

        let texture = self.overlay.lock().texture();
        for rect in &rects {
            consumer.draw(&texture, *rect);
        }
        rects.len()
    }
}

fn block_list_from(settings: &BlockerSettings) -> BlockList {
    let list = BlockList::new(settings.windows.iter().cloned());
    if list.is_empty() {
        warn!("Блок-лист пуст - ни одно окно не будет перекрыто");
    } else {
        info!("Блокируется классов окон: {}", list.len());
    }
    list
}

/// Старое соединение больше не пришлёт Unmap/Destroy, а идентификаторы окон
/// после перезапуска X-сервера могут достаться чужим окнам.
fn forget_windows(tracker: &Tracker) {
    let stale = tracker.table().with(|table| table.retain(|_| false));
    for window in stale {
        info!("Окно забыто после разрыва соединения: {}", window);
    }
}

/// Перезапускает слушатель после разрыва соединения
async fn supervise(
    tracker: Tracker,
    factory: Arc<DisplayFactory>,
    options: ListenerOptions,
    shutdown: Arc<AtomicBool>,
    listening: Arc<AtomicBool>,
) -> Result<()> {
    let mut reconnects = 0u32;

    let result = loop {
        let result = tokio::task::spawn_blocking({
            let tracker = tracker.clone();
            let factory = Arc::clone(&factory);
            let shutdown = Arc::clone(&shutdown);
            let poll_timeout = options.poll_timeout;
            move || {
                let display = (factory.as_ref())()?;
                listen(&tracker, display, &shutdown, poll_timeout)
            }
        })
        .await
        .map_err(|e| blocker_error!(internal, "Слушатель аварийно завершился: {}", e))
        .and_then(|result| result);

        match result {
            Ok(()) => break Ok(()),
            Err(e) if is_recoverable(&e) => {
                forget_windows(&tracker);

                if shutdown.load(Ordering::Acquire) {
                    break Ok(());
                }

                reconnects += 1;
                if options.max_reconnects > 0 && reconnects > options.max_reconnects {
                    error!("{}. Лимит переподключений ({}) исчерпан", e, options.max_reconnects);
                    break Err(e);
                }

                warn!(
                    "{}. Переподключение через {:?} (попытка {})",
                    e, options.reconnect_delay, reconnects
                );
                tokio::time::sleep(options.reconnect_delay).await;

                if shutdown.load(Ordering::Acquire) {
                    break Ok(());
                }
            }
            Err(e) => {
                error!("Слушатель событий завершился с ошибкой: {}", e);
                break Err(e);
            }
        }
    };

    listening.store(false, Ordering::Release);
    result
}

fn is_recoverable(e: &BlockerError) -> bool {
    e.is_disconnect() || matches!(e, BlockerError::Connect(_))
}

/// Тело слушателя: единственная точка ожидания - `next_event` с таймаутом,
/// между ожиданиями проверяется флаг остановки.
fn listen(
    tracker: &Tracker,
    mut display: Box<dyn DisplayConnection>,
    shutdown: &AtomicBool,
    poll_timeout: Duration,
) -> Result<()> {
    info!("Слушатель событий X11 запущен");

    while !shutdown.load(Ordering::Acquire) {
        let Some(event) = display.next_event(poll_timeout)? else {
            continue;
        };

        let outcome = tracker.handle_event(&event, display.as_ref())?;
        trace_if_enabled!("{} -> {}", event, outcome);
    }

    info!("Слушатель событий X11 получил сигнал остановки");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{WindowEvent, WindowGeometry, WindowHandle};
    use crate::services::display::ScriptedDisplay;
    use crate::services::overlay::{OverlayRect, OverlayTexture};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct RecordingConsumer {
        rects: Vec<OverlayRect>,
    }

    impl OverlayConsumer for RecordingConsumer {
        fn draw(&mut self, _texture: &OverlayTexture, rect: OverlayRect) {
            self.rects.push(rect);
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.windows = vec!["skype".to_string()];
        config.tracker.poll_timeout_ms = 10;
        config.tracker.reconnect_delay_ms = 10;
        config
    }

    fn h(id: u32) -> WindowHandle {
        WindowHandle::new(id)
    }

    fn skype_display() -> ScriptedDisplay {
        ScriptedDisplay::new()
            .with_window(h(7), "skype", WindowGeometry::new(100, 200, 300, 150))
            .with_window(h(9), "chrome", WindowGeometry::new(0, 0, 800, 600))
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("условие не выполнено за отведённое время");
    }

    #[test]
    fn test_render_frame_draws_padded_rects() {
        let source = BlockerSource::new(&test_config());
        let display = skype_display();

        source
            .tracker()
            .handle_event(&WindowEvent::Map { handle: h(7) }, &display)
            .unwrap();
        source
            .tracker()
            .handle_event(&WindowEvent::Map { handle: h(9) }, &display)
            .unwrap();

        let mut consumer = RecordingConsumer::default();
        assert_eq!(source.render_frame(&mut consumer), 1);
        assert_eq!(consumer.rects, vec![OverlayRect::new(50, 150, 400, 250)]);
    }

    #[test]
    fn test_deactivated_source_keeps_counting_down() {
        let source = BlockerSource::new(&test_config());
        let display = skype_display();
        let tracker = source.tracker();

        tracker.handle_event(&WindowEvent::Map { handle: h(7) }, &display).unwrap();
        tracker.handle_event(&WindowEvent::Unmap { handle: h(7) }, &display).unwrap();

        source.deactivate();
        let mut consumer = RecordingConsumer::default();
        for _ in 0..4 {
            assert_eq!(source.render_frame(&mut consumer), 0);
        }
        assert!(consumer.rects.is_empty());

        source.activate();
        assert_eq!(source.render_frame(&mut consumer), 0);
        assert!(!tracker.table().get(h(7)).unwrap().visible);
    }

    #[test]
    fn test_update_keeps_tracked_windows_by_default() {
        let source = BlockerSource::new(&test_config());
        let display = skype_display();
        source
            .tracker()
            .handle_event(&WindowEvent::Map { handle: h(7) }, &display)
            .unwrap();

        source.update(&BlockerSettings::new(vec!["signal".to_string()]));
        assert_eq!(source.tracker().table().len(), 1);
    }

    #[test]
    fn test_update_evicts_unblocked_windows_when_enabled() {
        let mut config = test_config();
        config.tracker.evict_on_unblock = true;
        let source = BlockerSource::new(&config);
        let display = skype_display();
        source
            .tracker()
            .handle_event(&WindowEvent::Map { handle: h(7) }, &display)
            .unwrap();

        source.update(&BlockerSettings::new(vec!["skype".to_string(), "signal".to_string()]));
        assert_eq!(source.tracker().table().len(), 1);

        source.update(&BlockerSettings::new(vec!["signal".to_string()]));
        assert!(source.tracker().table().is_empty());
    }

    #[tokio::test]
    async fn test_listener_processes_events_and_stops() {
        let source = BlockerSource::new(&test_config());

        let factory: DisplayFactory = Box::new(|| {
            Ok(Box::new(
                skype_display()
                    .then(WindowEvent::Create { handle: h(9) })
                    .then(WindowEvent::Map { handle: h(9) })
                    .then(WindowEvent::Map { handle: h(7) }),
            ) as Box<dyn DisplayConnection>)
        });
        source.start(factory).unwrap();
        assert!(source.is_listening());

        let table = source.tracker().table().clone();
        wait_until(|| table.len() == 1).await;
        assert!(table.get(h(7)).unwrap().visible);
        assert!(table.get(h(9)).is_none());

        source.stop().await.unwrap();
        assert!(!source.is_listening());
    }

    #[tokio::test]
    async fn test_supervisor_reconnects_after_disconnect() {
        let source = BlockerSource::new(&test_config());
        let connections = Arc::new(AtomicUsize::new(0));

        let factory: DisplayFactory = Box::new({
            let connections = Arc::clone(&connections);
            move || {
                let attempt = connections.fetch_add(1, Ordering::SeqCst);
                let display = if attempt == 0 {
                    skype_display()
                        .then(WindowEvent::Map { handle: h(7) })
                        .then_disconnect()
                } else {
                    skype_display()
                        .with_window(h(8), "skype", WindowGeometry::new(10, 10, 100, 100))
                        .then(WindowEvent::Map { handle: h(8) })
                };
                Ok(Box::new(display) as Box<dyn DisplayConnection>)
            }
        });
        source.start(factory).unwrap();

        let table = source.tracker().table().clone();
        wait_until(|| table.get(h(8)).is_some()).await;
        assert!(connections.load(Ordering::SeqCst) >= 2);
        assert!(source.is_listening());
        assert!(table.get(h(7)).is_none());

        source.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_reconnect_forgets_windows_of_lost_connection() {
        let source = BlockerSource::new(&test_config());
        let connections = Arc::new(AtomicUsize::new(0));

        let factory: DisplayFactory = Box::new({
            let connections = Arc::clone(&connections);
            move || {
                let attempt = connections.fetch_add(1, Ordering::SeqCst);
                let display = if attempt == 0 {
                    skype_display()
                        .then(WindowEvent::Map { handle: h(7) })
                        .then_disconnect()
                } else {
                    ScriptedDisplay::new()
                };
                Ok(Box::new(display) as Box<dyn DisplayConnection>)
            }
        });
        source.start(factory).unwrap();

        // Таблица очищается до повторного вызова фабрики
        wait_until(|| connections.load(Ordering::SeqCst) >= 2).await;

        let mut consumer = RecordingConsumer::default();
        for _ in 0..10 {
            assert_eq!(source.render_frame(&mut consumer), 0);
        }
        assert!(consumer.rects.is_empty());
        assert!(source.tracker().table().is_empty());
        assert!(source.is_listening());

        source.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_render_runs_alongside_listener() {
        let source = BlockerSource::new(&test_config());
        let other_rect = OverlayRect::new(350, 350, 300, 200);

        let factory: DisplayFactory = Box::new(|| {
            let script = [
                WindowEvent::Map { handle: h(7) },
                WindowEvent::Map { handle: h(8) },
                WindowEvent::Unmap { handle: h(8) },
                WindowEvent::Map { handle: h(8) },
                WindowEvent::Configure { handle: h(8) },
                WindowEvent::Unmap { handle: h(7) },
                WindowEvent::Map { handle: h(7) },
                WindowEvent::Destroy { handle: h(8) },
                WindowEvent::Unmap { handle: h(7) },
                WindowEvent::Map { handle: h(7) },
                WindowEvent::Configure { handle: h(7) },
                WindowEvent::Unmap { handle: h(7) },
                WindowEvent::Map { handle: h(7) },
            ];
            let display = script.into_iter().fold(
                skype_display()
                    .with_window(h(8), "skype", WindowGeometry::new(400, 400, 200, 100))
                    .with_pace(Duration::from_millis(2)),
                |display, event| display.then(event),
            );
            Ok(Box::new(display) as Box<dyn DisplayConnection>)
        });
        source.start(factory).unwrap();

        let table = source.tracker().table().clone();
        let mut admitted = false;
        let mut frames_after_destroy = 0;

        for _ in 0..2000 {
            let present = table.get(h(8)).is_some();
            admitted |= present;
            let destroyed = admitted && !present;

            let mut consumer = RecordingConsumer::default();
            source.render_frame(&mut consumer);

            if destroyed {
                assert!(!consumer.rects.contains(&other_rect));
                frames_after_destroy += 1;
                if frames_after_destroy >= 20 {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        assert!(admitted);
        assert!(frames_after_destroy >= 20);
        assert!(table.get(h(7)).is_some());

        source.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_supervisor_gives_up_after_max_reconnects() {
        let mut config = test_config();
        config.tracker.max_reconnects = 2;
        let source = BlockerSource::new(&config);
        let connections = Arc::new(AtomicUsize::new(0));

        let factory: DisplayFactory = Box::new({
            let connections = Arc::clone(&connections);
            move || {
                connections.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(ScriptedDisplay::new().then_disconnect()) as Box<dyn DisplayConnection>)
            }
        });
        source.start(factory).unwrap();

        wait_until(|| !source.is_listening()).await;
        assert_eq!(connections.load(Ordering::SeqCst), 3);

        let err = source.stop().await.unwrap_err();
        assert!(err.is_disconnect());
    }
}
