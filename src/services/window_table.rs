use crate::error::{BlockerError, Result};
use crate::events::{WindowGeometry, WindowHandle};
use crate::services::overlay::OverlayRect;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Прямоугольники одного кадра; обычно перекрываемых окон немного
pub type FrameRects = SmallVec<[OverlayRect; 8]>;

/// Отслеживаемое окно
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedWindow {
    pub handle: WindowHandle,
    pub class_name: String,
    pub geometry: WindowGeometry,
    pub visible: bool,
    /// Сколько кадров осталось до фактического скрытия
    pub unmap_debounce: u32,
    /// Идёт обратный отсчёт после Unmap
    pub pending_hide: bool,
}

impl TrackedWindow {
    fn new(handle: WindowHandle, class_name: String) -> Self {
        Self {
            handle,
            class_name,
            geometry: WindowGeometry::default(),
            visible: false,
            unmap_debounce: 0,
            pending_hide: false,
        }
    }

    /// Окно снова показано: отменяем ожидающее скрытие
    pub fn arm(&mut self, geometry: WindowGeometry, debounce_frames: u32) {
        self.geometry = geometry;
        self.visible = true;
        self.unmap_debounce = debounce_frames;
        self.pending_hide = false;
    }

    /// Получен Unmap: скрываем не сразу, а через `debounce_frames` кадров
    pub fn begin_hide(&mut self, debounce_frames: u32) {
        self.unmap_debounce = debounce_frames;
        self.pending_hide = true;
    }

    /// Один кадр обратного отсчёта. Возвращает true, если окно скрылось в этом кадре.
    fn advance_frame(&mut self) -> bool {
        if !self.visible || !self.pending_hide {
            return false;
        }

        self.unmap_debounce = self.unmap_debounce.saturating_sub(1);
        if self.unmap_debounce == 0 {
            self.visible = false;
            self.pending_hide = false;
            return true;
        }

        false
    }

    pub fn overlay_rect(&self, padding: u32) -> OverlayRect {
        OverlayRect::around(&self.geometry, padding)
    }
}

impl fmt::Display for TrackedWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {} visible:{} debounce:{}",
            self.class_name, self.handle, self.geometry, self.visible, self.unmap_debounce
        )
    }
}

/// Плотная таблица окон ограниченной вместимости.
///
/// Записи всегда занимают индексы `[0, len)`; удаление сдвигает хвост.
#[derive(Debug, Clone)]
pub struct WindowTable {
    windows: Vec<TrackedWindow>,
    capacity: usize,
}

impl WindowTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            windows: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn find(&self, handle: WindowHandle) -> Option<usize> {
        self.windows.iter().position(|w| w.handle == handle)
    }

    pub fn contains(&self, handle: WindowHandle) -> bool {
        self.find(handle).is_some()
    }

    pub fn get(&self, handle: WindowHandle) -> Option<&TrackedWindow> {
        self.windows.iter().find(|w| w.handle == handle)
    }

    pub fn get_mut(&mut self, handle: WindowHandle) -> Option<&mut TrackedWindow> {
        self.windows.iter_mut().find(|w| w.handle == handle)
    }

    pub fn entry_mut(&mut self, index: usize) -> Option<&mut TrackedWindow> {
        self.windows.get_mut(index)
    }

    /// Индекс существующей записи или новой, пустой.
    ///
    /// Переполнение отклоняется, существующие записи не вытесняются.
    pub fn upsert(&mut self, handle: WindowHandle, class_name: &str) -> Result<usize> {
        if let Some(index) = self.find(handle) {
            return Ok(index);
        }

        if self.windows.len() >= self.capacity {
            return Err(BlockerError::CapacityExceeded {
                capacity: self.capacity,
            });
        }

        self.windows
            .push(TrackedWindow::new(handle, class_name.to_string()));
        Ok(self.windows.len() - 1)
    }

    pub fn remove(&mut self, handle: WindowHandle) -> Option<TrackedWindow> {
        let index = self.find(handle)?;
        Some(self.windows.remove(index))
    }

    pub fn retain<F>(&mut self, keep: F) -> Vec<TrackedWindow>
    where
        F: Fn(&TrackedWindow) -> bool,
    {
        let (kept, removed): (Vec<_>, Vec<_>) = std::mem::take(&mut self.windows)
            .into_iter()
            .partition(|w| keep(w));
        self.windows = kept;
        removed
    }

    pub fn for_each_visible<F>(&self, mut f: F)
    where
        F: FnMut(&TrackedWindow),
    {
        self.windows.iter().filter(|w| w.visible).for_each(|w| f(w));
    }

    /// Обратный отсчёт всех окон на один кадр
    pub fn advance_frame(&mut self) {
        for window in self.windows.iter_mut() {
            if window.advance_frame() {
                info!("Окно скрыто: {}", window);
            }
        }
    }
}

/// Таблица, общая для слушателя событий и цикла отрисовки.
///
/// Все чтения и изменения проходят через один мьютекс.
#[derive(Debug, Clone)]
pub struct SharedWindowTable {
    inner: Arc<Mutex<WindowTable>>,
}

impl SharedWindowTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(WindowTable::new(capacity))),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut WindowTable) -> R) -> R {
        f(&mut self.inner.lock())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn get(&self, handle: WindowHandle) -> Option<TrackedWindow> {
        self.inner.lock().get(handle).cloned()
    }

    /// Шаг кадра: обратный отсчёт и копия прямоугольников видимых окон.
    ///
    /// Блокировка снимается до возврата, рисование идёт уже без неё.
    pub fn advance_frame(&self, padding: u32) -> FrameRects {
        let mut table = self.inner.lock();
        table.advance_frame();

        let mut rects = FrameRects::new();
        table.for_each_visible(|w| rects.push(w.overlay_rect(padding)));
        rects
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: u32) -> WindowHandle {
        WindowHandle::new(id)
    }

    #[test]
    fn test_upsert_returns_existing_index() {
        let mut table = WindowTable::new(4);
        let first = table.upsert(handle(1), "skype").unwrap();
        let second = table.upsert(handle(2), "signal").unwrap();
        assert_eq!((first, second), (0, 1));

        assert_eq!(table.upsert(handle(1), "skype").unwrap(), 0);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_upsert_rejects_over_capacity() {
        let mut table = WindowTable::new(2);
        table.upsert(handle(1), "a").unwrap();
        table.upsert(handle(2), "b").unwrap();

        let err = table.upsert(handle(3), "c").unwrap_err();
        assert!(matches!(err, BlockerError::CapacityExceeded { capacity: 2 }));
        assert_eq!(table.len(), 2);

        // Уже известное окно обновляется даже в полной таблице
        assert_eq!(table.upsert(handle(2), "b").unwrap(), 1);
    }

    #[test]
    fn test_remove_compacts_table() {
        let mut table = WindowTable::new(4);
        for id in 1..=3 {
            table.upsert(handle(id), "skype").unwrap();
        }

        let removed = table.remove(handle(1)).unwrap();
        assert_eq!(removed.handle, handle(1));
        assert_eq!(table.len(), 2);
        assert_eq!(table.find(handle(2)), Some(0));
        assert_eq!(table.find(handle(3)), Some(1));

        assert!(table.remove(handle(42)).is_none());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_class_name_is_captured_once() {
        let mut table = WindowTable::new(1);
        table.upsert(handle(1), "skype").unwrap();
        table.upsert(handle(1), "other").unwrap();
        assert_eq!(table.get(handle(1)).unwrap().class_name, "skype");
    }

    #[test]
    fn test_pending_hide_counts_down() {
        let mut window = TrackedWindow::new(handle(1), "skype".into());
        window.arm(WindowGeometry::new(0, 0, 10, 10), 2);

        // Без Unmap окно видимо бесконечно
        for _ in 0..10 {
            assert!(!window.advance_frame());
        }
        assert!(window.visible);

        window.begin_hide(2);
        assert!(!window.advance_frame());
        assert!(window.visible);
        assert!(window.advance_frame());
        assert!(!window.visible);
        assert!(!window.pending_hide);

        // Скрытое окно остаётся скрытым
        assert!(!window.advance_frame());
        assert!(!window.visible);
    }

    #[test]
    fn test_for_each_visible_skips_hidden() {
        let mut table = WindowTable::new(4);
        let a = table.upsert(handle(1), "a").unwrap();
        table.upsert(handle(2), "b").unwrap();
        table
            .entry_mut(a)
            .unwrap()
            .arm(WindowGeometry::new(1, 2, 3, 4), 4);

        let mut seen = Vec::new();
        table.for_each_visible(|w| seen.push(w.handle));
        assert_eq!(seen, vec![handle(1)]);
    }

    #[test]
    fn test_shared_frame_returns_padded_rects() {
        let shared = SharedWindowTable::new(4);
        shared.with(|table| {
            let index = table.upsert(handle(7), "skype").unwrap();
            table
                .entry_mut(index)
                .unwrap()
                .arm(WindowGeometry::new(100, 200, 300, 150), 4);
        });

        let rects = shared.advance_frame(50);
        assert_eq!(rects.len(), 1);
        assert_eq!(rects[0], OverlayRect::new(50, 150, 400, 250));
    }

    #[test]
    fn test_retain_returns_removed_entries() {
        let mut table = WindowTable::new(4);
        table.upsert(handle(1), "skype").unwrap();
        table.upsert(handle(2), "signal").unwrap();
        table.upsert(handle(3), "skype").unwrap();

        let removed = table.retain(|w| w.class_name == "skype");
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].handle, handle(2));
        assert_eq!(table.find(handle(3)), Some(1));
    }
}
