use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;

/// Множество имён классов окон, которые нужно перекрывать.
///
/// Сравнение точное и регистрозависимое: "Skype" и "skype" - разные окна.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockList {
    names: HashSet<String>,
}

impl BlockList {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names
                .into_iter()
                .map(Into::into)
                .filter(|name: &String| !name.is_empty())
                .collect(),
        }
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.names.contains(class_name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Список, разделяемый между слушателем и потоком настроек.
///
/// Обновление заменяет весь список целиком; читатели получают снимок `Arc`
/// и держат блокировку только на время клонирования указателя.
#[derive(Debug, Clone, Default)]
pub struct SharedBlockList {
    inner: Arc<RwLock<Arc<BlockList>>>,
}

impl SharedBlockList {
    pub fn new(list: BlockList) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(list))),
        }
    }

    pub fn snapshot(&self) -> Arc<BlockList> {
        self.inner.read().clone()
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.snapshot().contains(class_name)
    }

    /// Возвращает предыдущий список
    pub fn replace(&self, list: BlockList) -> Arc<BlockList> {
        std::mem::replace(&mut *self.inner.write(), Arc::new(list))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_case_sensitive_match() {
        let list = BlockList::new(["skype", "skypeforlinux"]);
        assert!(list.contains("skype"));
        assert!(list.contains("skypeforlinux"));
        assert!(!list.contains("Skype"));
        assert!(!list.contains("sky"));
    }

    #[test]
    fn test_duplicates_and_empty_names_collapse() {
        let list = BlockList::new(["signal", "signal", ""]);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_replace_swaps_whole_list() {
        let shared = SharedBlockList::new(BlockList::new(["skype"]));
        let before = shared.snapshot();

        let old = shared.replace(BlockList::new(["signal"]));
        assert!(old.contains("skype"));
        assert!(!shared.contains("skype"));
        assert!(shared.contains("signal"));

        // Снимок, взятый до замены, не меняется
        assert!(before.contains("skype"));
    }
}
