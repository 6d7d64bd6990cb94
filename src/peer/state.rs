use crate::peer::connection::PeerLink;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Реестр соединений комнаты: не больше одного link на peer_id
#[derive(Default)]
pub struct PeerRegistry {
    peers: Mutex<HashMap<String, Arc<PeerLink>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Регистрирует link, возвращая вытесненный (если был)
    pub fn insert(&self, link: Arc<PeerLink>) -> Option<Arc<PeerLink>> {
        self.peers.lock().insert(link.id().to_owned(), link)
    }

    pub fn get(&self, peer_id: &str) -> Option<Arc<PeerLink>> {
        self.peers.lock().get(peer_id).cloned()
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.peers.lock().contains_key(peer_id)
    }

    /// Удаляет запись, только если она указывает именно на этот link
    pub fn remove_if_same(&self, link: &Arc<PeerLink>) -> bool {
        let mut peers = self.peers.lock();
        match peers.get(link.id()) {
            Some(current) if Arc::ptr_eq(current, link) => {
                peers.remove(link.id());
                true
            }
            _ => false,
        }
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.peers.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.lock().is_empty()
    }

    /// Забирает все записи, оставляя реестр пустым
    pub fn drain(&self) -> Vec<Arc<PeerLink>> {
        self.peers.lock().drain().map(|(_, link)| link).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaStream;

    #[test]
    fn test_stale_link_does_not_remove_replacement() {
        let registry = PeerRegistry::new();
        let old = PeerLink::new("a1", "Agent", MediaStream::empty(), true);
        let new = PeerLink::new("a1", "Agent", MediaStream::empty(), true);

        registry.insert(old.clone());
        let displaced = registry.insert(new.clone());
        assert!(displaced.is_some_and(|d| Arc::ptr_eq(&d, &old)));

        assert!(!registry.remove_if_same(&old));
        assert!(registry.contains("a1"));
        assert!(registry.remove_if_same(&new));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_drain_empties_registry() {
        let registry = PeerRegistry::new();
        registry.insert(PeerLink::new("b", "Agent", MediaStream::empty(), true));
        registry.insert(PeerLink::new("a", "User", MediaStream::empty(), false));
        assert_eq!(registry.ids(), vec!["a", "b"]);

        assert_eq!(registry.drain().len(), 2);
        assert_eq!(registry.len(), 0);
    }
}
