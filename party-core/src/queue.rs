//! Replicated watch queue: uniqueness per title, per-peer vote maps, ranked view.

use uuid::Uuid;

use crate::protocol::{MediaType, QueueItem, Vote};
use crate::room::PeerAddress;

/// Items in insertion order. Rank is always recomputed from the vote maps.
#[derive(Debug, Default, Clone)]
pub struct WatchQueue {
    items: Vec<QueueItem>,
}

impl WatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a live item already exists for `(tmdb_id, media_type)`.
    pub fn contains_title(&self, tmdb_id: u64, media_type: MediaType) -> bool {
        self.items
            .iter()
            .any(|i| i.tmdb_id == tmdb_id && i.media_type == media_type)
    }

    /// Insert an item. No-op (returns false) if its title or id is already queued.
    pub fn add(&mut self, item: QueueItem) -> bool {
        if self.contains_title(item.tmdb_id, item.media_type)
            || self.items.iter().any(|i| i.id == item.id)
        {
            return false;
        }
        self.items.push(item);
        true
    }

    /// Overwrite `voter`'s vote on an item. Returns false if the item is unknown.
    pub fn vote(&mut self, item_id: Uuid, voter: &PeerAddress, vote: Vote) -> bool {
        match self.items.iter_mut().find(|i| i.id == item_id) {
            Some(item) => {
                item.votes.insert(voter.clone(), vote);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, item_id: Uuid) -> Option<QueueItem> {
        let pos = self.items.iter().position(|i| i.id == item_id)?;
        Some(self.items.remove(pos))
    }

    /// Replace the whole queue with a host snapshot. Duplicate titles in the
    /// snapshot keep their first occurrence.
    pub fn replace(&mut self, items: Vec<QueueItem>) {
        self.items.clear();
        for item in items {
            self.add(item);
        }
    }

    pub fn get(&self, item_id: Uuid) -> Option<&QueueItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    /// Items in insertion order (the order a QueueSync carries them).
    pub fn items(&self) -> &[QueueItem] {
        &self.items
    }

    /// Items by score descending; ties keep insertion order.
    pub fn ranked(&self) -> Vec<QueueItem> {
        let mut out = self.items.clone();
        out.sort_by_key(|i| std::cmp::Reverse(i.score()));
        out
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::QueueCandidate;

    fn candidate(tmdb_id: u64, media_type: MediaType, title: &str) -> QueueCandidate {
        QueueCandidate {
            tmdb_id,
            media_type,
            title: title.into(),
            poster: None,
            year: None,
        }
    }

    fn item(tmdb_id: u64, title: &str) -> QueueItem {
        QueueItem::from_candidate(candidate(tmdb_id, MediaType::Movie, title), "Host")
    }

    #[test]
    fn duplicate_title_is_noop() {
        let mut q = WatchQueue::new();
        assert!(q.add(item(550, "Fight Club")));
        assert!(!q.add(item(550, "Fight Club (again)")));
        assert_eq!(q.len(), 1);
        assert_eq!(q.items()[0].title, "Fight Club");
    }

    #[test]
    fn same_id_different_media_type_is_distinct() {
        let mut q = WatchQueue::new();
        assert!(q.add(item(1399, "Movie 1399")));
        assert!(q.add(QueueItem::from_candidate(
            candidate(1399, MediaType::Tv, "Game of Thrones"),
            "Host"
        )));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn repeat_vote_is_idempotent() {
        let mut q = WatchQueue::new();
        let it = item(550, "Fight Club");
        let id = it.id;
        q.add(it);
        let peer = PeerAddress::new("watchparty-guest-AAAA2222");
        assert!(q.vote(id, &peer, Vote::Up));
        let before = q.get(id).unwrap().clone();
        assert!(q.vote(id, &peer, Vote::Up));
        assert_eq!(q.get(id).unwrap(), &before);
        assert_eq!(q.get(id).unwrap().score(), 1);
    }

    #[test]
    fn changed_vote_replaces() {
        let mut q = WatchQueue::new();
        let it = item(550, "Fight Club");
        let id = it.id;
        q.add(it);
        let peer = PeerAddress::new("p");
        q.vote(id, &peer, Vote::Up);
        q.vote(id, &peer, Vote::Down);
        assert_eq!(q.get(id).unwrap().score(), -1);
        assert_eq!(q.get(id).unwrap().votes.len(), 1);
    }

    #[test]
    fn vote_on_unknown_item() {
        let mut q = WatchQueue::new();
        assert!(!q.vote(Uuid::new_v4(), &PeerAddress::new("p"), Vote::Up));
    }

    #[test]
    fn ranked_is_stable_on_ties() {
        let mut q = WatchQueue::new();
        let a = item(1, "A");
        let b = item(2, "B");
        let c = item(3, "C");
        let (a_id, c_id) = (a.id, c.id);
        q.add(a);
        q.add(b);
        q.add(c);
        let ranked: Vec<_> = q.ranked().into_iter().map(|i| i.title).collect();
        assert_eq!(ranked, ["A", "B", "C"]);

        q.vote(c_id, &PeerAddress::new("p1"), Vote::Up);
        q.vote(a_id, &PeerAddress::new("p1"), Vote::Down);
        let ranked: Vec<_> = q.ranked().into_iter().map(|i| i.title).collect();
        assert_eq!(ranked, ["C", "B", "A"]);
        // Insertion order is untouched.
        assert_eq!(q.items()[0].title, "A");
    }

    #[test]
    fn remove_and_replace() {
        let mut q = WatchQueue::new();
        let a = item(1, "A");
        let a_id = a.id;
        q.add(a.clone());
        assert_eq!(q.remove(a_id).map(|i| i.title), Some("A".to_string()));
        assert!(q.remove(a_id).is_none());

        q.replace(vec![a.clone(), item(2, "B"), item(1, "A dup")]);
        assert_eq!(q.len(), 2);
        assert_eq!(q.items()[0].id, a_id);
    }
}
