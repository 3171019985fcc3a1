//! Leader election (Bully algorithm with terms)
//!
//! The master with the highest id among the reachable ones becomes leader.
//! Every election bumps a term; announcements carrying an older term are
//! rejected, and a leader that hears of a newer-term leader steps down.
//!
//! There is no quorum: during a partition two leaders can coexist until the
//! next liveness cycle reconciles them.

use crate::common::{AddressBook, Error, MetricsRegistry, Result};
use crate::master::metadata::MetadataStore;
use crate::master::peer_client::{
    AnnouncementAck, LeaderAnnouncement, LeaderView, PeerClient, PeerTransport,
};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error, info, warn};

const TERM_KEY: &str = "election_term";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Unknown,
    Candidate,
    Leader,
    Follower,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Unknown => write!(f, "unknown"),
            Role::Candidate => write!(f, "candidate"),
            Role::Leader => write!(f, "leader"),
            Role::Follower => write!(f, "follower"),
        }
    }
}

/// This node's view of cluster leadership
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderState {
    pub leader: Option<String>,
    /// Term of the current leader
    pub term: u64,
    /// Highest term observed anywhere, used to number the next election
    pub highest_term: u64,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectionOutcome {
    Elected { term: u64 },
    /// A higher-id peer answered; wait for its announcement
    Deferred { alive: Vec<String> },
}

pub struct LeaderElector<P = PeerClient> {
    book: AddressBook,
    transport: Arc<P>,
    state: RwLock<LeaderState>,
    store: Option<Arc<MetadataStore>>,
    metrics: Arc<MetricsRegistry>,
}

impl<P: PeerTransport> LeaderElector<P> {
    pub fn new(book: AddressBook, transport: Arc<P>, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            book,
            transport,
            state: RwLock::new(LeaderState {
                leader: None,
                term: 0,
                highest_term: 0,
                role: Role::Unknown,
            }),
            store: None,
            metrics,
        }
    }

    /// Persist terms in `store`, resuming from the last one written there.
    pub fn with_store(mut self, store: Arc<MetadataStore>) -> Result<Self> {
        if let Some(bytes) = store.get_config(TERM_KEY)? {
            let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                Error::MetadataCorrupted(format!("{} has {} bytes", TERM_KEY, bytes.len()))
            })?;
            let term = u64::from_le_bytes(raw);
            let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
            state.term = term;
            state.highest_term = term;
            info!(term, "Restored election term");
        }
        self.store = Some(store);
        Ok(self)
    }

    pub fn node_id(&self) -> &str {
        self.book.local_id()
    }

    pub fn book(&self) -> &AddressBook {
        &self.book
    }

    pub fn state(&self) -> LeaderState {
        self.state.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn view(&self) -> LeaderView {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        LeaderView {
            leader: state.leader.clone(),
            term: state.term,
        }
    }

    pub fn is_leader(&self) -> bool {
        self.state.read().unwrap_or_else(PoisonError::into_inner).role == Role::Leader
    }

    /// `Ok` on the leader, `NotLeader` with the known leader elsewhere
    pub fn require_leader(&self) -> Result<()> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        if state.role == Role::Leader {
            Ok(())
        } else {
            Err(Error::NotLeader {
                leader: state.leader.clone(),
            })
        }
    }

    /// Apply a `POST /leader` announcement from a peer.
    pub fn handle_announcement(&self, announcement: &LeaderAnnouncement) -> AnnouncementAck {
        let leader_id = announcement.leader_id.as_str();
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let accepted = self.book.contains(leader_id)
            && (announcement.term > state.term
                || (announcement.term == state.term
                    && state
                        .leader
                        .as_deref()
                        .map_or(true, |current| leader_id >= current)));

        if accepted {
            if state.role == Role::Leader && leader_id != self.node_id() {
                warn!(
                    new_leader = leader_id,
                    term = announcement.term,
                    "Stepping down"
                );
            }
            self.raise_term(&mut state, announcement.term);
            state.term = announcement.term;
            state.leader = Some(leader_id.to_string());
            state.role = if leader_id == self.node_id() {
                Role::Leader
            } else {
                Role::Follower
            };
            info!(leader = leader_id, term = announcement.term, "Leader accepted");
        } else {
            warn!(
                claimed = leader_id,
                claimed_term = announcement.term,
                local_term = state.term,
                "Rejected stale leader announcement"
            );
        }

        AnnouncementAck {
            accepted,
            leader: state.leader.clone(),
            term: state.term,
        }
    }

    /// Ask every peer who leads, adopting the first live answer. Falls back
    /// to an election when nobody knows. Returns the leader afterwards.
    pub async fn discover_leader(&self) -> Option<String> {
        let local_term = self.state().term;

        for peer in self.book.peers() {
            let view = match self.transport.current_leader(&peer.address).await {
                Ok(view) => view,
                Err(e) => {
                    debug!(peer = %peer.id, error = %e, "Peer did not answer leader query");
                    continue;
                }
            };
            self.observe_term(view.term);

            let Some(leader) = view.leader else {
                continue;
            };
            if leader == self.node_id() || view.term < local_term {
                continue;
            }
            let Some(address) = self.book.address(&leader) else {
                warn!(peer = %peer.id, claimed = %leader, "Peer names an unknown leader");
                continue;
            };
            if !self.transport.probe_alive(address).await {
                debug!(claimed = %leader, "Reported leader is not alive");
                continue;
            }
            if self.adopt(&leader, view.term) {
                info!(leader = %leader, term = view.term, via = %peer.id, "Leader discovered");
                return Some(leader);
            }
        }

        match self.start_election().await {
            ElectionOutcome::Elected { .. } => Some(self.node_id().to_string()),
            ElectionOutcome::Deferred { .. } => self.state().leader,
        }
    }

    /// Run one Bully round.
    pub async fn start_election(&self) -> ElectionOutcome {
        self.metrics.elections_started.inc();
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if state.role != Role::Leader {
                state.role = Role::Candidate;
            }
        }

        let higher = self.book.higher_peers();
        let probes = higher.iter().map(|peer| async move {
            (peer.id.clone(), self.transport.probe_alive(&peer.address).await)
        });
        let alive: Vec<String> = join_all(probes)
            .await
            .into_iter()
            .filter_map(|(id, up)| up.then_some(id))
            .collect();

        if !alive.is_empty() {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if state.role == Role::Candidate {
                state.role = Role::Unknown;
            }
            info!(higher = ?alive, "Higher-ranked master alive, deferring");
            return ElectionOutcome::Deferred { alive };
        }

        let term = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let term = state.term.max(state.highest_term) + 1;
            self.raise_term(&mut state, term);
            state.term = term;
            state.leader = Some(self.node_id().to_string());
            state.role = Role::Leader;
            term
        };
        self.metrics.elections_won.inc();
        info!(node_id = %self.node_id(), term, "Elected leader");

        self.broadcast(term).await;
        ElectionOutcome::Elected { term }
    }

    /// One liveness check; the leader-monitor loop calls this every interval.
    pub async fn check_leader(&self) {
        let state = self.state();
        match (state.role, state.leader) {
            (Role::Leader, _) => self.verify_leadership(state.term).await,
            (_, Some(leader)) if leader != self.node_id() => {
                let alive = match self.book.address(&leader) {
                    Some(address) => self.transport.probe_alive(address).await,
                    None => false,
                };
                if alive {
                    return;
                }
                warn!(leader = %leader, "Leader unresponsive, starting discovery");
                self.clear_leader(&leader);
                self.discover_leader().await;
            }
            _ => {
                self.discover_leader().await;
            }
        }
    }

    async fn broadcast(&self, term: u64) {
        let announcement = LeaderAnnouncement {
            leader_id: self.node_id().to_string(),
            term,
        };
        let peers = self.book.peers();
        let sends = peers.iter().map(|peer| {
            let announcement = &announcement;
            async move {
                (
                    peer,
                    self.transport.announce_leader(&peer.address, announcement).await,
                )
            }
        });
        for (peer, result) in join_all(sends).await {
            match result {
                Ok(ack) if ack.accepted => debug!(peer = %peer.id, term, "Announcement accepted"),
                Ok(ack) => warn!(
                    peer = %peer.id,
                    their_leader = ?ack.leader,
                    their_term = ack.term,
                    "Announcement rejected"
                ),
                Err(e) => debug!(peer = %peer.id, error = %e, "Announcement not delivered"),
            }
        }
    }

    /// Leader side of the liveness loop: yield to a live newer-term leader.
    async fn verify_leadership(&self, my_term: u64) {
        let peers = self.book.peers();
        let queries = peers.iter().map(|peer| async move {
            self.transport.current_leader(&peer.address).await.ok()
        });
        let rival = join_all(queries)
            .await
            .into_iter()
            .flatten()
            .filter_map(|view| view.leader.map(|leader| (view.term, leader)))
            .filter(|(term, leader)| {
                leader != self.node_id()
                    && (*term > my_term || (*term == my_term && leader.as_str() > self.node_id()))
            })
            .max();

        let Some((term, leader)) = rival else {
            return;
        };
        let alive = match self.book.address(&leader) {
            Some(address) => self.transport.probe_alive(address).await,
            None => false,
        };
        if alive && self.adopt(&leader, term) {
            warn!(new_leader = %leader, term, "Stepped down for newer leader");
        }
    }

    /// Follow `leader` unless that would move backwards in terms.
    fn adopt(&self, leader: &str, term: u64) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if term < state.term {
            return false;
        }
        self.raise_term(&mut state, term);
        state.term = term;
        state.leader = Some(leader.to_string());
        state.role = if leader == self.node_id() {
            Role::Leader
        } else {
            Role::Follower
        };
        true
    }

    fn observe_term(&self, term: u64) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        self.raise_term(&mut state, term);
    }

    /// Bump `highest_term` and persist it. Called with the state lock held so
    /// the stored term never falls behind the in-memory one.
    fn raise_term(&self, state: &mut LeaderState, term: u64) {
        if term > state.highest_term {
            state.highest_term = term;
            self.persist_term(term);
        }
    }

    fn clear_leader(&self, expected: &str) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.leader.as_deref() == Some(expected) {
            state.leader = None;
            state.role = Role::Unknown;
        }
    }

    fn persist_term(&self, term: u64) {
        if let Some(store) = &self.store {
            if let Err(e) = store.put_config(TERM_KEY, &term.to_le_bytes()) {
                error!(term, error = %e, "Failed to persist election term");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::MasterNode;
    use crate::master::metadata::FileRecord;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// In-memory cluster: which peers are up and what each reports as leader.
    #[derive(Default)]
    struct MockPeers {
        alive: Mutex<HashSet<String>>,
        views: Mutex<HashMap<String, LeaderView>>,
        announcements: Mutex<Vec<(String, LeaderAnnouncement)>>,
    }

    impl MockPeers {
        fn up(&self, address: &str) -> bool {
            self.alive.lock().unwrap().contains(address)
        }
    }

    impl PeerTransport for MockPeers {
        async fn probe_alive(&self, address: &str) -> bool {
            self.up(address)
        }

        async fn current_leader(&self, address: &str) -> Result<LeaderView> {
            if !self.up(address) {
                return Err(Error::PeerUnreachable(address.to_string()));
            }
            Ok(self
                .views
                .lock()
                .unwrap()
                .get(address)
                .cloned()
                .unwrap_or(LeaderView {
                    leader: None,
                    term: 0,
                }))
        }

        async fn announce_leader(
            &self,
            address: &str,
            announcement: &LeaderAnnouncement,
        ) -> Result<AnnouncementAck> {
            if !self.up(address) {
                return Err(Error::PeerUnreachable(address.to_string()));
            }
            self.announcements
                .lock()
                .unwrap()
                .push((address.to_string(), announcement.clone()));
            Ok(AnnouncementAck {
                accepted: true,
                leader: Some(announcement.leader_id.clone()),
                term: announcement.term,
            })
        }

        async fn push_record(&self, _address: &str, _record: &FileRecord) -> Result<()> {
            Ok(())
        }

        async fn fetch_all_metadata(&self, _address: &str) -> Result<Vec<FileRecord>> {
            Ok(Vec::new())
        }
    }

    fn addr(id: &str) -> String {
        format!("http://{}", id)
    }

    fn book(local: &str) -> AddressBook {
        let members: Vec<MasterNode> = ["master_1", "master_2", "master_3"]
            .iter()
            .map(|id| MasterNode::new(*id, addr(id)))
            .collect();
        AddressBook::new(local, &members).unwrap()
    }

    fn elector(local: &str, peers: Arc<MockPeers>) -> LeaderElector<MockPeers> {
        LeaderElector::new(book(local), peers, Arc::new(MetricsRegistry::new()))
    }

    fn ann(leader: &str, term: u64) -> LeaderAnnouncement {
        LeaderAnnouncement {
            leader_id: leader.to_string(),
            term,
        }
    }

    #[tokio::test]
    async fn test_highest_node_elects_itself_and_announces() {
        let peers = Arc::new(MockPeers::default());
        peers.alive.lock().unwrap().extend([addr("master_1"), addr("master_2")]);
        let node = elector("master_3", peers.clone());

        assert_eq!(node.start_election().await, ElectionOutcome::Elected { term: 1 });
        assert!(node.is_leader());
        assert_eq!(node.view().leader.as_deref(), Some("master_3"));

        let sent = peers.announcements.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|(_, a)| a.leader_id == "master_3" && a.term == 1));
    }

    #[tokio::test]
    async fn test_lower_node_defers_to_live_higher_peer() {
        let peers = Arc::new(MockPeers::default());
        peers.alive.lock().unwrap().insert(addr("master_3"));
        let node = elector("master_1", peers.clone());

        match node.start_election().await {
            ElectionOutcome::Deferred { alive } => assert_eq!(alive, vec!["master_3"]),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(node.state().role, Role::Unknown);
        assert!(peers.announcements.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lower_node_wins_when_higher_peers_are_down() {
        let peers = Arc::new(MockPeers::default());
        let node = elector("master_1", peers);
        assert!(matches!(
            node.start_election().await,
            ElectionOutcome::Elected { .. }
        ));
        assert!(node.require_leader().is_ok());
    }

    #[test]
    fn test_stale_announcement_is_rejected() {
        let node = elector("master_2", Arc::new(MockPeers::default()));

        assert!(node.handle_announcement(&ann("master_3", 4)).accepted);
        assert_eq!(node.state().role, Role::Follower);

        let ack = node.handle_announcement(&ann("master_1", 3));
        assert!(!ack.accepted);
        assert_eq!(ack.leader.as_deref(), Some("master_3"));
        assert_eq!(ack.term, 4);

        // same term, lower id: rejected
        assert!(!node.handle_announcement(&ann("master_1", 4)).accepted);
        // unknown master: rejected
        assert!(!node.handle_announcement(&ann("master_9", 10)).accepted);
        // newer term wins regardless of id
        assert!(node.handle_announcement(&ann("master_1", 5)).accepted);
        assert_eq!(node.view().leader.as_deref(), Some("master_1"));
    }

    #[tokio::test]
    async fn test_leader_steps_down_on_newer_announcement() {
        let node = elector("master_2", Arc::new(MockPeers::default()));
        node.start_election().await;
        assert!(node.is_leader());
        let term = node.state().term;

        assert!(node.handle_announcement(&ann("master_3", term + 1)).accepted);
        assert!(!node.is_leader());
        assert!(matches!(
            node.require_leader(),
            Err(Error::NotLeader { leader: Some(l) }) if l == "master_3"
        ));
    }

    #[tokio::test]
    async fn test_discover_adopts_live_reported_leader() {
        let peers = Arc::new(MockPeers::default());
        peers.alive.lock().unwrap().extend([addr("master_1"), addr("master_3")]);
        peers.views.lock().unwrap().insert(
            addr("master_1"),
            LeaderView {
                leader: Some("master_3".into()),
                term: 2,
            },
        );
        let node = elector("master_2", peers.clone());

        assert_eq!(node.discover_leader().await.as_deref(), Some("master_3"));
        let state = node.state();
        assert_eq!(state.role, Role::Follower);
        assert_eq!(state.term, 2);
        assert!(peers.announcements.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_discover_skips_dead_leader_and_elects() {
        let peers = Arc::new(MockPeers::default());
        peers.alive.lock().unwrap().insert(addr("master_1"));
        peers.views.lock().unwrap().insert(
            addr("master_1"),
            LeaderView {
                leader: Some("master_3".into()),
                term: 5,
            },
        );
        let node = elector("master_2", peers);

        assert_eq!(node.discover_leader().await.as_deref(), Some("master_2"));
        // numbered past every term seen during discovery
        assert_eq!(node.state().term, 6);
    }

    #[tokio::test]
    async fn test_follower_rediscovers_after_leader_failure() {
        let peers = Arc::new(MockPeers::default());
        peers.alive.lock().unwrap().extend([addr("master_1"), addr("master_3")]);
        let node = elector("master_2", peers.clone());
        assert!(node.handle_announcement(&ann("master_3", 1)).accepted);

        node.check_leader().await;
        assert_eq!(node.view().leader.as_deref(), Some("master_3"));

        peers.alive.lock().unwrap().remove(&addr("master_3"));
        node.check_leader().await;
        let state = node.state();
        assert_eq!(state.leader.as_deref(), Some("master_2"));
        assert_eq!(state.role, Role::Leader);
        assert_eq!(state.term, 2);
    }

    #[tokio::test]
    async fn test_leader_yields_to_newer_term_peer() {
        let peers = Arc::new(MockPeers::default());
        let node = elector("master_2", peers.clone());
        node.start_election().await;
        assert!(node.is_leader());

        peers.alive.lock().unwrap().extend([addr("master_1"), addr("master_3")]);
        peers.views.lock().unwrap().insert(
            addr("master_1"),
            LeaderView {
                leader: Some("master_3".into()),
                term: 7,
            },
        );
        node.check_leader().await;
        assert_eq!(node.view().leader.as_deref(), Some("master_3"));
        assert_eq!(node.state().role, Role::Follower);
    }

    fn stored_term(store: &MetadataStore) -> u64 {
        let bytes = store.get_config(TERM_KEY).unwrap().unwrap();
        u64::from_le_bytes(bytes.as_slice().try_into().unwrap())
    }

    #[test]
    fn test_stored_term_keeps_up_with_concurrent_announcements() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MetadataStore::open(dir.path().join("meta.db")).unwrap());
        let node = elector("master_1", Arc::new(MockPeers::default()))
            .with_store(store.clone())
            .unwrap();

        std::thread::scope(|scope| {
            for offset in 0..4u64 {
                let node = &node;
                scope.spawn(move || {
                    for round in 0..50u64 {
                        node.handle_announcement(&ann("master_2", round * 4 + offset + 1));
                    }
                });
            }
        });

        let state = node.state();
        assert_eq!(state.highest_term, 200);
        assert_eq!(stored_term(&store), state.highest_term);

        // terms seen without adopting a leader are kept too
        node.observe_term(250);
        assert_eq!(stored_term(&store), 250);
    }

    #[tokio::test]
    async fn test_term_survives_restart() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MetadataStore::open(dir.path().join("meta.db")).unwrap());

        let node = elector("master_3", Arc::new(MockPeers::default()))
            .with_store(store.clone())
            .unwrap();
        node.start_election().await;
        node.start_election().await;
        assert_eq!(node.state().term, 2);

        let restarted = elector("master_3", Arc::new(MockPeers::default()))
            .with_store(store)
            .unwrap();
        let state = restarted.state();
        assert_eq!(state.term, 2);
        assert_eq!(state.role, Role::Unknown);
        assert_eq!(
            restarted.start_election().await,
            ElectionOutcome::Elected { term: 3 }
        );
    }
}
