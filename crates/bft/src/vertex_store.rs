//! The vertex store: the uncommitted tree above the last committed vertex.

use cascade_ledger::{LedgerError, StateComputer};
use cascade_types::{
    BFTHeader, LedgerProof, QuorumCertificate, Vertex, VertexId,
};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Vertex store failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VertexStoreError {
    #[error("parent {0:?} is not in the store")]
    MissingParent(VertexId),
    #[error("committed vertex {0:?} is not in the store")]
    MissingCommitTarget(VertexId),
    #[error("root does not match the commit certificate")]
    BadRebuild,
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// The uncommitted vertex tree, rooted at the last committed vertex.
///
/// Every vertex in the store is reachable from the root. The store tracks
/// the highest QC and the highest QC carrying a committed header; commits
/// re-root the tree and drop everything not descending from the new root.
pub struct VertexStore {
    vertices: HashMap<VertexId, Vertex>,
    root: VertexId,
    high_qc: QuorumCertificate,
    high_committed_qc: QuorumCertificate,
    /// Inserted vertices whose parent was not at the previous view.
    indirect_parents: u64,
}

impl VertexStore {
    /// A fresh store rooted at an epoch-genesis vertex.
    pub fn new(root_vertex: Vertex, root_qc: QuorumCertificate) -> Self {
        debug_assert_eq!(root_qc.voted().vertex_id, root_vertex.id());
        let root = root_vertex.id();
        let mut vertices = HashMap::new();
        vertices.insert(root, root_vertex);
        VertexStore {
            vertices,
            root,
            high_qc: root_qc.clone(),
            high_committed_qc: root_qc,
            indirect_parents: 0,
        }
    }

    /// Rebuild from a synced root and its certificates, re-inserting the
    /// given descendants.
    pub fn rebuild(
        &mut self,
        root_vertex: Vertex,
        root_qc: QuorumCertificate,
        root_commit_qc: QuorumCertificate,
        descendants: Vec<Vertex>,
        ledger: &mut StateComputer,
    ) -> Result<(), VertexStoreError> {
        if root_qc.voted().vertex_id != root_vertex.id() {
            return Err(VertexStoreError::BadRebuild);
        }
        match root_commit_qc.committed() {
            Some(committed) => {
                if committed.vertex_id != root_vertex.id() {
                    return Err(VertexStoreError::BadRebuild);
                }
            }
            None => {
                if !root_qc.view().is_genesis() || root_qc != root_commit_qc {
                    return Err(VertexStoreError::BadRebuild);
                }
            }
        }

        self.vertices.clear();
        self.root = root_vertex.id();
        self.vertices.insert(self.root, root_vertex);
        self.high_qc = root_qc;
        self.high_committed_qc = root_commit_qc;

        for vertex in descendants {
            if !self.add_qc(vertex.qc().clone()) {
                return Err(VertexStoreError::MissingParent(vertex.parent_id()));
            }
            self.insert_vertex(vertex, ledger)?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Vertex {
        &self.vertices[&self.root]
    }

    pub fn contains(&self, id: &VertexId) -> bool {
        self.vertices.contains_key(id)
    }

    pub fn high_qc(&self) -> &QuorumCertificate {
        &self.high_qc
    }

    pub fn high_committed_qc(&self) -> &QuorumCertificate {
        &self.high_committed_qc
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Insert a vertex whose parent is present. Runs `prepare` and returns
    /// the vertex's consensus header.
    pub fn insert_vertex(
        &mut self,
        vertex: Vertex,
        ledger: &mut StateComputer,
    ) -> Result<BFTHeader, VertexStoreError> {
        if !self.vertices.contains_key(&vertex.parent_id()) {
            return Err(VertexStoreError::MissingParent(vertex.parent_id()));
        }
        if !vertex.has_direct_parent() {
            self.indirect_parents += 1;
        }
        let ledger_header = ledger.prepare(&vertex);
        let header = BFTHeader::new(vertex.view(), vertex.id(), ledger_header);
        self.vertices.insert(vertex.id(), vertex);
        Ok(header)
    }

    /// Register a QC. Returns false when its vertex is absent (the caller
    /// should sync). Bumps the high QC and high committed QC.
    pub fn add_qc(&mut self, qc: QuorumCertificate) -> bool {
        if !self.vertices.contains_key(&qc.voted().vertex_id) {
            return false;
        }
        if qc.view() > self.high_qc.view() {
            self.high_qc = qc.clone();
        }
        if let Some(committed) = qc.committed() {
            let current = self
                .high_committed_qc
                .committed()
                .map(|header| header.view)
                .unwrap_or(cascade_types::View::GENESIS);
            if committed.view > current {
                self.high_committed_qc = qc;
            }
        }
        true
    }

    /// Commit the vertex the header names: hand the path from the root to
    /// the ledger, prune the tree and re-root at the committed vertex.
    ///
    /// A no-op when the header is at or below the root (already committed).
    pub fn commit(
        &mut self,
        header: &BFTHeader,
        proof: LedgerProof,
        ledger: &mut StateComputer,
    ) -> Result<Vec<Vertex>, VertexStoreError> {
        if header.view <= self.root().view() {
            return Ok(vec![]);
        }
        if !self.vertices.contains_key(&header.vertex_id) {
            return Err(VertexStoreError::MissingCommitTarget(header.vertex_id));
        }

        let path = self.path_from_root(header.vertex_id);
        match ledger.commit_vertices(&path, proof) {
            Ok(_) => {}
            Err(LedgerError::UnknownVertex(id)) => {
                // Prepared state lost (should not happen on the live path).
                warn!(vertex = ?id, "commit of unprepared vertex");
                return Err(VertexStoreError::MissingCommitTarget(id));
            }
            // Ledger invariant violations are fatal; the caller halts.
            Err(error) => return Err(error.into()),
        }

        for vertex in &path {
            debug!(vertex = ?vertex.id(), view = vertex.view().0, "committed vertex");
        }

        self.root = header.vertex_id;
        self.prune_to_root();
        info!(
            root = ?self.root,
            view = header.view.0,
            remaining = self.vertices.len(),
            "vertex store re-rooted"
        );
        Ok(path)
    }

    /// The chain from (excluding) the root down to `tip`, oldest first.
    pub fn path_from_root(&self, tip: VertexId) -> Vec<Vertex> {
        let mut path = Vec::new();
        let mut cursor = tip;
        while cursor != self.root {
            let Some(vertex) = self.vertices.get(&cursor) else {
                return vec![];
            };
            path.push(vertex.clone());
            cursor = vertex.parent_id();
        }
        path.reverse();
        path
    }

    /// `count` vertices walking parentwards from `tip`, for sync serving.
    /// Empty when any vertex along the walk is missing.
    pub fn vertices_from(&self, tip: VertexId, count: u32) -> Vec<Vertex> {
        let mut result = Vec::with_capacity(count as usize);
        let mut cursor = tip;
        for _ in 0..count {
            let Some(vertex) = self.vertices.get(&cursor) else {
                return vec![];
            };
            result.push(vertex.clone());
            cursor = vertex.parent_id();
        }
        result
    }

    /// Count of inserts whose parent was not at the directly previous view.
    pub fn indirect_parent_count(&self) -> u64 {
        self.indirect_parents
    }

    fn prune_to_root(&mut self) {
        let mut reachable: HashSet<VertexId> = HashSet::new();
        reachable.insert(self.root);
        // Children pointers are implicit; iterate until the frontier stops
        // growing (the store is small: one uncommitted subtree).
        loop {
            let before = reachable.len();
            for (id, vertex) in &self.vertices {
                if reachable.contains(&vertex.parent_id()) {
                    reachable.insert(*id);
                }
            }
            if reachable.len() == before {
                break;
            }
        }
        self.vertices.retain(|id, _| reachable.contains(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_engine::default_fork_registry;
    use cascade_ledger::StateComputer;
    use cascade_types::test_utils::test_keypair;
    use cascade_types::{Epoch, LedgerHeader, U256, View};

    fn ledger() -> StateComputer {
        StateComputer::new(
            default_fork_registry(),
            &[(test_keypair(1).node_key(), U256::from(100u64))],
            &[],
        )
        .unwrap()
    }

    fn genesis_vertex() -> Vertex {
        Vertex::epoch_genesis(
            Epoch::GENESIS,
            LedgerHeader::genesis(),
            test_keypair(1).node_key(),
        )
    }

    fn child_of(parent: &Vertex, view: u64) -> Vertex {
        // The parent's own QC works as the certified-parent link in tests:
        // the store only inspects the voted vertex id.
        let qc = QuorumCertificate::new(
            cascade_types::VoteData {
                voted: cascade_types::BFTHeader::new(
                    parent.view(),
                    parent.id(),
                    parent.qc().voted().ledger_header.clone(),
                ),
                parent: parent.qc().voted().clone(),
                committed: None,
            },
            cascade_types::SignatureSet::new(),
        );
        Vertex::new(qc, View(view), None, test_keypair(1).node_key())
    }

    #[test]
    fn insert_requires_the_parent() {
        let genesis = genesis_vertex();
        let mut store = VertexStore::new(genesis.clone(), genesis.qc().clone());
        let mut ledger = ledger();

        let v1 = child_of(&genesis, 1);
        let v2 = child_of(&v1, 2);

        assert!(matches!(
            store.insert_vertex(v2.clone(), &mut ledger),
            Err(VertexStoreError::MissingParent(_))
        ));
        store.insert_vertex(v1, &mut ledger).unwrap();
        store.insert_vertex(v2, &mut ledger).unwrap();
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn indirect_parents_are_counted() {
        let genesis = genesis_vertex();
        let mut store = VertexStore::new(genesis.clone(), genesis.qc().clone());
        let mut ledger = ledger();

        // View 3 on a view-0 parent: an indirect link.
        let v3 = child_of(&genesis, 3);
        store.insert_vertex(v3, &mut ledger).unwrap();
        assert_eq!(store.indirect_parent_count(), 1);
    }

    #[test]
    fn add_qc_requires_the_certified_vertex() {
        let genesis = genesis_vertex();
        let mut store = VertexStore::new(genesis.clone(), genesis.qc().clone());
        let mut ledger = ledger();

        let v1 = child_of(&genesis, 1);
        let v2 = child_of(&v1, 2);
        // v2's QC certifies v1, which is not in the store yet.
        assert!(!store.add_qc(v2.qc().clone()));

        store.insert_vertex(v1.clone(), &mut ledger).unwrap();
        assert!(store.add_qc(v2.qc().clone()));
        assert_eq!(store.high_qc().voted().vertex_id, v1.id());
    }

    #[test]
    fn vertices_from_walks_parentwards() {
        let genesis = genesis_vertex();
        let mut store = VertexStore::new(genesis.clone(), genesis.qc().clone());
        let mut ledger = ledger();

        let v1 = child_of(&genesis, 1);
        let v2 = child_of(&v1, 2);
        store.insert_vertex(v1.clone(), &mut ledger).unwrap();
        store.insert_vertex(v2.clone(), &mut ledger).unwrap();

        let walk = store.vertices_from(v2.id(), 2);
        assert_eq!(walk.len(), 2);
        assert_eq!(walk[0].id(), v2.id());
        assert_eq!(walk[1].id(), v1.id());

        // A walk past the genesis falls short and yields nothing.
        assert!(store.vertices_from(v2.id(), 5).is_empty());
    }

    #[test]
    fn rebuild_rejects_mismatched_certificates() {
        let genesis = genesis_vertex();
        let mut store = VertexStore::new(genesis.clone(), genesis.qc().clone());
        let mut ledger = ledger();

        let v1 = child_of(&genesis, 1);
        // The root QC must name the root vertex.
        assert!(matches!(
            store.rebuild(
                v1.clone(),
                genesis.qc().clone(),
                genesis.qc().clone(),
                vec![],
                &mut ledger,
            ),
            Err(VertexStoreError::BadRebuild)
        ));

        // A non-genesis root whose commit QC carries no committed header.
        let v2 = child_of(&v1, 2);
        assert!(matches!(
            store.rebuild(
                v1.clone(),
                v2.qc().clone(),
                v2.qc().clone(),
                vec![],
                &mut ledger,
            ),
            Err(VertexStoreError::BadRebuild)
        ));
    }
}
