/// Majority over the whole cluster, where the proposer counts as one vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quorum {
    size: usize,
}

impl Quorum {
    /// `peers` excludes the local node.
    pub fn for_peers(peers: usize) -> Self {
        Quorum {
            size: (peers + 1) / 2 + 1,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn reached(&self, votes: usize) -> bool {
        votes >= self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn majority_sizes() {
        assert_eq!(Quorum::for_peers(0).size(), 1, "single node");
        assert_eq!(Quorum::for_peers(1).size(), 2, "two nodes need both");
        assert_eq!(Quorum::for_peers(2).size(), 2, "three node cluster");
        assert_eq!(Quorum::for_peers(3).size(), 3, "four node cluster");
        assert_eq!(Quorum::for_peers(4).size(), 3, "five node cluster");
    }

    #[test]
    fn reached_is_inclusive() {
        let quorum = Quorum::for_peers(2);
        assert!(!quorum.reached(1));
        assert!(quorum.reached(2));
        assert!(quorum.reached(3));
    }

    #[test]
    fn any_two_quorums_intersect() {
        for peers in 0..10 {
            let cluster = peers + 1;
            let size = Quorum::for_peers(peers).size();
            assert!(2 * size > cluster, "cluster of {} with quorum {}", cluster, size);
            assert!(size <= cluster);
        }
    }
}
