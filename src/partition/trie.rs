use log::debug;

use crate::config::PartitionerConfig;
use crate::partition::split_points::SplitPointTable;

enum Node {
    /// Split points `[begin, end)` share this node's prefix; `children[b]` covers keys
    /// whose next byte is `b`.
    Inner {
        begin: usize,
        end: usize,
        children: Box<[usize]>,
    },
    /// Remaining disambiguation is a scan over `[begin, end)`.
    Leaf { begin: usize, end: usize },
}

/// Prefix tree over split point bytes for locating a key's partition.
///
/// Each level consumes one key byte. Below `trie_depth`, or for key bytes outside the
/// alphabet, the split points that remain are scanned linearly. Lookups agree with
/// [`SplitPointTable::linear_partition`] for every key.
pub struct PartitionTrie {
    table: SplitPointTable,
    nodes: Vec<Node>,
    alphabet_size: usize,
}

impl PartitionTrie {
    pub fn new(table: SplitPointTable, config: &PartitionerConfig) -> Self {
        let alphabet_size = config.alphabet_size.clamp(1, 256);
        let max_depth = config.trie_depth.min(table.key_size());
        let mut trie = Self {
            table,
            nodes: Vec::new(),
            alphabet_size,
        };
        let end = trie.table.len();
        trie.build(0, end, 0, max_depth);
        debug!(
            "Built partition trie of {} nodes over {} split points",
            trie.nodes.len(),
            trie.table.len()
        );
        trie
    }

    /// Add the node for split points `[begin, end)` at `depth`; returns its id.
    fn build(&mut self, begin: usize, end: usize, depth: usize, max_depth: usize) -> usize {
        let id = self.nodes.len();
        if depth >= max_depth || begin == end {
            self.nodes.push(Node::Leaf { begin, end });
            return id;
        }
        self.nodes.push(Node::Leaf { begin, end });
        let mut children = Vec::with_capacity(self.alphabet_size);
        let mut lo = begin;
        for byte in 0..self.alphabet_size {
            while lo < end && usize::from(self.table.key(lo)[depth]) < byte {
                lo += 1;
            }
            let mut hi = lo;
            while hi < end && usize::from(self.table.key(hi)[depth]) == byte {
                hi += 1;
            }
            children.push(self.build(lo, hi, depth + 1, max_depth));
            lo = hi;
        }
        self.nodes[id] = Node::Inner {
            begin,
            end,
            children: children.into_boxed_slice(),
        };
        id
    }

    pub fn table(&self) -> &SplitPointTable {
        &self.table
    }

    pub fn partition_count(&self) -> usize {
        self.table.partition_count()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The partition receiving `key`.
    pub fn partition_for_key(&self, key: &[u8]) -> u32 {
        let mut node = 0;
        let mut depth = 0;
        loop {
            match &self.nodes[node] {
                Node::Leaf { begin, end } => return self.table.scan(key, *begin, *end) as u32,
                Node::Inner {
                    begin,
                    end,
                    children,
                } => match key.get(depth).map(|&b| usize::from(b)) {
                    Some(byte) if byte < children.len() => {
                        node = children[byte];
                        depth += 1;
                    }
                    _ => return self.table.scan(key, *begin, *end) as u32,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn table_of<const N: usize>(keys: &[&[u8; N]]) -> SplitPointTable {
        SplitPointTable::new(N, keys.iter().flat_map(|k| k.iter().copied()).collect()).unwrap()
    }

    #[test]
    fn test_lookup_on_small_table() {
        let table = table_of(&[b"bbb", b"bcd", b"ddz", b"dd~", b"q\x01\x02"]);
        let trie = PartitionTrie::new(table.clone(), &PartitionerConfig::default());
        for key in [
            &b"aaa"[..],
            b"bbb",
            b"bbc",
            b"bcd",
            b"bzz",
            b"dd~",
            b"dd\x7f",
            b"ddz",
            b"q",
            b"",
            b"\xff\xff\xff",
            b"d\xe9z",
        ] {
            assert_eq!(
                trie.partition_for_key(key),
                table.linear_partition(key),
                "key {key:?}"
            );
        }
        assert_eq!(trie.partition_for_key(b"aaa"), 0);
        assert_eq!(trie.partition_for_key(b"zzz"), 5);
    }

    #[test]
    fn test_empty_table_routes_everything_to_zero() {
        let table = SplitPointTable::new(10, Vec::new()).unwrap();
        let trie = PartitionTrie::new(table, &PartitionerConfig::default());
        assert_eq!(trie.partition_for_key(b"anything!!"), 0);
        assert_eq!(trie.node_count(), 1);
    }

    #[test]
    fn test_matches_linear_scan_for_random_keys() {
        let mut rng = rand::rng();
        for (depth, alphabet) in [(0, 128), (1, 128), (2, 128), (3, 16), (2, 256)] {
            let mut keys: Vec<[u8; 4]> = (0..40)
                .map(|_| std::array::from_fn(|_| rng.random_range(b'a'..=b'h')))
                .collect();
            keys.sort();
            let table = SplitPointTable::new(4, keys.concat()).unwrap();
            let config = PartitionerConfig::default()
                .trie_depth(depth)
                .alphabet_size(alphabet);
            let trie = PartitionTrie::new(table.clone(), &config);
            for _ in 0..2000 {
                let len = rng.random_range(0..=5);
                let key: Vec<u8> = (0..len).map(|_| rng.random_range(b'`'..=b'i')).collect();
                assert_eq!(trie.partition_for_key(&key), table.linear_partition(&key));
            }
            for split in table.keys() {
                assert_eq!(trie.partition_for_key(split), table.linear_partition(split));
            }
        }
    }
}
