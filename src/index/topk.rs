use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// 一次近邻搜索的结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// 向量在索引中的 ID
    pub id: u64,
    /// 与查询向量的欧氏距离平方
    pub distance: f32,
}

impl Eq for Neighbor {}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Neighbor {
    // 距离相同时按 ID 升序，保证结果顺序确定
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance.total_cmp(&other.distance).then(self.id.cmp(&other.id))
    }
}

/// 保留最小的 k 个邻居
///
/// 内部是一个大顶堆，堆顶为当前保留结果中最差的一个
pub struct TopKNeighbors {
    heap: BinaryHeap<Neighbor>,
    k: usize,
}

impl TopKNeighbors {
    pub fn new(k: usize) -> Self {
        Self { heap: BinaryHeap::with_capacity(k + 1), k }
    }

    pub fn push(&mut self, neighbor: Neighbor) {
        if self.k == 0 {
            return;
        }
        if self.heap.len() < self.k {
            self.heap.push(neighbor);
        } else if self.heap.peek().is_some_and(|worst| neighbor < *worst) {
            self.heap.pop();
            self.heap.push(neighbor);
        }
    }

    pub fn extend(&mut self, neighbors: impl IntoIterator<Item = Neighbor>) {
        for neighbor in neighbors {
            self.push(neighbor);
        }
    }

    /// 合并另一组结果
    pub fn merge(mut self, other: Self) -> Self {
        self.extend(other.heap);
        self
    }

    /// 按距离升序返回结果
    pub fn into_sorted_vec(self) -> Vec<Neighbor> {
        self.heap.into_sorted_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(id: u64, distance: f32) -> Neighbor {
        Neighbor { id, distance }
    }

    #[test]
    fn keep_smallest() {
        let mut topk = TopKNeighbors::new(2);
        topk.extend([n(0, 3.), n(1, 1.), n(2, 2.), n(3, 0.5)]);
        assert_eq!(topk.into_sorted_vec(), [n(3, 0.5), n(1, 1.)]);
    }

    #[test]
    fn ties_by_id() {
        let mut topk = TopKNeighbors::new(2);
        topk.extend([n(5, 1.), n(2, 1.), n(9, 1.)]);
        assert_eq!(topk.into_sorted_vec(), [n(2, 1.), n(5, 1.)]);
    }

    #[test]
    fn merge_equals_single_pass() {
        let all = (0..20).map(|i| n(i, ((i * 7) % 5) as f32)).collect::<Vec<_>>();
        let mut single = TopKNeighbors::new(6);
        single.extend(all.iter().copied());

        let mut left = TopKNeighbors::new(6);
        left.extend(all[..9].iter().copied());
        let mut right = TopKNeighbors::new(6);
        right.extend(all[9..].iter().copied());

        assert_eq!(left.merge(right).into_sorted_vec(), single.into_sorted_vec());
    }

    #[test]
    fn zero_k() {
        let mut topk = TopKNeighbors::new(0);
        topk.push(n(0, 0.));
        assert!(topk.into_sorted_vec().is_empty());
    }
}
