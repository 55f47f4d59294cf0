//! Dependency graph over dense job indices.
//!
//! Design:
//! - Forward edges: job -> jobs it depends on (prerequisites)
//! - Reverse edges: job -> jobs that depend on it (dependents)
//! - Invariant: edges and reverse_edges must be kept in sync
//! - ノードはチェーン内の宣言順インデックス（arena）

use std::collections::VecDeque;

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Forward edges: job -> prerequisites (宣言順)
    edges: Vec<Vec<usize>>,

    /// Reverse edges: job -> dependents
    /// 成功したジョブの「直接の後続だけ」を見るための索引
    reverse_edges: Vec<Vec<usize>>,
}

impl DependencyGraph {
    pub fn with_nodes(n: usize) -> Self {
        Self {
            edges: vec![Vec::new(); n],
            reverse_edges: vec![Vec::new(); n],
        }
    }

    pub fn node_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.iter().map(Vec::len).sum()
    }

    /// Add a dependency: `job` depends on `depends_on`.
    ///
    /// add_dependency(b, a) means "B waits for A":
    /// - edges: B -> {A}
    /// - reverse_edges: A -> {B}
    pub fn add_dependency(&mut self, job: usize, depends_on: usize) {
        self.edges[job].push(depends_on);
        self.reverse_edges[depends_on].push(job);
    }

    pub fn prerequisites_of(&self, job: usize) -> &[usize] {
        &self.edges[job]
    }

    pub fn dependents_of(&self, job: usize) -> &[usize] {
        &self.reverse_edges[job]
    }

    /// Kahn's algorithm.
    ///
    /// - 入次数 0 のノードでキューを初期化（インデックス順で決定的）
    /// - 1 つ取り出すたびに後続の入次数を減らす
    /// - 取り出せなかったノードが残れば循環がある
    ///
    /// 成功時はトポロジカル順、循環があれば `Err` で循環 1 つ分のノードを辺の向きに返す。
    pub fn topological_order(&self) -> Result<Vec<usize>, Vec<usize>> {
        let n = self.node_count();
        let mut in_degree: Vec<usize> = self.edges.iter().map(Vec::len).collect();
        let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);

        while let Some(node) = queue.pop_front() {
            order.push(node);
            for &dependent in &self.reverse_edges[node] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        if order.len() == n {
            return Ok(order);
        }

        let leftover: Vec<bool> = in_degree.iter().map(|&d| d > 0).collect();
        Err(self.find_cycle(&leftover))
    }

    /// Walk prerequisite links among the leftover nodes until one repeats.
    ///
    /// 残ったノードは必ず「残ったノードの前提」を 1 つ以上持つので、辿れば必ず循環に入る。
    fn find_cycle(&self, leftover: &[bool]) -> Vec<usize> {
        let Some(start) = leftover.iter().position(|&l| l) else {
            return Vec::new();
        };

        // position_in_path[node] = path 上の位置
        let mut position_in_path: Vec<Option<usize>> = vec![None; leftover.len()];
        let mut path = Vec::new();
        let mut current = start;

        loop {
            if let Some(pos) = position_in_path[current] {
                // path は「後続 -> 前提」の向きなので反転して辺の向きに揃える
                let mut cycle = path.split_off(pos);
                cycle.reverse();
                return cycle;
            }
            position_in_path[current] = Some(path.len());
            path.push(current);

            match self.edges[current].iter().copied().find(|&p| leftover[p]) {
                Some(next) => current = next,
                None => return path,
            }
        }
    }
}
