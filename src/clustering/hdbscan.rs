//! HDBSCAN over dense embeddings.
//!
//! Core distances → mutual reachability → minimum spanning tree →
//! single-linkage hierarchy → condensed tree → excess-of-mass selection.
//! Distance is Euclidean. Every tie breaks on the lower point index so the
//! same input always yields the same labels.

use std::collections::BTreeMap;

use crate::config::{ClusteringConfig, MIN_CLUSTER_SIZE_FLOOR};
use crate::embeddings::euclidean_distance;
use crate::error::ConfigurationError;

/// Distances below this are treated as equal when converted to density, so
/// identical embeddings produce a large but finite lambda.
const MIN_DISTANCE: f64 = 1e-10;

/// Parameters for HDBSCAN clustering.
#[derive(Debug, Clone, PartialEq)]
pub struct HdbscanParams {
    /// Minimum number of points to form a cluster.
    pub min_cluster_size: usize,
    /// Minimum samples for core distance; the point itself counts as one.
    pub min_samples: usize,
    /// Exit-density fraction, relative to the root's median member density,
    /// below which a point of a root-level cluster is treated as noise.
    pub root_outlier_ratio: f64,
}

impl HdbscanParams {
    pub fn from_config(config: &ClusteringConfig) -> Result<Self, ConfigurationError> {
        let params = Self {
            min_cluster_size: config.min_cluster_size,
            min_samples: config.min_samples,
            root_outlier_ratio: config.root_outlier_ratio,
        };
        params.validate()?;
        Ok(params)
    }

    /// Fails fast: `min_cluster_size < 2` would allow singleton clusters.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.min_cluster_size < MIN_CLUSTER_SIZE_FLOOR {
            return Err(ConfigurationError::invalid(
                "clustering.minClusterSize",
                format!(
                    "must be >= {}, got {}",
                    MIN_CLUSTER_SIZE_FLOOR, self.min_cluster_size
                ),
            ));
        }
        if self.min_samples < 1 || self.min_samples > self.min_cluster_size {
            return Err(ConfigurationError::invalid(
                "clustering.minSamples",
                format!(
                    "must be in [1, {}], got {}",
                    self.min_cluster_size, self.min_samples
                ),
            ));
        }
        if !(self.root_outlier_ratio > 0.0 && self.root_outlier_ratio <= 1.0) {
            return Err(ConfigurationError::invalid(
                "clustering.rootOutlierRatio",
                format!("must be in (0, 1], got {}", self.root_outlier_ratio),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Internal tree types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Edge {
    a: usize,
    b: usize,
    weight: f64,
}

/// One single-linkage merge. Node ids `< n` are points, `>= n` are merges.
#[derive(Debug, Clone, Copy)]
struct Merge {
    left: usize,
    right: usize,
    distance: f64,
    size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Child {
    Point(usize),
    Cluster(usize),
}

/// Edge of the condensed tree: `child` leaves cluster `parent` at `lambda`.
#[derive(Debug, Clone, Copy)]
struct CondensedEdge {
    parent: usize,
    child: Child,
    lambda: f64,
    size: usize,
}

#[derive(Debug, Default)]
struct CondensedTree {
    edges: Vec<CondensedEdge>,
    /// Lambda at which each cluster label was born. Label 0 is the root.
    birth: Vec<f64>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Cluster `points`, returning one label per point: `Some(k)` for cluster `k`
/// or `None` for noise. Clusters are numbered by their lowest member index.
///
/// Callers must pass equal-length, finite vectors.
pub fn cluster_labels(points: &[&[f32]], params: &HdbscanParams) -> Vec<Option<usize>> {
    let n = points.len();
    if n < params.min_cluster_size || n < 2 {
        return vec![None; n];
    }

    let core = core_distances(points, params.min_samples);
    let mst = minimum_spanning_tree(points, &core);
    let merges = single_linkage(n, mst);
    let tree = condense(n, &merges, params.min_cluster_size);
    let selected = select_clusters(&tree);
    label_points(points, &tree, &selected, params)
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

fn core_distances(points: &[&[f32]], min_samples: usize) -> Vec<f64> {
    let n = points.len();
    let k = min_samples.min(n).max(1) - 1;
    (0..n)
        .map(|i| {
            let mut dists: Vec<f64> = (0..n)
                .map(|j| euclidean_distance(points[i], points[j]))
                .collect();
            let (_, kth, _) = dists.select_nth_unstable_by(k, |a, b| a.total_cmp(b));
            *kth
        })
        .collect()
}

fn mutual_reachability(points: &[&[f32]], core: &[f64], a: usize, b: usize) -> f64 {
    euclidean_distance(points[a], points[b])
        .max(core[a])
        .max(core[b])
}

/// Prim's algorithm over the implicit complete mutual-reachability graph.
fn minimum_spanning_tree(points: &[&[f32]], core: &[f64]) -> Vec<Edge> {
    let n = points.len();
    let mut in_tree = vec![false; n];
    let mut best_dist = vec![f64::INFINITY; n];
    let mut best_from = vec![0usize; n];
    let mut edges = Vec::with_capacity(n.saturating_sub(1));

    let mut current = 0;
    in_tree[0] = true;
    for _ in 1..n {
        let mut next: Option<usize> = None;
        for j in 0..n {
            if in_tree[j] {
                continue;
            }
            let d = mutual_reachability(points, core, current, j);
            if d < best_dist[j] {
                best_dist[j] = d;
                best_from[j] = current;
            }
            // Strict `<` while scanning upwards keeps the lowest index on ties.
            if next.map_or(true, |k| best_dist[j] < best_dist[k]) {
                next = Some(j);
            }
        }
        let Some(j) = next else { break };
        edges.push(Edge {
            a: best_from[j],
            b: j,
            weight: best_dist[j],
        });
        in_tree[j] = true;
        current = j;
    }

    edges.sort_by(|x, y| {
        x.weight
            .total_cmp(&y.weight)
            .then_with(|| x.a.min(x.b).cmp(&y.a.min(y.b)))
            .then_with(|| x.a.max(x.b).cmp(&y.a.max(y.b)))
    });
    edges
}

fn find(parent: &mut [usize], mut x: usize) -> usize {
    let mut root = x;
    while parent[root] != root {
        root = parent[root];
    }
    while parent[x] != root {
        let next = parent[x];
        parent[x] = root;
        x = next;
    }
    root
}

fn single_linkage(n: usize, mst: Vec<Edge>) -> Vec<Merge> {
    let mut parent: Vec<usize> = (0..2 * n - 1).collect();
    let mut size = vec![1usize; 2 * n - 1];
    let mut merges = Vec::with_capacity(n - 1);
    let mut next = n;

    for edge in mst {
        let ra = find(&mut parent, edge.a);
        let rb = find(&mut parent, edge.b);
        if ra == rb {
            continue;
        }
        let (left, right) = if ra < rb { (ra, rb) } else { (rb, ra) };
        size[next] = size[left] + size[right];
        merges.push(Merge {
            left,
            right,
            distance: edge.weight,
            size: size[next],
        });
        parent[left] = next;
        parent[right] = next;
        next += 1;
    }
    merges
}

fn lambda_of(distance: f64) -> f64 {
    1.0 / distance.max(MIN_DISTANCE)
}

fn node_size(n: usize, merges: &[Merge], node: usize) -> usize {
    if node < n {
        1
    } else {
        merges[node - n].size
    }
}

fn leaves(n: usize, merges: &[Merge], node: usize) -> Vec<usize> {
    let mut out = Vec::new();
    let mut stack = vec![node];
    while let Some(x) = stack.pop() {
        if x < n {
            out.push(x);
        } else {
            let m = merges[x - n];
            stack.push(m.right);
            stack.push(m.left);
        }
    }
    out.sort_unstable();
    out
}

fn condense(n: usize, merges: &[Merge], min_cluster_size: usize) -> CondensedTree {
    let mut tree = CondensedTree {
        edges: Vec::new(),
        birth: vec![0.0],
    };
    if merges.len() != n - 1 {
        return tree;
    }

    let root = 2 * n - 2;
    let mut stack = vec![(root, 0usize)];
    while let Some((node, label)) = stack.pop() {
        let merge = merges[node - n];
        let lambda = lambda_of(merge.distance);
        let left_big = node_size(n, merges, merge.left) >= min_cluster_size;
        let right_big = node_size(n, merges, merge.right) >= min_cluster_size;

        match (left_big, right_big) {
            (true, true) => {
                for child in [merge.left, merge.right] {
                    let child_label = tree.birth.len();
                    tree.birth.push(lambda);
                    tree.edges.push(CondensedEdge {
                        parent: label,
                        child: Child::Cluster(child_label),
                        lambda,
                        size: node_size(n, merges, child),
                    });
                    stack.push((child, child_label));
                }
            }
            (true, false) | (false, true) => {
                let (keep, drop) = if left_big {
                    (merge.left, merge.right)
                } else {
                    (merge.right, merge.left)
                };
                for p in leaves(n, merges, drop) {
                    tree.edges.push(CondensedEdge {
                        parent: label,
                        child: Child::Point(p),
                        lambda,
                        size: 1,
                    });
                }
                stack.push((keep, label));
            }
            (false, false) => {
                for p in leaves(n, merges, node) {
                    tree.edges.push(CondensedEdge {
                        parent: label,
                        child: Child::Point(p),
                        lambda,
                        size: 1,
                    });
                }
            }
        }
    }
    tree
}

fn child_clusters(tree: &CondensedTree) -> Vec<Vec<usize>> {
    let mut children = vec![Vec::new(); tree.birth.len()];
    for edge in &tree.edges {
        if let Child::Cluster(c) = edge.child {
            children[edge.parent].push(c);
        }
    }
    children
}

/// Excess-of-mass selection. The root takes part, so a batch that is one
/// coherent topic yields one cluster rather than none.
fn select_clusters(tree: &CondensedTree) -> Vec<bool> {
    let k = tree.birth.len();
    let mut stability = vec![0.0_f64; k];
    for edge in &tree.edges {
        stability[edge.parent] += (edge.lambda - tree.birth[edge.parent]) * edge.size as f64;
    }

    let children = child_clusters(tree);
    let mut selected = vec![false; k];
    let mut subtree = stability.clone();

    // Children always carry larger labels than their parent.
    for c in (0..k).rev() {
        if children[c].is_empty() {
            selected[c] = true;
            continue;
        }
        let child_sum: f64 = children[c].iter().map(|&ch| subtree[ch]).sum();
        if stability[c] >= child_sum {
            selected[c] = true;
            let mut stack = children[c].clone();
            while let Some(d) = stack.pop() {
                selected[d] = false;
                stack.extend(children[d].iter().copied());
            }
        } else {
            subtree[c] = child_sum;
        }
    }
    selected
}

/// Reference density for the root outlier cut: the upper median of exit
/// lambdas over distinct embeddings among root members. Identical embeddings
/// count once, at their highest lambda, so duplicated text cannot pull the
/// reference up to the degenerate `1 / MIN_DISTANCE`.
fn root_reference_lambda(points: &[&[f32]], members: &[usize], point_lambda: &[f64]) -> f64 {
    let mut by_embedding: BTreeMap<Vec<u32>, f64> = BTreeMap::new();
    for &p in members {
        let key: Vec<u32> = points[p].iter().map(|x| x.to_bits()).collect();
        let entry = by_embedding.entry(key).or_insert(0.0);
        *entry = entry.max(point_lambda[p]);
    }
    let mut lambdas: Vec<f64> = by_embedding.into_values().collect();
    if lambdas.is_empty() {
        return 0.0;
    }
    lambdas.sort_by(|a, b| a.total_cmp(b));
    lambdas[lambdas.len() / 2]
}

fn label_points(
    points: &[&[f32]],
    tree: &CondensedTree,
    selected: &[bool],
    params: &HdbscanParams,
) -> Vec<Option<usize>> {
    let n = points.len();
    let k = tree.birth.len();
    let mut parent_of = vec![None; k];
    let mut point_lambda = vec![0.0_f64; n];
    let mut point_cluster = vec![0usize; n];
    for edge in &tree.edges {
        match edge.child {
            Child::Cluster(c) => parent_of[c] = Some(edge.parent),
            Child::Point(p) => {
                point_lambda[p] = edge.lambda;
                point_cluster[p] = edge.parent;
            }
        }
    }

    // Walk each point up to its selected ancestor, if any.
    let mut owner: Vec<Option<usize>> = vec![None; n];
    for p in 0..n {
        let mut c = Some(point_cluster[p]);
        while let Some(label) = c {
            if selected[label] {
                owner[p] = Some(label);
                break;
            }
            c = parent_of[label];
        }
    }

    if selected.first().copied().unwrap_or(false) {
        let members: Vec<usize> = (0..n).filter(|&p| owner[p] == Some(0)).collect();
        let reference = root_reference_lambda(points, &members, &point_lambda);
        for &p in &members {
            if point_lambda[p] < params.root_outlier_ratio * reference {
                owner[p] = None;
            }
        }
        // The outlier cut must not leave an undersized cluster behind.
        let remaining = owner.iter().filter(|o| **o == Some(0)).count();
        if remaining < params.min_cluster_size {
            for o in owner.iter_mut().filter(|o| **o == Some(0)) {
                *o = None;
            }
        }
    }

    // Renumber clusters by lowest member index.
    let mut renumber: Vec<Option<usize>> = vec![None; k];
    let mut next = 0;
    let mut labels = vec![None; n];
    for p in 0..n {
        if let Some(label) = owner[p] {
            let id = *renumber[label].get_or_insert_with(|| {
                next += 1;
                next - 1
            });
            labels[p] = Some(id);
        }
    }
    labels
}
