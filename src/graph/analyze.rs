//! Graph analytics over a [`GraphSnapshot`]: weighted multi-hop traversal,
//! shortest paths, influence ranking, community detection, and relationship
//! recommendation.
//!
//! All functions are pure over the snapshot and return results sorted by
//! relevance (score desc). Absent nodes yield empty results, never errors —
//! analytic queries are advisory.
//!
//! PageRank and A* come from petgraph; betweenness (Brandes), closeness
//! (Wasserman–Faust), and greedy modularity communities are implemented
//! here since petgraph does not provide them.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::Direction;
use petgraph::algo::{astar, page_rank};
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;

use super::RelationshipType;
use super::view::GraphSnapshot;

// ---------------------------------------------------------------------------
// Multi-hop traversal
// ---------------------------------------------------------------------------

/// Configuration for a strength-decaying traversal.
#[derive(Debug, Clone)]
pub struct RelatedQuery {
    /// Maximum hop depth from the origin.
    pub max_depth: usize,
    /// Only follow edges at least this strong.
    pub min_strength: f64,
    /// Only follow edges with these types (empty = follow all).
    pub types: HashSet<RelationshipType>,
}

impl Default for RelatedQuery {
    fn default() -> Self {
        Self {
            max_depth: 2,
            min_strength: 0.3,
            types: HashSet::new(),
        }
    }
}

/// A node reached by traversal, with the best combined strength seen.
#[derive(Debug, Clone, PartialEq)]
pub struct RelatedNode {
    pub id: String,
    /// Product of edge strengths along the strongest path from the origin.
    pub strength: f64,
}

/// Breadth-first traversal from `origin_id`, following edges in both
/// directions. Combined strength decays multiplicatively per hop; a node
/// reached by several paths keeps the maximum. The origin is never returned.
pub fn find_related(
    snapshot: &GraphSnapshot,
    origin_id: &str,
    query: &RelatedQuery,
) -> Vec<RelatedNode> {
    let Some(origin) = snapshot.node_index(origin_id) else {
        return Vec::new();
    };
    let graph = snapshot.graph();

    let mut best: HashMap<NodeIndex, f64> = HashMap::new();
    // (node, depth, combined strength from origin)
    let mut queue: VecDeque<(NodeIndex, usize, f64)> = VecDeque::new();
    queue.push_back((origin, 0, 1.0));

    while let Some((node, depth, strength)) = queue.pop_front() {
        if depth >= query.max_depth {
            continue;
        }
        for direction in [Direction::Outgoing, Direction::Incoming] {
            for edge in graph.edges_directed(node, direction) {
                let attrs = edge.weight();
                if attrs.strength < query.min_strength {
                    continue;
                }
                if !query.types.is_empty() && !query.types.contains(&attrs.rel_type) {
                    continue;
                }
                let neighbor = match direction {
                    Direction::Outgoing => edge.target(),
                    Direction::Incoming => edge.source(),
                };
                if neighbor == origin {
                    continue;
                }
                let combined = strength * attrs.strength;
                let known = best.get(&neighbor).copied().unwrap_or(0.0);
                // Re-expand only on strict improvement; terminates because
                // strengths are bounded and strictly increase per node.
                if combined > known {
                    best.insert(neighbor, combined);
                    queue.push_back((neighbor, depth + 1, combined));
                }
            }
        }
    }

    let mut results: Vec<RelatedNode> = best
        .into_iter()
        .filter_map(|(idx, strength)| {
            Some(RelatedNode {
                id: snapshot.id_of(idx)?.to_string(),
                strength,
            })
        })
        .collect();
    sort_scored(&mut results, |r| r.strength, |r| &r.id);
    results
}

// ---------------------------------------------------------------------------
// Shortest path
// ---------------------------------------------------------------------------

/// Unweighted shortest path over the directed graph. `None` if either
/// endpoint is absent or no path exists.
pub fn shortest_path(snapshot: &GraphSnapshot, from: &str, to: &str) -> Option<Vec<String>> {
    let from_idx = snapshot.node_index(from)?;
    let to_idx = snapshot.node_index(to)?;

    let (_cost, path) = astar(
        snapshot.graph(),
        from_idx,
        |n| n == to_idx,
        |_| 1usize,
        |_| 0usize,
    )?;
    Some(
        path.iter()
            .filter_map(|idx| snapshot.id_of(*idx).map(str::to_string))
            .collect(),
    )
}

// ---------------------------------------------------------------------------
// Influence ranking
// ---------------------------------------------------------------------------

const WEIGHT_DEGREE: f64 = 0.25;
const WEIGHT_BETWEENNESS: f64 = 0.30;
const WEIGHT_CLOSENESS: f64 = 0.20;
const WEIGHT_PAGERANK: f64 = 0.25;

/// Combined centrality score for a single node.
#[derive(Debug, Clone, PartialEq)]
pub struct InfluenceScore {
    pub id: String,
    pub score: f64,
}

/// Rank nodes by a fixed-weight blend of degree, betweenness, closeness,
/// and PageRank centrality. Returns the top `k` by combined score.
pub fn influence_ranking(snapshot: &GraphSnapshot, k: usize) -> Vec<InfluenceScore> {
    let graph = snapshot.graph();
    let n = graph.node_count();
    if n == 0 || k == 0 {
        return Vec::new();
    }

    let betweenness = betweenness_centrality(snapshot);
    let closeness = closeness_centrality(snapshot);
    let pagerank: Vec<f64> = page_rank(graph, 0.85, 50);

    let mut results: Vec<InfluenceScore> = graph
        .node_indices()
        .filter_map(|idx| {
            let total_degree = graph.edges_directed(idx, Direction::Outgoing).count()
                + graph.edges_directed(idx, Direction::Incoming).count();
            let degree = if n > 1 {
                total_degree as f64 / (n - 1) as f64
            } else {
                0.0
            };
            let score = WEIGHT_DEGREE * degree
                + WEIGHT_BETWEENNESS * betweenness.get(&idx).copied().unwrap_or(0.0)
                + WEIGHT_CLOSENESS * closeness.get(&idx).copied().unwrap_or(0.0)
                + WEIGHT_PAGERANK * pagerank[idx.index()];
            Some(InfluenceScore {
                id: snapshot.id_of(idx)?.to_string(),
                score,
            })
        })
        .collect();
    sort_scored(&mut results, |r| r.score, |r| &r.id);
    results.truncate(k);
    results
}

/// Brandes' betweenness centrality (unweighted, directed), normalized by
/// `(n-1)(n-2)`.
fn betweenness_centrality(snapshot: &GraphSnapshot) -> HashMap<NodeIndex, f64> {
    let graph = snapshot.graph();
    let n = graph.node_count();
    let mut centrality: HashMap<NodeIndex, f64> =
        graph.node_indices().map(|idx| (idx, 0.0)).collect();
    if n < 3 {
        return centrality;
    }

    for source in graph.node_indices() {
        let mut stack: Vec<NodeIndex> = Vec::new();
        let mut preds: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
        let mut sigma: HashMap<NodeIndex, f64> = HashMap::new();
        let mut dist: HashMap<NodeIndex, usize> = HashMap::new();
        sigma.insert(source, 1.0);
        dist.insert(source, 0);

        let mut queue: VecDeque<NodeIndex> = VecDeque::new();
        queue.push_back(source);
        while let Some(v) = queue.pop_front() {
            stack.push(v);
            let d_v = dist[&v];
            let sigma_v = sigma[&v];
            let neighbors: HashSet<NodeIndex> =
                graph.neighbors_directed(v, Direction::Outgoing).collect();
            for w in neighbors {
                if !dist.contains_key(&w) {
                    dist.insert(w, d_v + 1);
                    queue.push_back(w);
                }
                if dist[&w] == d_v + 1 {
                    *sigma.entry(w).or_insert(0.0) += sigma_v;
                    preds.entry(w).or_default().push(v);
                }
            }
        }

        let mut delta: HashMap<NodeIndex, f64> = HashMap::new();
        while let Some(w) = stack.pop() {
            let delta_w = delta.get(&w).copied().unwrap_or(0.0);
            if let Some(parents) = preds.get(&w) {
                for v in parents {
                    let share = sigma[v] / sigma[&w] * (1.0 + delta_w);
                    *delta.entry(*v).or_insert(0.0) += share;
                }
            }
            if w != source {
                *centrality.entry(w).or_insert(0.0) += delta_w;
            }
        }
    }

    let norm = ((n - 1) * (n - 2)) as f64;
    for value in centrality.values_mut() {
        *value /= norm;
    }
    centrality
}

/// Closeness centrality over outgoing distances with the Wasserman–Faust
/// reachable-fraction correction for disconnected graphs.
fn closeness_centrality(snapshot: &GraphSnapshot) -> HashMap<NodeIndex, f64> {
    let graph = snapshot.graph();
    let n = graph.node_count();
    let mut centrality: HashMap<NodeIndex, f64> = HashMap::new();

    for source in graph.node_indices() {
        let mut dist: HashMap<NodeIndex, usize> = HashMap::new();
        dist.insert(source, 0);
        let mut queue: VecDeque<NodeIndex> = VecDeque::new();
        queue.push_back(source);
        while let Some(v) = queue.pop_front() {
            let d_v = dist[&v];
            for w in graph.neighbors_directed(v, Direction::Outgoing) {
                if !dist.contains_key(&w) {
                    dist.insert(w, d_v + 1);
                    queue.push_back(w);
                }
            }
        }

        let reached = dist.len(); // includes the source itself
        let total: usize = dist.values().sum();
        let score = if reached > 1 && total > 0 && n > 1 {
            let r = (reached - 1) as f64;
            (r / total as f64) * (r / (n - 1) as f64)
        } else {
            0.0
        };
        centrality.insert(source, score);
    }
    centrality
}

// ---------------------------------------------------------------------------
// Community detection
// ---------------------------------------------------------------------------

/// A detected community of node ids.
#[derive(Debug, Clone, PartialEq)]
pub struct Community {
    /// Arbitrary identifier, for display.
    pub id: usize,
    pub members: Vec<String>,
    pub size: usize,
}

/// Greedy modularity maximization (Clauset–Newman–Moore) on the undirected
/// projection. Starts from singleton communities and merges the pair with
/// the best modularity gain until no merge improves modularity. Returns
/// communities sorted by size descending.
pub fn detect_communities(snapshot: &GraphSnapshot) -> Vec<Community> {
    let graph = snapshot.graph();
    let n = graph.node_count();
    if n == 0 {
        return Vec::new();
    }

    // Undirected projection: unique unordered pairs, self-loops dropped.
    let mut edges: HashSet<(NodeIndex, NodeIndex)> = HashSet::new();
    for edge in graph.edge_references() {
        let (a, b) = (edge.source(), edge.target());
        if a == b {
            continue;
        }
        let pair = if a.index() <= b.index() { (a, b) } else { (b, a) };
        edges.insert(pair);
    }

    let mut members: HashMap<usize, Vec<NodeIndex>> = graph
        .node_indices()
        .map(|idx| (idx.index(), vec![idx]))
        .collect();

    if !edges.is_empty() {
        let m = edges.len() as f64;
        // Per-community degree sums and inter-community edge counts.
        let mut degree: HashMap<usize, f64> = HashMap::new();
        let mut between: HashMap<(usize, usize), f64> = HashMap::new();
        for (a, b) in &edges {
            *degree.entry(a.index()).or_insert(0.0) += 1.0;
            *degree.entry(b.index()).or_insert(0.0) += 1.0;
            let key = ordered(a.index(), b.index());
            *between.entry(key).or_insert(0.0) += 1.0;
        }

        loop {
            let mut best: Option<((usize, usize), f64)> = None;
            for (&(i, j), &count) in &between {
                let di = degree.get(&i).copied().unwrap_or(0.0);
                let dj = degree.get(&j).copied().unwrap_or(0.0);
                let gain = count / m - di * dj / (2.0 * m * m);
                if best.is_none_or(|(_, g)| gain > g) {
                    best = Some(((i, j), gain));
                }
            }
            let Some(((i, j), gain)) = best else { break };
            if gain <= 0.0 {
                break;
            }

            // Merge j into i.
            let moved = members.remove(&j).unwrap_or_default();
            members.entry(i).or_default().extend(moved);
            let dj = degree.remove(&j).unwrap_or(0.0);
            *degree.entry(i).or_insert(0.0) += dj;

            let mut rekeyed: HashMap<(usize, usize), f64> = HashMap::new();
            for ((a, b), count) in between.drain() {
                let a = if a == j { i } else { a };
                let b = if b == j { i } else { b };
                if a == b {
                    continue; // now internal
                }
                *rekeyed.entry(ordered(a, b)).or_insert(0.0) += count;
            }
            between = rekeyed;
        }
    }

    let mut communities: Vec<Community> = members
        .into_values()
        .map(|group| {
            let mut ids: Vec<String> = group
                .iter()
                .filter_map(|idx| snapshot.id_of(*idx).map(str::to_string))
                .collect();
            ids.sort();
            Community {
                id: 0,
                size: ids.len(),
                members: ids,
            }
        })
        .collect();
    communities.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.members.cmp(&b.members)));
    for (i, community) in communities.iter_mut().enumerate() {
        community.id = i;
    }
    communities
}

fn ordered(a: usize, b: usize) -> (usize, usize) {
    if a <= b { (a, b) } else { (b, a) }
}

// ---------------------------------------------------------------------------
// Relationship recommendation
// ---------------------------------------------------------------------------

/// A candidate node worth linking to, with its common-neighbor score.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipSuggestion {
    pub id: String,
    pub score: f64,
}

/// Recommend link candidates for a node: two-hop neighbors (excluding the
/// node and its direct neighbors) scored by the fraction of the node's
/// neighbors they share. Returns the top `k`.
pub fn recommend_relationships(
    snapshot: &GraphSnapshot,
    node_id: &str,
    k: usize,
) -> Vec<RelationshipSuggestion> {
    let Some(origin) = snapshot.node_index(node_id) else {
        return Vec::new();
    };
    let direct = snapshot.neighbor_set(origin);
    if direct.is_empty() {
        return Vec::new();
    }

    let mut scores: HashMap<NodeIndex, f64> = HashMap::new();
    for neighbor in &direct {
        for candidate in snapshot.neighbor_set(*neighbor) {
            if candidate == origin || direct.contains(&candidate) {
                continue;
            }
            let common = snapshot
                .neighbor_set(candidate)
                .intersection(&direct)
                .count();
            scores.insert(candidate, common as f64 / direct.len() as f64);
        }
    }

    let mut results: Vec<RelationshipSuggestion> = scores
        .into_iter()
        .filter_map(|(idx, score)| {
            Some(RelationshipSuggestion {
                id: snapshot.id_of(idx)?.to_string(),
                score,
            })
        })
        .collect();
    sort_scored(&mut results, |r| r.score, |r| &r.id);
    results.truncate(k);
    results
}

/// Sort by score descending, id ascending for equal scores.
fn sort_scored<T>(items: &mut [T], score: impl Fn(&T) -> f64, id: impl Fn(&T) -> &str) {
    items.sort_by(|a, b| {
        score(b)
            .partial_cmp(&score(a))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| id(a).cmp(id(b)))
    });
}
