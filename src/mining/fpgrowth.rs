//! FP-Growth frequent itemset mining
//!
//! Items are dense `usize` ids assigned by the caller. Transactions are
//! compressed into a prefix tree ordered by descending item frequency and
//! mined recursively through conditional pattern bases, so no candidate
//! generation pass over the data is needed.

use std::collections::HashMap;

/// Association rule with a single-item consequent
#[derive(Debug, Clone, PartialEq)]
pub struct AssociationRule {
    /// Sorted antecedent item ids
    pub antecedent: Vec<usize>,
    pub consequent: usize,
    /// Support of antecedent ∪ consequent
    pub support: f64,
    /// support(rule) / support(antecedent)
    pub confidence: f64,
    /// confidence / support(consequent)
    pub lift: f64,
}

/// Frequent itemsets with their absolute counts
#[derive(Debug, Clone, Default)]
pub struct FrequentItemsets {
    transactions: usize,
    counts: HashMap<Vec<usize>, usize>,
}

impl FrequentItemsets {
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Relative support of a frequent itemset (any item order)
    pub fn support(&self, itemset: &[usize]) -> Option<f64> {
        let mut key = itemset.to_vec();
        key.sort_unstable();
        self.counts
            .get(&key)
            .map(|&count| count as f64 / self.transactions as f64)
    }

    /// Sorted itemsets with their relative support
    pub fn iter(&self) -> impl Iterator<Item = (&[usize], f64)> {
        let n = self.transactions as f64;
        self.counts
            .iter()
            .map(move |(items, &count)| (items.as_slice(), count as f64 / n))
    }

    /// Derive rules `antecedent => c` for every frequent itemset containing a
    /// consequent item `c` accepted by `is_consequent`
    ///
    /// The antecedent is the rest of the itemset and must be non-empty.
    /// Rules below `min_confidence` are dropped.
    pub fn rules<F>(&self, min_confidence: f64, is_consequent: F) -> Vec<AssociationRule>
    where
        F: Fn(usize) -> bool,
    {
        let mut rules = Vec::new();

        for (itemset, &count) in &self.counts {
            if itemset.len() < 2 {
                continue;
            }
            let support = count as f64 / self.transactions as f64;

            for (pos, &consequent) in itemset.iter().enumerate() {
                if !is_consequent(consequent) {
                    continue;
                }

                let mut antecedent = itemset.clone();
                antecedent.remove(pos);

                // Downward closure guarantees both subsets are frequent
                let (Some(antecedent_support), Some(consequent_support)) =
                    (self.support(&antecedent), self.support(&[consequent]))
                else {
                    continue;
                };

                let confidence = support / antecedent_support;
                if confidence < min_confidence {
                    continue;
                }

                rules.push(AssociationRule {
                    antecedent,
                    consequent,
                    support,
                    confidence,
                    lift: confidence / consequent_support,
                });
            }
        }

        rules
    }
}

/// FP-Growth miner
#[derive(Debug, Clone)]
pub struct FpGrowth {
    min_support: f64,
}

impl FpGrowth {
    pub fn new(min_support: f64) -> Self {
        Self { min_support }
    }

    /// Minimum absolute count satisfying `count / n >= min_support`
    fn min_count(&self, n: usize) -> usize {
        let exact = self.min_support * n as f64;
        // Tolerate float noise such as 0.1 * 30 = 3.0000000000000004
        ((exact - 1e-9).ceil() as usize).max(1)
    }

    /// Mine all itemsets with support ≥ `min_support`
    pub fn fit(&self, transactions: &[Vec<usize>]) -> FrequentItemsets {
        let n = transactions.len();
        let mut result = FrequentItemsets {
            transactions: n,
            counts: HashMap::new(),
        };
        if n == 0 {
            return result;
        }

        let weighted: Vec<(Vec<usize>, usize)> = transactions
            .iter()
            .map(|t| {
                let mut items = t.clone();
                items.sort_unstable();
                items.dedup();
                (items, 1)
            })
            .collect();

        let min_count = self.min_count(n);
        let tree = FpTree::build(&weighted, min_count);
        mine_tree(&tree, &[], min_count, &mut result.counts);
        result
    }
}

#[derive(Debug)]
struct FpNode {
    item: usize,
    count: usize,
    parent: Option<usize>,
    children: HashMap<usize, usize>,
}

/// Prefix tree plus header table of node indices per item
#[derive(Debug)]
struct FpTree {
    nodes: Vec<FpNode>,
    roots: HashMap<usize, usize>,
    header: HashMap<usize, Vec<usize>>,
    /// Frequent items with their counts, least frequent first
    order: Vec<(usize, usize)>,
}

impl FpTree {
    fn build(transactions: &[(Vec<usize>, usize)], min_count: usize) -> Self {
        let mut item_counts: HashMap<usize, usize> = HashMap::new();
        for (items, weight) in transactions {
            for &item in items {
                *item_counts.entry(item).or_insert(0) += weight;
            }
        }
        item_counts.retain(|_, count| *count >= min_count);

        let mut tree = FpTree {
            nodes: Vec::new(),
            roots: HashMap::new(),
            header: HashMap::new(),
            order: item_counts.iter().map(|(&i, &c)| (i, c)).collect(),
        };
        tree.order.sort_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)));

        for (items, weight) in transactions {
            let mut path: Vec<usize> = items
                .iter()
                .copied()
                .filter(|item| item_counts.contains_key(item))
                .collect();
            // Most frequent first, ties by id
            path.sort_by(|a, b| item_counts[b].cmp(&item_counts[a]).then(a.cmp(b)));
            tree.insert(&path, *weight);
        }

        tree
    }

    fn insert(&mut self, path: &[usize], weight: usize) {
        let mut parent: Option<usize> = None;
        for &item in path {
            let existing = match parent {
                None => self.roots.get(&item).copied(),
                Some(p) => self.nodes[p].children.get(&item).copied(),
            };

            let idx = match existing {
                Some(idx) => {
                    self.nodes[idx].count += weight;
                    idx
                }
                None => {
                    let idx = self.nodes.len();
                    self.nodes.push(FpNode {
                        item,
                        count: weight,
                        parent,
                        children: HashMap::new(),
                    });
                    match parent {
                        None => {
                            self.roots.insert(item, idx);
                        }
                        Some(p) => {
                            self.nodes[p].children.insert(item, idx);
                        }
                    }
                    self.header.entry(item).or_default().push(idx);
                    idx
                }
            };
            parent = Some(idx);
        }
    }

    /// Prefix paths leading to each occurrence of `item`, weighted by its count
    fn conditional_base(&self, item: usize) -> Vec<(Vec<usize>, usize)> {
        let Some(occurrences) = self.header.get(&item) else {
            return Vec::new();
        };

        occurrences
            .iter()
            .filter_map(|&idx| {
                let node = &self.nodes[idx];
                let mut prefix = Vec::new();
                let mut cursor = node.parent;
                while let Some(p) = cursor {
                    prefix.push(self.nodes[p].item);
                    cursor = self.nodes[p].parent;
                }
                if prefix.is_empty() {
                    None
                } else {
                    prefix.sort_unstable();
                    Some((prefix, node.count))
                }
            })
            .collect()
    }
}

fn mine_tree(
    tree: &FpTree,
    suffix: &[usize],
    min_count: usize,
    out: &mut HashMap<Vec<usize>, usize>,
) {
    for &(item, count) in &tree.order {
        let mut itemset = suffix.to_vec();
        itemset.push(item);
        itemset.sort_unstable();
        out.insert(itemset.clone(), count);

        let base = tree.conditional_base(item);
        if base.is_empty() {
            continue;
        }
        let conditional = FpTree::build(&base, min_count);
        if !conditional.order.is_empty() {
            mine_tree(&conditional, &itemset, min_count, out);
        }
    }
}
