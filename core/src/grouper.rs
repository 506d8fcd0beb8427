//! Dependency grouping: topologically bucket issues into parallel-safe
//! execution levels.
//!
//! Depth of an issue is `1 + max(depth of its dependencies)`; leaves have
//! depth 0. Issues sharing a depth never depend on each other, so a bucket
//! can run concurrently. Within a bucket issues are sorted numerically only
//! to keep logs and tests stable.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use sprint_protocol::SprintIssue;

/// One parallel-safe level.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionGroup {
    pub group: usize,
    pub issues: Vec<u32>,
}

#[derive(Debug, thiserror::Error)]
pub enum GrouperError {
    #[error("dependency cycle detected: {chain}")]
    CycleDetected { chain: String },
}

/// Report dependencies that reference issues outside the plan. Dangling
/// references are tolerated (the edge is ignored) but worth surfacing.
pub fn validate_dependencies(issues: &[SprintIssue]) -> Vec<String> {
    let known: BTreeSet<u32> = issues.iter().map(|i| i.number).collect();
    let mut warnings = Vec::new();
    for issue in issues {
        for dep in &issue.depends_on {
            if !known.contains(dep) {
                warnings.push(format!(
                    "issue #{} depends on #{dep}, which is not in this sprint; ignoring",
                    issue.number
                ));
            }
        }
    }
    warnings
}

/// Group issues into dependency-ordered execution levels.
pub fn group_issues(issues: &[SprintIssue]) -> Result<Vec<ExecutionGroup>, GrouperError> {
    let known: BTreeSet<u32> = issues.iter().map(|i| i.number).collect();
    // Edges filtered to those within the issue set.
    let deps: HashMap<u32, Vec<u32>> = issues
        .iter()
        .map(|issue| {
            let filtered: Vec<u32> = issue
                .depends_on
                .iter()
                .copied()
                .filter(|dep| known.contains(dep))
                .collect();
            (issue.number, filtered)
        })
        .collect();

    detect_cycles(&known, &deps)?;

    let mut depths: HashMap<u32, usize> = HashMap::new();
    for &number in &known {
        depth_of(number, &deps, &mut depths);
    }

    let mut buckets: BTreeMap<usize, Vec<u32>> = BTreeMap::new();
    for (&number, &depth) in &depths {
        buckets.entry(depth).or_default().push(number);
    }

    Ok(buckets
        .into_iter()
        .map(|(group, mut numbers)| {
            numbers.sort_unstable();
            ExecutionGroup {
                group,
                issues: numbers,
            }
        })
        .collect())
}

fn depth_of(number: u32, deps: &HashMap<u32, Vec<u32>>, memo: &mut HashMap<u32, usize>) -> usize {
    if let Some(&depth) = memo.get(&number) {
        return depth;
    }
    let depth = deps
        .get(&number)
        .map(|dependencies| {
            dependencies
                .iter()
                .map(|&dep| depth_of(dep, deps, memo) + 1)
                .max()
                .unwrap_or(0)
        })
        .unwrap_or(0);
    memo.insert(number, depth);
    depth
}

/// DFS colouring; on a back edge, the error message carries the full cycle
/// in chain form, e.g. `1 → 2 → 1`.
fn detect_cycles(
    known: &BTreeSet<u32>,
    deps: &HashMap<u32, Vec<u32>>,
) -> Result<(), GrouperError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Colour {
        White,
        Grey,
        Black,
    }

    fn visit(
        number: u32,
        deps: &HashMap<u32, Vec<u32>>,
        colours: &mut HashMap<u32, Colour>,
        path: &mut Vec<u32>,
    ) -> Result<(), GrouperError> {
        colours.insert(number, Colour::Grey);
        path.push(number);

        for &dep in deps.get(&number).map(Vec::as_slice).unwrap_or_default() {
            match colours.get(&dep).copied().unwrap_or(Colour::White) {
                Colour::Grey => {
                    let start = path.iter().position(|&n| n == dep).unwrap_or(0);
                    let chain: Vec<String> = path[start..]
                        .iter()
                        .chain(std::iter::once(&dep))
                        .map(u32::to_string)
                        .collect();
                    return Err(GrouperError::CycleDetected {
                        chain: chain.join(" → "),
                    });
                }
                Colour::White => visit(dep, deps, colours, path)?,
                Colour::Black => {}
            }
        }

        path.pop();
        colours.insert(number, Colour::Black);
        Ok(())
    }

    let mut colours = HashMap::new();
    for &number in known {
        if colours.get(&number).copied().unwrap_or(Colour::White) == Colour::White {
            visit(number, deps, &mut colours, &mut Vec::new())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn issue(number: u32, deps: &[u32]) -> SprintIssue {
        SprintIssue {
            number,
            title: format!("issue {number}"),
            ice_score: 0.0,
            depends_on: deps.iter().copied().collect(),
            acceptance_criteria: String::new(),
            expected_files: Vec::new(),
            story_points: 1,
        }
    }

    #[test]
    fn diamond_groups_by_depth() {
        // 1 <- 2, 1 <- 3, {2,3} <- 4
        let issues = vec![issue(1, &[]), issue(2, &[1]), issue(3, &[1]), issue(4, &[2, 3])];
        let groups = group_issues(&issues).unwrap();
        let levels: Vec<Vec<u32>> = groups.iter().map(|g| g.issues.clone()).collect();
        assert_eq!(levels, vec![vec![1], vec![2, 3], vec![4]]);
    }

    #[test]
    fn fan_out_after_single_root() {
        let issues = vec![issue(1, &[]), issue(2, &[1]), issue(3, &[1])];
        let groups = group_issues(&issues).unwrap();
        let levels: Vec<Vec<u32>> = groups.iter().map(|g| g.issues.clone()).collect();
        assert_eq!(levels, vec![vec![1], vec![2, 3]]);
    }

    #[test]
    fn every_edge_crosses_groups_forward() {
        let issues = vec![
            issue(10, &[]),
            issue(11, &[10]),
            issue(12, &[10, 11]),
            issue(13, &[]),
            issue(14, &[13, 12]),
        ];
        let groups = group_issues(&issues).unwrap();
        let depth_of = |n: u32| groups.iter().position(|g| g.issues.contains(&n)).unwrap();

        for issue in &issues {
            for dep in &issue.depends_on {
                assert!(
                    depth_of(issue.number) > depth_of(*dep),
                    "edge {} -> {} not ordered",
                    dep,
                    issue.number
                );
            }
        }
        // No two issues in a bucket share an edge.
        for group in &groups {
            for issue in issues.iter().filter(|i| group.issues.contains(&i.number)) {
                for dep in &issue.depends_on {
                    assert!(!group.issues.contains(dep));
                }
            }
        }
    }

    #[test]
    fn two_node_cycle_reports_chain() {
        let issues = vec![issue(1, &[2]), issue(2, &[1])];
        let err = group_issues(&issues).unwrap_err();
        let message = err.to_string();
        assert!(
            message.contains("1 → 2 → 1") || message.contains("2 → 1 → 2"),
            "unexpected chain in: {message}"
        );
    }

    #[test]
    fn longer_cycle_reports_full_chain() {
        let issues = vec![issue(1, &[3]), issue(2, &[1]), issue(3, &[2])];
        let err = group_issues(&issues).unwrap_err();
        let GrouperError::CycleDetected { chain } = err;
        let nodes: Vec<&str> = chain.split(" → ").collect();
        assert_eq!(nodes.len(), 4);
        assert_eq!(nodes.first(), nodes.last());
    }

    #[test]
    fn dangling_dependencies_are_ignored_but_reported() {
        let issues = vec![issue(1, &[99]), issue(2, &[1])];
        let warnings = validate_dependencies(&issues);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("#99"));

        let groups = group_issues(&issues).unwrap();
        let levels: Vec<Vec<u32>> = groups.iter().map(|g| g.issues.clone()).collect();
        assert_eq!(levels, vec![vec![1], vec![2]]);
    }

    #[test]
    fn buckets_are_numerically_sorted() {
        let issues = vec![issue(9, &[]), issue(3, &[]), issue(7, &[])];
        let groups = group_issues(&issues).unwrap();
        assert_eq!(groups[0].issues, vec![3, 7, 9]);
    }
}
