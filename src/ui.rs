use colored::Colorize;
use plan::{Reason, ValidityTree};

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

// ============================================================================
// Convergence Reports
// ============================================================================

/// One line for a resource whose own query or apply failed
pub fn describe_failure(tree: &ValidityTree) -> String {
    let what = match tree.reason {
        Reason::QueryError => "could not be queried",
        _ => "failed to apply",
    };
    match &tree.observed_error {
        Some(err) => format!("{} {what}: {err}", tree.resource_id),
        None => format!("{} {what}", tree.resource_id),
    }
}

/// Number of resources changed during convergence, nested plans included
pub fn count_updated(tree: &ValidityTree) -> usize {
    let own = usize::from(tree.updated && tree.children.is_empty());
    own + tree.children.iter().map(count_updated).sum::<usize>()
}

/// Print the outcome of a convergence
pub fn report(tree: &ValidityTree) {
    let failures = tree.failures();
    if failures.is_empty() {
        success(&format!(
            "{} converged, {} resource(s) changed",
            tree.resource_id,
            count_updated(tree)
        ));
        return;
    }
    header("Failures");
    for failure in failures {
        error(&describe_failure(failure));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_failure() {
        let apply = ValidityTree::invalid("install:docker", Reason::ApplyError, vec![])
            .with_error("yum exited with 1");
        assert_eq!(
            describe_failure(&apply),
            "install:docker failed to apply: yum exited with 1"
        );

        let query = ValidityTree::inconclusive("os", Reason::QueryError, vec![]);
        assert_eq!(describe_failure(&query), "os could not be queried");
    }

    #[test]
    fn test_count_updated_counts_leaves() {
        let cri = ValidityTree::valid("install:cri", true, vec![]).with_children(vec![
            ValidityTree::valid("install:docker", true, vec![]),
            ValidityTree::valid("service-init:docker-service", false, vec![]),
        ]);
        let base = ValidityTree::valid("install:base", false, vec![])
            .with_children(vec![ValidityTree::valid("install:lvm2", false, vec![])]);
        let root = ValidityTree::valid("node", true, vec![]).with_children(vec![base, cri]);
        assert_eq!(count_updated(&root), 1);
    }
}
