//! Property-based tests for workspace reconciliation.
//!
//! Random source and target trees are generated from a tiny name alphabet so
//! that they overlap heavily: shared files, changed files, and paths that are
//! a file on one side and a directory on the other.

#[cfg(test)]
mod proptest_tests {
    use std::fs;
    use std::path::Path;

    use proptest::prelude::*;
    use tempfile::TempDir;

    use crate::reconcile::reconcile;
    use crate::snapshot::Snapshot;

    /// (relative path, content) pairs
    fn tree_strategy() -> impl Strategy<Value = Vec<(String, String)>> {
        let segment = prop::sample::select(vec!["a", "b", "c"]);
        let path = prop::collection::vec(segment, 1..4).prop_map(|parts| parts.join("/"));
        let content = prop::sample::select(vec!["x", "y", "z"]);
        prop::collection::vec((path, content.prop_map(str::to_string)), 0..12)
    }

    /// Materializes a tree, skipping files that clash with earlier entries.
    fn build_tree(root: &Path, files: &[(String, String)]) {
        fs::create_dir_all(root).unwrap();
        for (rel, content) in files {
            let path = root.join(rel);
            let parent = path.parent().unwrap();
            if fs::create_dir_all(parent).is_err() || path.is_dir() {
                continue;
            }
            fs::write(&path, content).unwrap();
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Property: after reconciling, the workspace snapshots exactly like the upload
        #[test]
        fn reconcile_converges_to_source(
            source_files in tree_strategy(),
            target_files in tree_strategy(),
        ) {
            let temp_dir = TempDir::new().unwrap();
            let source = temp_dir.path().join("src");
            let target = temp_dir.path().join("ctx");
            build_tree(&source, &source_files);
            build_tree(&target, &target_files);
            Snapshot::save(&target).unwrap();
            let expected = Snapshot::compute(&source).unwrap();

            reconcile(&source, &target).unwrap();

            prop_assert_eq!(Snapshot::compute(&target).unwrap(), expected.clone());
            prop_assert_eq!(Snapshot::read(&target).unwrap().unwrap(), expected);
        }

        /// Property: reconciling the same upload twice changes nothing the second time
        #[test]
        fn reconcile_is_idempotent(
            source_files in tree_strategy(),
            target_files in tree_strategy(),
        ) {
            let temp_dir = TempDir::new().unwrap();
            let first = temp_dir.path().join("src1");
            let second = temp_dir.path().join("src2");
            let target = temp_dir.path().join("ctx");
            build_tree(&first, &source_files);
            build_tree(&second, &source_files);
            build_tree(&target, &target_files);
            Snapshot::save(&target).unwrap();

            reconcile(&first, &target).unwrap();
            let stats = reconcile(&second, &target).unwrap();

            prop_assert_eq!(stats.changed, 0);
            prop_assert_eq!(stats.total, stats.unchanged);
        }
    }
}
